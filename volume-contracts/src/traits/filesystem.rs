// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use volume_types::FilesystemType;

use crate::Result;

/// Signature name blkid reports for LUKS headers.
pub const LUKS_SIGNATURE: &str = "crypto_LUKS";

/// What a probe found on a block device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Signature name (e.g., "xfs", "crypto_LUKS")
    pub name: String,
    pub label: String,
    pub uuid: String,
}

impl ProbeResult {
    pub fn is_luks(&self) -> bool {
        self.name == LUKS_SIGNATURE
    }

    pub fn filesystem(&self) -> Option<FilesystemType> {
        FilesystemType::from_probe(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatRequest {
    pub kind: FilesystemType,
    pub label: String,
}

#[async_trait]
pub trait FilesystemOps: Send + Sync {
    /// `None` when the device carries no recognizable signature.
    async fn probe(&self, device: &str) -> Result<Option<ProbeResult>>;

    async fn format(&self, device: &str, request: &FormatRequest) -> Result<()>;
}
