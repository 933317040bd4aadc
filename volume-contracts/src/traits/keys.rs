// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Request body for KMS seal and unseal calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmsRequest {
    pub node_uuid: String,
    /// Base64 per-volume nonce
    pub nonce: String,
    pub slot: u32,
    /// Base64 payload: the plain key for seal, the sealed key for unseal
    pub data: String,
}

/// Key management service reached over HTTPS.
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Returns the sealed form of `request.data`.
    async fn seal(&self, endpoint: &str, request: &KmsRequest) -> Result<Vec<u8>>;

    /// Returns the plain key for the sealed `request.data`.
    async fn unseal(&self, endpoint: &str, request: &KmsRequest) -> Result<Vec<u8>>;
}

/// PCR holding the Secure Boot policy measurement.
pub const SECURE_BOOT_PCR: u32 = 7;

#[async_trait]
pub trait TpmSealer: Send + Sync {
    async fn secure_boot_enabled(&self) -> Result<bool>;

    /// Seals `key` to the current value of `pcr`.
    async fn seal(&self, key: &[u8], pcr: u32) -> Result<Vec<u8>>;

    /// Fails with `TpmUnsealFailure` when the PCR no longer matches.
    async fn unseal(&self, sealed: &[u8], pcr: u32) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait NodeIdentity: Send + Sync {
    /// Stable hardware UUID of the node.
    async fn node_uuid(&self) -> Result<String>;
}
