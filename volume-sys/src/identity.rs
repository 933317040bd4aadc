// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use async_trait::async_trait;
use volume_contracts::{NodeIdentity, VolumeError};

use crate::SysError;

const PRODUCT_UUID: &str = "/sys/class/dmi/id/product_uuid";

/// Node UUID from the SMBIOS product UUID.
#[derive(Debug, Clone)]
pub struct DmiIdentity {
    path: PathBuf,
}

impl DmiIdentity {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(PRODUCT_UUID),
        }
    }
}

impl Default for DmiIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeIdentity for DmiIdentity {
    async fn node_uuid(&self) -> Result<String, VolumeError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(SysError::from)?;
        let uuid = raw.trim().to_lowercase();
        if uuid.is_empty() {
            return Err(SysError::OperationFailed(format!(
                "{} is empty",
                self.path.display()
            ))
            .into());
        }
        Ok(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_and_normalizes() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "4C4C4544-0039-3010-8048-B4C04F4B4E32\n").unwrap();
        let identity = DmiIdentity {
            path: file.path().to_path_buf(),
        };
        assert_eq!(
            identity.node_uuid().await.unwrap(),
            "4c4c4544-0039-3010-8048-b4c04f4b4e32"
        );
    }

    #[tokio::test]
    async fn blank_file_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let identity = DmiIdentity {
            path: file.path().to_path_buf(),
        };
        assert!(identity.node_uuid().await.is_err());
    }
}
