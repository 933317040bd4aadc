// SPDX-License-Identifier: GPL-3.0-only

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;
use volume_config::Config;
use volume_contracts::{ConfigSource, VolumeError};

use crate::SysError;

/// Multi-document YAML configuration read from a file on every load.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn load(&self) -> Result<Config, VolumeError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no configuration file");
                return Ok(Config::default());
            }
            Err(err) => return Err(SysError::from(err).into()),
        };
        Ok(Config::parse(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileConfigSource::new(dir.path().join("machine.yaml"));
        assert!(source.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reads_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.yaml");
        std::fs::write(
            &path,
            "apiVersion: v1alpha1\nkind: UserVolumeConfig\nname: data\nprovisioning:\n  diskSelector:\n    match: '!system_disk'\n  minSize: 1GiB\n",
        )
        .unwrap();

        let config = FileConfigSource::new(&path).load().await.unwrap();
        assert_eq!(config.user_volumes().count(), 1);
    }

    #[tokio::test]
    async fn unknown_kind_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.yaml");
        std::fs::write(&path, "apiVersion: v1alpha1\nkind: Bogus\nname: x\n").unwrap();

        let err = FileConfigSource::new(&path).load().await.unwrap_err();
        assert_eq!(err.kind, volume_types::VolumeErrorKind::InvalidConfig);
    }
}
