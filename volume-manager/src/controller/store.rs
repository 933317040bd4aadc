// SPDX-License-Identifier: GPL-3.0-only

//! VolumeConfig store kept across restarts.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use volume_contracts::VolumeError;
use volume_types::{EncryptionProvider, MountStatus, VolumeConfig, VolumePhase, VolumeStatus};

use super::state::VolumeEntry;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVolume {
    pub config: VolumeConfig,

    /// Provider the volume was opened with; wins over the declared one.
    #[serde(default)]
    pub encryption_provider: EncryptionProvider,
    #[serde(default)]
    pub mount: Option<MountStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    pub volumes: BTreeMap<String, StoredVolume>,
}

impl StoredState {
    pub fn from_entries(entries: &BTreeMap<String, VolumeEntry>) -> Self {
        let volumes = entries
            .iter()
            .map(|(id, entry)| {
                let stored = StoredVolume {
                    config: entry.config.clone(),
                    encryption_provider: entry.status.encryption_provider,
                    mount: entry.mount.clone().or_else(|| entry.previous_mount.clone()),
                };
                (id.clone(), stored)
            })
            .collect();
        Self { volumes }
    }

    /// Entries to resume from. Every volume restarts at `Waiting`.
    pub fn into_entries(self) -> BTreeMap<String, VolumeEntry> {
        self.volumes
            .into_iter()
            .map(|(id, stored)| {
                let entry = VolumeEntry {
                    status: VolumeStatus {
                        phase: VolumePhase::Waiting,
                        encryption_provider: stored.encryption_provider,
                        ..Default::default()
                    },
                    previous_mount: stored.mount,
                    ..VolumeEntry::new(stored.config, None)
                };
                (id, entry)
            })
            .collect()
    }
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> VolumeError {
    VolumeError::io(format!("{}: {err}", path.display()))
}

/// A missing file is an empty store.
pub async fn load(path: &Path) -> Result<StoredState> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no stored volume state");
            return Ok(StoredState::default());
        }
        Err(err) => return Err(io_error(path, err)),
    };
    serde_json::from_str(&text).map_err(|err| io_error(path, err))
}

/// Writes a sibling temporary file and renames it over `path`.
pub async fn save(path: &Path, state: &StoredState) -> Result<()> {
    let json = serde_json::to_vec_pretty(state).map_err(|err| io_error(path, err))?;
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|err| io_error(dir, err))?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|err| io_error(&tmp, err))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|err| io_error(path, err))?;
    debug!(path = %path.display(), volumes = state.volumes.len(), "saved volume state");
    Ok(())
}
