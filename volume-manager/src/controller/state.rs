// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use volume_types::{
    MountStatus, VolumeConfig, VolumeMountRequest, VolumePhase, VolumeStatus, VolumeType,
};

use crate::transform::parents;

/// Everything the controller tracks for one volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeEntry {
    pub config: VolumeConfig,
    pub status: VolumeStatus,
    pub mount_request: Option<VolumeMountRequest>,

    /// Mount realized by this process.
    pub mount: Option<MountStatus>,

    /// Mount recorded before a restart; only used to tear the volume down.
    pub previous_mount: Option<MountStatus>,

    /// Consecutive failures, drives the retry backoff.
    pub attempts: u32,
}

impl VolumeEntry {
    pub fn new(config: VolumeConfig, mount_request: Option<VolumeMountRequest>) -> Self {
        Self {
            config,
            status: VolumeStatus::default(),
            mount_request,
            mount: None,
            previous_mount: None,
            attempts: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn ty(&self) -> VolumeType {
        self.config.spec.ty
    }

    pub fn wave(&self) -> i32 {
        self.config.spec.provisioning.wave
    }

    pub fn phase(&self) -> VolumePhase {
        self.status.phase
    }

    /// Block volume whose partition may be created when it is not found.
    pub fn is_provisionable(&self) -> bool {
        self.ty() == VolumeType::Partition
            && !self.config.spec.provisioning.disk_selector.match_.is_zero()
    }

    /// Not yet bound to a block device.
    pub fn needs_location(&self) -> bool {
        match self.phase() {
            VolumePhase::Waiting | VolumePhase::Missing => true,
            VolumePhase::Failed => self
                .status
                .pre_fail_phase
                .is_none_or(|p| p <= VolumePhase::Missing),
            _ => false,
        }
    }

    /// Holds back higher provisioning waves.
    pub fn blocks_later_waves(&self) -> bool {
        if !self.is_provisionable() || !self.needs_location() {
            return false;
        }
        self.phase() != VolumePhase::Failed
            || self.status.error_kind.is_none_or(|kind| kind.is_retryable())
    }

    pub fn mount_target(&self) -> Option<&str> {
        self.mount.as_ref().map(|m| m.target.as_str())
    }
}

/// Longest parent chain above `id`; roots are 0.
pub fn depth(entries: &BTreeMap<String, VolumeEntry>, id: &str) -> usize {
    fn walk(entries: &BTreeMap<String, VolumeEntry>, id: &str, budget: usize) -> usize {
        if budget == 0 {
            return 0;
        }
        entries
            .get(id)
            .and_then(|entry| {
                parents(&entry.config)
                    .map(|parent| 1 + walk(entries, parent, budget - 1))
                    .max()
            })
            .unwrap_or(0)
    }
    walk(entries, id, entries.len())
}

/// Read-only view published after every tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub generation: u64,
    pub configs: Vec<VolumeConfig>,
    pub mount_requests: Vec<VolumeMountRequest>,
    pub statuses: BTreeMap<String, VolumeStatus>,
    pub mounts: Vec<MountStatus>,

    /// Why the last configuration was not applied.
    pub config_error: Option<String>,
}

impl Snapshot {
    pub fn from_entries(
        generation: u64,
        entries: &BTreeMap<String, VolumeEntry>,
        config_error: Option<String>,
    ) -> Self {
        Self {
            generation,
            configs: entries.values().map(|e| e.config.clone()).collect(),
            mount_requests: entries
                .values()
                .filter_map(|e| e.mount_request.clone())
                .collect(),
            statuses: entries
                .iter()
                .map(|(id, e)| (id.clone(), e.status.clone()))
                .collect(),
            mounts: entries.values().filter_map(|e| e.mount.clone()).collect(),
            config_error,
        }
    }

    pub fn status(&self, volume_id: &str) -> Option<&VolumeStatus> {
        self.statuses.get(volume_id)
    }

    pub fn phase(&self, volume_id: &str) -> Option<VolumePhase> {
        self.status(volume_id).map(|s| s.phase)
    }

    pub fn mount(&self, volume_id: &str) -> Option<&MountStatus> {
        self.mounts.iter().find(|m| m.volume_id == volume_id)
    }

    pub fn is_ready(&self, volume_id: &str) -> bool {
        self.phase(volume_id) == Some(VolumePhase::Ready)
    }

    /// Every volume reached `Ready`.
    pub fn all_ready(&self) -> bool {
        !self.statuses.is_empty()
            && self.statuses.values().all(|s| s.phase == VolumePhase::Ready)
    }
}
