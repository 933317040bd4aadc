// SPDX-License-Identifier: GPL-3.0-only

//! Observed state resources emitted by the controller

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encryption::EncryptionProvider;
use crate::error::VolumeErrorKind;
use crate::volume::FilesystemType;

/// Lifecycle phase of a volume.
///
/// Bring-up walks `Waiting → Located → Provisioned → EncryptionOpened →
/// Formatted → Mounted → Ready`; teardown walks back down to `Closed`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum VolumePhase {
    #[default]
    Waiting,
    /// Located nowhere and not provisionable.
    Missing,
    Located,
    Provisioned,
    EncryptionOpened,
    Formatted,
    Mounted,
    Ready,
    Failed,
    Closed,
}

impl VolumePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            VolumePhase::Waiting => "waiting",
            VolumePhase::Missing => "missing",
            VolumePhase::Located => "located",
            VolumePhase::Provisioned => "provisioned",
            VolumePhase::EncryptionOpened => "encryption_opened",
            VolumePhase::Formatted => "formatted",
            VolumePhase::Mounted => "mounted",
            VolumePhase::Ready => "ready",
            VolumePhase::Failed => "failed",
            VolumePhase::Closed => "closed",
        }
    }
}

impl fmt::Display for VolumePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeStatus {
    pub phase: VolumePhase,

    /// Phase to resume from after a failure.
    pub pre_fail_phase: Option<VolumePhase>,

    /// Raw block device
    pub location: String,

    /// Device to mount: the mapper device when encrypted, else `location`
    pub mount_location: String,
    pub parent_location: String,
    pub partition_index: u32,
    pub partition_uuid: String,
    pub filesystem: FilesystemType,
    pub size: u64,
    pub pretty_size: String,
    pub encryption_provider: EncryptionProvider,

    /// Key slots that could not be brought in line with the declared keys.
    pub encryption_failed_syncs: Vec<String>,
    pub mount_target: String,
    pub error_message: String,
    pub error_kind: Option<VolumeErrorKind>,
    pub retry_after: Option<DateTime<Utc>>,
}

impl VolumeStatus {
    pub fn clear_error(&mut self) {
        self.error_message.clear();
        self.error_kind = None;
        self.retry_after = None;
        self.pre_fail_phase = None;
    }
}

/// Asks for a volume to be mounted on behalf of `requester`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMountRequest {
    pub id: String,
    pub volume_id: String,
    pub requester: String,
    pub read_only: bool,
}

/// A realized mount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountStatus {
    pub id: String,
    pub volume_id: String,
    pub source: String,
    pub target: String,
    pub filesystem: FilesystemType,
    pub read_only: bool,
    pub project_quota_support: bool,
    pub encrypted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bring_up_phases_are_ordered() {
        assert!(VolumePhase::Located < VolumePhase::Provisioned);
        assert!(VolumePhase::EncryptionOpened < VolumePhase::Formatted);
        assert!(VolumePhase::Mounted < VolumePhase::Ready);
    }

    #[test]
    fn clearing_errors_keeps_location() {
        let mut status = VolumeStatus {
            phase: VolumePhase::Failed,
            pre_fail_phase: Some(VolumePhase::Located),
            location: "/dev/sda1".into(),
            error_message: "boom".into(),
            error_kind: Some(VolumeErrorKind::Io),
            ..Default::default()
        };
        status.clear_error();
        assert_eq!(status.location, "/dev/sda1");
        assert!(status.error_kind.is_none());
        assert!(status.pre_fail_phase.is_none());
    }
}
