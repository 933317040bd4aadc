// SPDX-License-Identifier: GPL-3.0-only

//! VolumeConfig spec sections

use serde::{Deserialize, Serialize};
use volume_cel::Expression;

use crate::encryption::EncryptionSpec;
use crate::volume::{FilesystemType, VolumeType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfigSpec {
    /// Volume this one is layered on; empty for top-level volumes.
    pub parent_id: String,

    #[serde(rename = "type")]
    pub ty: VolumeType,

    pub provisioning: ProvisioningSpec,
    pub encryption: EncryptionSpec,
    pub locator: LocatorSpec,
    pub mount: MountSpec,
    pub symlink: SymlinkSpec,
}

/// How an already existing volume is found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorSpec {
    /// Volume locator expression.
    #[serde(rename = "match")]
    pub match_: Expression,

    /// Disk locator expression, for whole-disk volumes.
    pub disk_match: Expression,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningSpec {
    /// Provisioning phase; lower waves complete first.
    pub wave: i32,
    pub disk_selector: DiskSelector,
    pub partition_spec: PartitionSpec,
    pub filesystem_spec: FilesystemSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskSelector {
    /// Disk locator expression.
    #[serde(rename = "match")]
    pub match_: Expression,

    /// Source of an external volume (virtiofs tag, `host:/path`).
    pub external: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionSpec {
    pub min_size: u64,
    pub max_size: u64,
    /// Percentage of the disk, 0 when unset.
    pub relative_max_size: u64,
    /// `max_size` is space to leave free at the end of the disk.
    pub negative_max_size: bool,
    pub grow: bool,
    pub label: String,
    pub type_uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemSpec {
    #[serde(rename = "type")]
    pub kind: FilesystemType,
    pub label: String,
}

/// Extra mount data, passed as `name=value` (or `name` when empty).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountParameter {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl MountParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountSpec {
    pub target_path: String,
    pub selinux_label: String,
    pub project_quota_support: bool,
    /// Volume whose mount `target_path` is resolved against.
    pub parent_id: String,
    pub file_mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub recursive_relabel: bool,
    /// For directories: sibling path to bind-mount at the target.
    pub bind_target: Option<String>,
    pub read_only: bool,
    pub disable_access_time: bool,
    /// `nosuid,nodev,noexec`
    pub secure: bool,
    pub parameters: Vec<MountParameter>,
}

impl MountSpec {
    pub fn is_empty(&self) -> bool {
        self.target_path.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymlinkSpec {
    pub symlink_target_path: String,
    /// Replace whatever already exists at the mount target.
    pub force: bool,
}
