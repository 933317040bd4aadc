// SPDX-License-Identifier: GPL-3.0-only

//! The emitted VolumeConfig resource and its discriminators

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::spec::VolumeConfigSpec;

/// How a volume occupies storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
    /// Contiguous region of a disk, addressed by partition label
    #[default]
    Partition,
    /// The whole block device
    Disk,
    /// Plain directory on a parent volume
    Directory,
    Symlink,
    Overlay,
    Tmpfs,
    /// Sourced from outside the node (virtiofs, NFS)
    External,
}

impl VolumeType {
    /// Kinds backed by a local block device.
    pub fn is_block(self) -> bool {
        matches!(self, VolumeType::Partition | VolumeType::Disk)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VolumeType::Partition => "partition",
            VolumeType::Disk => "disk",
            VolumeType::Directory => "directory",
            VolumeType::Symlink => "symlink",
            VolumeType::Overlay => "overlay",
            VolumeType::Tmpfs => "tmpfs",
            VolumeType::External => "external",
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filesystem carried by (or to be created on) a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemType {
    #[default]
    None,
    Xfs,
    Vfat,
    Ext4,
    Iso9660,
    Swap,
    Virtiofs,
    Nfs,
}

impl FilesystemType {
    pub fn as_str(self) -> &'static str {
        match self {
            FilesystemType::None => "none",
            FilesystemType::Xfs => "xfs",
            FilesystemType::Vfat => "vfat",
            FilesystemType::Ext4 => "ext4",
            FilesystemType::Iso9660 => "iso9660",
            FilesystemType::Swap => "swap",
            FilesystemType::Virtiofs => "virtiofs",
            FilesystemType::Nfs => "nfs",
        }
    }

    /// Maps a probed signature name (`blkid TYPE=`) back to a filesystem.
    pub fn from_probe(name: &str) -> Option<Self> {
        Some(match name {
            "xfs" => FilesystemType::Xfs,
            "vfat" | "fat" | "msdos" => FilesystemType::Vfat,
            "ext4" => FilesystemType::Ext4,
            "iso9660" => FilesystemType::Iso9660,
            "swap" => FilesystemType::Swap,
            "virtiofs" => FilesystemType::Virtiofs,
            "nfs" | "nfs4" => FilesystemType::Nfs,
            _ => return None,
        })
    }

    /// Whether the filesystem is created locally by a formatter.
    pub fn is_formattable(self) -> bool {
        matches!(
            self,
            FilesystemType::Xfs | FilesystemType::Vfat | FilesystemType::Ext4 | FilesystemType::Swap
        )
    }
}

impl fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access policy class of a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeLabel {
    #[default]
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "existing")]
    Existing,
    #[serde(rename = "external")]
    External,
    #[serde(rename = "swap")]
    Swap,
}

impl VolumeLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            VolumeLabel::System => "system",
            VolumeLabel::User => "user",
            VolumeLabel::Raw => "raw",
            VolumeLabel::Existing => "existing",
            VolumeLabel::External => "external",
            VolumeLabel::Swap => "swap",
        }
    }
}

impl fmt::Display for VolumeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative desired state of one volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub id: String,
    pub label: VolumeLabel,
    pub spec: VolumeConfigSpec,
}

impl VolumeConfig {
    pub fn new(id: impl Into<String>, label: VolumeLabel) -> Self {
        Self {
            id: id.into(),
            label,
            spec: VolumeConfigSpec::default(),
        }
    }

    /// YAML mirror of the resource, stable for identical inputs.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_kinds() {
        assert!(VolumeType::Partition.is_block());
        assert!(VolumeType::Disk.is_block());
        assert!(!VolumeType::Overlay.is_block());
        assert!(!VolumeType::External.is_block());
    }

    #[test]
    fn filesystem_probe_names() {
        assert_eq!(FilesystemType::from_probe("xfs"), Some(FilesystemType::Xfs));
        assert_eq!(FilesystemType::from_probe("crypto_LUKS"), None);
        assert!(FilesystemType::Swap.is_formattable());
        assert!(!FilesystemType::Virtiofs.is_formattable());
    }

    #[test]
    fn yaml_mirror_is_deterministic() {
        let mut config = VolumeConfig::new("u-data", VolumeLabel::User);
        config.spec.provisioning.partition_spec.min_size = 1024;
        let first = config.to_yaml().unwrap();
        let second = config.clone().to_yaml().unwrap();
        assert_eq!(first, second);
        assert!(first.contains("label: user"));

        let back: VolumeConfig = serde_yaml::from_str(&first).unwrap();
        assert_eq!(back, config);
    }
}
