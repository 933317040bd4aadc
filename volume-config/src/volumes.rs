// SPDX-License-Identifier: GPL-3.0-only

//! Volume documents

use serde::{Deserialize, Serialize};
use volume_cel::{Expression, env};
use volume_types::constants::{
    EPHEMERAL_PARTITION_LABEL, IMAGE_CACHE_PARTITION_LABEL, MAX_VOLUME_NAME_LENGTH,
    META_PARTITION_LABEL, STATE_PARTITION_LABEL,
};
use volume_types::{FilesystemType, VolumeType};

use crate::encryption::EncryptionConfig;
use crate::error::ValidationReport;
use crate::provisioning::ProvisioningConfig;

/// System volumes a `VolumeConfig` document may refer to.
pub const SYSTEM_VOLUME_NAMES: [&str; 4] = [
    STATE_PARTITION_LABEL,
    EPHEMERAL_PARTITION_LABEL,
    IMAGE_CACHE_PARTITION_LABEL,
    META_PARTITION_LABEL,
];

fn validate_name(name: &str, report: &mut ValidationReport) {
    if name.is_empty() {
        report.error("name is required");
        return;
    }

    if name.len() > MAX_VOLUME_NAME_LENGTH {
        report.error(format!(
            "name must be between 1 and {MAX_VOLUME_NAME_LENGTH} characters long"
        ));
    }

    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        report.error(
            "name can only contain lowercase and uppercase ASCII letters, digits, and hyphens",
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct FilesystemConfig {
    /// Defaults to xfs when unset.
    #[serde(rename = "type", skip_serializing_if = "is_none_fs")]
    pub kind: FilesystemType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_quota_support: Option<bool>,
}

fn is_none_fs(fs: &FilesystemType) -> bool {
    *fs == FilesystemType::None
}

impl FilesystemConfig {
    pub fn is_empty(&self) -> bool {
        self.kind == FilesystemType::None && self.project_quota_support.is_none()
    }

    pub fn kind(&self) -> FilesystemType {
        match self.kind {
            FilesystemType::None => FilesystemType::Xfs,
            other => other,
        }
    }

    pub fn project_quota_support(&self) -> bool {
        self.project_quota_support.unwrap_or(false)
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if !matches!(
            self.kind,
            FilesystemType::None | FilesystemType::Xfs | FilesystemType::Ext4
        ) {
            report.error(format!("unsupported filesystem type: {}", self.kind));
        } else if self.project_quota_support() && self.kind() != FilesystemType::Xfs {
            report.error("project quota support is only available for xfs filesystem");
        }

        report
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct UserMountConfig {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disable_access_time: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub secure: bool,
}

impl UserMountConfig {
    pub fn is_empty(&self) -> bool {
        !self.disable_access_time && !self.secure
    }
}

/// `UserVolumeConfig`: a partition, directory or whole disk mounted under
/// `/var/mnt/<name>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserVolumeConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<VolumeType>,

    #[serde(default, skip_serializing_if = "ProvisioningConfig::is_empty")]
    pub provisioning: ProvisioningConfig,

    #[serde(default, skip_serializing_if = "FilesystemConfig::is_empty")]
    pub filesystem: FilesystemConfig,

    #[serde(default, skip_serializing_if = "EncryptionConfig::is_empty")]
    pub encryption: EncryptionConfig,

    #[serde(default, skip_serializing_if = "UserMountConfig::is_empty")]
    pub mount: UserMountConfig,
}

impl UserVolumeConfig {
    pub fn volume_type(&self) -> VolumeType {
        self.volume_type.unwrap_or(VolumeType::Partition)
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        validate_name(&self.name, &mut report);

        match self.volume_type() {
            VolumeType::Partition => {
                report.extend(self.provisioning.validate(true, true));
                report.extend(self.filesystem.validate());
                report.extend(self.encryption.validate());
            }
            VolumeType::Directory => {
                if !self.provisioning.is_empty() {
                    report.error("provisioning spec is invalid for volumeType directory");
                }
                if !self.encryption.is_empty() {
                    report.error("encryption spec is invalid for volumeType directory");
                }
                if !self.filesystem.is_empty() {
                    report.error("filesystem spec is invalid for volumeType directory");
                }
            }
            VolumeType::Disk => {
                report.extend(self.provisioning.validate(true, false));
                report.extend(self.filesystem.validate());
                report.extend(self.encryption.validate());
            }
            other => report.error(format!("unsupported volume type {:?}", other.as_str())),
        }

        report
    }
}

/// `RawVolumeConfig`: an unformatted, unmounted partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawVolumeConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "ProvisioningConfig::is_empty")]
    pub provisioning: ProvisioningConfig,

    #[serde(default, skip_serializing_if = "EncryptionConfig::is_empty")]
    pub encryption: EncryptionConfig,
}

impl RawVolumeConfig {
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        validate_name(&self.name, &mut report);
        report.extend(self.provisioning.validate(true, true));
        if self.provisioning.max_size_negative() {
            report.error("negative max size is not supported for raw volumes");
        }
        report.extend(self.encryption.validate());
        report
    }
}

/// `SwapVolumeConfig`: a partition used as swap space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SwapVolumeConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "ProvisioningConfig::is_empty")]
    pub provisioning: ProvisioningConfig,

    #[serde(default, skip_serializing_if = "EncryptionConfig::is_empty")]
    pub encryption: EncryptionConfig,
}

impl SwapVolumeConfig {
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        validate_name(&self.name, &mut report);
        report.extend(self.provisioning.validate(true, true));
        if self.provisioning.max_size_negative() {
            report.error("negative max size is not supported for swap volumes");
        }
        report.extend(self.encryption.validate());
        report
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VolumeSelectorConfig {
    /// Volume locator expression.
    #[serde(rename = "match", skip_serializing_if = "Expression::is_zero")]
    pub match_: Expression,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct VolumeDiscoveryConfig {
    pub volume_selector: VolumeSelectorConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ExistingMountConfig {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disable_access_time: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub secure: bool,
}

impl ExistingMountConfig {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// `ExistingVolumeConfig`: mounts a volume found by selector; never provisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExistingVolumeConfig {
    pub name: String,

    #[serde(default)]
    pub discovery: VolumeDiscoveryConfig,

    #[serde(default, skip_serializing_if = "ExistingMountConfig::is_empty")]
    pub mount: ExistingMountConfig,
}

impl ExistingVolumeConfig {
    pub fn volume_selector(&self) -> &Expression {
        &self.discovery.volume_selector.match_
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        validate_name(&self.name, &mut report);

        let selector = self.volume_selector();
        if selector.is_zero() {
            report.error("volume selector is required");
        } else if let Err(err) = Expression::parse_bool(selector.text(), env::volume_locator()) {
            report.error(format!("volume selector is invalid: {err}"));
        }

        report
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VirtiofsConfig {
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NfsConfig {
    /// `host:/export`
    pub source: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ExternalMountConfig {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disable_access_time: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub secure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtiofs: Option<VirtiofsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nfs: Option<NfsConfig>,
}

/// `ExternalVolumeConfig`: a virtiofs share or NFS export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExternalVolumeConfig {
    pub name: String,
    pub filesystem_type: FilesystemType,
    #[serde(default)]
    pub mount: ExternalMountConfig,
}

/// Splits an NFS source into host and absolute export path.
pub fn split_nfs_source(source: &str) -> Option<(&str, &str)> {
    let (host, path) = source.split_once(':')?;
    (!host.is_empty() && path.starts_with('/')).then_some((host, path))
}

impl ExternalVolumeConfig {
    /// The mount source: the virtiofs tag or the NFS `host:/path`.
    pub fn source(&self) -> String {
        match self.filesystem_type {
            FilesystemType::Virtiofs => self
                .mount
                .virtiofs
                .as_ref()
                .map(|v| v.tag.clone())
                .unwrap_or_default(),
            FilesystemType::Nfs => self
                .mount
                .nfs
                .as_ref()
                .map(|n| n.source.clone())
                .unwrap_or_default(),
            _ => String::new(),
        }
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        validate_name(&self.name, &mut report);

        match self.filesystem_type {
            FilesystemType::Virtiofs => {
                match &self.mount.virtiofs {
                    None => report.error("virtiofs mount spec is required"),
                    Some(virtiofs) if virtiofs.tag.is_empty() => {
                        report.error("virtiofs tag is required")
                    }
                    Some(_) => {}
                }
                if self.mount.nfs.is_some() {
                    report.error("nfs mount spec is invalid for filesystem type virtiofs");
                }
            }
            FilesystemType::Nfs => {
                match &self.mount.nfs {
                    None => report.error("nfs mount spec is required"),
                    Some(nfs) if split_nfs_source(&nfs.source).is_none() => {
                        report.error("nfs source must be in the form host:/path")
                    }
                    Some(_) => {}
                }
                if self.mount.virtiofs.is_some() {
                    report.error("virtiofs mount spec is invalid for filesystem type nfs");
                }
            }
            other => report.error(format!("invalid filesystem type: {other}")),
        }

        report
    }
}

/// `VolumeConfig`: overrides for a system volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SystemVolumeConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "ProvisioningConfig::is_empty")]
    pub provisioning: ProvisioningConfig,

    #[serde(default, skip_serializing_if = "EncryptionConfig::is_empty")]
    pub encryption: EncryptionConfig,
}

impl SystemVolumeConfig {
    /// Declared encryption, if any.
    pub fn encryption(&self) -> Option<&EncryptionConfig> {
        self.encryption.is_enabled().then_some(&self.encryption)
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if !SYSTEM_VOLUME_NAMES.contains(&self.name.as_str()) {
            report.error(format!("only {SYSTEM_VOLUME_NAMES:?} volumes are supported"));
            return report;
        }

        if (self.name == STATE_PARTITION_LABEL || self.name == META_PARTITION_LABEL)
            && !self.provisioning.is_empty()
        {
            report.error(format!(
                "provisioning config is not allowed for the {:?} volume",
                self.name
            ));
        }

        if self.name == META_PARTITION_LABEL && !self.encryption.is_empty() {
            report.error(format!(
                "encryption is not allowed for the {:?} volume",
                self.name
            ));
        }

        report.extend(self.provisioning.validate(false, true));
        report.extend(self.encryption.validate());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_volume_name_boundaries() {
        let mut config = UserVolumeConfig {
            name: "a".repeat(34),
            volume_type: Some(VolumeType::Directory),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.name = "a".repeat(35);
        assert_eq!(
            config.validate().errors,
            vec!["name must be between 1 and 34 characters long"]
        );

        config.name = "bad_name".into();
        assert_eq!(config.validate().errors.len(), 1);

        config.name.clear();
        assert_eq!(config.validate().errors, vec!["name is required"]);
    }

    #[test]
    fn directory_rejects_block_settings() {
        let config: UserVolumeConfig = serde_yaml::from_str(
            r#"
name: logs
volumeType: directory
provisioning:
  minSize: 1GiB
filesystem:
  type: ext4
"#,
        )
        .unwrap();
        assert_eq!(
            config.validate().errors,
            vec![
                "provisioning spec is invalid for volumeType directory",
                "filesystem spec is invalid for volumeType directory",
            ]
        );
    }

    #[test]
    fn unsupported_user_volume_types() {
        let config = UserVolumeConfig {
            name: "scratch".into(),
            volume_type: Some(VolumeType::Tmpfs),
            ..Default::default()
        };
        assert_eq!(config.validate().errors, vec!["unsupported volume type \"tmpfs\""]);
    }

    #[test]
    fn project_quota_requires_xfs() {
        let fs = FilesystemConfig {
            kind: FilesystemType::Ext4,
            project_quota_support: Some(true),
        };
        assert_eq!(
            fs.validate().errors,
            vec!["project quota support is only available for xfs filesystem"]
        );
        assert_eq!(FilesystemConfig::default().kind(), FilesystemType::Xfs);

        let swap = FilesystemConfig {
            kind: FilesystemType::Swap,
            project_quota_support: None,
        };
        assert_eq!(swap.validate().errors, vec!["unsupported filesystem type: swap"]);
    }

    #[test]
    fn raw_volumes_reject_negative_max_size() {
        let config: RawVolumeConfig = serde_yaml::from_str(
            "name: raw\nprovisioning:\n  diskSelector:\n    match: system_disk\n  maxSize: -1GiB\n",
        )
        .unwrap();
        assert_eq!(
            config.validate().errors,
            vec!["negative max size is not supported for raw volumes"]
        );
    }

    #[test]
    fn swap_volumes_reject_negative_max_size() {
        let config: SwapVolumeConfig = serde_yaml::from_str(
            "name: swap1\nprovisioning:\n  diskSelector:\n    match: system_disk\n  maxSize: -1GiB\n",
        )
        .unwrap();
        assert_eq!(
            config.validate().errors,
            vec!["negative max size is not supported for swap volumes"]
        );
    }

    #[test]
    fn existing_volume_selector() {
        let mut config = ExistingVolumeConfig {
            name: "data".into(),
            ..Default::default()
        };
        assert_eq!(config.validate().errors, vec!["volume selector is required"]);

        config.discovery.volume_selector.match_ = Expression::unchecked("volume.size");
        assert!(config.validate().errors[0].starts_with("volume selector is invalid"));

        config.discovery.volume_selector.match_ =
            Expression::unchecked("volume.partition_label == \"DATA\"");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn external_volume_sources() {
        let mut config: ExternalVolumeConfig = serde_yaml::from_str(
            "name: share\nfilesystemType: nfs\nmount:\n  nfs:\n    source: nas.local/export\n",
        )
        .unwrap();
        assert_eq!(
            config.validate().errors,
            vec!["nfs source must be in the form host:/path"]
        );

        config.mount.nfs = Some(NfsConfig {
            source: "nas.local:/export".into(),
            options: vec!["vers=4.2".into()],
        });
        assert!(config.validate().is_ok());
        assert_eq!(config.source(), "nas.local:/export");

        config.filesystem_type = FilesystemType::Virtiofs;
        assert_eq!(
            config.validate().errors,
            vec![
                "virtiofs mount spec is required",
                "nfs mount spec is invalid for filesystem type virtiofs"
            ]
        );

        config.filesystem_type = FilesystemType::Xfs;
        assert_eq!(config.validate().errors, vec!["invalid filesystem type: xfs"]);
    }

    #[test]
    fn system_volume_rules() {
        let state: SystemVolumeConfig = serde_yaml::from_str(
            "name: STATE\nprovisioning:\n  minSize: 1GiB\n",
        )
        .unwrap();
        assert_eq!(
            state.validate().errors,
            vec!["provisioning config is not allowed for the \"STATE\" volume"]
        );

        let meta: SystemVolumeConfig = serde_yaml::from_str(
            "name: META\nencryption:\n  provider: luks2\n  keys:\n    - slot: 0\n      nodeID: {}\n",
        )
        .unwrap();
        assert_eq!(
            meta.validate().errors,
            vec!["encryption is not allowed for the \"META\" volume"]
        );

        let other = SystemVolumeConfig {
            name: "BOOT".into(),
            ..Default::default()
        };
        assert_eq!(other.validate().errors.len(), 1);

        let ephemeral: SystemVolumeConfig = serde_yaml::from_str(
            "name: EPHEMERAL\nprovisioning:\n  minSize: 10GiB\n  maxSize: 5GiB\n",
        )
        .unwrap();
        assert_eq!(
            ephemeral.validate().errors,
            vec!["min size is greater than max size"]
        );
    }
}
