// SPDX-License-Identifier: GPL-3.0-only

//! The decoded document set and cross-document checks

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use volume_types::constants::{EPHEMERAL_PARTITION_LABEL, STATE_PARTITION_LABEL};

use crate::document::{self, Document};
use crate::error::{Result, ValidationReport};
use crate::legacy::LegacyConfig;
use crate::runtime::{FilesystemScrubConfig, ZswapConfig};
use crate::volumes::{
    ExistingVolumeConfig, ExternalVolumeConfig, RawVolumeConfig, SwapVolumeConfig,
    SystemVolumeConfig, UserVolumeConfig,
};

/// All configuration documents known to the node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    documents: Vec<Document>,
}

impl Config {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let documents = document::decode(text)?;
        debug!(documents = documents.len(), "decoded configuration");
        Ok(Self::new(documents))
    }

    pub fn encode(&self) -> Result<String> {
        document::encode(&self.documents)
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn user_volumes(&self) -> impl Iterator<Item = &UserVolumeConfig> {
        self.documents.iter().filter_map(|d| match d {
            Document::UserVolume(v) => Some(v),
            _ => None,
        })
    }

    pub fn raw_volumes(&self) -> impl Iterator<Item = &RawVolumeConfig> {
        self.documents.iter().filter_map(|d| match d {
            Document::RawVolume(v) => Some(v),
            _ => None,
        })
    }

    pub fn swap_volumes(&self) -> impl Iterator<Item = &SwapVolumeConfig> {
        self.documents.iter().filter_map(|d| match d {
            Document::SwapVolume(v) => Some(v),
            _ => None,
        })
    }

    pub fn existing_volumes(&self) -> impl Iterator<Item = &ExistingVolumeConfig> {
        self.documents.iter().filter_map(|d| match d {
            Document::ExistingVolume(v) => Some(v),
            _ => None,
        })
    }

    pub fn external_volumes(&self) -> impl Iterator<Item = &ExternalVolumeConfig> {
        self.documents.iter().filter_map(|d| match d {
            Document::ExternalVolume(v) => Some(v),
            _ => None,
        })
    }

    pub fn system_volumes(&self) -> impl Iterator<Item = &SystemVolumeConfig> {
        self.documents.iter().filter_map(|d| match d {
            Document::SystemVolume(v) => Some(v),
            _ => None,
        })
    }

    /// The `VolumeConfig` document for a system volume, if declared.
    pub fn system_volume(&self, name: &str) -> Option<&SystemVolumeConfig> {
        self.system_volumes().find(|v| v.name == name)
    }

    pub fn legacy(&self) -> Option<&LegacyConfig> {
        self.documents.iter().find_map(|d| match d {
            Document::Legacy(v) => Some(v),
            _ => None,
        })
    }

    pub fn zswap(&self) -> Option<&ZswapConfig> {
        self.documents.iter().find_map(|d| match d {
            Document::Zswap(v) => Some(v),
            _ => None,
        })
    }

    pub fn filesystem_scrubs(&self) -> impl Iterator<Item = &FilesystemScrubConfig> {
        self.documents.iter().filter_map(|d| match d {
            Document::FilesystemScrub(v) => Some(v),
            _ => None,
        })
    }

    /// Whether a full machine configuration is present.
    ///
    /// System volumes beyond META and STATE are only laid out once it is.
    pub fn has_machine_config(&self) -> bool {
        self.legacy().is_some()
    }

    pub fn disk_quota_support(&self) -> bool {
        self.legacy().is_some_and(LegacyConfig::disk_quota_support)
    }

    /// Validates every document and the relations between them.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        for document in &self.documents {
            let context = document.describe();
            let own = match document {
                Document::UserVolume(v) => v.validate(),
                Document::RawVolume(v) => v.validate(),
                Document::SwapVolume(v) => v.validate(),
                Document::ExistingVolume(v) => v.validate(),
                Document::ExternalVolume(v) => v.validate(),
                Document::SystemVolume(v) => v.validate(),
                Document::Zswap(v) => v.validate(),
                Document::FilesystemScrub(v) => v.validate(),
                Document::Opaque { kind, .. } => {
                    let mut r = ValidationReport::default();
                    r.warn(format!("{kind} documents are not handled by the volume manager"));
                    r
                }
                Document::Legacy(_) => ValidationReport::default(),
            };
            report.merge_scoped(&context, own);
        }

        self.check_duplicates(&mut report);
        self.check_mount_namespace(&mut report);
        self.check_system_encryption(&mut report);

        report
    }

    /// Shorthand for `validate().into_result(strict)`.
    pub fn validate_strict(&self, strict: bool) -> Result<Vec<String>> {
        self.validate().into_result(strict)
    }

    fn check_duplicates(&self, report: &mut ValidationReport) {
        let mut seen: BTreeSet<(&str, &str)> = BTreeSet::new();
        let mut singletons: BTreeSet<&str> = BTreeSet::new();

        for document in &self.documents {
            match document.name() {
                Some(name) => {
                    if !seen.insert((document.kind(), name)) {
                        report.error(format!("duplicate {} {name:?}", document.kind()));
                    }
                }
                None => {
                    if !singletons.insert(document.kind()) {
                        report.error(format!("duplicate {} document", document.kind()));
                    }
                }
            }
        }
    }

    fn check_mount_namespace(&self, report: &mut ValidationReport) {
        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();

        let mounted = self
            .user_volumes()
            .map(|v| ("UserVolumeConfig", v.name.as_str()))
            .chain(
                self.existing_volumes()
                    .map(|v| ("ExistingVolumeConfig", v.name.as_str())),
            )
            .chain(
                self.external_volumes()
                    .map(|v| ("ExternalVolumeConfig", v.name.as_str())),
            );

        for (kind, name) in mounted {
            match owners.get(name) {
                Some(owner) if *owner != kind => report.error(format!(
                    "{kind} {name:?} conflicts with {owner} {name:?}: both mount at /var/mnt/{name}"
                )),
                Some(_) => {}
                None => {
                    owners.insert(name, kind);
                }
            }
        }
    }

    fn check_system_encryption(&self, report: &mut ValidationReport) {
        let Some(legacy) = self.legacy() else {
            return;
        };

        for label in [STATE_PARTITION_LABEL, EPHEMERAL_PARTITION_LABEL] {
            let declared = self
                .system_volume(label)
                .and_then(SystemVolumeConfig::encryption);
            if declared.is_some() && legacy.system_disk_encryption(label).is_some() {
                report.error(format!(
                    "VolumeConfig {label:?} encryption conflicts with machine.systemDiskEncryption"
                ));
            }
        }
    }
}
