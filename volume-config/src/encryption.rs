// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use volume_types::encryption::{MAX_KEY_SLOT, PERF_OPTIONS};
use volume_types::{EncryptionKey, EncryptionKeyKind, EncryptionProvider, EncryptionSpec};

use crate::error::{ConfigError, Result, ValidationReport};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticKeyConfig {
    pub passphrase: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeIdKeyConfig {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KmsKeyConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct TpmKeyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_secureboot_status_on_enroll: Option<bool>,
}

/// One key slot; exactly one key type is expected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EncryptionKeyConfig {
    pub slot: u32,

    #[serde(rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_: Option<StaticKeyConfig>,

    #[serde(rename = "nodeID", skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeIdKeyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms: Option<KmsKeyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tpm: Option<TpmKeyConfig>,
}

impl EncryptionKeyConfig {
    fn type_count(&self) -> usize {
        [
            self.static_.is_some(),
            self.node_id.is_some(),
            self.kms.is_some(),
            self.tpm.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    fn to_key(&self) -> Result<EncryptionKey> {
        let mut key = EncryptionKey {
            slot: self.slot,
            ..Default::default()
        };

        if let Some(static_key) = &self.static_ {
            key.kind = EncryptionKeyKind::Static;
            key.static_passphrase = static_key.passphrase.clone();
        } else if self.node_id.is_some() {
            key.kind = EncryptionKeyKind::NodeId;
        } else if let Some(kms) = &self.kms {
            key.kind = EncryptionKeyKind::Kms;
            key.kms_endpoint = kms.endpoint.clone();
        } else if let Some(tpm) = &self.tpm {
            key.kind = EncryptionKeyKind::Tpm;
            key.tpm_check_secureboot_status_on_enroll =
                tpm.check_secureboot_status_on_enroll.unwrap_or(false);
        } else {
            return Err(ConfigError::UnsupportedKey { slot: self.slot });
        }

        Ok(key)
    }
}

/// Encryption section shared by volume documents and the legacy
/// `systemDiskEncryption` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct EncryptionConfig {
    pub provider: EncryptionProvider,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<EncryptionKeyConfig>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub cipher: String,

    #[serde(skip_serializing_if = "is_zero_u32")]
    pub key_size: u32,

    #[serde(skip_serializing_if = "is_zero_u64")]
    pub block_size: u64,

    /// Performance options such as `no_read_workqueue`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

impl EncryptionConfig {
    pub fn is_empty(&self) -> bool {
        self == &EncryptionConfig::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.provider != EncryptionProvider::None
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.provider == EncryptionProvider::None && self.keys.is_empty() {
            return report;
        }

        if self.provider != EncryptionProvider::Luks2 {
            report.error(format!(
                "unsupported encryption provider: {}",
                self.provider.as_str()
            ));
        }

        if self.keys.is_empty() {
            report.error("encryption keys are required");
        }

        let mut slots = BTreeSet::new();
        for key in &self.keys {
            if !slots.insert(key.slot) {
                report.error(format!("duplicate key slot {}", key.slot));
            }

            if key.slot > MAX_KEY_SLOT {
                report.error(format!(
                    "key slot {} is out of range 0-{MAX_KEY_SLOT}",
                    key.slot
                ));
            }

            match key.type_count() {
                0 => report.error(format!(
                    "at least one encryption key type must be specified for slot {}",
                    key.slot
                )),
                1 => {}
                _ => report.error(format!(
                    "only one encryption key type can be specified for slot {}",
                    key.slot
                )),
            }

            if let Some(kms) = &key.kms
                && kms.endpoint.is_empty()
            {
                report.error(format!("kms endpoint is required for slot {}", key.slot));
            }
        }

        for option in &self.options {
            if !PERF_OPTIONS.contains(&option.as_str()) {
                report.error(format!("unknown encryption option {option:?}"));
            }
        }

        report
    }

    /// Resource form of this section.
    pub fn to_spec(&self) -> Result<EncryptionSpec> {
        Ok(EncryptionSpec {
            provider: self.provider,
            keys: self
                .keys
                .iter()
                .map(EncryptionKeyConfig::to_key)
                .collect::<Result<_>>()?,
            cipher: self.cipher.clone(),
            key_size: self.key_size,
            block_size: self.block_size,
            perf_options: self.options.clone(),
        })
    }
}
