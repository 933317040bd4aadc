// SPDX-License-Identifier: GPL-3.0-only

//! Legacy machine configuration
//!
//! Only the fields the volume core reads are modelled; everything else is
//! carried as opaque YAML so the document encodes back unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use volume_types::EncryptionProvider;
use volume_types::constants::{EPHEMERAL_PARTITION_LABEL, STATE_PARTITION_LABEL};

use crate::encryption::{
    EncryptionConfig, EncryptionKeyConfig, KmsKeyConfig, NodeIdKeyConfig, StaticKeyConfig,
    TpmKeyConfig,
};
use crate::error::Result;

pub const LEGACY_VERSION: &str = "v1alpha1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyConfig {
    pub version: String,

    #[serde(default)]
    pub machine: LegacyMachineConfig,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMachineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_disk_encryption: Option<SystemDiskEncryptionConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<LegacyFeaturesConfig>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemDiskEncryptionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<EncryptionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<EncryptionConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyFeaturesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_quota_support: Option<bool>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl LegacyConfig {
    /// `systemDiskEncryption` entry for a system volume.
    pub fn system_disk_encryption(&self, label: &str) -> Option<&EncryptionConfig> {
        let encryption = self.machine.system_disk_encryption.as_ref()?;
        match label {
            STATE_PARTITION_LABEL => encryption.state.as_ref(),
            EPHEMERAL_PARTITION_LABEL => encryption.ephemeral.as_ref(),
            _ => None,
        }
    }

    pub fn disk_quota_support(&self) -> bool {
        self.machine
            .features
            .as_ref()
            .and_then(|f| f.disk_quota_support)
            .unwrap_or(false)
    }
}

// The record persisted in META uses the legacy struct field names.

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredEncryption {
    #[serde(rename = "EncryptionProvider")]
    provider: String,
    #[serde(rename = "EncryptionKeys")]
    keys: Option<Vec<StoredKey>>,
    #[serde(rename = "EncryptionCipher")]
    cipher: String,
    #[serde(rename = "EncryptionKeySize")]
    key_size: u32,
    #[serde(rename = "EncryptionBlockSize")]
    block_size: u64,
    #[serde(rename = "EncryptionPerfOptions")]
    options: Option<Vec<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredKey {
    #[serde(rename = "KeySlot")]
    slot: u32,
    #[serde(rename = "KeyStatic")]
    static_: Option<StoredStaticKey>,
    #[serde(rename = "KeyNodeID")]
    node_id: Option<serde_json::Value>,
    #[serde(rename = "KeyKMS")]
    kms: Option<StoredKmsKey>,
    #[serde(rename = "KeyTPM")]
    tpm: Option<StoredTpmKey>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredStaticKey {
    #[serde(rename = "KeyData")]
    data: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredKmsKey {
    #[serde(rename = "KMSEndpoint")]
    endpoint: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredTpmKey {
    #[serde(rename = "TPMCheckSecurebootStatusOnEnroll")]
    check_secureboot: Option<bool>,
}

/// Decodes the STATE encryption record kept in the META partition.
pub fn decode_state_encryption(data: &[u8]) -> Result<EncryptionConfig> {
    let stored: StoredEncryption = serde_json::from_slice(data)?;

    let provider = match stored.provider.as_str() {
        "luks2" => EncryptionProvider::Luks2,
        _ => EncryptionProvider::None,
    };

    let keys = stored
        .keys
        .unwrap_or_default()
        .into_iter()
        .map(|key| EncryptionKeyConfig {
            slot: key.slot,
            static_: key.static_.map(|s| StaticKeyConfig { passphrase: s.data }),
            node_id: key.node_id.map(|_| NodeIdKeyConfig {}),
            kms: key.kms.map(|k| KmsKeyConfig {
                endpoint: k.endpoint,
            }),
            tpm: key.tpm.map(|t| TpmKeyConfig {
                check_secureboot_status_on_enroll: t.check_secureboot,
            }),
        })
        .collect();

    Ok(EncryptionConfig {
        provider,
        keys,
        cipher: stored.cipher,
        key_size: stored.key_size,
        block_size: stored.block_size,
        options: stored.options.unwrap_or_default(),
    })
}

/// Encodes `config` in the record format read by [`decode_state_encryption`].
pub fn encode_state_encryption(config: &EncryptionConfig) -> Result<Vec<u8>> {
    let stored = StoredEncryption {
        provider: config.provider.as_str().to_string(),
        keys: Some(
            config
                .keys
                .iter()
                .map(|key| StoredKey {
                    slot: key.slot,
                    static_: key.static_.as_ref().map(|s| StoredStaticKey {
                        data: s.passphrase.clone(),
                    }),
                    node_id: key
                        .node_id
                        .as_ref()
                        .map(|_| serde_json::Value::Object(Default::default())),
                    kms: key.kms.as_ref().map(|k| StoredKmsKey {
                        endpoint: k.endpoint.clone(),
                    }),
                    tpm: key.tpm.as_ref().map(|t| StoredTpmKey {
                        check_secureboot: t.check_secureboot_status_on_enroll,
                    }),
                })
                .collect(),
        ),
        cipher: config.cipher.clone(),
        key_size: config.key_size,
        block_size: config.block_size,
        options: (!config.options.is_empty()).then(|| config.options.clone()),
    };

    Ok(serde_json::to_vec(&stored)?)
}
