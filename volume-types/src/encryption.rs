// SPDX-License-Identifier: GPL-3.0-only

//! Block device encryption settings

use serde::{Deserialize, Serialize};

pub const DEFAULT_CIPHER: &str = "aes-xts-plain64";

/// Performance flags passed through to the LUKS2 header.
pub const PERF_OPTIONS: [&str; 3] = ["no_read_workqueue", "no_write_workqueue", "same_cpu_crypt"];

/// Highest LUKS2 key slot.
pub const MAX_KEY_SLOT: u32 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionProvider {
    #[default]
    None,
    Luks2,
}

impl EncryptionProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionProvider::None => "none",
            EncryptionProvider::Luks2 => "luks2",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionKeyKind {
    #[default]
    Static,
    NodeId,
    Kms,
    Tpm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionKey {
    pub slot: u32,
    #[serde(rename = "type")]
    pub kind: EncryptionKeyKind,
    pub static_passphrase: String,
    pub kms_endpoint: String,
    pub tpm_check_secureboot_status_on_enroll: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionSpec {
    pub provider: EncryptionProvider,
    pub keys: Vec<EncryptionKey>,
    /// Empty selects [`DEFAULT_CIPHER`].
    pub cipher: String,
    /// Key size in bits, 0 for the provider default.
    pub key_size: u32,
    /// Sector size in bytes, 0 for the provider default.
    pub block_size: u64,
    pub perf_options: Vec<String>,
}

impl EncryptionSpec {
    pub fn is_enabled(&self) -> bool {
        self.provider != EncryptionProvider::None
    }

    pub fn cipher_or_default(&self) -> &str {
        if self.cipher.is_empty() {
            DEFAULT_CIPHER
        } else {
            &self.cipher
        }
    }

    /// Keys ordered by slot.
    pub fn sorted_keys(&self) -> Vec<&EncryptionKey> {
        let mut keys: Vec<_> = self.keys.iter().collect();
        keys.sort_by_key(|k| k.slot);
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_disabled() {
        let spec = EncryptionSpec::default();
        assert!(!spec.is_enabled());
        assert_eq!(spec.cipher_or_default(), DEFAULT_CIPHER);
    }

    #[test]
    fn keys_sort_by_slot() {
        let spec = EncryptionSpec {
            provider: EncryptionProvider::Luks2,
            keys: vec![
                EncryptionKey {
                    slot: 3,
                    kind: EncryptionKeyKind::Tpm,
                    ..Default::default()
                },
                EncryptionKey {
                    slot: 0,
                    kind: EncryptionKeyKind::NodeId,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let slots: Vec<_> = spec.sorted_keys().iter().map(|k| k.slot).collect();
        assert_eq!(slots, vec![0, 3]);
    }
}
