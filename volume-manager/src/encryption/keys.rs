// SPDX-License-Identifier: GPL-3.0-only

//! Key material per slot type.
//!
//! Static and node-id keys are recomputed on every open. KMS and TPM keys are
//! random at enrollment; their sealed form is kept in a LUKS2 token bound to
//! the slot and unsealed again on open.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hkdf::Hkdf;
use sha2::Sha256;
use tracing::{debug, warn};
use volume_contracts::{
    KeyToken, KmsClient, KmsRequest, LuksOps, NodeIdentity, SECURE_BOOT_PCR, TpmSealer,
    VolumeError,
};
use volume_types::{EncryptionKey, EncryptionKeyKind, VolumeErrorKind};

use crate::Result;

/// Length of generated and derived keys.
pub const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 16;

pub const KMS_TOKEN: &str = "kms";
pub const TPM_TOKEN: &str = "tpm";

/// HKDF-SHA256 (RFC 5869) with an empty salt.
pub fn hkdf_sha256(ikm: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>> {
    let mut okm = vec![0u8; length];
    Hkdf::<Sha256>::new(None, ikm)
        .expand(info, &mut okm)
        .map_err(|err| VolumeError::new(VolumeErrorKind::Io, format!("hkdf expand: {err}")))?;
    Ok(okm)
}

/// Key for a node-id slot: bound to this node and this partition.
pub fn node_id_key(node_uuid: &str, partition_label: &str) -> Result<Vec<u8>> {
    let mut ikm = node_uuid.as_bytes().to_vec();
    ikm.extend_from_slice(partition_label.as_bytes());
    hkdf_sha256(&ikm, b"volume-manager node-id key", KEY_LENGTH)
}

fn random_bytes<const N: usize>() -> [u8; N] {
    rand::random()
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD.decode(value).map_err(|err| {
        VolumeError::new(
            VolumeErrorKind::EncryptionLocked,
            format!("token {field} is not base64: {err}"),
        )
    })
}

/// Everything key handlers need besides the device.
#[derive(Clone)]
pub struct KeyBackends {
    pub node: Arc<dyn NodeIdentity>,
    pub kms: Arc<dyn KmsClient>,
    pub tpm: Arc<dyn TpmSealer>,
}

impl std::fmt::Debug for KeyBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBackends").finish_non_exhaustive()
    }
}

/// A key ready to be bound to a slot, with the token to store next to it.
pub struct EnrolledKey {
    pub key: Vec<u8>,
    pub token: Option<KeyToken>,
}

impl KeyBackends {
    /// Recovers the key bound to `key.slot`.
    pub async fn unlock_key(
        &self,
        key: &EncryptionKey,
        device: &str,
        partition_label: &str,
        luks: &dyn LuksOps,
    ) -> Result<Vec<u8>> {
        match key.kind {
            EncryptionKeyKind::Static => Ok(key.static_passphrase.as_bytes().to_vec()),
            EncryptionKeyKind::NodeId => {
                let uuid = self.node.node_uuid().await?;
                node_id_key(&uuid, partition_label)
            }
            EncryptionKeyKind::Kms => {
                let token = self.token(luks, device, key.slot, KMS_TOKEN).await?;
                let request = KmsRequest {
                    node_uuid: self.node.node_uuid().await?,
                    nonce: token.nonce,
                    slot: key.slot,
                    data: token.sealed_key,
                };
                self.kms.unseal(&key.kms_endpoint, &request).await
            }
            EncryptionKeyKind::Tpm => {
                let token = self.token(luks, device, key.slot, TPM_TOKEN).await?;
                let sealed = decode("sealed_key", &token.sealed_key)?;
                self.tpm.unseal(&sealed, SECURE_BOOT_PCR).await
            }
        }
    }

    async fn token(
        &self,
        luks: &dyn LuksOps,
        device: &str,
        slot: u32,
        kind: &str,
    ) -> Result<KeyToken> {
        match luks.read_token(device, slot).await? {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(VolumeError::new(
                VolumeErrorKind::EncryptionLocked,
                format!("slot {slot} holds a {} token, expected {kind}", token.kind),
            )),
            None => Err(VolumeError::new(
                VolumeErrorKind::EncryptionLocked,
                format!("slot {slot} has no {kind} token"),
            )),
        }
    }

    /// Produces a fresh key for `key.slot`.
    pub async fn enroll_key(&self, key: &EncryptionKey, partition_label: &str) -> Result<EnrolledKey> {
        match key.kind {
            EncryptionKeyKind::Static | EncryptionKeyKind::NodeId => Ok(EnrolledKey {
                key: self.derived_key(key, partition_label).await?,
                token: None,
            }),
            EncryptionKeyKind::Kms => {
                let secret = random_bytes::<KEY_LENGTH>().to_vec();
                let nonce = STANDARD.encode(random_bytes::<NONCE_LENGTH>());
                let request = KmsRequest {
                    node_uuid: self.node.node_uuid().await?,
                    nonce: nonce.clone(),
                    slot: key.slot,
                    data: STANDARD.encode(&secret),
                };
                let sealed = self.kms.seal(&key.kms_endpoint, &request).await?;
                debug!(slot = key.slot, endpoint = %key.kms_endpoint, "sealed key with KMS");
                Ok(EnrolledKey {
                    key: secret,
                    token: Some(KeyToken {
                        kind: KMS_TOKEN.to_string(),
                        slot: key.slot,
                        sealed_key: STANDARD.encode(sealed),
                        nonce,
                    }),
                })
            }
            EncryptionKeyKind::Tpm => {
                if key.tpm_check_secureboot_status_on_enroll
                    && !self.tpm.secure_boot_enabled().await?
                {
                    warn!(slot = key.slot, "refusing TPM enrollment without Secure Boot");
                    return Err(VolumeError::new(
                        VolumeErrorKind::TpmUnsealFailure,
                        "secure boot is not enabled, refusing to enroll a TPM key",
                    ));
                }
                let secret = random_bytes::<KEY_LENGTH>().to_vec();
                let sealed = self.tpm.seal(&secret, SECURE_BOOT_PCR).await?;
                Ok(EnrolledKey {
                    key: secret,
                    token: Some(KeyToken {
                        kind: TPM_TOKEN.to_string(),
                        slot: key.slot,
                        sealed_key: STANDARD.encode(sealed),
                        nonce: String::new(),
                    }),
                })
            }
        }
    }

    async fn derived_key(&self, key: &EncryptionKey, partition_label: &str) -> Result<Vec<u8>> {
        match key.kind {
            EncryptionKeyKind::Static => Ok(key.static_passphrase.as_bytes().to_vec()),
            _ => {
                let uuid = self.node.node_uuid().await?;
                node_id_key(&uuid, partition_label)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn hkdf_matches_rfc5869_case_three() {
        // RFC 5869 A.3: zero-length salt and info.
        let ikm = [0x0bu8; 22];
        let okm = hkdf_sha256(&ikm, b"", 42).unwrap();
        assert_eq!(
            hex(&okm),
            "8da4e775a563c18f715f802a063c5a31b8a11f5c5ee1879ec3454e5f3c738d2d9d201395faa4b61a96c8"
        );
    }

    #[test]
    fn hkdf_rejects_output_past_255_blocks() {
        assert!(hkdf_sha256(b"ikm", b"", 255 * 32).is_ok());
        let err = hkdf_sha256(b"ikm", b"", 255 * 32 + 1).unwrap_err();
        assert_eq!(err.kind, VolumeErrorKind::Io);
    }

    #[test]
    fn node_keys_depend_on_node_and_partition() {
        let a = node_id_key("4c4c4544-0042", "STATE").unwrap();
        let b = node_id_key("4c4c4544-0042", "EPHEMERAL").unwrap();
        let c = node_id_key("4c4c4544-0043", "STATE").unwrap();

        assert_eq!(a.len(), KEY_LENGTH);
        assert_eq!(a, node_id_key("4c4c4544-0042", "STATE").unwrap());
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
