// SPDX-License-Identifier: GPL-3.0-only

//! LUKS2 lifecycle of encrypted volumes: format, open, slot sync, close.

pub mod keys;

use std::sync::Arc;

use tracing::{debug, info, warn};
use volume_contracts::{FilesystemOps, LuksFormat, LuksOps, VolumeError};
use volume_types::constants::mapper_name;
use volume_types::{
    EncryptionKeyKind, EncryptionProvider, EncryptionSpec, VolumeConfig, VolumeErrorKind,
};

pub use keys::{KeyBackends, node_id_key};

use crate::Result;

/// An opened encrypted volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    pub mapper_path: String,
    /// Slots whose binding differs from the declared keys.
    pub failed_syncs: Vec<String>,
}

fn mismatch(message: impl Into<String>) -> VolumeError {
    VolumeError::new(VolumeErrorKind::EncryptionProviderMismatch, message)
}

/// The provider recorded for a volume wins over a different declared one.
pub fn check_provider(persisted: EncryptionProvider, declared: &EncryptionSpec) -> Result<()> {
    if persisted != EncryptionProvider::None && persisted != declared.provider {
        return Err(mismatch(format!(
            "volume was opened as {}, configuration declares {}",
            persisted.as_str(),
            declared.provider.as_str()
        )));
    }
    Ok(())
}

fn partition_label(volume: &VolumeConfig) -> &str {
    let label = &volume.spec.provisioning.partition_spec.label;
    if label.is_empty() { &volume.id } else { label }
}

pub struct EncryptionManager {
    luks: Arc<dyn LuksOps>,
    filesystems: Arc<dyn FilesystemOps>,
    keys: KeyBackends,
}

impl std::fmt::Debug for EncryptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionManager").finish_non_exhaustive()
    }
}

impl EncryptionManager {
    pub fn new(luks: Arc<dyn LuksOps>, filesystems: Arc<dyn FilesystemOps>, keys: KeyBackends) -> Self {
        Self {
            luks,
            filesystems,
            keys,
        }
    }

    /// Fails when the device is LUKS formatted but no encryption is declared.
    pub async fn check_unencrypted(&self, device: &str) -> Result<()> {
        if self.luks.is_luks(device).await? {
            return Err(mismatch(format!(
                "{device} carries a LUKS header but no encryption is declared"
            )));
        }
        Ok(())
    }

    /// Formats a blank device, opens it and brings the key slots in line.
    pub async fn open(&self, volume: &VolumeConfig, device: &str) -> Result<Opened> {
        let spec = &volume.spec.encryption;
        if !spec.is_enabled() {
            return Err(mismatch(format!("volume {} declares no encryption", volume.id)));
        }
        let label = partition_label(volume);

        if !self.luks.is_luks(device).await? {
            self.format(volume, device).await?;
        } else if self.is_orphaned(volume, device).await? {
            warn!(volume = %volume.id, device, "header holds only an unrecoverable sealed key, formatting again");
            self.write_header(volume, device).await?;
        }

        let (slot, key) = self.unlock(spec, device, label).await?;
        debug!(volume = %volume.id, slot, "unlocked volume");

        let mapper = mapper_name(&volume.id);
        let mapper_path = if self.luks.is_open(&mapper).await? {
            format!("/dev/mapper/{mapper}")
        } else {
            let path = self
                .luks
                .open(device, &mapper, &key, &spec.perf_options)
                .await?;
            info!(volume = %volume.id, device, mapper = %path, "opened encrypted volume");
            path
        };

        let failed_syncs = self.sync_slots(spec, device, label, &key).await?;
        Ok(Opened {
            mapper_path,
            failed_syncs,
        })
    }

    async fn format(&self, volume: &VolumeConfig, device: &str) -> Result<()> {
        if let Some(found) = self.filesystems.probe(device).await? {
            return Err(mismatch(format!(
                "{device} carries {}, refusing to format it as LUKS2",
                found.name
            )));
        }
        self.write_header(volume, device).await
    }

    /// A header whose only slot holds a KMS or TPM key without its token can
    /// never be opened, so nothing was ever written behind it.
    async fn is_orphaned(&self, volume: &VolumeConfig, device: &str) -> Result<bool> {
        let spec = &volume.spec.encryption;
        let Some(first) = spec.sorted_keys().into_iter().next() else {
            return Ok(false);
        };
        if !matches!(first.kind, EncryptionKeyKind::Kms | EncryptionKeyKind::Tpm)
            || self.luks.is_open(&mapper_name(&volume.id)).await?
            || self.luks.bound_slots(device).await? != [first.slot]
        {
            return Ok(false);
        }
        Ok(self.luks.read_token(device, first.slot).await?.is_none())
    }

    async fn write_header(&self, volume: &VolumeConfig, device: &str) -> Result<()> {
        let spec = &volume.spec.encryption;
        let first = spec.sorted_keys().into_iter().next().ok_or_else(|| {
            VolumeError::invalid_config(format!("volume {} declares no key slots", volume.id))
        })?;
        let enrolled = self.keys.enroll_key(first, partition_label(volume)).await?;

        let params = LuksFormat {
            cipher: spec.cipher_or_default().to_string(),
            key_size: spec.key_size,
            block_size: spec.block_size,
            perf_options: spec.perf_options.clone(),
            slot: first.slot,
            key: enrolled.key,
            token: enrolled.token,
        };
        self.luks.format(device, &params).await?;

        info!(volume = %volume.id, device, cipher = %params.cipher, "formatted LUKS2 header");
        Ok(())
    }

    /// First declared slot, in slot order, whose key opens the device.
    async fn unlock(&self, spec: &EncryptionSpec, device: &str, label: &str) -> Result<(u32, Vec<u8>)> {
        let mut failures = Vec::new();
        let mut only_tpm = true;

        for key in spec.sorted_keys() {
            let attempt = match self
                .keys
                .unlock_key(key, device, label, self.luks.as_ref())
                .await
            {
                Ok(secret) => match self.luks.test_key(device, key.slot, &secret).await {
                    Ok(true) => return Ok((key.slot, secret)),
                    Ok(false) => VolumeError::new(
                        VolumeErrorKind::EncryptionLocked,
                        format!("slot {} rejected the key", key.slot),
                    ),
                    Err(err) => err,
                },
                Err(err) => err,
            };

            debug!(slot = key.slot, err = %attempt, "slot did not unlock");
            only_tpm &= attempt.kind == VolumeErrorKind::TpmUnsealFailure;
            failures.push(format!("slot {}: {}", key.slot, attempt.message));
        }

        let kind = if only_tpm && !failures.is_empty() {
            VolumeErrorKind::TpmUnsealFailure
        } else {
            VolumeErrorKind::EncryptionLocked
        };
        Err(VolumeError::new(
            kind,
            format!("no key slot opens {device}: {}", failures.join("; ")),
        ))
    }

    /// Enrolls declared slots that are not bound yet. Bound slots are never
    /// removed; undeclared ones are reported.
    async fn sync_slots(
        &self,
        spec: &EncryptionSpec,
        device: &str,
        label: &str,
        unlock_key: &[u8],
    ) -> Result<Vec<String>> {
        let bound = self.luks.bound_slots(device).await?;
        let mut failed = Vec::new();

        for key in spec.sorted_keys() {
            if bound.contains(&key.slot) {
                continue;
            }
            let enrolled = match self.keys.enroll_key(key, label).await {
                Ok(enrolled) => enrolled,
                Err(err) => {
                    warn!(slot = key.slot, %err, "key enrollment failed");
                    failed.push(format!("slot {}: {}", key.slot, err.message));
                    continue;
                }
            };
            if let Err(err) = self
                .luks
                .add_key(device, unlock_key, key.slot, &enrolled.key)
                .await
            {
                warn!(slot = key.slot, %err, "adding key slot failed");
                failed.push(format!("slot {}: {}", key.slot, err.message));
                continue;
            }
            if let Some(token) = &enrolled.token
                && let Err(err) = self.luks.write_token(device, token).await
            {
                warn!(slot = key.slot, %err, "writing key token failed");
                failed.push(format!("slot {}: {}", key.slot, err.message));
                continue;
            }
            info!(device, slot = key.slot, kind = ?key.kind, "enrolled key slot");
        }

        for slot in bound {
            if !spec.keys.iter().any(|k| k.slot == slot) {
                failed.push(format!("slot {slot}: bound but not declared"));
            }
        }

        Ok(failed)
    }

    /// Closing a volume that is not open succeeds.
    pub async fn close(&self, volume_id: &str) -> Result<()> {
        let mapper = mapper_name(volume_id);
        self.luks.close(&mapper).await?;
        debug!(volume = volume_id, mapper = %mapper, "closed encrypted volume");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared(provider: EncryptionProvider) -> EncryptionSpec {
        EncryptionSpec {
            provider,
            ..Default::default()
        }
    }

    #[test]
    fn persisted_provider_is_authoritative() {
        check_provider(EncryptionProvider::None, &declared(EncryptionProvider::Luks2)).unwrap();
        check_provider(EncryptionProvider::Luks2, &declared(EncryptionProvider::Luks2)).unwrap();

        let err =
            check_provider(EncryptionProvider::Luks2, &declared(EncryptionProvider::None)).unwrap_err();
        assert_eq!(err.kind, VolumeErrorKind::EncryptionProviderMismatch);
    }
}
