// SPDX-License-Identifier: GPL-3.0-only

//! Key sealing against the Secure Boot PCR with tpm2-tools.
//!
//! A sealed blob is the TPM public area and private area of the sealed
//! object, each prefixed with its big-endian u32 length.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};
use volume_contracts::{TpmSealer, VolumeError};

use crate::command::{run, run_with_stdin};
use crate::{Result, SysError};

const SECURE_BOOT_VAR: &str =
    "/sys/firmware/efi/efivars/SecureBoot-8be4df61-93ca-11d2-aa0d-00e098032b8c";

type VolumeResult<T> = std::result::Result<T, VolumeError>;

/// efivarfs prefixes the variable with four attribute bytes.
fn secure_boot_from_efivar(raw: &[u8]) -> bool {
    raw.get(4) == Some(&1)
}

fn pack(public: &[u8], private: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(8 + public.len() + private.len());
    for part in [public, private] {
        blob.extend_from_slice(&(part.len() as u32).to_be_bytes());
        blob.extend_from_slice(part);
    }
    blob
}

fn unpack(blob: &[u8]) -> Result<(&[u8], &[u8])> {
    fn take(data: &[u8]) -> Option<(&[u8], &[u8])> {
        let len = u32::from_be_bytes(data.get(..4)?.try_into().ok()?) as usize;
        let part = data.get(4..4 + len)?;
        Some((part, &data[4 + len..]))
    }

    let malformed = || SysError::TpmUnseal("malformed sealed key".to_string());
    let (public, rest) = take(blob).ok_or_else(malformed)?;
    let (private, rest) = take(rest).ok_or_else(malformed)?;
    if !rest.is_empty() {
        return Err(malformed());
    }
    Ok((public, private))
}

fn pcr_selection(pcr: u32) -> String {
    format!("sha256:{pcr}")
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// TPM 2.0 sealing through the tpm2-tools command line utilities.
#[derive(Debug, Default, Clone)]
pub struct Tpm2Tools;

impl Tpm2Tools {
    async fn create_primary(&self, dir: &Path) -> Result<String> {
        let primary = path_str(&dir.join("primary.ctx"));
        run("tpm2_createprimary", &["-Q", "-C", "o", "-c", &primary]).await?;
        Ok(primary)
    }

    async fn seal_key(&self, key: &[u8], pcr: u32) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let primary = self.create_primary(dir.path()).await?;
        let policy = path_str(&dir.path().join("policy.digest"));
        let public = path_str(&dir.path().join("seal.pub"));
        let private = path_str(&dir.path().join("seal.priv"));
        let selection = pcr_selection(pcr);

        run(
            "tpm2_createpolicy",
            &["-Q", "--policy-pcr", "-l", &selection, "-L", &policy],
        )
        .await?;
        let args: [&str; 13] = [
            "-Q",
            "-C",
            &primary,
            "-L",
            &policy,
            "-i",
            "-",
            "-u",
            &public,
            "-r",
            &private,
            "-a",
            "fixedtpm|fixedparent|noda|adminwithpolicy",
        ];
        run_with_stdin("tpm2_create", &args, key).await?;

        let public = tokio::fs::read(&public).await?;
        let private = tokio::fs::read(&private).await?;
        Ok(pack(&public, &private))
    }

    async fn unseal_key(&self, sealed: &[u8], pcr: u32) -> Result<Vec<u8>> {
        let (public, private) = unpack(sealed)?;
        let dir = tempfile::tempdir()?;
        let primary = self.create_primary(dir.path()).await?;
        let public_path = path_str(&dir.path().join("seal.pub"));
        let private_path = path_str(&dir.path().join("seal.priv"));
        let object = path_str(&dir.path().join("seal.ctx"));
        tokio::fs::write(&public_path, public).await?;
        tokio::fs::write(&private_path, private).await?;

        run(
            "tpm2_load",
            &[
                "-Q", "-C", &primary, "-u", &public_path, "-r", &private_path, "-c", &object,
            ],
        )
        .await?;

        let auth = format!("pcr:{}", pcr_selection(pcr));
        let output = path_str(&dir.path().join("key"));
        // A PCR mismatch surfaces as a policy failure from tpm2_unseal.
        match run("tpm2_unseal", &["-c", &object, "-p", &auth, "-o", &output]).await {
            Ok(_) => {}
            Err(SysError::CommandFailed { stderr, .. }) => {
                warn!(%stderr, "TPM refused to unseal");
                return Err(SysError::TpmUnseal(stderr));
            }
            Err(err) => return Err(err),
        }

        let key = tokio::fs::read(&output).await?;
        debug!(pcr, "unsealed key");
        Ok(key)
    }
}

#[async_trait]
impl TpmSealer for Tpm2Tools {
    async fn secure_boot_enabled(&self) -> VolumeResult<bool> {
        match tokio::fs::read(SECURE_BOOT_VAR).await {
            Ok(raw) => Ok(secure_boot_from_efivar(&raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(SysError::from(err).into()),
        }
    }

    async fn seal(&self, key: &[u8], pcr: u32) -> VolumeResult<Vec<u8>> {
        Ok(self.seal_key(key, pcr).await?)
    }

    async fn unseal(&self, sealed: &[u8], pcr: u32) -> VolumeResult<Vec<u8>> {
        Ok(self.unseal_key(sealed, pcr).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volume_types::VolumeErrorKind;

    #[test]
    fn efivar_flag() {
        assert!(secure_boot_from_efivar(&[0x06, 0, 0, 0, 1]));
        assert!(!secure_boot_from_efivar(&[0x06, 0, 0, 0, 0]));
        assert!(!secure_boot_from_efivar(&[]));
    }

    #[test]
    fn blob_layout() {
        let blob = pack(b"pub", b"private");
        assert_eq!(&blob[..4], &[0, 0, 0, 3]);
        let (public, private) = unpack(&blob).unwrap();
        assert_eq!(public, b"pub");
        assert_eq!(private, b"private");
    }

    #[test]
    fn truncated_blob_is_an_unseal_failure() {
        let blob = pack(b"pub", b"private");
        let err = unpack(&blob[..blob.len() - 1]).unwrap_err();
        assert_eq!(
            VolumeError::from(err).kind,
            VolumeErrorKind::TpmUnsealFailure
        );
    }
}
