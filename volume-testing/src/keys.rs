// SPDX-License-Identifier: GPL-3.0-only

//! Node identity, KMS and TPM.
//!
//! The KMS keeps every sealed key in memory and only hands it back to the
//! node and nonce it was sealed for. TPM blobs carry the PCR 7 value they
//! were sealed against; changing the PCR makes them unreadable.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use volume_contracts::{KmsClient, KmsRequest, NodeIdentity, Result, TpmSealer, VolumeError};
use volume_types::VolumeErrorKind;

use crate::host::{FakeHost, Op};

#[derive(Debug, Clone, PartialEq, Eq)]
struct SealedKey {
    endpoint: String,
    node_uuid: String,
    nonce: String,
    key: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct KmsState {
    pub unreachable: bool,
    sealed: BTreeMap<String, SealedKey>,
    next: u64,
}

fn decode(value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|err| VolumeError::io(format!("KMS rejected the payload: {err}")))
}

impl FakeHost {
    /// Changes the PCR 7 measurement, as a Secure Boot policy update would.
    pub fn change_pcr7(&self) {
        let mut state = self.lock();
        state.pcr7 = state.pcr7.wrapping_add(1);
    }

    pub fn set_kms_reachable(&self, reachable: bool) {
        self.lock().kms.unreachable = !reachable;
    }

    pub fn kms_sealed_keys(&self) -> usize {
        self.lock().kms.sealed.len()
    }
}

#[async_trait]
impl NodeIdentity for FakeHost {
    async fn node_uuid(&self) -> Result<String> {
        Ok(self.lock().node_uuid.clone())
    }
}

#[async_trait]
impl KmsClient for FakeHost {
    async fn seal(&self, endpoint: &str, request: &KmsRequest) -> Result<Vec<u8>> {
        let mut state = self.lock();
        state.check(Op::KmsSeal)?;
        if state.kms.unreachable {
            return Err(VolumeError::io(format!("{endpoint}: connection refused")));
        }

        let key = decode(&request.data)?;
        state.kms.next += 1;
        let handle = format!("kms-sealed-{}", state.kms.next);
        let sealed = SealedKey {
            endpoint: endpoint.to_string(),
            node_uuid: request.node_uuid.clone(),
            nonce: request.nonce.clone(),
            key,
        };
        state.kms.sealed.insert(handle.clone(), sealed);
        Ok(handle.into_bytes())
    }

    async fn unseal(&self, endpoint: &str, request: &KmsRequest) -> Result<Vec<u8>> {
        let mut state = self.lock();
        state.check(Op::KmsUnseal)?;
        if state.kms.unreachable {
            return Err(VolumeError::io(format!("{endpoint}: connection refused")));
        }

        let handle = String::from_utf8(decode(&request.data)?)
            .map_err(|_| VolumeError::io("KMS rejected the payload: not a sealed key"))?;
        match state.kms.sealed.get(&handle) {
            Some(sealed)
                if sealed.endpoint == endpoint
                    && sealed.node_uuid == request.node_uuid
                    && sealed.nonce == request.nonce =>
            {
                Ok(sealed.key.clone())
            }
            _ => Err(VolumeError::new(
                VolumeErrorKind::EncryptionLocked,
                format!("{endpoint} refused to unseal slot {}", request.slot),
            )),
        }
    }
}

#[async_trait]
impl TpmSealer for FakeHost {
    async fn secure_boot_enabled(&self) -> Result<bool> {
        Ok(self.lock().secure_boot)
    }

    async fn seal(&self, key: &[u8], pcr: u32) -> Result<Vec<u8>> {
        let state = self.lock();
        let mut blob = pcr.to_be_bytes().to_vec();
        blob.extend_from_slice(&state.pcr7.to_be_bytes());
        blob.extend_from_slice(key);
        Ok(blob)
    }

    async fn unseal(&self, sealed: &[u8], pcr: u32) -> Result<Vec<u8>> {
        let mut state = self.lock();
        state.check(Op::TpmUnseal)?;

        let (header, key) = sealed.split_at(sealed.len().min(8));
        let mut expected = pcr.to_be_bytes().to_vec();
        expected.extend_from_slice(&state.pcr7.to_be_bytes());
        if header != expected.as_slice() {
            return Err(VolumeError::new(
                VolumeErrorKind::TpmUnsealFailure,
                format!("PCR {pcr} policy does not match the sealed object"),
            ));
        }
        Ok(key.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(data: &[u8], nonce: &str) -> KmsRequest {
        KmsRequest {
            node_uuid: crate::host::NODE_UUID.into(),
            nonce: nonce.into(),
            slot: 1,
            data: STANDARD.encode(data),
        }
    }

    #[tokio::test]
    async fn kms_unseals_only_for_the_sealing_nonce() {
        let host = FakeHost::new();
        let endpoint = "https://kms.example.com";
        let sealed = KmsClient::seal(&host, endpoint, &request(b"secret", "n1"))
            .await
            .unwrap();

        let plain = KmsClient::unseal(&host, endpoint, &request(&sealed, "n1"))
            .await
            .unwrap();
        assert_eq!(plain, b"secret");

        let err = KmsClient::unseal(&host, endpoint, &request(&sealed, "n2"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, VolumeErrorKind::EncryptionLocked);
    }

    #[tokio::test]
    async fn pcr_change_breaks_unseal() {
        let host = FakeHost::new();
        let blob = TpmSealer::seal(&host, b"key", 7).await.unwrap();
        assert_eq!(TpmSealer::unseal(&host, &blob, 7).await.unwrap(), b"key");

        host.change_pcr7();
        let err = TpmSealer::unseal(&host, &blob, 7).await.unwrap_err();
        assert_eq!(err.kind, VolumeErrorKind::TpmUnsealFailure);
    }
}
