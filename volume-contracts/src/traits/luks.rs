// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Parameters for a new LUKS2 header; `key` is bound to `slot`.
#[derive(Clone, PartialEq, Eq)]
pub struct LuksFormat {
    pub cipher: String,
    pub key_size: u32,
    pub block_size: u64,
    pub perf_options: Vec<String>,
    pub slot: u32,
    pub key: Vec<u8>,
    /// Stored together with the header; a header is never left without it.
    pub token: Option<KeyToken>,
}

impl std::fmt::Debug for LuksFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuksFormat")
            .field("cipher", &self.cipher)
            .field("key_size", &self.key_size)
            .field("block_size", &self.block_size)
            .field("perf_options", &self.perf_options)
            .field("slot", &self.slot)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Metadata stored in a LUKS2 token next to a key slot.
///
/// KMS and TPM keys keep their sealed material here so the key can be
/// recovered on the next boot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyToken {
    /// Key handler that wrote the token (e.g., "kms", "tpm")
    #[serde(rename = "type")]
    pub kind: String,
    pub slot: u32,

    /// Base64 sealed key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sealed_key: String,

    /// Base64 per-volume nonce
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nonce: String,
}

#[async_trait]
pub trait LuksOps: Send + Sync {
    /// Whether the device carries a LUKS header.
    async fn is_luks(&self, device: &str) -> Result<bool>;

    async fn is_open(&self, mapper_name: &str) -> Result<bool>;

    /// Writes a new header, replacing any previous one.
    async fn format(&self, device: &str, params: &LuksFormat) -> Result<()>;

    /// Opens the device as `/dev/mapper/<mapper_name>` and returns that path.
    async fn open(
        &self,
        device: &str,
        mapper_name: &str,
        key: &[u8],
        perf_options: &[String],
    ) -> Result<String>;

    /// Closing a mapper that is not open succeeds.
    async fn close(&self, mapper_name: &str) -> Result<()>;

    async fn add_key(&self, device: &str, existing_key: &[u8], slot: u32, key: &[u8])
    -> Result<()>;

    /// Whether `key` unlocks `slot`.
    async fn test_key(&self, device: &str, slot: u32, key: &[u8]) -> Result<bool>;

    /// Slots that currently hold a key.
    async fn bound_slots(&self, device: &str) -> Result<Vec<u32>>;

    async fn read_token(&self, device: &str, slot: u32) -> Result<Option<KeyToken>>;

    async fn write_token(&self, device: &str, token: &KeyToken) -> Result<()>;
}
