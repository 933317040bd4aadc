// SPDX-License-Identifier: GPL-3.0-only

//! LUKS2 through `cryptsetup`; key material is always passed on stdin or in
//! a private temporary file, never on the command line.

use std::collections::BTreeMap;
use std::io::Write;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use volume_contracts::{KeyToken, LuksFormat, LuksOps, VolumeError};

use crate::command::{run, run_with_stdin, status};
use crate::{Result, SysError};

const TOKEN_TYPE_PREFIX: &str = "volume-";

type VolumeResult<T> = std::result::Result<T, VolumeError>;

#[derive(Debug, Default, Deserialize)]
struct LuksDump {
    #[serde(default)]
    keyslots: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    tokens: BTreeMap<String, StoredToken>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredToken {
    #[serde(rename = "type")]
    kind: String,
    keyslots: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    sealed_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    nonce: String,
}

impl StoredToken {
    fn from_key_token(token: &KeyToken) -> Self {
        Self {
            kind: format!("{TOKEN_TYPE_PREFIX}{}", token.kind),
            keyslots: vec![token.slot.to_string()],
            sealed_key: token.sealed_key.clone(),
            nonce: token.nonce.clone(),
        }
    }

    fn to_key_token(&self, slot: u32) -> Option<KeyToken> {
        let kind = self.kind.strip_prefix(TOKEN_TYPE_PREFIX)?;
        Some(KeyToken {
            kind: kind.to_string(),
            slot,
            sealed_key: self.sealed_key.clone(),
            nonce: self.nonce.clone(),
        })
    }

    fn binds(&self, slot: u32) -> bool {
        self.kind.starts_with(TOKEN_TYPE_PREFIX) && self.keyslots.contains(&slot.to_string())
    }
}

fn parse_dump(json: &str) -> Result<LuksDump> {
    serde_json::from_str(json).map_err(|e| SysError::parse("cryptsetup luksDump", e.to_string()))
}

fn bound_slots_of(dump: &LuksDump) -> Vec<u32> {
    let mut slots: Vec<u32> = dump.keyslots.keys().filter_map(|k| k.parse().ok()).collect();
    slots.sort_unstable();
    slots
}

fn token_for_slot(dump: &LuksDump, slot: u32) -> Option<(&str, &StoredToken)> {
    dump.tokens
        .iter()
        .find(|(_, token)| token.binds(slot))
        .map(|(id, token)| (id.as_str(), token))
}

fn format_args(device: &str, params: &LuksFormat) -> Vec<String> {
    let mut args = vec![
        "luksFormat".to_string(),
        "--type".to_string(),
        "luks2".to_string(),
        "--batch-mode".to_string(),
        "--cipher".to_string(),
        params.cipher.clone(),
        "--key-slot".to_string(),
        params.slot.to_string(),
        "--key-file".to_string(),
        "-".to_string(),
    ];
    if params.key_size != 0 {
        args.push("--key-size".to_string());
        args.push(params.key_size.to_string());
    }
    if params.block_size != 0 {
        args.push("--sector-size".to_string());
        args.push(params.block_size.to_string());
    }
    args.push(device.to_string());
    args
}

fn perf_flags(options: &[String]) -> Vec<String> {
    options.iter().map(|o| format!("--perf-{o}")).collect()
}

pub fn mapper_path(mapper_name: &str) -> String {
    format!("/dev/mapper/{mapper_name}")
}

/// LUKS2 operations backed by cryptsetup.
#[derive(Debug, Default, Clone)]
pub struct Cryptsetup;

impl Cryptsetup {
    async fn dump(&self, device: &str) -> Result<LuksDump> {
        let json = run("cryptsetup", &["luksDump", "--dump-json-metadata", device]).await?;
        parse_dump(&json)
    }

    async fn mapper_exists(&self, mapper_name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(mapper_path(mapper_name)).await?)
    }

    async fn add_key_file(
        &self,
        device: &str,
        existing: &[u8],
        slot: u32,
        key: &[u8],
    ) -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(key)?;
        file.flush()?;

        let path = file.path().to_string_lossy().to_string();
        let slot = slot.to_string();
        let args: [&str; 8] = [
            "luksAddKey",
            "--batch-mode",
            "--key-file",
            "-",
            "--key-slot",
            &slot,
            device,
            &path,
        ];
        run_with_stdin("cryptsetup", &args, existing).await?;
        Ok(())
    }
}

#[async_trait]
impl LuksOps for Cryptsetup {
    async fn is_luks(&self, device: &str) -> VolumeResult<bool> {
        let (code, _) = status("cryptsetup", &["isLuks", device], None).await?;
        Ok(code == 0)
    }

    async fn is_open(&self, mapper_name: &str) -> VolumeResult<bool> {
        Ok(self.mapper_exists(mapper_name).await?)
    }

    async fn format(&self, device: &str, params: &LuksFormat) -> VolumeResult<()> {
        let args = format_args(device, params);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_with_stdin("cryptsetup", &args, &params.key).await?;

        if let Some(token) = &params.token
            && let Err(err) = self.write_token(device, token).await
        {
            warn!(device, %err, "token import failed, wiping the new header");
            run("wipefs", &["--all", device]).await?;
            return Err(err);
        }

        info!(device, cipher = %params.cipher, slot = params.slot, "formatted LUKS2 header");
        Ok(())
    }

    async fn open(
        &self,
        device: &str,
        mapper_name: &str,
        key: &[u8],
        perf_options: &[String],
    ) -> VolumeResult<String> {
        let path = mapper_path(mapper_name);
        if self.mapper_exists(mapper_name).await? {
            debug!(device, mapper = %path, "already open");
            return Ok(path);
        }

        let mut args = vec![
            "luksOpen".to_string(),
            "--key-file".to_string(),
            "-".to_string(),
        ];
        args.extend(perf_flags(perf_options));
        args.push(device.to_string());
        args.push(mapper_name.to_string());

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_with_stdin("cryptsetup", &args, key).await?;
        Ok(path)
    }

    async fn close(&self, mapper_name: &str) -> VolumeResult<()> {
        if !self.mapper_exists(mapper_name).await? {
            return Ok(());
        }
        run("cryptsetup", &["luksClose", mapper_name]).await?;
        Ok(())
    }

    async fn add_key(
        &self,
        device: &str,
        existing_key: &[u8],
        slot: u32,
        key: &[u8],
    ) -> VolumeResult<()> {
        self.add_key_file(device, existing_key, slot, key).await?;
        info!(device, slot, "enrolled key slot");
        Ok(())
    }

    async fn test_key(&self, device: &str, slot: u32, key: &[u8]) -> VolumeResult<bool> {
        let slot = slot.to_string();
        let args: [&str; 7] = [
            "luksOpen",
            "--test-passphrase",
            "--key-slot",
            &slot,
            "--key-file",
            "-",
            device,
        ];
        let (code, _) = status("cryptsetup", &args, Some(key)).await?;
        Ok(code == 0)
    }

    async fn bound_slots(&self, device: &str) -> VolumeResult<Vec<u32>> {
        Ok(bound_slots_of(&self.dump(device).await?))
    }

    async fn read_token(&self, device: &str, slot: u32) -> VolumeResult<Option<KeyToken>> {
        let dump = self.dump(device).await?;
        Ok(token_for_slot(&dump, slot).and_then(|(_, token)| token.to_key_token(slot)))
    }

    async fn write_token(&self, device: &str, token: &KeyToken) -> VolumeResult<()> {
        let dump = self.dump(device).await?;
        if let Some((id, _)) = token_for_slot(&dump, token.slot) {
            run("cryptsetup", &["token", "remove", "--token-id", id, device]).await?;
        }

        let json = serde_json::to_vec(&StoredToken::from_key_token(token))
            .map_err(|e| SysError::OperationFailed(e.to_string()))?;
        run_with_stdin("cryptsetup", &["token", "import", "--json-file", "-", device], &json)
            .await?;
        Ok(())
    }
}
