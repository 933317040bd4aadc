// SPDX-License-Identifier: GPL-3.0-only

//! Tagged records stored at the start of the META partition.
//!
//! Layout: the four byte magic `VMTA`, then records of
//! `tag: u8, length: u32 (big-endian), value`, closed by tag `0`.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};
use volume_contracts::{MetaStore, VolumeError};
use volume_types::constants::{META_PARTITION_LABEL, META_SIZE};

use crate::{Result, SysError};

const MAGIC: [u8; 4] = *b"VMTA";
const END_TAG: u8 = 0;

pub const STATE_ENCRYPTION_TAG: u8 = 0x0b;

type VolumeResult<T> = std::result::Result<T, VolumeError>;

/// Decodes the record area; a missing magic means an empty store.
fn decode(raw: &[u8]) -> Result<BTreeMap<u8, Vec<u8>>> {
    let mut records = BTreeMap::new();
    if raw.get(..MAGIC.len()) != Some(&MAGIC[..]) {
        return Ok(records);
    }

    let corrupt = |at: usize| SysError::parse("META", format!("truncated record at offset {at}"));
    let mut offset = MAGIC.len();
    loop {
        let tag = *raw.get(offset).ok_or_else(|| corrupt(offset))?;
        if tag == END_TAG {
            break;
        }
        let len_bytes: [u8; 4] = raw
            .get(offset + 1..offset + 5)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| corrupt(offset))?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        let value = raw
            .get(offset + 5..offset + 5 + len)
            .ok_or_else(|| corrupt(offset))?;
        records.insert(tag, value.to_vec());
        offset += 5 + len;
    }

    Ok(records)
}

fn encode(records: &BTreeMap<u8, Vec<u8>>) -> Result<Vec<u8>> {
    let mut out = MAGIC.to_vec();
    for (tag, value) in records {
        let len = u32::try_from(value.len())
            .map_err(|_| SysError::OperationFailed(format!("META tag {tag:#04x} too large")))?;
        out.push(*tag);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(value);
    }
    out.push(END_TAG);

    if out.len() as u64 > META_SIZE {
        return Err(SysError::OperationFailed(format!(
            "META records need {} bytes, partition holds {META_SIZE}",
            out.len()
        )));
    }
    Ok(out)
}

fn blocking_err(err: tokio::task::JoinError) -> SysError {
    SysError::OperationFailed(format!("blocking task failed: {err}"))
}

/// META partition accessed through its partition label symlink.
#[derive(Debug, Clone)]
pub struct MetaPartition {
    path: PathBuf,
}

impl MetaPartition {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn by_label() -> Self {
        Self::new(format!("/dev/disk/by-partlabel/{META_PARTITION_LABEL}"))
    }

    async fn load(&self) -> Result<BTreeMap<u8, Vec<u8>>> {
        let path = self.path.clone();
        let raw = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut file = std::fs::File::open(&path)?;
            let mut raw = Vec::new();
            Read::by_ref(&mut file).take(META_SIZE).read_to_end(&mut raw)?;
            Ok(raw)
        })
        .await
        .map_err(blocking_err)??;
        decode(&raw)
    }

    async fn store(&self, records: &BTreeMap<u8, Vec<u8>>) -> Result<()> {
        let data = encode(records)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut file = std::fs::OpenOptions::new().write(true).open(&path)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&data)?;
            file.sync_all()?;
            Ok(())
        })
        .await
        .map_err(blocking_err)?
    }

    async fn read_tag(&self, tag: u8) -> Result<Option<Vec<u8>>> {
        let mut records = self.load().await?;
        Ok(records.remove(&tag))
    }

    async fn set_tag(&self, tag: u8, value: &[u8]) -> Result<()> {
        let mut records = self.load().await?;
        if records.get(&tag).map(Vec::as_slice) == Some(value) {
            debug!(tag, "META tag unchanged");
            return Ok(());
        }
        records.insert(tag, value.to_vec());
        self.store(&records).await?;
        info!(tag, path = %self.path.display(), "updated META tag");
        Ok(())
    }
}

#[async_trait]
impl MetaStore for MetaPartition {
    async fn read_state_encryption(&self) -> VolumeResult<Option<Vec<u8>>> {
        Ok(self.read_tag(STATE_ENCRYPTION_TAG).await?)
    }

    async fn write_state_encryption(&self, record: &[u8]) -> VolumeResult<()> {
        Ok(self.set_tag(STATE_ENCRYPTION_TAG, record).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_partition_is_empty() {
        assert!(decode(&[0u8; 64]).unwrap().is_empty());
    }

    #[test]
    fn truncated_record_is_rejected() {
        let mut raw = MAGIC.to_vec();
        raw.extend_from_slice(&[STATE_ENCRYPTION_TAG, 0, 0, 0, 9, b'x']);
        assert!(decode(&raw).is_err());
    }

    #[tokio::test]
    async fn tags_survive_rewrites() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(4096).unwrap();
        let meta = MetaPartition::new(file.path());

        assert_eq!(meta.read_state_encryption().await.unwrap(), None);

        meta.set_tag(0x0c, b"other").await.unwrap();
        meta.write_state_encryption(br#"{"provider":"luks2"}"#)
            .await
            .unwrap();
        meta.write_state_encryption(b"{}").await.unwrap();

        assert_eq!(
            meta.read_state_encryption().await.unwrap().as_deref(),
            Some(&b"{}"[..])
        );
        assert_eq!(meta.read_tag(0x0c).await.unwrap().as_deref(), Some(&b"other"[..]));
    }

    #[tokio::test]
    async fn reads_stop_at_the_meta_size() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(META_SIZE + 4096).unwrap();
        let meta = MetaPartition::new(file.path());

        meta.write_state_encryption(b"{}").await.unwrap();
        let records = meta.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records.get(&STATE_ENCRYPTION_TAG).map(Vec::as_slice), Some(&b"{}"[..]));
    }
}
