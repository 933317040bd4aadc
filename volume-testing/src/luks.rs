// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use async_trait::async_trait;
use uuid::Uuid;
use volume_contracts::{
    KeyToken, LUKS_SIGNATURE, LuksFormat, LuksOps, ProbeResult, Result, VolumeError,
};
use volume_types::VolumeErrorKind;

use crate::host::{Event, FakeHost, HostState, Op};

/// LUKS2 header of one device.
#[derive(Debug, Clone, Default)]
pub(crate) struct LuksHeader {
    pub cipher: String,
    pub slots: BTreeMap<u32, Vec<u8>>,
    pub tokens: BTreeMap<u32, KeyToken>,
}

impl LuksHeader {
    fn unlocks(&self, key: &[u8]) -> bool {
        self.slots.values().any(|k| k == key)
    }
}

fn locked(message: String) -> VolumeError {
    VolumeError::new(VolumeErrorKind::EncryptionLocked, message)
}

fn header<'s>(state: &'s HostState, device: &str) -> Result<&'s LuksHeader> {
    state
        .luks
        .get(device)
        .ok_or_else(|| VolumeError::io(format!("{device} is not a LUKS device")))
}

impl FakeHost {
    pub fn luks_slots(&self, device: &str) -> Vec<u32> {
        self.lock()
            .luks
            .get(device)
            .map(|h| h.slots.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn luks_cipher(&self, device: &str) -> Option<String> {
        self.lock().luks.get(device).map(|h| h.cipher.clone())
    }

    pub fn luks_token(&self, device: &str, slot: u32) -> Option<KeyToken> {
        self.lock()
            .luks
            .get(device)
            .and_then(|h| h.tokens.get(&slot).cloned())
    }

    /// A header as left by a crash right after luksFormat: `key` in `slot`,
    /// no token.
    pub fn with_bare_luks_header(self, device: &str, slot: u32, key: &[u8]) -> Self {
        let mut state = self.lock();
        state.luks.insert(
            device.to_string(),
            LuksHeader {
                cipher: "aes-xts-plain64".to_string(),
                slots: BTreeMap::from([(slot, key.to_vec())]),
                tokens: BTreeMap::new(),
            },
        );
        state.signatures.insert(
            device.to_string(),
            ProbeResult {
                name: LUKS_SIGNATURE.to_string(),
                label: String::new(),
                uuid: Uuid::new_v4().to_string(),
            },
        );
        drop(state);
        self
    }

    /// Binds `key` to `slot` behind the reconciler's back.
    pub fn bind_luks_slot(&self, device: &str, slot: u32, key: &[u8]) {
        if let Some(header) = self.lock().luks.get_mut(device) {
            header.slots.insert(slot, key.to_vec());
        }
    }

    pub fn open_mappers(&self) -> Vec<String> {
        self.lock().mappers.keys().cloned().collect()
    }
}

#[async_trait]
impl LuksOps for FakeHost {
    async fn is_luks(&self, device: &str) -> Result<bool> {
        let state = self.lock();
        state.require_device(device)?;
        Ok(state.luks.contains_key(device))
    }

    async fn is_open(&self, mapper_name: &str) -> Result<bool> {
        Ok(self.lock().mappers.contains_key(mapper_name))
    }

    async fn format(&self, device: &str, params: &LuksFormat) -> Result<()> {
        self.pause(Op::LuksFormat).await;
        let mut state = self.lock();
        state.check(Op::LuksFormat)?;
        state.require_device(device)?;
        if state.mappers.values().any(|backing| backing == device) {
            return Err(VolumeError::io(format!("{device} is open, refusing to format it")));
        }

        let header = LuksHeader {
            cipher: params.cipher.clone(),
            slots: BTreeMap::from([(params.slot, params.key.clone())]),
            tokens: params
                .token
                .iter()
                .map(|token| (token.slot, token.clone()))
                .collect(),
        };
        state.luks.insert(device.to_string(), header);
        state.signatures.insert(
            device.to_string(),
            ProbeResult {
                name: LUKS_SIGNATURE.to_string(),
                label: String::new(),
                uuid: Uuid::new_v4().to_string(),
            },
        );
        state.record(Event::LuksFormatted {
            device: device.to_string(),
        });
        Ok(())
    }

    async fn open(
        &self,
        device: &str,
        mapper_name: &str,
        key: &[u8],
        _perf_options: &[String],
    ) -> Result<String> {
        let mut state = self.lock();
        state.check(Op::LuksOpen)?;
        if !header(&state, device)?.unlocks(key) {
            return Err(locked(format!("no key slot of {device} accepts the key")));
        }
        if let Some(holder) = state.mappers.get(mapper_name) {
            return Err(VolumeError::io(format!(
                "mapper {mapper_name} is busy with {holder}"
            )));
        }

        state
            .mappers
            .insert(mapper_name.to_string(), device.to_string());
        state.record(Event::LuksOpened {
            device: device.to_string(),
            mapper: mapper_name.to_string(),
        });
        Ok(format!("/dev/mapper/{mapper_name}"))
    }

    async fn close(&self, mapper_name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check(Op::LuksClose)?;
        let path = format!("/dev/mapper/{mapper_name}");
        if state.mounts.values().any(|m| m.source == path) || state.swaps.contains(&path) {
            return Err(VolumeError::io(format!("{path} is still in use")));
        }
        if state.mappers.remove(mapper_name).is_some() {
            state.record(Event::LuksClosed {
                mapper: mapper_name.to_string(),
            });
        }
        Ok(())
    }

    async fn add_key(
        &self,
        device: &str,
        existing_key: &[u8],
        slot: u32,
        key: &[u8],
    ) -> Result<()> {
        let mut state = self.lock();
        state.check(Op::AddKey)?;
        let current = header(&state, device)?;
        if !current.unlocks(existing_key) {
            return Err(locked(format!("existing key does not open {device}")));
        }
        if current.slots.contains_key(&slot) {
            return Err(VolumeError::io(format!("{device}: key slot {slot} is in use")));
        }

        if let Some(header) = state.luks.get_mut(device) {
            header.slots.insert(slot, key.to_vec());
        }
        state.record(Event::KeyAdded {
            device: device.to_string(),
            slot,
        });
        Ok(())
    }

    async fn test_key(&self, device: &str, slot: u32, key: &[u8]) -> Result<bool> {
        let state = self.lock();
        Ok(header(&state, device)?.slots.get(&slot).is_some_and(|k| k == key))
    }

    async fn bound_slots(&self, device: &str) -> Result<Vec<u32>> {
        let state = self.lock();
        Ok(header(&state, device)?.slots.keys().copied().collect())
    }

    async fn read_token(&self, device: &str, slot: u32) -> Result<Option<KeyToken>> {
        let state = self.lock();
        Ok(header(&state, device)?.tokens.get(&slot).cloned())
    }

    async fn write_token(&self, device: &str, token: &KeyToken) -> Result<()> {
        let mut state = self.lock();
        state.check(Op::WriteToken)?;
        header(&state, device)?;
        if let Some(header) = state.luks.get_mut(device) {
            header.tokens.insert(token.slot, token.clone());
        }
        state.record(Event::TokenWritten {
            device: device.to_string(),
            slot: token.slot,
        });
        Ok(())
    }
}
