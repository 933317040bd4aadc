// SPDX-License-Identifier: GPL-3.0-only

//! Adapter wiring: one implementation per concern, chosen once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tracing::warn;
use volume_contracts::{
    ConfigSource, FilesystemOps, KmsClient, LuksOps, MetaStore, MountOps, NodeIdentity,
    PartitionOps, PathOps, TpmSealer, VolumeError, WorldSource,
};
use volume_sys::command::require_tool;
use volume_sys::{
    Cryptsetup, DmiIdentity, FileConfigSource, HttpKmsClient, LsblkWorld, MetaPartition,
    MkfsFilesystems, SgdiskPartitions, SysMounts, SysPaths, Tpm2Tools,
};

use crate::encryption::KeyBackends;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Concern {
    World,
    Config,
    Meta,
    Partitions,
    Filesystems,
    Luks,
    Mounts,
    Paths,
    Keys,
}

const ALL_CONCERNS: [Concern; 9] = [
    Concern::World,
    Concern::Config,
    Concern::Meta,
    Concern::Partitions,
    Concern::Filesystems,
    Concern::Luks,
    Concern::Mounts,
    Concern::Paths,
    Concern::Keys,
];

/// Tools without which no volume can be brought up.
const REQUIRED_TOOLS: [&str; 5] = ["lsblk", "sgdisk", "sfdisk", "cryptsetup", "wipefs"];
const TPM_TOOLS: [&str; 2] = ["tpm2_createprimary", "tpm2_unseal"];

/// Every implementation the reconciler needs.
#[derive(Clone)]
pub struct AdapterSet {
    pub world: Arc<dyn WorldSource>,
    pub config: Arc<dyn ConfigSource>,
    pub meta: Arc<dyn MetaStore>,
    pub partitions: Arc<dyn PartitionOps>,
    pub filesystems: Arc<dyn FilesystemOps>,
    pub luks: Arc<dyn LuksOps>,
    pub mounts: Arc<dyn MountOps>,
    pub paths: Arc<dyn PathOps>,
    pub node: Arc<dyn NodeIdentity>,
    pub kms: Arc<dyn KmsClient>,
    pub tpm: Arc<dyn TpmSealer>,
}

pub struct Adapters {
    routes: BTreeMap<Concern, &'static str>,
    set: AdapterSet,
}

impl std::fmt::Debug for Adapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapters")
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl Adapters {
    /// Routes every concern to `backend`.
    pub fn new(set: AdapterSet, backend: &'static str) -> Self {
        let routes = ALL_CONCERNS.iter().map(|c| (*c, backend)).collect();
        Self { routes, set }
    }

    /// Host adapters from `volume-sys`. Fails when a required tool is missing.
    pub fn system(settings: &Settings) -> Result<Self> {
        for tool in REQUIRED_TOOLS {
            require_tool(tool).with_context(|| format!("{tool} is required"))?;
        }
        if TPM_TOOLS.iter().any(|tool| require_tool(tool).is_err()) {
            warn!("tpm2-tools not found, TPM key slots will fail to unlock");
        }

        let kms = HttpKmsClient::new(settings.timeouts.kms).context("building KMS client")?;
        let set = AdapterSet {
            world: Arc::new(LsblkWorld::new(settings.controller.system_disk.clone())),
            config: Arc::new(FileConfigSource::new(&settings.controller.config_path)),
            meta: Arc::new(MetaPartition::by_label()),
            partitions: Arc::new(SgdiskPartitions),
            filesystems: Arc::new(MkfsFilesystems),
            luks: Arc::new(Cryptsetup),
            mounts: Arc::new(SysMounts),
            paths: Arc::new(SysPaths::new()),
            node: Arc::new(DmiIdentity::new()),
            kms: Arc::new(kms),
            tpm: Arc::new(TimedTpm::new(Arc::new(Tpm2Tools), settings.timeouts.tpm)),
        };

        let mut adapters = Self::new(set, "volume-sys");
        adapters.routes.insert(Concern::World, "lsblk");
        adapters.routes.insert(Concern::Partitions, "sgdisk");
        adapters.routes.insert(Concern::Luks, "cryptsetup");
        adapters.check_routes()?;
        Ok(adapters)
    }

    fn check_routes(&self) -> Result<()> {
        for concern in ALL_CONCERNS {
            if !self.routes.contains_key(&concern) {
                return Err(anyhow!("missing adapter routing for {concern:?}"));
            }
        }
        Ok(())
    }

    pub fn route_for(&self, concern: Concern) -> Option<&'static str> {
        self.routes.get(&concern).copied()
    }

    pub fn world(&self) -> Arc<dyn WorldSource> {
        self.set.world.clone()
    }

    pub fn config(&self) -> Arc<dyn ConfigSource> {
        self.set.config.clone()
    }

    pub fn meta(&self) -> Arc<dyn MetaStore> {
        self.set.meta.clone()
    }

    pub fn partitions(&self) -> Arc<dyn PartitionOps> {
        self.set.partitions.clone()
    }

    pub fn filesystems(&self) -> Arc<dyn FilesystemOps> {
        self.set.filesystems.clone()
    }

    pub fn luks(&self) -> Arc<dyn LuksOps> {
        self.set.luks.clone()
    }

    pub fn mounts(&self) -> Arc<dyn MountOps> {
        self.set.mounts.clone()
    }

    pub fn paths(&self) -> Arc<dyn PathOps> {
        self.set.paths.clone()
    }

    pub fn keys(&self) -> KeyBackends {
        KeyBackends {
            node: self.set.node.clone(),
            kms: self.set.kms.clone(),
            tpm: self.set.tpm.clone(),
        }
    }
}

/// Bounds every TPM call.
pub struct TimedTpm {
    inner: Arc<dyn TpmSealer>,
    timeout: Duration,
}

impl TimedTpm {
    pub fn new(inner: Arc<dyn TpmSealer>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, VolumeError>>,
    ) -> Result<T, VolumeError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| VolumeError::timeout(operation))?
    }
}

#[async_trait]
impl TpmSealer for TimedTpm {
    async fn secure_boot_enabled(&self) -> Result<bool, VolumeError> {
        self.bounded("secure boot probe", self.inner.secure_boot_enabled())
            .await
    }

    async fn seal(&self, key: &[u8], pcr: u32) -> Result<Vec<u8>, VolumeError> {
        self.bounded("TPM seal", self.inner.seal(key, pcr)).await
    }

    async fn unseal(&self, sealed: &[u8], pcr: u32) -> Result<Vec<u8>, VolumeError> {
        self.bounded("TPM unseal", self.inner.unseal(sealed, pcr))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volume_types::VolumeErrorKind;

    struct SlowTpm;

    #[async_trait]
    impl TpmSealer for SlowTpm {
        async fn secure_boot_enabled(&self) -> Result<bool, VolumeError> {
            Ok(true)
        }

        async fn seal(&self, key: &[u8], _pcr: u32) -> Result<Vec<u8>, VolumeError> {
            Ok(key.to_vec())
        }

        async fn unseal(&self, _sealed: &[u8], _pcr: u32) -> Result<Vec<u8>, VolumeError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tpm_calls_time_out() {
        let tpm = TimedTpm::new(Arc::new(SlowTpm), Duration::from_secs(5));
        assert_eq!(tpm.seal(b"key", 7).await.unwrap(), b"key");

        let err = tpm.unseal(b"blob", 7).await.unwrap_err();
        assert_eq!(err.kind, VolumeErrorKind::Timeout);
    }
}
