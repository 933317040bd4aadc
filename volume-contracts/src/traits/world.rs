// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use volume_config::Config;
use volume_types::{DiscoveredVolumeSpec, DiskSpec, SystemDisk};

use crate::Result;

/// Block devices as observed at the start of a tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedWorld {
    pub disks: Vec<DiskSpec>,

    /// Whole disks and partitions with their probed signatures
    pub volumes: Vec<DiscoveredVolumeSpec>,
    pub system_disk: Option<SystemDisk>,
}

impl ObservedWorld {
    pub fn disk(&self, dev_path: &str) -> Option<&DiskSpec> {
        self.disks.iter().find(|d| d.dev_path == dev_path)
    }

    pub fn volume(&self, dev_path: &str) -> Option<&DiscoveredVolumeSpec> {
        self.volumes.iter().find(|v| v.dev_path == dev_path)
    }

    pub fn is_system_disk(&self, dev_path: &str) -> bool {
        self.system_disk
            .as_ref()
            .is_some_and(|d| d.dev_path == dev_path)
    }
}

#[async_trait]
pub trait WorldSource: Send + Sync {
    async fn snapshot(&self) -> Result<ObservedWorld>;
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Current configuration documents; an empty set when none are present.
    async fn load(&self) -> Result<Config>;
}

/// Small tagged records kept in the META partition.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// The STATE encryption record, when one was saved.
    async fn read_state_encryption(&self) -> Result<Option<Vec<u8>>>;

    async fn write_state_encryption(&self, record: &[u8]) -> Result<()>;
}
