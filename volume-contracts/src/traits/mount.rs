// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountFlags {
    pub read_only: bool,
    pub no_atime: bool,
    pub no_suid: bool,
    pub no_dev: bool,
    pub no_exec: bool,
    pub bind: bool,
    /// Change flags of an existing mount instead of mounting.
    pub remount: bool,
}

impl MountFlags {
    /// Options as they would appear in a mount table.
    pub fn to_options(self) -> Vec<&'static str> {
        let mut options = vec![if self.read_only { "ro" } else { "rw" }];
        for (set, name) in [
            (self.no_atime, "noatime"),
            (self.no_suid, "nosuid"),
            (self.no_dev, "nodev"),
            (self.no_exec, "noexec"),
            (self.bind, "bind"),
            (self.remount, "remount"),
        ] {
            if set {
                options.push(name);
            }
        }
        options
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    pub source: String,
    pub target: String,
    pub fstype: String,
    pub flags: MountFlags,
    /// Filesystem specific data (e.g., "prjquota", "lowerdir=...")
    pub data: String,
}

/// An entry of the current mount table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountedEntry {
    pub source: String,
    pub target: String,
    pub fstype: String,
    pub read_only: bool,
}

#[async_trait]
pub trait MountOps: Send + Sync {
    async fn mount(&self, request: &MountRequest) -> Result<()>;

    async fn unmount(&self, target: &str) -> Result<()>;

    /// The mount at `target`, if any.
    async fn mounted(&self, target: &str) -> Result<Option<MountedEntry>>;

    async fn swap_on(&self, device: &str) -> Result<()>;

    async fn swap_off(&self, device: &str) -> Result<()>;
}
