// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Missing,
    Directory,
    Symlink,
    File,
}

/// Filesystem tree operations used to lay out mount points.
#[async_trait]
pub trait PathOps: Send + Sync {
    /// `mkdir -p`; `mode` applies to the last component.
    async fn create_dir_all(&self, path: &str, mode: u32) -> Result<()>;

    async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()>;

    /// Applies an SELinux label, to the whole subtree when `recursive`.
    async fn set_label(&self, path: &str, label: &str, recursive: bool) -> Result<()>;

    async fn symlink(&self, target: &str, link: &str) -> Result<()>;

    async fn read_link(&self, path: &str) -> Result<Option<String>>;

    async fn remove_all(&self, path: &str) -> Result<()>;

    async fn entry_kind(&self, path: &str) -> Result<EntryKind>;
}
