// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use async_trait::async_trait;
use volume_contracts::{EntryKind, MountOps, MountRequest, MountedEntry, PathOps, Result, VolumeError};
use volume_types::FilesystemType;

use crate::host::{Event, FakeHost, HostState, Op};

/// One node of the directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub selinux_label: String,
    /// Symlink target
    pub link: Option<String>,
}

impl PathEntry {
    fn directory(mode: u32) -> Self {
        Self {
            kind: EntryKind::Directory,
            mode,
            uid: 0,
            gid: 0,
            selinux_label: String::new(),
            link: None,
        }
    }
}

fn ancestors(path: &str) -> Vec<String> {
    let mut paths: Vec<String> = Path::new(path)
        .ancestors()
        .map(|p| p.to_string_lossy().to_string())
        .filter(|p| !p.is_empty() && p != "/")
        .collect();
    paths.reverse();
    paths
}

fn is_below(path: &str, parent: &str) -> bool {
    path.strip_prefix(parent)
        .is_some_and(|rest| rest.starts_with('/'))
        || (parent == "/" && path != "/")
}

/// Block devices must carry the filesystem they are mounted as.
fn check_source(state: &HostState, request: &MountRequest) -> Result<()> {
    if request.flags.bind || !request.source.starts_with("/dev/") {
        return Ok(());
    }
    state.require_device(&request.source)?;
    match state.signatures.get(&request.source) {
        Some(found) if found.name == request.fstype => Ok(()),
        Some(found) => Err(VolumeError::io(format!(
            "{} carries {}, not {}",
            request.source, found.name, request.fstype
        ))),
        None => Err(VolumeError::io(format!(
            "{}: wrong fs type, bad superblock",
            request.source
        ))),
    }
}

fn missing(path: &str) -> VolumeError {
    VolumeError::io(format!("{path}: no such file or directory"))
}

impl FakeHost {
    pub fn mounted_at(&self, target: &str) -> Option<MountedEntry> {
        self.lock().mounts.get(target).cloned()
    }

    pub fn mount_targets(&self) -> Vec<String> {
        self.lock().mounts.keys().cloned().collect()
    }

    pub fn active_swaps(&self) -> Vec<String> {
        self.lock().swaps.iter().cloned().collect()
    }

    pub fn path_entry(&self, path: &str) -> Option<PathEntry> {
        self.lock().paths.get(path).cloned()
    }

    /// Creates a plain file, e.g. to collide with a symlink.
    pub fn with_file(self, path: &str) -> Self {
        self.lock().paths.insert(
            path.to_string(),
            PathEntry {
                kind: EntryKind::File,
                ..PathEntry::directory(0o644)
            },
        );
        self
    }
}

#[async_trait]
impl MountOps for FakeHost {
    async fn mount(&self, request: &MountRequest) -> Result<()> {
        let mut state = self.lock();
        state.check(Op::Mount)?;

        if request.flags.remount {
            let entry = state
                .mounts
                .get_mut(&request.target)
                .ok_or_else(|| VolumeError::io(format!("{} is not mounted", request.target)))?;
            entry.read_only = request.flags.read_only;
            state.record(Event::Remounted {
                target: request.target.clone(),
                read_only: request.flags.read_only,
            });
            return Ok(());
        }

        if state.mounts.contains_key(&request.target) {
            return Err(VolumeError::io(format!("{} is already mounted", request.target)));
        }
        match state.paths.get(&request.target).map(|e| e.kind) {
            Some(EntryKind::Directory) => {}
            _ => return Err(missing(&request.target)),
        }
        check_source(&state, request)?;

        state.mounts.insert(
            request.target.clone(),
            MountedEntry {
                source: request.source.clone(),
                target: request.target.clone(),
                fstype: request.fstype.clone(),
                read_only: request.flags.read_only,
            },
        );
        state.record(Event::Mounted {
            source: request.source.clone(),
            target: request.target.clone(),
        });
        Ok(())
    }

    async fn unmount(&self, target: &str) -> Result<()> {
        let mut state = self.lock();
        state.check(Op::Unmount)?;
        if !state.mounts.contains_key(target) {
            return Err(VolumeError::io(format!("{target}: not mounted")));
        }
        if state.mounts.keys().any(|other| is_below(other, target)) {
            return Err(VolumeError::io(format!("{target}: target is busy")));
        }

        state.mounts.remove(target);
        state.record(Event::Unmounted {
            target: target.to_string(),
        });
        Ok(())
    }

    async fn mounted(&self, target: &str) -> Result<Option<MountedEntry>> {
        Ok(self.lock().mounts.get(target).cloned())
    }

    async fn swap_on(&self, device: &str) -> Result<()> {
        let mut state = self.lock();
        state.require_device(device)?;
        let swap = FilesystemType::Swap.as_str();
        if state.signatures.get(device).is_none_or(|s| s.name != swap) {
            return Err(VolumeError::io(format!("{device}: swap signature not found")));
        }
        if state.swaps.insert(device.to_string()) {
            state.record(Event::SwapOn {
                device: device.to_string(),
            });
        }
        Ok(())
    }

    async fn swap_off(&self, device: &str) -> Result<()> {
        let mut state = self.lock();
        if state.swaps.remove(device) {
            state.record(Event::SwapOff {
                device: device.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PathOps for FakeHost {
    async fn create_dir_all(&self, path: &str, mode: u32) -> Result<()> {
        let mut state = self.lock();
        let chain = ancestors(path);
        let last = chain.len().saturating_sub(1);

        for (i, dir) in chain.into_iter().enumerate() {
            match state.paths.get(&dir).map(|e| e.kind) {
                Some(EntryKind::File) => {
                    return Err(VolumeError::io(format!("{dir}: not a directory")));
                }
                Some(_) => {}
                None => {
                    let mode = if i == last { mode } else { 0o755 };
                    state.paths.insert(dir, PathEntry::directory(mode));
                }
            }
        }
        Ok(())
    }

    async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        let mut state = self.lock();
        let entry = state.paths.get_mut(path).ok_or_else(|| missing(path))?;
        entry.uid = uid;
        entry.gid = gid;
        Ok(())
    }

    async fn set_label(&self, path: &str, label: &str, recursive: bool) -> Result<()> {
        let mut state = self.lock();
        if !state.paths.contains_key(path) {
            return Err(missing(path));
        }
        for (other, entry) in state.paths.iter_mut() {
            if other == path || (recursive && is_below(other, path)) {
                entry.selinux_label = label.to_string();
            }
        }
        Ok(())
    }

    async fn symlink(&self, target: &str, link: &str) -> Result<()> {
        let mut state = self.lock();
        if state.paths.contains_key(link) {
            return Err(VolumeError::io(format!("{link}: file exists")));
        }
        state.paths.insert(
            link.to_string(),
            PathEntry {
                kind: EntryKind::Symlink,
                link: Some(target.to_string()),
                ..PathEntry::directory(0o777)
            },
        );
        Ok(())
    }

    async fn read_link(&self, path: &str) -> Result<Option<String>> {
        Ok(self.lock().paths.get(path).and_then(|e| e.link.clone()))
    }

    async fn remove_all(&self, path: &str) -> Result<()> {
        let mut state = self.lock();
        if state.mounts.keys().any(|m| m == path || is_below(m, path)) {
            return Err(VolumeError::io(format!("{path}: device or resource busy")));
        }
        state.paths.retain(|p, _| p != path && !is_below(p, path));
        Ok(())
    }

    async fn entry_kind(&self, path: &str) -> Result<EntryKind> {
        Ok(self
            .lock()
            .paths
            .get(path)
            .map_or(EntryKind::Missing, |e| e.kind))
    }
}
