// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::CString;
use std::io::ErrorKind;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::unistd::{Gid, Uid};
use tracing::debug;
use volume_contracts::{EntryKind, PathOps, VolumeError};

use crate::{Result, SysError};

const SELINUX_XATTR: &str = "security.selinux";
const SELINUX_FS: &str = "/sys/fs/selinux";

type VolumeResult<T> = std::result::Result<T, VolumeError>;

fn set_label_one(path: &Path, label: &str) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| SysError::OperationFailed(format!("invalid path {}", path.display())))?;
    let name = CString::new(SELINUX_XATTR)
        .map_err(|_| SysError::OperationFailed("invalid xattr name".to_string()))?;
    let value = label.as_bytes();

    // SAFETY: both strings are NUL-terminated and `value` outlives the call.
    let rc = unsafe {
        libc::lsetxattr(
            c_path.as_ptr(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            0,
        )
    };
    nix::errno::Errno::result(rc)?;
    Ok(())
}

fn set_label_tree(root: &Path, label: &str) -> Result<()> {
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(path) = pending.pop() {
        set_label_one(&path, label)?;

        let metadata = std::fs::symlink_metadata(&path)?;
        if metadata.is_dir() {
            for entry in std::fs::read_dir(&path)? {
                pending.push(entry?.path());
            }
        }
    }

    Ok(())
}

fn blocking_err(err: tokio::task::JoinError) -> SysError {
    SysError::OperationFailed(format!("blocking task failed: {err}"))
}

/// Directory, ownership, label and symlink handling on the host filesystem.
#[derive(Debug, Clone)]
pub struct SysPaths {
    selinux_enabled: bool,
}

impl SysPaths {
    pub fn new() -> Self {
        Self {
            selinux_enabled: Path::new(SELINUX_FS).join("enforce").exists(),
        }
    }
}

impl Default for SysPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PathOps for SysPaths {
    async fn create_dir_all(&self, path: &str, mode: u32) -> VolumeResult<()> {
        tokio::fs::create_dir_all(path).await.map_err(SysError::from)?;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(SysError::from)?;
        Ok(())
    }

    async fn chown(&self, path: &str, uid: u32, gid: u32) -> VolumeResult<()> {
        nix::unistd::chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .map_err(SysError::from)?;
        Ok(())
    }

    async fn set_label(&self, path: &str, label: &str, recursive: bool) -> VolumeResult<()> {
        if !self.selinux_enabled || label.is_empty() {
            return Ok(());
        }

        let root = PathBuf::from(path);
        let label = label.to_string();
        tokio::task::spawn_blocking(move || {
            if recursive {
                set_label_tree(&root, &label)
            } else {
                set_label_one(&root, &label)
            }
        })
        .await
        .map_err(blocking_err)??;

        debug!(path, recursive, "applied SELinux label");
        Ok(())
    }

    async fn symlink(&self, target: &str, link: &str) -> VolumeResult<()> {
        tokio::fs::symlink(target, link)
            .await
            .map_err(SysError::from)?;
        Ok(())
    }

    async fn read_link(&self, path: &str) -> VolumeResult<Option<String>> {
        match tokio::fs::read_link(path).await {
            Ok(target) => Ok(Some(target.to_string_lossy().to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) if err.kind() == ErrorKind::InvalidInput => Ok(None),
            Err(err) => Err(SysError::from(err).into()),
        }
    }

    async fn remove_all(&self, path: &str) -> VolumeResult<()> {
        let result = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        };
        result.map_err(SysError::from)?;
        Ok(())
    }

    async fn entry_kind(&self, path: &str) -> VolumeResult<EntryKind> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.file_type().is_symlink() => Ok(EntryKind::Symlink),
            Ok(meta) if meta.is_dir() => Ok(EntryKind::Directory),
            Ok(_) => Ok(EntryKind::File),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(EntryKind::Missing),
            Err(err) => Err(SysError::from(err).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> SysPaths {
        SysPaths {
            selinux_enabled: false,
        }
    }

    #[tokio::test]
    async fn creates_and_classifies_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let paths = paths();

        let nested = format!("{root}/var/log/audit");
        paths.create_dir_all(&nested, 0o700).await.unwrap();
        assert_eq!(paths.entry_kind(&nested).await.unwrap(), EntryKind::Directory);

        let mode = std::fs::metadata(&nested).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);

        let link = format!("{root}/var/run");
        paths.symlink("/run", &link).await.unwrap();
        assert_eq!(paths.entry_kind(&link).await.unwrap(), EntryKind::Symlink);
        assert_eq!(paths.read_link(&link).await.unwrap().as_deref(), Some("/run"));
        assert_eq!(paths.read_link(&nested).await.unwrap(), None);

        paths.remove_all(&link).await.unwrap();
        assert_eq!(paths.entry_kind(&link).await.unwrap(), EntryKind::Missing);
        paths.remove_all(&link).await.unwrap();
    }

    #[tokio::test]
    async fn labels_are_skipped_without_selinux() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        paths()
            .set_label(&path, "system_u:object_r:var_log_t:s0", true)
            .await
            .unwrap();
    }
}
