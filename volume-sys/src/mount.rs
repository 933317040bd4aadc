// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::CString;

use async_trait::async_trait;
use nix::mount::{MntFlags, MsFlags};
use tracing::{debug, info};
use volume_contracts::{MountFlags, MountOps, MountRequest, MountedEntry, VolumeError};

use crate::{Result, SysError};

const MOUNTS: &str = "/proc/self/mounts";

type VolumeResult<T> = std::result::Result<T, VolumeError>;

fn ms_flags(flags: MountFlags) -> MsFlags {
    let mut ms = MsFlags::empty();
    for (set, flag) in [
        (flags.read_only, MsFlags::MS_RDONLY),
        (flags.no_atime, MsFlags::MS_NOATIME),
        (flags.no_suid, MsFlags::MS_NOSUID),
        (flags.no_dev, MsFlags::MS_NODEV),
        (flags.no_exec, MsFlags::MS_NOEXEC),
        (flags.bind, MsFlags::MS_BIND),
        (flags.remount, MsFlags::MS_REMOUNT),
    ] {
        if set {
            ms |= flag;
        }
    }
    ms
}

/// Undoes the octal escaping the kernel applies to mount table fields.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\'
            && let Some(digits) = bytes.get(i + 1..i + 4)
            && digits.iter().all(|d| (b'0'..=b'7').contains(d))
        {
            let code = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
            out.push(code as u8);
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).to_string()
}

fn parse_mounts(table: &str) -> Vec<MountedEntry> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = unescape(fields.next()?);
            let target = unescape(fields.next()?);
            let fstype = fields.next()?.to_string();
            let options = fields.next()?;
            Some(MountedEntry {
                source,
                target,
                fstype,
                read_only: options.split(',').any(|o| o == "ro"),
            })
        })
        .collect()
}

fn blocking_err(err: tokio::task::JoinError) -> SysError {
    SysError::OperationFailed(format!("blocking task failed: {err}"))
}

/// mount(2), umount2(2) and swapon(2) on the running system.
#[derive(Debug, Default, Clone)]
pub struct SysMounts;

impl SysMounts {
    async fn table(&self) -> Result<Vec<MountedEntry>> {
        Ok(parse_mounts(&tokio::fs::read_to_string(MOUNTS).await?))
    }

    async fn do_mount(&self, request: MountRequest) -> Result<()> {
        tokio::task::spawn_blocking(move || -> Result<()> {
            let source = (!request.source.is_empty()).then_some(request.source.as_str());
            let fstype = (!request.fstype.is_empty()).then_some(request.fstype.as_str());
            let data = (!request.data.is_empty()).then_some(request.data.as_str());
            nix::mount::mount(
                source,
                request.target.as_str(),
                fstype,
                ms_flags(request.flags),
                data,
            )?;
            Ok(())
        })
        .await
        .map_err(blocking_err)?
    }

    async fn swap(&self, device: &str, on: bool) -> Result<()> {
        let path = CString::new(device)
            .map_err(|_| SysError::OperationFailed(format!("invalid device path {device:?}")))?;
        tokio::task::spawn_blocking(move || -> Result<()> {
            // SAFETY: `path` is a valid NUL-terminated string for the duration of the call.
            let rc = unsafe {
                if on {
                    libc::swapon(path.as_ptr(), 0)
                } else {
                    libc::swapoff(path.as_ptr())
                }
            };
            nix::errno::Errno::result(rc)?;
            Ok(())
        })
        .await
        .map_err(blocking_err)?
    }
}

#[async_trait]
impl MountOps for SysMounts {
    async fn mount(&self, request: &MountRequest) -> VolumeResult<()> {
        self.do_mount(request.clone()).await?;
        info!(
            source = %request.source,
            target = %request.target,
            fstype = %request.fstype,
            options = %request.flags.to_options().join(","),
            "mounted"
        );
        Ok(())
    }

    async fn unmount(&self, target: &str) -> VolumeResult<()> {
        let owned = target.to_string();
        tokio::task::spawn_blocking(move || nix::mount::umount2(owned.as_str(), MntFlags::empty()))
            .await
            .map_err(blocking_err)?
            .map_err(SysError::from)?;
        info!(target, "unmounted");
        Ok(())
    }

    async fn mounted(&self, target: &str) -> VolumeResult<Option<MountedEntry>> {
        // The last entry wins when mounts are stacked.
        Ok(self
            .table()
            .await?
            .into_iter()
            .rev()
            .find(|m| m.target == target))
    }

    async fn swap_on(&self, device: &str) -> VolumeResult<()> {
        self.swap(device, true).await?;
        info!(device, "swap enabled");
        Ok(())
    }

    async fn swap_off(&self, device: &str) -> VolumeResult<()> {
        self.swap(device, false).await?;
        debug!(device, "swap disabled");
        Ok(())
    }
}
