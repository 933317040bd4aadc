// SPDX-License-Identifier: GPL-3.0-only

//! Realizes mount specs: mount points, ownership, labels and the mount
//! itself for every volume type.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use volume_config::split_nfs_source;
use volume_contracts::{EntryKind, MountFlags, MountOps, MountRequest, PathOps, VolumeError};
use volume_types::constants::ROOT_MOUNT_ID;
use volume_types::{
    FilesystemType, MountSpec, MountStatus, VolumeConfig, VolumeErrorKind, VolumeType,
};

use crate::Result;

/// Overlay upper and work directories live here, under the parent volume.
pub const OVERLAY_STATE_DIR: &str = "system/overlays";

const DEFAULT_DIR_MODE: u32 = 0o755;

fn join(base: &str, path: &str) -> String {
    Path::new(base)
        .join(path.trim_start_matches('/'))
        .to_string_lossy()
        .to_string()
}

fn is_root(parent_id: &str) -> bool {
    parent_id.is_empty() || parent_id == ROOT_MOUNT_ID
}

/// Absolute mount target of `spec`, or `None` while its parent is not
/// mounted. `mounted` maps volume IDs to their mount targets.
pub fn resolve_target(spec: &MountSpec, mounted: &BTreeMap<String, String>) -> Option<String> {
    if is_root(&spec.parent_id) {
        return Some(join("/", &spec.target_path));
    }
    mounted
        .get(&spec.parent_id)
        .map(|parent| join(parent, &spec.target_path))
}

fn flags(spec: &MountSpec, read_only: bool) -> MountFlags {
    MountFlags {
        read_only: spec.read_only || read_only,
        no_atime: spec.disable_access_time,
        no_suid: spec.secure,
        no_dev: spec.secure,
        no_exec: spec.secure,
        ..Default::default()
    }
}

/// Filesystem data string: extra parameters plus `prjquota` on xfs.
fn mount_data(spec: &MountSpec, filesystem: FilesystemType, source: &str) -> String {
    let mut data: Vec<String> = spec
        .parameters
        .iter()
        .map(|p| {
            if p.value.is_empty() {
                p.name.clone()
            } else {
                format!("{}={}", p.name, p.value)
            }
        })
        .collect();

    if filesystem == FilesystemType::Xfs && spec.project_quota_support {
        data.push("prjquota".to_string());
    }

    // The kernel NFS client wants the server address spelled out.
    if filesystem == FilesystemType::Nfs
        && !spec.parameters.iter().any(|p| p.name == "addr")
        && let Some((host, _)) = split_nfs_source(source)
        && host.parse::<IpAddr>().is_ok()
    {
        data.push(format!("addr={host}"));
    }

    data.join(",")
}

fn overlay_name(target: &str) -> String {
    target.trim_matches('/').replace('/', "-")
}

/// What to mount for one volume.
#[derive(Debug, Clone, Copy)]
pub struct MountSource<'a> {
    pub volume: &'a VolumeConfig,
    /// Mount request ID recorded in the status.
    pub request_id: &'a str,
    /// Block device (mapper device when encrypted) or external source.
    pub device: &'a str,
    pub filesystem: FilesystemType,
    pub encrypted: bool,
    pub read_only: bool,
}

pub struct MountManager {
    mounts: Arc<dyn MountOps>,
    paths: Arc<dyn PathOps>,
}

impl std::fmt::Debug for MountManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountManager").finish_non_exhaustive()
    }
}

impl MountManager {
    pub fn new(mounts: Arc<dyn MountOps>, paths: Arc<dyn PathOps>) -> Self {
        Self { mounts, paths }
    }

    /// Mounts `source.volume`. `mounted` maps volume IDs to mount targets and
    /// must contain the volume's parents.
    pub async fn mount(
        &self,
        source: MountSource<'_>,
        mounted: &BTreeMap<String, String>,
    ) -> Result<MountStatus> {
        let volume = source.volume;
        let spec = &volume.spec.mount;

        let mut status = MountStatus {
            id: source.request_id.to_string(),
            volume_id: volume.id.clone(),
            source: source.device.to_string(),
            filesystem: source.filesystem,
            read_only: spec.read_only || source.read_only,
            project_quota_support: spec.project_quota_support,
            encrypted: source.encrypted,
            ..Default::default()
        };

        if source.filesystem == FilesystemType::Swap {
            self.mounts.swap_on(source.device).await?;
            info!(volume = %volume.id, device = source.device, "enabled swap");
            return Ok(status);
        }

        let target = resolve_target(spec, mounted).ok_or_else(|| {
            VolumeError::io(format!(
                "volume {}: parent {} is not mounted",
                volume.id, spec.parent_id
            ))
        })?;
        status.target = target.clone();

        match volume.spec.ty {
            VolumeType::Partition | VolumeType::Disk | VolumeType::External => {
                self.prepare_dir(spec, &target).await?;
                let request = MountRequest {
                    source: source.device.to_string(),
                    target: target.clone(),
                    fstype: source.filesystem.as_str().to_string(),
                    flags: flags(spec, source.read_only),
                    data: mount_data(spec, source.filesystem, source.device),
                };
                self.mount_or_remount(&request).await?;
                self.apply_ownership(spec, &target).await?;
            }
            VolumeType::Directory => {
                self.prepare_dir(spec, &target).await?;
                self.apply_ownership(spec, &target).await?;

                let bind_source = spec.bind_target.as_ref().map(|bind| {
                    match mounted.get(&spec.parent_id) {
                        Some(parent) => join(parent, bind),
                        None => join("/", bind),
                    }
                });
                // Nothing to bind when the source is the target itself.
                if let Some(bind_source) = bind_source.filter(|source| *source != target) {
                    self.paths
                        .create_dir_all(&bind_source, DEFAULT_DIR_MODE)
                        .await?;
                    let request = MountRequest {
                        source: bind_source.clone(),
                        target: target.clone(),
                        flags: MountFlags {
                            bind: true,
                            ..flags(spec, source.read_only)
                        },
                        ..Default::default()
                    };
                    self.mount_or_remount(&request).await?;
                    status.source = bind_source;
                } else {
                    status.source = target.clone();
                }
            }
            VolumeType::Symlink => {
                let symlink = &volume.spec.symlink;
                self.link(spec, &symlink.symlink_target_path, symlink.force, &target)
                    .await?;
                status.source = symlink.symlink_target_path.clone();
            }
            VolumeType::Overlay => {
                let base = mounted
                    .get(&volume.spec.parent_id)
                    .map(|parent| join(parent, OVERLAY_STATE_DIR))
                    .ok_or_else(|| {
                        VolumeError::io(format!(
                            "overlay {}: parent {} is not mounted",
                            volume.id, volume.spec.parent_id
                        ))
                    })?;
                let name = overlay_name(&target);
                let upper = join(&base, &format!("{name}-diff"));
                let work = join(&base, &format!("{name}-workdir"));

                self.prepare_dir(spec, &target).await?;
                self.paths.create_dir_all(&upper, spec.file_mode).await?;
                self.paths.create_dir_all(&work, 0o700).await?;
                if !spec.selinux_label.is_empty() {
                    self.paths
                        .set_label(&upper, &spec.selinux_label, false)
                        .await?;
                }

                let request = MountRequest {
                    source: "overlay".to_string(),
                    target: target.clone(),
                    fstype: "overlay".to_string(),
                    flags: flags(spec, source.read_only),
                    data: format!("lowerdir={target},upperdir={upper},workdir={work}"),
                };
                self.mount_or_remount(&request).await?;
                status.source = "overlay".to_string();
            }
            VolumeType::Tmpfs => {
                self.prepare_dir(spec, &target).await?;
                let mode = if spec.file_mode == 0 {
                    DEFAULT_DIR_MODE
                } else {
                    spec.file_mode
                };
                let request = MountRequest {
                    source: "tmpfs".to_string(),
                    target: target.clone(),
                    fstype: "tmpfs".to_string(),
                    flags: flags(spec, source.read_only),
                    data: format!("mode={mode:o}"),
                };
                self.mount_or_remount(&request).await?;
                self.apply_ownership(spec, &target).await?;
                status.source = "tmpfs".to_string();
            }
        }

        match volume.spec.ty {
            VolumeType::Directory | VolumeType::Symlink | VolumeType::Overlay => {
                debug!(volume = %volume.id, target = %status.target, source = %status.source, "volume mounted")
            }
            _ => info!(volume = %volume.id, target = %status.target, source = %status.source, "volume mounted"),
        }
        Ok(status)
    }

    async fn prepare_dir(&self, spec: &MountSpec, target: &str) -> Result<()> {
        self.paths.create_dir_all(target, spec.file_mode).await
    }

    async fn apply_ownership(&self, spec: &MountSpec, target: &str) -> Result<()> {
        if spec.uid != 0 || spec.gid != 0 {
            self.paths.chown(target, spec.uid, spec.gid).await?;
        }
        if !spec.selinux_label.is_empty() {
            self.paths
                .set_label(target, &spec.selinux_label, spec.recursive_relabel)
                .await?;
        }
        Ok(())
    }

    async fn mount_or_remount(&self, request: &MountRequest) -> Result<()> {
        match self.mounts.mounted(&request.target).await? {
            None => self.mounts.mount(request).await,
            Some(existing) if existing.read_only != request.flags.read_only => {
                debug!(target = %request.target, read_only = request.flags.read_only, "remounting");
                let remount = MountRequest {
                    flags: MountFlags {
                        remount: true,
                        ..request.flags
                    },
                    ..request.clone()
                };
                self.mounts.mount(&remount).await
            }
            Some(_) => Ok(()),
        }
    }

    async fn link(&self, spec: &MountSpec, link_target: &str, force: bool, path: &str) -> Result<()> {
        let kind = self.paths.entry_kind(path).await?;
        if kind == EntryKind::Symlink
            && self.paths.read_link(path).await?.as_deref() == Some(link_target)
        {
            return Ok(());
        }

        match kind {
            EntryKind::Missing => {}
            _ if force => {
                debug!(path, ?kind, "replacing with symlink");
                self.paths.remove_all(path).await?;
            }
            _ => {
                return Err(VolumeError::new(
                    VolumeErrorKind::Io,
                    format!("{path} exists as {kind:?}, refusing to replace it"),
                ));
            }
        }

        if let Some(parent) = Path::new(path).parent() {
            self.paths
                .create_dir_all(&parent.to_string_lossy(), DEFAULT_DIR_MODE)
                .await?;
        }
        self.paths.symlink(link_target, path).await?;
        if !spec.selinux_label.is_empty() {
            self.paths.set_label(path, &spec.selinux_label, false).await?;
        }
        Ok(())
    }

    /// Undoes [`MountManager::mount`]. Directories and symlinks stay.
    pub async fn unmount(&self, status: &MountStatus, ty: VolumeType) -> Result<()> {
        if status.filesystem == FilesystemType::Swap {
            self.mounts.swap_off(&status.source).await?;
            info!(volume = %status.volume_id, "disabled swap");
            return Ok(());
        }
        if ty == VolumeType::Symlink || status.target.is_empty() {
            return Ok(());
        }
        if self.mounts.mounted(&status.target).await?.is_some() {
            self.mounts.unmount(&status.target).await?;
            info!(volume = %status.volume_id, target = %status.target, "volume unmounted");
        }
        Ok(())
    }
}
