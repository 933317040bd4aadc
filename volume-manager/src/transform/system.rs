// SPDX-License-Identifier: GPL-3.0-only

//! System volumes: META, STATE, EPHEMERAL, the standard directories under
//! `/var` and the overlays.

use std::collections::BTreeMap;
use std::path::Path;

use volume_config::{
    Config, EncryptionConfig, decode_state_encryption, encode_state_encryption,
};
use volume_types::constants::{
    EPHEMERAL_MIN_SIZE, EPHEMERAL_MOUNT_POINT, EPHEMERAL_PARTITION_LABEL, META_PARTITION_LABEL,
    STATE_MOUNT_POINT, STATE_PARTITION_LABEL, STATE_SIZE, USER_VOLUME_MOUNT_POINT,
    WAVE_SYSTEM_DISK, selinux_label,
};
use volume_types::{
    DiskSelector, EncryptionSpec, FilesystemSpec, FilesystemType, LINUX_FILESYSTEM_DATA, MountSpec,
    PartitionSpec, ProvisioningSpec, SymlinkSpec, VolumeLabel, VolumeType,
};

use super::matchers::{
    label_volume_match, label_volume_match_and_non_empty, meta_match, no_match, system_disk_match,
};
use super::{TransformContext, TransformError, VolumeResource};
use crate::builder::Builder;

pub const ETCD_VOLUME_ID: &str = "ETCD";

const KUBERNETES_API_SERVER_USER: u32 = 65534;
const ETCD_USER: u32 = 60;

struct StandardDirectory {
    id: Option<&'static str>,
    path: &'static str,
    mode: u32,
    owner: u32,
    recursive: bool,
    selinux_type: &'static str,
}

const fn dir(path: &'static str, mode: u32, selinux_type: &'static str) -> StandardDirectory {
    StandardDirectory {
        id: None,
        path,
        mode,
        owner: 0,
        recursive: false,
        selinux_type,
    }
}

const STANDARD_DIRECTORIES: [StandardDirectory; 14] = [
    dir("/var/log", 0o755, "var_log_t"),
    dir("/var/log/audit", 0o700, "audit_log_t"),
    StandardDirectory {
        owner: KUBERNETES_API_SERVER_USER,
        recursive: true,
        ..dir("/var/log/audit/kube", 0o700, "kube_log_t")
    },
    dir("/var/log/containers", 0o755, "containers_log_t"),
    dir("/var/log/pods", 0o755, "pods_log_t"),
    dir("/var/lib", 0o700, "ephemeral_t"),
    StandardDirectory {
        id: Some(ETCD_VOLUME_ID),
        owner: ETCD_USER,
        recursive: true,
        ..dir("/var/lib/etcd", 0o700, "etcd_data_t")
    },
    dir("/var/lib/containerd", 0o000, "containerd_state_t"),
    dir("/var/lib/kubelet", 0o700, "kubelet_state_t"),
    StandardDirectory {
        recursive: true,
        ..dir("/var/lib/cni", 0o700, "cni_state_t")
    },
    dir("/var/lib/kubelet/seccomp", 0o700, "seccomp_profile_t"),
    StandardDirectory {
        recursive: true,
        ..dir("/var/lib/kubelet/seccomp/profiles", 0o700, "seccomp_profile_t")
    },
    dir(USER_VOLUME_MOUNT_POINT, 0o755, "ephemeral_t"),
    dir("/var/run/lock", 0o755, "var_lock_t"),
];

const OVERLAYS: [(&str, &str); 4] = [
    ("/etc/cni", "cni_conf_t"),
    ("/etc/kubernetes", "k8s_conf_t"),
    ("/usr/libexec/kubernetes", "k8s_plugin_t"),
    ("/opt", "opt_t"),
];

const VAR_RUN: &str = "/var/run";

/// Declared STATE/EPHEMERAL encryption: the system volume document first,
/// then the legacy `systemDiskEncryption` block.
fn declared_encryption<'a>(config: &'a Config, name: &str) -> Option<&'a EncryptionConfig> {
    config
        .system_volume(name)
        .and_then(|v| v.encryption())
        .or_else(|| config.legacy().and_then(|l| l.system_disk_encryption(name)))
}

/// The STATE encryption record to keep in META, when a machine config is
/// present.
pub fn state_encryption_record(config: &Config) -> Result<Option<Vec<u8>>, TransformError> {
    if !config.has_machine_config() {
        return Ok(None);
    }
    let declared = declared_encryption(config, STATE_PARTITION_LABEL)
        .cloned()
        .unwrap_or_default();
    Ok(Some(encode_state_encryption(&declared)?))
}

pub fn system_volumes(
    config: &Config,
    ctx: &TransformContext,
) -> Result<Vec<VolumeResource>, TransformError> {
    let mut resources = vec![meta_volume()?, state_volume(config, ctx)?];
    resources.extend(ephemeral_volume(config, ctx)?);
    resources.extend(standard_directories(config)?);
    resources.extend(overlays(config, ctx));
    Ok(resources)
}

pub fn meta_volume() -> Result<VolumeResource, TransformError> {
    let writer = Builder::new()
        .with_type(VolumeType::Partition)
        .with_locator(meta_match()?)
        .writer_func();
    Ok(VolumeResource::new(META_PARTITION_LABEL, VolumeLabel::System, writer).skip_mount())
}

fn state_mount() -> MountSpec {
    MountSpec {
        target_path: STATE_MOUNT_POINT.to_string(),
        selinux_label: selinux_label("system_state_t"),
        file_mode: 0o700,
        ..Default::default()
    }
}

pub fn state_volume(
    config: &Config,
    ctx: &TransformContext,
) -> Result<VolumeResource, TransformError> {
    let builder = if ctx.in_container {
        Builder::new()
            .with_type(VolumeType::Directory)
            .with_mount(state_mount())
    } else if config.has_machine_config() {
        Builder::new()
            .with_type(VolumeType::Partition)
            .with_mount(state_mount())
            .with_provisioning(ProvisioningSpec {
                wave: WAVE_SYSTEM_DISK,
                disk_selector: DiskSelector {
                    match_: system_disk_match()?,
                    ..Default::default()
                },
                partition_spec: PartitionSpec {
                    min_size: STATE_SIZE,
                    max_size: STATE_SIZE,
                    label: STATE_PARTITION_LABEL.to_string(),
                    type_uuid: LINUX_FILESYSTEM_DATA.to_string(),
                    ..Default::default()
                },
                filesystem_spec: FilesystemSpec {
                    kind: FilesystemType::Xfs,
                    label: STATE_PARTITION_LABEL.to_string(),
                },
            })
            .with_locator(label_volume_match(STATE_PARTITION_LABEL)?)
            .with_convert_encryption_configuration(declared_encryption(
                config,
                STATE_PARTITION_LABEL,
            ))
    } else {
        let locator = if ctx.agent_mode {
            no_match()?
        } else {
            label_volume_match_and_non_empty(STATE_PARTITION_LABEL)?
        };
        let meta = ctx.state_encryption_meta.clone();

        Builder::new()
            .with_type(VolumeType::Partition)
            .with_mount(state_mount())
            .with_locator(locator)
            .with_func(move |spec| {
                spec.encryption = match &meta {
                    Some(record) => {
                        let config = decode_state_encryption(record)?;
                        if config.is_enabled() {
                            config.to_spec()?
                        } else {
                            EncryptionSpec::default()
                        }
                    }
                    None => EncryptionSpec::default(),
                };
                Ok(())
            })
    };

    Ok(VolumeResource::new(
        STATE_PARTITION_LABEL,
        VolumeLabel::System,
        builder.writer_func(),
    ))
}

fn ephemeral_mount(config: &Config) -> MountSpec {
    MountSpec {
        target_path: EPHEMERAL_MOUNT_POINT.to_string(),
        selinux_label: selinux_label("ephemeral_t"),
        file_mode: 0o755,
        project_quota_support: config.disk_quota_support(),
        ..Default::default()
    }
}

pub fn ephemeral_volume(
    config: &Config,
    ctx: &TransformContext,
) -> Result<Option<VolumeResource>, TransformError> {
    if !config.has_machine_config() {
        return Ok(None);
    }

    let builder = if ctx.in_container {
        Builder::new()
            .with_type(VolumeType::Directory)
            .with_mount(MountSpec {
                project_quota_support: false,
                ..ephemeral_mount(config)
            })
    } else {
        let overrides = config.system_volume(EPHEMERAL_PARTITION_LABEL);
        let provisioning = overrides.map(|v| &v.provisioning);

        let selector = match provisioning.and_then(|p| p.disk_selector()) {
            Some(selector) => selector.clone(),
            None => system_disk_match()?,
        };

        Builder::new()
            .with_type(VolumeType::Partition)
            .with_provisioning(ProvisioningSpec {
                wave: WAVE_SYSTEM_DISK,
                disk_selector: DiskSelector {
                    match_: selector,
                    ..Default::default()
                },
                partition_spec: PartitionSpec {
                    min_size: provisioning
                        .and_then(|p| p.min_size())
                        .unwrap_or(EPHEMERAL_MIN_SIZE),
                    max_size: provisioning.and_then(|p| p.max_size()).unwrap_or(0),
                    relative_max_size: provisioning
                        .and_then(|p| p.relative_max_size())
                        .unwrap_or(0),
                    negative_max_size: provisioning.is_some_and(|p| p.max_size_negative()),
                    grow: provisioning.and_then(|p| p.grow).unwrap_or(true),
                    label: EPHEMERAL_PARTITION_LABEL.to_string(),
                    type_uuid: LINUX_FILESYSTEM_DATA.to_string(),
                },
                filesystem_spec: FilesystemSpec {
                    kind: FilesystemType::Xfs,
                    label: EPHEMERAL_PARTITION_LABEL.to_string(),
                },
            })
            .with_mount(ephemeral_mount(config))
            .with_locator(label_volume_match(EPHEMERAL_PARTITION_LABEL)?)
            .with_convert_encryption_configuration(declared_encryption(
                config,
                EPHEMERAL_PARTITION_LABEL,
            ))
    };

    Ok(Some(VolumeResource::new(
        EPHEMERAL_PARTITION_LABEL,
        VolumeLabel::System,
        builder.writer_func(),
    )))
}

/// `/var/run` symlink plus the fixed directory tree under `/var`.
pub fn standard_directories(config: &Config) -> Result<Vec<VolumeResource>, TransformError> {
    if !config.has_machine_config() {
        return Ok(Vec::new());
    }

    let mut resources = vec![VolumeResource::new(
        VAR_RUN,
        VolumeLabel::System,
        Builder::new()
            .with_type(VolumeType::Symlink)
            .with_symlink(SymlinkSpec {
                symlink_target_path: "/run".to_string(),
                force: true,
            })
            .with_mount(MountSpec {
                target_path: VAR_RUN.to_string(),
                ..Default::default()
            })
            .writer_func(),
    )];

    let mut parent_ids: BTreeMap<String, String> = BTreeMap::from([
        (
            EPHEMERAL_MOUNT_POINT.to_string(),
            EPHEMERAL_PARTITION_LABEL.to_string(),
        ),
        (VAR_RUN.to_string(), VAR_RUN.to_string()),
    ]);

    for entry in &STANDARD_DIRECTORIES {
        let path = Path::new(entry.path);
        let parent_dir = path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let target = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let parent_id = parent_ids.get(&parent_dir).cloned().ok_or_else(|| {
            TransformError::UnknownParentDirectory {
                parent: parent_dir.clone(),
                path: entry.path.to_string(),
            }
        })?;
        let volume_id = entry.id.unwrap_or(entry.path).to_string();

        resources.push(VolumeResource::new(
            volume_id.clone(),
            VolumeLabel::System,
            Builder::new()
                .with_type(VolumeType::Directory)
                .with_mount(MountSpec {
                    target_path: target,
                    parent_id,
                    selinux_label: selinux_label(entry.selinux_type),
                    file_mode: entry.mode,
                    uid: entry.owner,
                    gid: entry.owner,
                    recursive_relabel: entry.recursive,
                    ..Default::default()
                })
                .writer_func(),
        ));

        parent_ids.insert(entry.path.to_string(), volume_id);
    }

    Ok(resources)
}

pub fn overlays(config: &Config, ctx: &TransformContext) -> Vec<VolumeResource> {
    if !config.has_machine_config() || ctx.in_container {
        return Vec::new();
    }

    OVERLAYS
        .iter()
        .map(|(path, selinux_type)| {
            VolumeResource::new(
                *path,
                VolumeLabel::System,
                Builder::new()
                    .with_type(VolumeType::Overlay)
                    .with_parent_id(EPHEMERAL_PARTITION_LABEL)
                    .with_mount(MountSpec {
                        target_path: path.to_string(),
                        selinux_label: selinux_label(selinux_type),
                        file_mode: 0o755,
                        ..Default::default()
                    })
                    .writer_func(),
            )
        })
        .collect()
}
