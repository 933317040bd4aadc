// SPDX-License-Identifier: GPL-3.0-only

//! User-declared volumes: user, raw, existing, external and swap.

use volume_cel::Expression;
use volume_config::{
    Config, ExistingVolumeConfig, ExternalVolumeConfig, ProvisioningConfig, RawVolumeConfig,
    SwapVolumeConfig, UserVolumeConfig,
};
use volume_types::constants::{
    EXISTING_VOLUME_PREFIX, EXTERNAL_VOLUME_PREFIX, MIN_USER_VOLUME_SIZE, RAW_VOLUME_PREFIX,
    SWAP_VOLUME_PREFIX, USER_VOLUME_MOUNT_POINT, USER_VOLUME_PREFIX, WAVE_USER_VOLUMES,
    selinux_label,
};
use volume_types::{
    DiskSelector, FilesystemSpec, FilesystemType, LINUX_FILESYSTEM_DATA, LINUX_SWAP, MountParameter,
    MountSpec, PartitionSpec, ProvisioningSpec, VolumeLabel, VolumeType,
};

use super::matchers::{label_volume_match, no_match};
use super::{MountAction, TransformError, VolumeResource};
use crate::builder::Builder;

pub fn user_volumes(config: &Config) -> Result<Vec<VolumeResource>, TransformError> {
    let mut resources = Vec::new();

    for volume in config.user_volumes() {
        resources.push(user_volume(volume)?);
    }
    for volume in config.raw_volumes() {
        resources.push(raw_volume(volume)?);
    }
    for volume in config.existing_volumes() {
        resources.push(existing_volume(volume));
    }
    for volume in config.external_volumes() {
        resources.push(external_volume(volume));
    }
    for volume in config.swap_volumes() {
        resources.push(swap_volume(volume)?);
    }

    Ok(resources)
}

fn selector(provisioning: &ProvisioningConfig) -> Result<Expression, TransformError> {
    match provisioning.disk_selector() {
        Some(selector) => Ok(selector.clone()),
        None => Ok(no_match()?),
    }
}

/// Partition sizing shared by user, raw and swap volumes.
fn partition_spec(
    provisioning: &ProvisioningConfig,
    label: &str,
    type_uuid: &str,
    negative_supported: bool,
) -> PartitionSpec {
    PartitionSpec {
        min_size: provisioning.min_size().unwrap_or(MIN_USER_VOLUME_SIZE),
        max_size: provisioning.max_size().unwrap_or(0),
        relative_max_size: provisioning.relative_max_size().unwrap_or(0),
        negative_max_size: negative_supported && provisioning.max_size_negative(),
        grow: provisioning.grow.unwrap_or(false),
        label: label.to_string(),
        type_uuid: type_uuid.to_string(),
    }
}

/// Mount under `/var/mnt/<name>`.
fn user_mount(name: &str) -> MountSpec {
    MountSpec {
        target_path: name.to_string(),
        parent_id: USER_VOLUME_MOUNT_POINT.to_string(),
        selinux_label: selinux_label("ephemeral_t"),
        file_mode: 0o755,
        ..Default::default()
    }
}

pub fn user_volume(volume: &UserVolumeConfig) -> Result<VolumeResource, TransformError> {
    let id = format!("{USER_VOLUME_PREFIX}{}", volume.name);
    let mount = MountSpec {
        project_quota_support: volume.filesystem.project_quota_support(),
        disable_access_time: volume.mount.disable_access_time,
        secure: volume.mount.secure,
        ..user_mount(&volume.name)
    };

    let builder = match volume.volume_type() {
        VolumeType::Partition => Builder::new()
            .with_type(VolumeType::Partition)
            .with_locator(label_volume_match(&id)?)
            .with_provisioning(ProvisioningSpec {
                wave: WAVE_USER_VOLUMES,
                disk_selector: DiskSelector {
                    match_: selector(&volume.provisioning)?,
                    ..Default::default()
                },
                partition_spec: partition_spec(
                    &volume.provisioning,
                    &id,
                    LINUX_FILESYSTEM_DATA,
                    true,
                ),
                filesystem_spec: FilesystemSpec {
                    kind: volume.filesystem.kind(),
                    ..Default::default()
                },
            })
            .with_mount(mount)
            .with_convert_encryption_configuration(Some(&volume.encryption)),
        VolumeType::Directory => Builder::new()
            .with_type(VolumeType::Directory)
            .with_mount(MountSpec {
                bind_target: Some(volume.name.clone()),
                project_quota_support: false,
                ..mount
            }),
        VolumeType::Disk => Builder::new()
            .with_type(VolumeType::Disk)
            .with_disk_locator(selector(&volume.provisioning)?)
            .with_provisioning(ProvisioningSpec {
                wave: WAVE_USER_VOLUMES,
                partition_spec: PartitionSpec {
                    type_uuid: LINUX_FILESYSTEM_DATA.to_string(),
                    ..Default::default()
                },
                filesystem_spec: FilesystemSpec {
                    kind: volume.filesystem.kind(),
                    ..Default::default()
                },
                ..Default::default()
            })
            .with_mount(mount)
            .with_convert_encryption_configuration(Some(&volume.encryption)),
        ty => {
            return Err(TransformError::UnsupportedType {
                name: volume.name.clone(),
                ty,
            });
        }
    };

    Ok(VolumeResource::new(id, VolumeLabel::User, builder.writer_func()))
}

/// Raw volumes are provisioned and opened but never formatted or mounted.
pub fn raw_volume(volume: &RawVolumeConfig) -> Result<VolumeResource, TransformError> {
    let id = format!("{RAW_VOLUME_PREFIX}{}", volume.name);

    let writer = Builder::new()
        .with_type(VolumeType::Partition)
        .with_locator(label_volume_match(&id)?)
        .with_provisioning(ProvisioningSpec {
            wave: WAVE_USER_VOLUMES,
            disk_selector: DiskSelector {
                match_: selector(&volume.provisioning)?,
                ..Default::default()
            },
            partition_spec: partition_spec(&volume.provisioning, &id, LINUX_FILESYSTEM_DATA, false),
            filesystem_spec: FilesystemSpec::default(),
        })
        .with_convert_encryption_configuration(Some(&volume.encryption))
        .writer_func();

    Ok(VolumeResource::new(id, VolumeLabel::Raw, writer).skip_mount())
}

pub fn existing_volume(volume: &ExistingVolumeConfig) -> VolumeResource {
    let id = format!("{EXISTING_VOLUME_PREFIX}{}", volume.name);
    let read_only = volume.mount.read_only;

    let writer = Builder::new()
        .with_type(VolumeType::Partition)
        .with_locator(volume.volume_selector().clone())
        .with_mount(MountSpec {
            read_only,
            disable_access_time: volume.mount.disable_access_time,
            secure: volume.mount.secure,
            ..user_mount(&volume.name)
        })
        .writer_func();

    VolumeResource::new(id, VolumeLabel::Existing, writer).with_mount_transform(move |request| {
        request.read_only = read_only;
        MountAction::Emit
    })
}

/// `name=value` mount options become parameters; bare options become flags.
fn mount_parameters(options: &[String]) -> Vec<MountParameter> {
    options
        .iter()
        .filter(|option| !option.is_empty())
        .map(|option| match option.split_once('=') {
            Some((name, value)) => MountParameter::new(name, value),
            None => MountParameter::flag(option.as_str()),
        })
        .collect()
}

pub fn external_volume(volume: &ExternalVolumeConfig) -> VolumeResource {
    let id = format!("{EXTERNAL_VOLUME_PREFIX}{}", volume.name);
    let read_only = volume.mount.read_only;
    let parameters = volume
        .mount
        .nfs
        .as_ref()
        .map(|nfs| mount_parameters(&nfs.options))
        .unwrap_or_default();

    let writer = Builder::new()
        .with_type(VolumeType::External)
        .with_provisioning(ProvisioningSpec {
            wave: WAVE_USER_VOLUMES,
            disk_selector: DiskSelector {
                external: volume.source(),
                ..Default::default()
            },
            filesystem_spec: FilesystemSpec {
                kind: volume.filesystem_type,
                ..Default::default()
            },
            ..Default::default()
        })
        .with_mount(MountSpec {
            read_only,
            disable_access_time: volume.mount.disable_access_time,
            secure: volume.mount.secure,
            parameters,
            ..user_mount(&volume.name)
        })
        .writer_func();

    VolumeResource::new(id, VolumeLabel::External, writer).with_mount_transform(move |request| {
        request.read_only = read_only;
        MountAction::Emit
    })
}

pub fn swap_volume(volume: &SwapVolumeConfig) -> Result<VolumeResource, TransformError> {
    let id = format!("{SWAP_VOLUME_PREFIX}{}", volume.name);

    let writer = Builder::new()
        .with_type(VolumeType::Partition)
        .with_locator(label_volume_match(&id)?)
        .with_provisioning(ProvisioningSpec {
            wave: WAVE_USER_VOLUMES,
            disk_selector: DiskSelector {
                match_: selector(&volume.provisioning)?,
                ..Default::default()
            },
            partition_spec: partition_spec(&volume.provisioning, &id, LINUX_SWAP, false),
            filesystem_spec: FilesystemSpec {
                kind: FilesystemType::Swap,
                ..Default::default()
            },
        })
        .with_convert_encryption_configuration(Some(&volume.encryption))
        .writer_func();

    Ok(VolumeResource::new(id, VolumeLabel::Swap, writer))
}
