// SPDX-License-Identifier: GPL-3.0-only

//! Evaluates disk selectors and volume locators against the observed world.

use tracing::warn;
use volume_cel::{Activation, Expression, env};
use volume_contracts::{ObservedWorld, VolumeError};
use volume_types::{DiscoveredVolumeSpec, DiskSpec, VolumeErrorKind};

use crate::Result;

fn disk_activation(disk: &DiskSpec, world: &ObservedWorld) -> Activation {
    Activation::new()
        .bind("disk", disk.to_value())
        .bind("system_disk", world.is_system_disk(&disk.dev_path))
}

fn sorted_disks(world: &ObservedWorld) -> Vec<&DiskSpec> {
    let mut disks: Vec<&DiskSpec> = world.disks.iter().collect();
    disks.sort_by(|a, b| a.dev_path.cmp(&b.dev_path));
    disks
}

/// Disks matching `selector`, ordered by device path.
///
/// Only the first match is returned unless `all` is set. Matching nothing is
/// a `NoDiskMatch` error.
pub fn match_disks<'w>(
    selector: &Expression,
    world: &'w ObservedWorld,
    all: bool,
) -> Result<Vec<&'w DiskSpec>> {
    let mut matched = Vec::new();

    for disk in sorted_disks(world) {
        match selector.eval_bool(env::disk_locator(), &disk_activation(disk, world)) {
            Ok(true) => {
                matched.push(disk);
                if !all {
                    break;
                }
            }
            Ok(false) => {}
            Err(err) => {
                warn!(disk = %disk.dev_path, expression = selector.text(), %err, "skipping disk");
            }
        }
    }

    if matched.is_empty() {
        return Err(VolumeError::new(
            VolumeErrorKind::NoDiskMatch,
            format!("no disk matches {:?}", selector.text()),
        ));
    }
    Ok(matched)
}

/// The single discovered volume matching `locator`, if any.
pub fn locate_volume<'w>(
    locator: &Expression,
    world: &'w ObservedWorld,
) -> Result<Option<&'w DiscoveredVolumeSpec>> {
    let mut found: Option<&DiscoveredVolumeSpec> = None;

    for volume in &world.volumes {
        let disk = world
            .disk(&volume.parent_dev_path)
            .cloned()
            .unwrap_or_default();
        let activation = Activation::new()
            .bind("volume", volume.to_value())
            .bind("disk", disk.to_value());

        match locator.eval_bool(env::volume_locator(), &activation) {
            Ok(true) => {
                if let Some(previous) = found {
                    return Err(VolumeError::new(
                        VolumeErrorKind::AmbiguousMatch,
                        format!(
                            "{:?} matches both {} and {}",
                            locator.text(),
                            previous.dev_path,
                            volume.dev_path
                        ),
                    ));
                }
                found = Some(volume);
            }
            Ok(false) => {}
            Err(err) => {
                warn!(volume = %volume.dev_path, expression = locator.text(), %err, "skipping volume");
            }
        }
    }

    Ok(found)
}

/// The single disk matching a whole-disk volume's locator, if any.
pub fn locate_disk<'w>(
    locator: &Expression,
    world: &'w ObservedWorld,
) -> Result<Option<&'w DiskSpec>> {
    match match_disks(locator, world, true) {
        Ok(disks) => match disks.as_slice() {
            [disk] => Ok(Some(disk)),
            _ => Err(VolumeError::new(
                VolumeErrorKind::AmbiguousMatch,
                format!("{:?} matches {} disks", locator.text(), disks.len()),
            )),
        },
        Err(err) if err.kind == VolumeErrorKind::NoDiskMatch => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volume_types::SystemDisk;

    fn disk(dev_path: &str, size: u64, transport: &str) -> DiskSpec {
        DiskSpec {
            dev_path: dev_path.into(),
            size,
            transport: transport.into(),
            ..Default::default()
        }
    }

    fn partition(dev_path: &str, parent: &str, label: &str) -> DiscoveredVolumeSpec {
        DiscoveredVolumeSpec {
            dev_path: dev_path.into(),
            parent_dev_path: parent.into(),
            ty: "partition".into(),
            partition_label: label.into(),
            ..Default::default()
        }
    }

    fn world() -> ObservedWorld {
        ObservedWorld {
            disks: vec![
                disk("/dev/sdb", 500 << 30, "sata"),
                disk("/dev/nvme0n1", 100 << 30, "nvme"),
                disk("/dev/sda", 50 << 30, "sata"),
            ],
            volumes: vec![
                partition("/dev/sda1", "/dev/sda", "META"),
                partition("/dev/sda2", "/dev/sda", "STATE"),
                partition("/dev/sdb1", "/dev/sdb", "u-data"),
                partition("/dev/nvme0n1p1", "/dev/nvme0n1", "u-data"),
            ],
            system_disk: Some(SystemDisk {
                dev_path: "/dev/sda".into(),
            }),
        }
    }

    fn disk_expr(text: &str) -> Expression {
        Expression::parse_bool(text, env::disk_locator()).unwrap()
    }

    fn volume_expr(text: &str) -> Expression {
        Expression::parse_bool(text, env::volume_locator()).unwrap()
    }

    #[test]
    fn disks_are_matched_in_path_order() {
        let world = world();

        let first = match_disks(&disk_expr("disk.transport == \"sata\""), &world, false).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].dev_path, "/dev/sda");

        let all = match_disks(&disk_expr("!system_disk"), &world, true).unwrap();
        let paths: Vec<_> = all.iter().map(|d| d.dev_path.as_str()).collect();
        assert_eq!(paths, vec!["/dev/nvme0n1", "/dev/sdb"]);
    }

    #[test]
    fn system_disk_binding() {
        let world = world();
        let matched = match_disks(&disk_expr("system_disk"), &world, true).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].dev_path, "/dev/sda");
    }

    #[test]
    fn no_match_is_an_error() {
        let err = match_disks(&disk_expr("disk.size > 1u * TiB"), &world(), false).unwrap_err();
        assert_eq!(err.kind, VolumeErrorKind::NoDiskMatch);
    }

    #[test]
    fn volume_locator_outcomes() {
        let world = world();

        let state = locate_volume(&volume_expr("volume.partition_label == \"STATE\""), &world)
            .unwrap()
            .unwrap();
        assert_eq!(state.dev_path, "/dev/sda2");

        assert!(
            locate_volume(&volume_expr("volume.partition_label == \"EPHEMERAL\""), &world)
                .unwrap()
                .is_none()
        );

        let err = locate_volume(&volume_expr("volume.partition_label == \"u-data\""), &world)
            .unwrap_err();
        assert_eq!(err.kind, VolumeErrorKind::AmbiguousMatch);

        let scoped = locate_volume(
            &volume_expr("volume.partition_label == \"u-data\" && disk.transport == \"nvme\""),
            &world,
        )
        .unwrap()
        .unwrap();
        assert_eq!(scoped.dev_path, "/dev/nvme0n1p1");
    }

    #[test]
    fn whole_disk_locator() {
        let world = world();
        let nvme = locate_disk(&disk_expr("disk.transport == \"nvme\""), &world)
            .unwrap()
            .unwrap();
        assert_eq!(nvme.dev_path, "/dev/nvme0n1");

        assert!(locate_disk(&disk_expr("disk.transport == \"usb\""), &world).unwrap().is_none());

        let err = locate_disk(&disk_expr("disk.transport == \"sata\""), &world).unwrap_err();
        assert_eq!(err.kind, VolumeErrorKind::AmbiguousMatch);
    }
}
