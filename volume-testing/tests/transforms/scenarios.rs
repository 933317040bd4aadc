// SPDX-License-Identifier: GPL-3.0-only

use volume_config::Config;
use volume_manager::transform::REQUESTER;
use volume_manager::{TransformContext, render};
use volume_types::{
    FilesystemType, LINUX_FILESYSTEM_DATA, LINUX_SWAP, VolumeLabel, VolumeType,
};

use crate::common::machine_with;

fn parse(text: &str) -> Config {
    let config = Config::parse(text).unwrap();
    config.validate_strict(true).unwrap();
    config
}

#[test]
fn system_volumes_without_machine_config() {
    let desired = render(&Config::default(), &TransformContext::default()).unwrap();
    let ids: Vec<&str> = desired.configs.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["META", "STATE"]);

    let meta = desired.config("META").unwrap();
    assert_eq!(meta.spec.ty, VolumeType::Partition);
    assert_eq!(meta.label, VolumeLabel::System);
    let locator = meta.spec.locator.match_.text();
    assert!(locator.contains("volume.partition_label == \"META\""), "{locator}");
    assert!(locator.contains("volume.size == 1048576u"), "{locator}");

    assert!(desired.config("EPHEMERAL").is_none());
    assert_eq!(
        desired.config("STATE").unwrap().spec.locator.match_.text(),
        "volume.partition_label == \"STATE\" && volume.name != \"\""
    );
}

#[test]
fn agent_mode_never_locates_state() {
    let ctx = TransformContext {
        agent_mode: true,
        ..Default::default()
    };
    let desired = render(&Config::default(), &ctx).unwrap();
    assert_eq!(
        desired.config("STATE").unwrap().spec.locator.match_.text(),
        "false"
    );
}

#[test]
fn user_volume_on_nvme() {
    let config = parse(&machine_with(
        r#"apiVersion: v1alpha1
kind: UserVolumeConfig
name: ceph-data
provisioning:
  diskSelector:
    match: disk.transport == "nvme"
  maxSize: 50GiB
filesystem:
  type: xfs
"#,
    ));

    let desired = render(&config, &TransformContext::default()).unwrap();
    let volume = desired.config("u-ceph-data").unwrap();
    assert_eq!(volume.label, VolumeLabel::User);
    assert_eq!(volume.spec.ty, VolumeType::Partition);

    let provisioning = &volume.spec.provisioning;
    assert_eq!(provisioning.partition_spec.label, "u-ceph-data");
    assert_eq!(provisioning.filesystem_spec.kind, FilesystemType::Xfs);
    assert_eq!(
        provisioning.disk_selector.match_.text(),
        "disk.transport == \"nvme\""
    );
    assert_eq!(provisioning.partition_spec.max_size, 53_687_091_200);
}

#[test]
fn raw_volume_is_unformatted_and_unmounted() {
    let config = parse(&machine_with(
        r#"apiVersion: v1alpha1
kind: RawVolumeConfig
name: raw-data
provisioning:
  diskSelector:
    match: "!system_disk"
  minSize: 10GiB
"#,
    ));

    let desired = render(&config, &TransformContext::default()).unwrap();
    let raw = desired.config("r-raw-data").unwrap();
    assert_eq!(raw.label, VolumeLabel::Raw);
    assert_eq!(raw.spec.ty, VolumeType::Partition);
    assert_eq!(raw.spec.provisioning.filesystem_spec.kind, FilesystemType::None);
    assert_eq!(
        raw.spec.provisioning.partition_spec.type_uuid,
        LINUX_FILESYSTEM_DATA
    );
    assert!(desired.mount_request("r-raw-data").is_none());
}

#[test]
fn swap_volume_with_decimal_sizes() {
    let config = parse(&machine_with(
        r#"apiVersion: v1alpha1
kind: SwapVolumeConfig
name: swap1
provisioning:
  diskSelector:
    match: disk.transport == "nvme"
  minSize: 1GB
  maxSize: 2GB
"#,
    ));

    let desired = render(&config, &TransformContext::default()).unwrap();
    let swap = desired.config("s-swap1").unwrap();
    assert_eq!(swap.label, VolumeLabel::Swap);
    assert_eq!(swap.spec.ty, VolumeType::Partition);
    assert_eq!(swap.spec.provisioning.filesystem_spec.kind, FilesystemType::Swap);

    let partition = &swap.spec.provisioning.partition_spec;
    assert_eq!(partition.type_uuid, LINUX_SWAP);
    assert_eq!(partition.min_size, 1_000_000_000);
    assert_eq!(partition.max_size, 2_000_000_000);

    let request = desired.mount_request("s-swap1").unwrap();
    assert_eq!(request.requester, REQUESTER);
    assert!(!request.read_only);
}

#[test]
fn existing_volume_mounts_read_only() {
    let config = parse(&machine_with(
        r#"apiVersion: v1alpha1
kind: ExistingVolumeConfig
name: readonly-data
discovery:
  volumeSelector:
    match: volume.partition_label == "READONLY-DATA"
mount:
  readOnly: true
"#,
    ));

    let desired = render(&config, &TransformContext::default()).unwrap();
    let existing = desired.config("e-readonly-data").unwrap();
    assert_eq!(existing.label, VolumeLabel::Existing);
    assert_eq!(
        existing.spec.locator.match_.text(),
        "volume.partition_label == \"READONLY-DATA\""
    );
    assert!(existing.spec.mount.read_only);
}
