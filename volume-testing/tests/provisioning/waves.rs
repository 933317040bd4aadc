// SPDX-License-Identifier: GPL-3.0-only

use volume_contracts::VolumeError;
use volume_testing::{FakeHost, Lab, Op};
use volume_types::constants::{META_PARTITION_LABEL, META_SIZE};
use volume_types::{VolumeErrorKind, VolumePhase};

use crate::common::{DATA_DISK, GIB, SYSTEM_DISK, created, init_tracing, machine_with, node, user_volume};

#[tokio::test]
async fn system_wave_is_created_before_user_volumes() {
    let config = machine_with(&[user_volume("data", "10GiB"), user_volume("logs", "4GiB")].join("---\n"));
    let mut lab = Lab::new(node(), &config).unwrap();

    let snapshot = lab.tick().await;
    assert_eq!(snapshot.phase("STATE"), Some(VolumePhase::Provisioned));
    assert_eq!(snapshot.phase("EPHEMERAL"), Some(VolumePhase::Provisioned));
    assert_eq!(snapshot.phase("u-data"), Some(VolumePhase::Waiting));
    assert_eq!(created(&lab.host.events()), vec!["STATE", "EPHEMERAL"]);

    lab.settle().await;
    let order = created(&lab.host.events());
    assert_eq!(order.len(), 4);
    assert_eq!(&order[..2], ["STATE", "EPHEMERAL"]);

    let on_data_disk: Vec<String> = lab.host.partitions(DATA_DISK).into_iter().map(|p| p.label).collect();
    assert_eq!(on_data_disk, vec!["u-data", "u-logs"]);
}

#[tokio::test]
async fn retryable_failure_holds_back_later_waves() {
    let mut lab = Lab::new(node(), &machine_with(&user_volume("data", "10GiB"))).unwrap();
    lab.host.fail_next(Op::CreatePartition, VolumeError::io("partition table is locked"));

    let snapshot = lab.tick().await;
    let state = snapshot.status("STATE").unwrap();
    assert_eq!(state.phase, VolumePhase::Failed);
    assert_eq!(state.error_kind, Some(VolumeErrorKind::Io));
    // EPHEMERAL was queued behind STATE on the same disk.
    assert_eq!(snapshot.status("EPHEMERAL").unwrap().error_kind, Some(VolumeErrorKind::Io));

    let snapshot = lab.tick().await;
    assert_eq!(snapshot.phase("u-data"), Some(VolumePhase::Waiting));
    assert!(created(&lab.host.events()).is_empty());

    let snapshot = lab.settle().await;
    assert!(snapshot.all_ready(), "{:#?}", snapshot.statuses);
    assert_eq!(created(&lab.host.events()), vec!["STATE", "EPHEMERAL", "u-data"]);
}

#[tokio::test]
async fn permanent_failure_does_not_block_later_waves() {
    init_tracing();
    // Too small for STATE plus the minimal EPHEMERAL.
    let host = FakeHost::new()
        .with_disk(SYSTEM_DISK, 2 * GIB, "virtio")
        .with_partition(SYSTEM_DISK, META_PARTITION_LABEL, META_SIZE)
        .with_disk(DATA_DISK, 64 * GIB, "nvme");
    let mut lab = Lab::new(host, &machine_with(&user_volume("data", "10GiB"))).unwrap();
    let snapshot = lab.settle().await;

    let ephemeral = snapshot.status("EPHEMERAL").unwrap();
    assert_eq!(ephemeral.phase, VolumePhase::Failed);
    assert_eq!(ephemeral.error_kind, Some(VolumeErrorKind::OutOfSpace));
    assert!(ephemeral.retry_after.is_none());

    // Created and formatted, but /var/mnt never shows up.
    assert_eq!(created(&lab.host.events()), vec!["u-data"]);
    assert_eq!(snapshot.phase("u-data"), Some(VolumePhase::Formatted));
    assert!(lab.host.mounted_at("/var/mnt/data").is_none());
}

#[tokio::test]
async fn missing_disk_is_retried_once_plugged() {
    init_tracing();
    let host = FakeHost::new()
        .with_disk(SYSTEM_DISK, 32 * GIB, "virtio")
        .with_partition(SYSTEM_DISK, META_PARTITION_LABEL, META_SIZE);
    let mut lab = Lab::new(host, &machine_with(&user_volume("data", "10GiB"))).unwrap();
    // u-data keeps failing and retrying, so this runs out the tick budget.
    let snapshot = lab.settle().await;
    assert!(snapshot.is_ready("EPHEMERAL"));

    let mut failure = None;
    for _ in 0..4 {
        let snapshot = lab.tick().await;
        if let Some(status) = snapshot.status("u-data")
            && status.phase == VolumePhase::Failed
        {
            failure = status.error_kind;
            break;
        }
    }
    assert_eq!(failure, Some(VolumeErrorKind::NoDiskMatch));

    lab.host.plug_disk(DATA_DISK, 64 * GIB, "nvme");
    let snapshot = lab.settle().await;
    assert!(snapshot.is_ready("u-data"), "{:#?}", snapshot.status("u-data"));
}
