// SPDX-License-Identifier: GPL-3.0-only

use volume_testing::Lab;
use volume_types::constants::{EPHEMERAL_MIN_SIZE, STATE_SIZE};
use volume_types::{VolumeErrorKind, VolumePhase};

use crate::common::{DATA_DISK, GIB, SYSTEM_DISK, created, machine_with, node, user_volume};

const MIB: u64 = 1 << 20;

#[tokio::test]
async fn sizes_follow_the_documents() {
    let mut lab = Lab::new(node(), &machine_with(&user_volume("data", "10GiB"))).unwrap();
    lab.settle().await;

    let state = lab.host.partition("STATE").unwrap();
    assert_eq!(state.size, STATE_SIZE);

    // EPHEMERAL grows over the rest of the system disk.
    let ephemeral = lab.host.partition("EPHEMERAL").unwrap();
    assert!(ephemeral.size > EPHEMERAL_MIN_SIZE);
    let used: u64 = lab.host.partitions(SYSTEM_DISK).iter().map(|p| p.size).sum();
    // Only the GPT areas at both ends stay unallocated.
    assert_eq!(32 * GIB - used, 2 * MIB);

    let data = lab.host.partition("u-data").unwrap();
    assert_eq!(data.size, 10 * GIB);
}

#[tokio::test]
async fn existing_partitions_are_never_resized_or_recreated() {
    let mut lab = Lab::new(node(), &machine_with(&user_volume("data", "2GiB"))).unwrap();
    lab.settle().await;
    let before = lab.host.partitions(DATA_DISK);
    lab.host.take_events();

    lab.set_config(&machine_with(&user_volume("data", "20GiB")));
    let snapshot = lab.settle().await;
    assert!(snapshot.is_ready("u-data"));
    assert!(created(&lab.host.events()).is_empty());
    assert_eq!(lab.host.partitions(DATA_DISK), before);

    lab.restart().await.unwrap();
    let snapshot = lab.settle().await;
    assert!(snapshot.all_ready(), "{:#?}", snapshot.statuses);
    assert!(created(&lab.host.events()).is_empty());
    assert_eq!(lab.host.partitions(DATA_DISK), before);
    assert_eq!(snapshot.status("u-data").unwrap().size, 2 * GIB);
}

#[tokio::test]
async fn out_of_space_waits_for_a_config_change() {
    let mut lab = Lab::new(node(), &machine_with(&user_volume_min("huge", "100GiB"))).unwrap();
    let snapshot = lab.settle().await;

    let huge = snapshot.status("u-huge").unwrap();
    assert_eq!(huge.phase, VolumePhase::Failed);
    assert_eq!(huge.error_kind, Some(VolumeErrorKind::OutOfSpace));
    assert!(huge.retry_after.is_none());
    assert!(lab.host.partition("u-huge").is_none());

    // Not retried on its own.
    lab.tick().await;
    assert!(lab.host.partition("u-huge").is_none());

    lab.set_config(&machine_with(&user_volume_min("huge", "40GiB")));
    let snapshot = lab.settle().await;
    assert!(snapshot.is_ready("u-huge"), "{:#?}", snapshot.status("u-huge"));
    assert_eq!(lab.host.partition("u-huge").unwrap().size, 40 * GIB);
}

/// A volume without an upper bound.
fn user_volume_min(name: &str, min_size: &str) -> String {
    user_volume(name, "0")
        .replace("minSize: 1GiB", &format!("minSize: {min_size}"))
        .replace("  maxSize: 0\n", "")
}
