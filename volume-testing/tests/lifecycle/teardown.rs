// SPDX-License-Identifier: GPL-3.0-only

use volume_testing::Lab;

use crate::common::{MACHINE, machine_with, node, unmounted, user_volume};

#[tokio::test]
async fn removed_user_volume_is_unmounted() {
    let config = machine_with(&[user_volume("data", "10GiB"), user_volume("logs", "4GiB")].join("---\n"));
    let mut lab = Lab::new(node(), &config).unwrap();
    lab.settle().await;
    lab.host.take_events();

    lab.set_config(&machine_with(&user_volume("logs", "4GiB")));
    let snapshot = lab.settle().await;

    assert_eq!(unmounted(&lab.host.events()), vec!["/var/mnt/data"]);
    assert!(snapshot.status("u-data").is_none());
    assert!(snapshot.is_ready("u-logs"));
    assert!(lab.host.mounted_at("/var/mnt/logs").is_some());
    // The partition itself is kept.
    assert!(lab.host.partition("u-data").is_some());
}

#[tokio::test]
async fn children_are_released_before_parents() {
    let mut lab = Lab::new(node(), &machine_with(&user_volume("data", "10GiB"))).unwrap();
    lab.settle().await;
    lab.host.take_events();

    lab.set_config("");
    let snapshot = lab.settle().await;

    let order = unmounted(&lab.host.events());
    let position = |target: &str| order.iter().position(|t| t == target);
    let data = position("/var/mnt/data").unwrap();
    let var = position("/var").unwrap();
    assert!(data < var, "{order:?}");
    for overlay in ["/etc/cni", "/opt"] {
        assert!(position(overlay).unwrap() < var, "{order:?}");
    }

    assert_eq!(lab.host.mount_targets(), vec!["/system/state"]);
    let ids: Vec<&str> = snapshot.statuses.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["META", "STATE"]);
    assert!(snapshot.is_ready("STATE"));

    lab.set_config(MACHINE);
    let snapshot = lab.settle().await;
    assert!(snapshot.all_ready(), "{:#?}", snapshot.statuses);
}

#[tokio::test]
async fn failed_unmount_is_retried() {
    let mut lab = Lab::new(node(), &machine_with(&user_volume("data", "10GiB"))).unwrap();
    lab.settle().await;

    lab.host.fail_next(
        volume_testing::Op::Unmount,
        volume_contracts::VolumeError::io("target is busy"),
    );
    lab.set_config(MACHINE);
    let snapshot = lab.tick().await;
    assert!(snapshot.status("u-data").is_some());
    assert!(lab.host.mounted_at("/var/mnt/data").is_some());

    let snapshot = lab.settle().await;
    assert!(snapshot.status("u-data").is_none());
    assert!(lab.host.mounted_at("/var/mnt/data").is_none());
}
