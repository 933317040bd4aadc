// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use volume_contracts::EntryKind;
use volume_testing::{Event, Lab, Op};
use volume_types::{FilesystemType, VolumePhase};

use crate::common::{
    MACHINE, STATIC_KEY, SYSTEM_DISK, created, destructive, encrypted_user_volume, machine_with,
    node, user_volume,
};

#[tokio::test]
async fn fresh_node_comes_up() {
    let mut lab = Lab::new(node(), &machine_with(&user_volume("data", "10GiB"))).unwrap();
    let snapshot = lab.settle().await;

    assert!(snapshot.all_ready(), "{:#?}", snapshot.statuses);
    assert!(snapshot.config_error.is_none());

    let events = lab.host.events();
    assert_eq!(created(&events), vec!["STATE", "EPHEMERAL", "u-data"]);
    assert!(events.contains(&Event::MetaWritten));

    let state = lab.host.partition("STATE").unwrap();
    let ephemeral = lab.host.partition("EPHEMERAL").unwrap();
    assert!(state.dev_path.starts_with(SYSTEM_DISK));
    assert_eq!(lab.host.mounted_at("/system/state").unwrap().source, state.dev_path);
    assert_eq!(lab.host.mounted_at("/var").unwrap().source, ephemeral.dev_path);
    assert_eq!(lab.host.signature(&ephemeral.dev_path).unwrap().name, "xfs");

    let data = lab.host.partition("u-data").unwrap();
    assert_eq!(lab.host.mounted_at("/var/mnt/data").unwrap().source, data.dev_path);
    assert_eq!(snapshot.status("u-data").unwrap().filesystem, FilesystemType::Xfs);

    for overlay in ["/etc/cni", "/etc/kubernetes", "/usr/libexec/kubernetes", "/opt"] {
        let mount = lab.host.mounted_at(overlay).unwrap();
        assert_eq!(mount.fstype, "overlay");
    }
    let upper = lab.host.path_entry("/var/system/overlays/etc-cni-diff").unwrap();
    assert_eq!(upper.kind, EntryKind::Directory);

    let var_run = lab.host.path_entry("/var/run").unwrap();
    assert_eq!(var_run.kind, EntryKind::Symlink);
    assert_eq!(var_run.link.as_deref(), Some("/run"));

    let etcd = lab.host.path_entry("/var/lib/etcd").unwrap();
    assert_eq!((etcd.uid, etcd.gid, etcd.mode), (60, 60, 0o700));
    assert!(snapshot.is_ready("ETCD"));
}

#[tokio::test]
async fn settled_node_is_left_alone() {
    let mut lab = Lab::new(node(), &machine_with(&user_volume("data", "10GiB"))).unwrap();
    lab.settle().await;
    lab.host.take_events();

    for _ in 0..3 {
        lab.tick().await;
    }
    assert!(lab.host.events().is_empty(), "{:?}", lab.host.events());
}

#[tokio::test]
async fn restart_reuses_what_is_on_disk() {
    let mut lab = Lab::new(node(), &machine_with(&user_volume("data", "10GiB"))).unwrap();
    lab.settle().await;
    let before = lab.host.partitions("/dev/nvme0n1");
    lab.host.take_events();

    lab.restart().await.unwrap();
    assert!(lab.state_file().exists());
    let snapshot = lab.settle().await;

    assert!(snapshot.all_ready(), "{:#?}", snapshot.statuses);
    let events = lab.host.events();
    assert_eq!(destructive(&events), Vec::<&Event>::new());
    assert!(!events.iter().any(|e| matches!(e, Event::Mounted { .. })));
    assert_eq!(lab.host.partitions("/dev/nvme0n1"), before);
}

#[tokio::test]
async fn without_machine_config_only_system_partitions_are_tracked() {
    let host = node();
    let mut lab = Lab::new(host, "").unwrap();
    let snapshot = lab.settle().await;

    assert_eq!(snapshot.phase("META"), Some(VolumePhase::Ready));
    // STATE is located only, never created.
    assert_eq!(snapshot.phase("STATE"), Some(VolumePhase::Missing));
    assert!(snapshot.status("EPHEMERAL").is_none());
    assert!(created(&lab.host.events()).is_empty());

    lab.set_config(MACHINE);
    let snapshot = lab.settle().await;
    assert!(snapshot.all_ready(), "{:#?}", snapshot.statuses);
    assert_eq!(created(&lab.host.events()), vec!["STATE", "EPHEMERAL"]);
}

#[tokio::test]
async fn broken_config_keeps_volumes_running() {
    let mut lab = Lab::new(node(), &machine_with(&user_volume("data", "10GiB"))).unwrap();
    lab.settle().await;
    lab.host.take_events();

    lab.set_config("apiVersion: v1alpha1\nkind: UserVolumeConfig\nprovisioning: {\n");
    let snapshot = lab.tick().await;

    assert!(snapshot.config_error.is_some());
    assert!(snapshot.all_ready());
    assert!(lab.host.mounted_at("/var/mnt/data").is_some());
    assert!(lab.host.events().is_empty(), "{:?}", lab.host.events());
}

#[tokio::test]
async fn slow_destructive_calls_run_to_completion() {
    let host = node();
    for op in [Op::CreatePartition, Op::LuksFormat, Op::Format] {
        host.slow_down(op, Duration::from_millis(200));
    }
    let config = machine_with(&encrypted_user_volume("secure", STATIC_KEY));
    let mut lab = Lab::with_settings(host, &config, |settings| {
        settings.timeouts.partition = Duration::from_millis(20);
        settings.timeouts.format = Duration::from_millis(20);
        settings.timeouts.encryption = Duration::from_millis(20);
    })
    .unwrap();

    let snapshot = lab.settle().await;
    assert!(snapshot.all_ready(), "{:#?}", snapshot.statuses);

    // Every call that was entered also finished, none was started twice.
    let events = lab.host.events();
    let formatted = events
        .iter()
        .filter(|e| matches!(e, Event::Formatted { .. }))
        .count();
    assert_eq!(created(&events), vec!["STATE", "EPHEMERAL", "u-secure"]);
    assert_eq!(lab.host.started(Op::CreatePartition), 3);
    assert_eq!(lab.host.started(Op::LuksFormat), 1);
    assert_eq!(lab.host.started(Op::Format), formatted);
}

#[tokio::test]
async fn directory_volume_is_not_bound_onto_itself() {
    let directory = "apiVersion: v1alpha1\nkind: UserVolumeConfig\nname: cache\nvolumeType: directory\n";
    let mut lab = Lab::new(node(), &machine_with(directory)).unwrap();
    let snapshot = lab.settle().await;

    assert!(snapshot.is_ready("u-cache"), "{:#?}", snapshot.statuses);
    let entry = lab.host.path_entry("/var/mnt/cache").unwrap();
    assert_eq!(entry.kind, EntryKind::Directory);
    assert!(lab.host.mounted_at("/var/mnt/cache").is_none());
    assert!(!lab.host.events().iter().any(
        |e| matches!(e, Event::Mounted { target, .. } if target.as_str() == "/var/mnt/cache")
    ));

    let mount = snapshot.mount("u-cache").unwrap();
    assert_eq!((mount.source.as_str(), mount.target.as_str()), ("/var/mnt/cache", "/var/mnt/cache"));
}
