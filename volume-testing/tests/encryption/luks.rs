// SPDX-License-Identifier: GPL-3.0-only

use volume_contracts::{LuksFormat, LuksOps};
use volume_testing::{Event, Lab};
use volume_types::constants::mapper_name;
use volume_types::{DEFAULT_CIPHER, EncryptionProvider, VolumeErrorKind, VolumePhase};

use crate::common::{
    DATA_DISK, GIB, MACHINE, NODE_ID_KEY, STATIC_KEY, destructive, encrypted_user_volume,
    machine_with, node, user_volume,
};

#[tokio::test]
async fn encrypted_volume_is_opened_and_mounted() {
    let config = machine_with(&encrypted_user_volume("secure", &format!("{STATIC_KEY}{NODE_ID_KEY}")));
    let mut lab = Lab::new(node(), &config).unwrap();
    let snapshot = lab.settle().await;
    assert!(snapshot.all_ready(), "{:#?}", snapshot.statuses);

    let device = lab.host.partition("u-secure").unwrap().dev_path;
    assert_eq!(lab.host.luks_slots(&device), vec![0, 1]);
    assert_eq!(lab.host.luks_cipher(&device).as_deref(), Some(DEFAULT_CIPHER));

    let mapper = mapper_name("u-secure");
    let mapper_path = format!("/dev/mapper/{mapper}");
    assert_eq!(lab.host.open_mappers(), vec![mapper.clone()]);
    assert_eq!(lab.host.mounted_at("/var/mnt/secure").unwrap().source, mapper_path);
    assert_eq!(lab.host.signature(&mapper_path).unwrap().name, "ext4");

    let status = snapshot.status("u-secure").unwrap();
    assert_eq!(status.encryption_provider, EncryptionProvider::Luks2);
    assert_eq!(status.location, device);
    assert_eq!(status.mount_location, mapper_path);
    assert!(status.encryption_failed_syncs.is_empty());
    assert!(snapshot.mount("u-secure").unwrap().encrypted);
}

#[tokio::test]
async fn removed_volume_is_closed_after_unmount() {
    let config = machine_with(&encrypted_user_volume("secure", STATIC_KEY));
    let mut lab = Lab::new(node(), &config).unwrap();
    lab.settle().await;
    lab.host.take_events();

    lab.set_config(MACHINE);
    lab.settle().await;

    let mapper = mapper_name("u-secure");
    let events = lab.host.events();
    let unmounted = events
        .iter()
        .position(|e| matches!(e, Event::Unmounted { target } if target == "/var/mnt/secure"))
        .unwrap();
    let closed = events
        .iter()
        .position(|e| *e == Event::LuksClosed { mapper: mapper.clone() })
        .unwrap();
    assert!(unmounted < closed, "{events:?}");
    assert!(lab.host.open_mappers().is_empty());
}

#[tokio::test]
async fn declared_slot_is_enrolled_on_next_open() {
    let config = machine_with(&encrypted_user_volume("secure", STATIC_KEY));
    let mut lab = Lab::new(node(), &config).unwrap();
    lab.settle().await;
    let device = lab.host.partition("u-secure").unwrap().dev_path;
    assert_eq!(lab.host.luks_slots(&device), vec![0]);
    lab.host.take_events();

    lab.set_config(&machine_with(&encrypted_user_volume(
        "secure",
        &format!("{STATIC_KEY}{NODE_ID_KEY}"),
    )));
    lab.restart().await.unwrap();
    let snapshot = lab.settle().await;

    assert!(snapshot.is_ready("u-secure"));
    assert_eq!(lab.host.luks_slots(&device), vec![0, 1]);
    assert_eq!(
        lab.host.events().iter().filter(|e| matches!(e, Event::KeyAdded { .. })).count(),
        1
    );
    assert!(destructive(&lab.host.events()).is_empty());
}

#[tokio::test]
async fn undeclared_slot_is_reported_not_removed() {
    let config = machine_with(&encrypted_user_volume("secure", STATIC_KEY));
    let mut lab = Lab::new(node(), &config).unwrap();
    lab.settle().await;
    let device = lab.host.partition("u-secure").unwrap().dev_path;

    lab.host.bind_luks_slot(&device, 5, b"recovery");
    lab.restart().await.unwrap();
    let snapshot = lab.settle().await;

    let status = snapshot.status("u-secure").unwrap();
    assert_eq!(status.phase, VolumePhase::Ready);
    assert_eq!(status.encryption_failed_syncs, vec!["slot 5: bound but not declared"]);
    assert_eq!(lab.host.luks_slots(&device), vec![0, 5]);
}

#[tokio::test]
async fn wrong_passphrase_keeps_volume_locked() {
    let config = machine_with(&encrypted_user_volume("secure", STATIC_KEY));
    let mut lab = Lab::new(node(), &config).unwrap();
    lab.settle().await;

    let changed = STATIC_KEY.replace("topsecret", "othersecret");
    lab.set_config(&machine_with(&encrypted_user_volume("secure", &changed)));
    lab.restart().await.unwrap();

    let mut locked = false;
    for _ in 0..8 {
        let snapshot = lab.tick().await;
        if snapshot.status("u-secure").and_then(|s| s.error_kind)
            == Some(VolumeErrorKind::EncryptionLocked)
        {
            locked = true;
            break;
        }
    }
    assert!(locked);
}

#[tokio::test]
async fn luks_header_on_plain_volume_is_a_mismatch() {
    let host = node();
    let partition = host.add_partition(DATA_DISK, "u-data", 2 * GIB).unwrap();
    let params = LuksFormat {
        cipher: DEFAULT_CIPHER.to_string(),
        key_size: 512,
        block_size: 4096,
        perf_options: Vec::new(),
        slot: 0,
        key: b"foreign".to_vec(),
        token: None,
    };
    LuksOps::format(&host, &partition.dev_path, &params).await.unwrap();

    let mut lab = Lab::new(host, &machine_with(&user_volume("data", "2GiB"))).unwrap();
    let snapshot = lab.settle().await;

    let status = snapshot.status("u-data").unwrap();
    assert_eq!(status.phase, VolumePhase::Failed);
    assert_eq!(status.error_kind, Some(VolumeErrorKind::EncryptionProviderMismatch));
    assert_eq!(status.pre_fail_phase, Some(VolumePhase::Provisioned));
    assert!(destructive(&lab.host.events()).iter().all(|e| !matches!(
        e,
        Event::Formatted { device, .. } if *device == partition.dev_path
    )));
}
