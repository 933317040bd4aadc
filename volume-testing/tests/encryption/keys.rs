// SPDX-License-Identifier: GPL-3.0-only

use volume_contracts::VolumeError;
use volume_testing::{Event, Lab, Op};
use volume_types::{VolumeErrorKind, VolumePhase};

use crate::common::{
    DATA_DISK, GIB, KMS_KEY, STATIC_KEY, TPM_KEY, encrypted_user_volume, machine_with, node,
};

/// Ticks until `volume` fails, returning the error kind.
async fn failure_of(lab: &mut Lab, volume: &str) -> Option<VolumeErrorKind> {
    for _ in 0..12 {
        let snapshot = lab.tick().await;
        if let Some(status) = snapshot.status(volume)
            && status.phase == VolumePhase::Failed
        {
            return status.error_kind;
        }
    }
    None
}

#[tokio::test]
async fn kms_key_is_sealed_into_a_token() {
    let config = machine_with(&encrypted_user_volume("secure", KMS_KEY));
    let mut lab = Lab::new(node(), &config).unwrap();
    let snapshot = lab.settle().await;
    assert!(snapshot.is_ready("u-secure"), "{:#?}", snapshot.status("u-secure"));

    let device = lab.host.partition("u-secure").unwrap().dev_path;
    let token = lab.host.luks_token(&device, 2).unwrap();
    assert_eq!(token.kind, "kms");
    assert!(!token.nonce.is_empty());
    assert_eq!(lab.host.kms_sealed_keys(), 1);
    assert!(lab.host.events().contains(&Event::TokenWritten { device: device.clone(), slot: 2 }));

    // Reopening goes through the KMS again.
    lab.restart().await.unwrap();
    let snapshot = lab.settle().await;
    assert!(snapshot.is_ready("u-secure"));
    assert_eq!(lab.host.kms_sealed_keys(), 1);
}

#[tokio::test]
async fn kms_token_is_written_with_the_header() {
    let host = node();
    host.fail_next(Op::WriteToken, VolumeError::io("EIO"));
    let config = machine_with(&encrypted_user_volume("secure", KMS_KEY));
    let mut lab = Lab::new(host, &config).unwrap();
    let snapshot = lab.settle().await;
    assert!(snapshot.is_ready("u-secure"), "{:#?}", snapshot.status("u-secure"));

    let device = lab.host.partition("u-secure").unwrap().dev_path;
    assert_eq!(lab.host.luks_token(&device, 2).unwrap().kind, "kms");
    assert!(!lab.host.events().iter().any(|e| matches!(e, Event::TokenWritten { .. })));

    lab.restart().await.unwrap();
    let snapshot = lab.settle().await;
    assert!(snapshot.is_ready("u-secure"));
}

#[tokio::test]
async fn header_left_without_its_token_is_formatted_again() {
    let host = node();
    let partition = host.add_partition(DATA_DISK, "u-secure", 2 * GIB).unwrap();
    let host = host.with_bare_luks_header(&partition.dev_path, 2, b"lost with the reboot");

    let config = machine_with(&encrypted_user_volume("secure", KMS_KEY));
    let mut lab = Lab::new(host, &config).unwrap();
    let snapshot = lab.settle().await;
    assert!(snapshot.is_ready("u-secure"), "{:#?}", snapshot.status("u-secure"));

    let events = lab.host.events();
    assert!(events.contains(&Event::LuksFormatted {
        device: partition.dev_path.clone()
    }));
    assert!(lab.host.luks_token(&partition.dev_path, 2).is_some());
    assert_eq!(lab.host.luks_slots(&partition.dev_path), vec![2]);
}

#[tokio::test]
async fn header_with_a_static_slot_is_never_formatted_again() {
    let host = node();
    let partition = host.add_partition(DATA_DISK, "u-secure", 2 * GIB).unwrap();
    let host = host.with_bare_luks_header(&partition.dev_path, 0, b"someone else's");

    let config = machine_with(&encrypted_user_volume("secure", &format!("{STATIC_KEY}{KMS_KEY}")));
    let mut lab = Lab::new(host, &config).unwrap();
    assert_eq!(failure_of(&mut lab, "u-secure").await, Some(VolumeErrorKind::EncryptionLocked));
    assert!(!lab.host.events().iter().any(|e| matches!(e, Event::LuksFormatted { .. })));
}

#[tokio::test]
async fn unreachable_kms_is_retried() {
    let config = machine_with(&encrypted_user_volume("secure", KMS_KEY));
    let mut lab = Lab::new(node(), &config).unwrap();
    lab.settle().await;

    lab.host.set_kms_reachable(false);
    lab.restart().await.unwrap();
    // Every slot failing to unseal leaves the volume locked, which is retried.
    assert_eq!(failure_of(&mut lab, "u-secure").await, Some(VolumeErrorKind::EncryptionLocked));

    lab.host.set_kms_reachable(true);
    let snapshot = lab.settle().await;
    assert!(snapshot.is_ready("u-secure"), "{:#?}", snapshot.status("u-secure"));
}

#[tokio::test]
async fn tpm_key_follows_the_boot_measurement() {
    let config = machine_with(&encrypted_user_volume("secure", TPM_KEY));
    let mut lab = Lab::new(node(), &config).unwrap();
    let snapshot = lab.settle().await;
    assert!(snapshot.is_ready("u-secure"), "{:#?}", snapshot.status("u-secure"));

    let device = lab.host.partition("u-secure").unwrap().dev_path;
    assert_eq!(lab.host.luks_token(&device, 3).unwrap().kind, "tpm");

    lab.host.change_pcr7();
    lab.restart().await.unwrap();
    assert_eq!(
        failure_of(&mut lab, "u-secure").await,
        Some(VolumeErrorKind::TpmUnsealFailure)
    );
}

#[tokio::test]
async fn tpm_enrollment_needs_secure_boot() {
    let host = node().with_secure_boot(false);
    let config = machine_with(&encrypted_user_volume("secure", TPM_KEY));
    let mut lab = Lab::new(host, &config).unwrap();
    let snapshot = lab.settle().await;

    let status = snapshot.status("u-secure").unwrap();
    assert_eq!(status.phase, VolumePhase::Failed);
    assert_eq!(status.error_kind, Some(VolumeErrorKind::TpmUnsealFailure));
    assert!(!lab.host.events().iter().any(|e| matches!(e, Event::LuksFormatted { .. })));
}

#[tokio::test]
async fn static_slot_opens_when_tpm_fails() {
    let config = machine_with(&encrypted_user_volume("secure", &format!("{STATIC_KEY}{TPM_KEY}")));
    let mut lab = Lab::new(node(), &config).unwrap();
    lab.settle().await;

    lab.host.change_pcr7();
    lab.restart().await.unwrap();
    let snapshot = lab.settle().await;
    assert!(snapshot.is_ready("u-secure"), "{:#?}", snapshot.status("u-secure"));
}
