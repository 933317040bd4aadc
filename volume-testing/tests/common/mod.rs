// SPDX-License-Identifier: GPL-3.0-only

use volume_testing::{Event, FakeHost};
use volume_types::constants::{META_PARTITION_LABEL, META_SIZE};

pub const GIB: u64 = 1 << 30;

pub const SYSTEM_DISK: &str = "/dev/vda";
pub const DATA_DISK: &str = "/dev/nvme0n1";

pub const MACHINE: &str = "version: v1alpha1\nmachine:\n  type: worker\n";

/// Log output for failing tests; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A freshly installed node: META on the system disk, a blank NVMe disk.
pub fn node() -> FakeHost {
    init_tracing();
    FakeHost::new()
        .with_disk(SYSTEM_DISK, 32 * GIB, "virtio")
        .with_partition(SYSTEM_DISK, META_PARTITION_LABEL, META_SIZE)
        .with_disk(DATA_DISK, 64 * GIB, "nvme")
}

/// Machine config plus `documents`.
pub fn machine_with(documents: &str) -> String {
    if documents.is_empty() {
        MACHINE.to_string()
    } else {
        format!("{MACHINE}---\n{documents}")
    }
}

pub fn user_volume(name: &str, max_size: &str) -> String {
    format!(
        r#"apiVersion: v1alpha1
kind: UserVolumeConfig
name: {name}
provisioning:
  diskSelector:
    match: disk.transport == "nvme"
  minSize: 1GiB
  maxSize: {max_size}
filesystem:
  type: xfs
"#
    )
}

pub fn encrypted_user_volume(name: &str, keys: &str) -> String {
    format!(
        r#"apiVersion: v1alpha1
kind: UserVolumeConfig
name: {name}
provisioning:
  diskSelector:
    match: disk.transport == "nvme"
  minSize: 1GiB
  maxSize: 2GiB
filesystem:
  type: ext4
encryption:
  provider: luks2
  keys:
{keys}"#
    )
}

pub const STATIC_KEY: &str = "    - slot: 0\n      static:\n        passphrase: topsecret\n";
pub const NODE_ID_KEY: &str = "    - slot: 1\n      nodeID: {}\n";
pub const KMS_KEY: &str = "    - slot: 2\n      kms:\n        endpoint: https://kms.example.com\n";
pub const TPM_KEY: &str = "    - slot: 3\n      tpm:\n        checkSecurebootStatusOnEnroll: true\n";

/// Partition labels in creation order.
pub fn created(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::PartitionCreated { label, .. } => Some(label.clone()),
            _ => None,
        })
        .collect()
}

/// Unmounted targets in order.
pub fn unmounted(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Unmounted { target } => Some(target.clone()),
            _ => None,
        })
        .collect()
}

/// Events that change what is on disk.
pub fn destructive(events: &[Event]) -> Vec<&Event> {
    events
        .iter()
        .filter(|event| {
            matches!(
                event,
                Event::PartitionCreated { .. } | Event::Formatted { .. } | Event::LuksFormatted { .. }
            )
        })
        .collect()
}
