// SPDX-License-Identifier: GPL-3.0-only

//! Well-known volume identifiers, mount points and limits

/// 1 MiB partition holding small key-value records.
pub const META_PARTITION_LABEL: &str = "META";
pub const STATE_PARTITION_LABEL: &str = "STATE";
pub const EPHEMERAL_PARTITION_LABEL: &str = "EPHEMERAL";
pub const IMAGE_CACHE_PARTITION_LABEL: &str = "IMAGECACHE";

/// Filesystem names the META partition may carry.
pub const META_FILESYSTEM_NAMES: [&str; 2] = ["", "talosmeta"];

pub const STATE_MOUNT_POINT: &str = "/system/state";
pub const EPHEMERAL_MOUNT_POINT: &str = "/var";
pub const USER_VOLUME_MOUNT_POINT: &str = "/var/mnt";

pub const META_SIZE: u64 = 1024 * 1024;
pub const STATE_SIZE: u64 = 100 * 1024 * 1024;
pub const EPHEMERAL_MIN_SIZE: u64 = 2 * 1024 * 1024 * 1024;
pub const MIN_USER_VOLUME_SIZE: u64 = 100 * 1024 * 1024;

pub const USER_VOLUME_PREFIX: &str = "u-";
pub const RAW_VOLUME_PREFIX: &str = "r-";
pub const EXISTING_VOLUME_PREFIX: &str = "e-";
pub const EXTERNAL_VOLUME_PREFIX: &str = "x-";
pub const SWAP_VOLUME_PREFIX: &str = "s-";

/// GPT partition name limit in bytes.
pub const PARTITION_LABEL_LENGTH: usize = 36;

/// Longest document name; the two-byte prefix keeps derived labels within
/// [`PARTITION_LABEL_LENGTH`].
pub const MAX_VOLUME_NAME_LENGTH: usize = PARTITION_LABEL_LENGTH - 2;

pub const WAVE_SYSTEM_DISK: i32 = -1;
pub const WAVE_USER_VOLUMES: i32 = 0;
pub const WAVE_LEGACY_USER_DISKS: i32 = 1_000_000;

/// Identifier of the root of the mount forest.
pub const ROOT_MOUNT_ID: &str = "/";

/// Mapper device name for an opened encrypted volume.
pub fn mapper_name(volume_id: &str) -> String {
    format!("luks2-{}", volume_id.replace('/', "-"))
}

/// Full SELinux context for an object type, e.g. `ephemeral_t`.
pub fn selinux_label(object_type: &str) -> String {
    format!("system_u:object_r:{object_type}:s0")
}

/// Whether `name` is a valid user facing volume name.
pub fn is_valid_volume_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_VOLUME_NAME_LENGTH
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}
