// SPDX-License-Identifier: GPL-3.0-only

//! GPT partition type catalog
//!
//! The catalog is compiled in from `resources/gpt_types.toml` and parsed on
//! first use.

use std::sync::LazyLock;

use serde::Deserialize;

/// GPT type for Linux filesystem data partitions.
pub const LINUX_FILESYSTEM_DATA: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";

/// GPT type for Linux swap partitions.
pub const LINUX_SWAP: &str = "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F";

/// Flags describing a partition type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum PartitionTypeFlags {
    #[default]
    None,
    /// Used for swap.
    Swap,
    /// Member of RAID/LVM or similar.
    Raid,
    /// Part of the system or bootloader.
    System,
}

/// Detailed information about a GPT partition type.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PartitionTypeInfo {
    /// Type GUID, upper case.
    pub ty: String,
    pub name: String,
    #[serde(default)]
    pub flags: PartitionTypeFlags,
    /// Filesystem usually found on this type.
    #[serde(default)]
    pub filesystem_type: String,
}

impl PartitionTypeInfo {
    /// Case-insensitive lookup by type GUID.
    pub fn find_by_id(type_id: &str) -> Option<&'static PartitionTypeInfo> {
        PARTITION_TYPES
            .iter()
            .find(|p| p.ty.eq_ignore_ascii_case(type_id))
    }
}

/// Human readable name of a type GUID, falling back to the GUID itself.
pub fn partition_type_name(type_id: &str) -> String {
    PartitionTypeInfo::find_by_id(type_id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| type_id.to_string())
}

const GPT_TOML: &str = include_str!("../resources/gpt_types.toml");

#[derive(Deserialize)]
struct PartitionTypeCatalog {
    types: Vec<PartitionTypeInfo>,
}

/// Known GPT partition types.
pub static PARTITION_TYPES: LazyLock<Vec<PartitionTypeInfo>> = LazyLock::new(|| {
    toml::from_str::<PartitionTypeCatalog>(GPT_TOML)
        .map(|catalog| catalog.types)
        .unwrap_or_default()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_parses_and_contains_volume_types() {
        assert!(PARTITION_TYPES.len() >= 2);

        let data = PartitionTypeInfo::find_by_id(&LINUX_FILESYSTEM_DATA.to_lowercase())
            .expect("linux data type");
        assert_eq!(data.name, "Linux filesystem data");

        let swap = PartitionTypeInfo::find_by_id(LINUX_SWAP).expect("swap type");
        assert_eq!(swap.flags, PartitionTypeFlags::Swap);
    }

    #[test]
    fn unknown_types_fall_back_to_guid() {
        assert_eq!(partition_type_name("1234"), "1234");
    }
}
