// SPDX-License-Identifier: GPL-3.0-only

//! Observed disks and discovered volumes
//!
//! These are the records selector expressions are evaluated against; the
//! field names are the ones exposed as `disk.*` and `volume.*`.

use serde::{Deserialize, Serialize};
use volume_cel::Value;

use crate::common::bytes_to_pretty;

/// A block device as reported by the OS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskSpec {
    /// Device path (e.g., "/dev/nvme0n1")
    pub dev_path: String,

    /// Total size in bytes
    pub size: u64,
    pub io_size: u64,
    pub sector_size: u64,
    pub rotational: bool,
    pub readonly: bool,
    pub cdrom: bool,

    /// Connection transport (e.g., "nvme", "sata", "usb", "virtio")
    pub transport: String,
    pub serial: String,
    pub model: String,
    pub bus_path: String,
    pub modalias: String,
    pub wwid: String,
    pub uuid: String,
    pub sub_system: String,
    pub symlinks: Vec<String>,
}

impl DiskSpec {
    pub fn pretty_size(&self) -> String {
        bytes_to_pretty(self.size, false)
    }

    /// The `disk` record bound into locator expressions.
    pub fn to_value(&self) -> Value {
        Value::record([
            ("dev_path", Value::from(&self.dev_path)),
            ("size", Value::from(self.size)),
            ("io_size", Value::from(self.io_size)),
            ("sector_size", Value::from(self.sector_size)),
            ("rotational", Value::from(self.rotational)),
            ("readonly", Value::from(self.readonly)),
            ("cdrom", Value::from(self.cdrom)),
            ("transport", Value::from(&self.transport)),
            ("serial", Value::from(&self.serial)),
            ("model", Value::from(&self.model)),
            ("bus_path", Value::from(&self.bus_path)),
            ("modalias", Value::from(&self.modalias)),
            ("wwid", Value::from(&self.wwid)),
            ("uuid", Value::from(&self.uuid)),
            ("sub_system", Value::from(&self.sub_system)),
            ("symlinks", Value::from(self.symlinks.clone())),
        ])
    }
}

/// The disk chosen to hold the OS's system partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemDisk {
    pub dev_path: String,
}

/// A block device or partition with its probed signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveredVolumeSpec {
    pub dev_path: String,

    /// Whole disk this volume lives on; equal to `dev_path` for disks.
    pub parent_dev_path: String,
    pub size: u64,

    /// "disk" or "partition"
    #[serde(rename = "type")]
    pub ty: String,

    /// Probed signature name (e.g., "xfs", "crypto_LUKS"); empty when blank
    pub name: String,

    /// Filesystem label
    pub label: String,
    pub uuid: String,
    pub partition_label: String,
    pub partition_type: String,
    pub partition_uuid: String,
    pub partition_index: u32,
    pub offset: u64,
}

impl DiscoveredVolumeSpec {
    pub fn is_partition(&self) -> bool {
        self.ty == "partition"
    }

    /// The `volume` record bound into locator expressions.
    pub fn to_value(&self) -> Value {
        Value::record([
            ("dev_path", Value::from(&self.dev_path)),
            ("parent_dev_path", Value::from(&self.parent_dev_path)),
            ("size", Value::from(self.size)),
            ("type", Value::from(&self.ty)),
            ("name", Value::from(&self.name)),
            ("label", Value::from(&self.label)),
            ("uuid", Value::from(&self.uuid)),
            ("partition_label", Value::from(&self.partition_label)),
            ("partition_type", Value::from(&self.partition_type)),
            ("partition_uuid", Value::from(&self.partition_uuid)),
            ("partition_index", Value::from(self.partition_index)),
            ("offset", Value::from(self.offset)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use volume_cel::{DISK_FIELDS, VOLUME_FIELDS};

    use super::*;

    fn field_names(value: &Value) -> Vec<String> {
        match value {
            Value::Record(fields) => fields.keys().cloned().collect(),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn records_expose_every_environment_field() {
        let mut disk_fields: Vec<_> = DISK_FIELDS.iter().map(|(n, _)| n.to_string()).collect();
        disk_fields.sort();
        assert_eq!(field_names(&DiskSpec::default().to_value()), disk_fields);

        let mut volume_fields: Vec<_> = VOLUME_FIELDS.iter().map(|(n, _)| n.to_string()).collect();
        volume_fields.sort();
        assert_eq!(
            field_names(&DiscoveredVolumeSpec::default().to_value()),
            volume_fields
        );
    }

    #[test]
    fn pretty_disk_size() {
        let disk = DiskSpec {
            size: 1024 * 1024 * 1024,
            ..Default::default()
        };
        assert_eq!(disk.pretty_size(), "1.00 GiB");
    }
}
