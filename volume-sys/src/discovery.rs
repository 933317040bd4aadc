// SPDX-License-Identifier: GPL-3.0-only

//! Block device discovery through `lsblk --json` and sysfs

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use volume_contracts::{ObservedWorld, VolumeError, WorldSource};
use volume_types::constants::META_PARTITION_LABEL;
use volume_types::{DiscoveredVolumeSpec, DiskSpec, SystemDisk};

use crate::command::run;
use crate::{Result, SysError};

const LSBLK_COLUMNS: &str = "NAME,PATH,SIZE,TYPE,ROTA,RO,TRAN,SERIAL,MODEL,WWN,FSTYPE,LABEL,UUID,\
PARTLABEL,PARTTYPE,PARTUUID,PARTN,START,LOG-SEC,MIN-IO,SUBSYSTEMS";

/// lsblk reports START in 512-byte units regardless of the sector size.
const LSBLK_SECTOR: u64 = 512;

const SYMLINK_DIRS: [&str; 2] = ["/dev/disk/by-id", "/dev/disk/by-path"];

fn text(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn number(obj: &Map<String, Value>, key: &str) -> u64 {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

// Older lsblk releases print flags as "0"/"1".
fn flag(obj: &Map<String, Value>, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "1",
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

/// Disks and volumes from lsblk JSON. Sysfs derived fields are filled in later.
fn parse_lsblk(json: &str) -> Result<(Vec<DiskSpec>, Vec<DiscoveredVolumeSpec>)> {
    let root: Value =
        serde_json::from_str(json).map_err(|e| SysError::parse("lsblk", e.to_string()))?;
    let devices = root
        .get("blockdevices")
        .and_then(Value::as_array)
        .ok_or_else(|| SysError::parse("lsblk", "missing blockdevices"))?;

    let mut disks = Vec::new();
    let mut volumes = Vec::new();

    for device in devices.iter().filter_map(Value::as_object) {
        let kind = text(device, "type");
        if kind != "disk" && kind != "rom" {
            continue;
        }

        let dev_path = text(device, "path");
        let disk = DiskSpec {
            dev_path: dev_path.clone(),
            size: number(device, "size"),
            io_size: number(device, "min-io"),
            sector_size: number(device, "log-sec"),
            rotational: flag(device, "rota"),
            readonly: flag(device, "ro"),
            cdrom: kind == "rom",
            transport: text(device, "tran"),
            serial: text(device, "serial"),
            model: text(device, "model"),
            wwid: text(device, "wwn"),
            sub_system: text(device, "subsystems"),
            ..Default::default()
        };

        volumes.push(DiscoveredVolumeSpec {
            dev_path: dev_path.clone(),
            parent_dev_path: dev_path.clone(),
            size: disk.size,
            ty: "disk".to_string(),
            name: text(device, "fstype"),
            label: text(device, "label"),
            uuid: text(device, "uuid"),
            ..Default::default()
        });

        let children = device.get("children").and_then(Value::as_array);
        for part in children.into_iter().flatten().filter_map(Value::as_object) {
            if text(part, "type") != "part" {
                continue;
            }
            volumes.push(DiscoveredVolumeSpec {
                dev_path: text(part, "path"),
                parent_dev_path: dev_path.clone(),
                size: number(part, "size"),
                ty: "partition".to_string(),
                name: text(part, "fstype"),
                label: text(part, "label"),
                uuid: text(part, "uuid"),
                partition_label: text(part, "partlabel"),
                partition_type: text(part, "parttype").to_uppercase(),
                partition_uuid: text(part, "partuuid"),
                partition_index: u32::try_from(number(part, "partn")).unwrap_or(0),
                offset: number(part, "start") * LSBLK_SECTOR,
            });
        }

        disks.push(disk);
    }

    disks.sort_by(|a, b| a.dev_path.cmp(&b.dev_path));
    Ok((disks, volumes))
}

/// Disk holding the META partition; used when no system disk is configured.
fn disk_with_meta(volumes: &[DiscoveredVolumeSpec]) -> Option<String> {
    volumes
        .iter()
        .find(|v| v.is_partition() && v.partition_label == META_PARTITION_LABEL)
        .map(|v| v.parent_dev_path.clone())
}

/// `/sys/devices/pci0000:00/0000:00:1f.2/ata1/.../block/sda` → `/pci0000:00/...`
fn bus_path_from_sysfs(canonical: &Path) -> String {
    let text = canonical.to_string_lossy();
    let trimmed = text.strip_prefix("/sys/devices").unwrap_or(&text);
    match trimmed.rfind("/block/") {
        Some(idx) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

async fn fill_from_sysfs(disk: &mut DiskSpec) {
    let Some(name) = Path::new(&disk.dev_path).file_name() else {
        return;
    };
    let class = Path::new("/sys/class/block").join(name);

    if let Ok(modalias) = tokio::fs::read_to_string(class.join("device/modalias")).await {
        disk.modalias = modalias.trim().to_string();
    }
    if let Ok(canonical) = tokio::fs::canonicalize(&class).await {
        disk.bus_path = bus_path_from_sysfs(&canonical);
    }

    let Ok(device) = tokio::fs::canonicalize(&disk.dev_path).await else {
        return;
    };
    for dir in SYMLINK_DIRS {
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if tokio::fs::canonicalize(entry.path()).await.ok().as_ref() == Some(&device) {
                disk.symlinks.push(entry.path().to_string_lossy().to_string());
            }
        }
    }
    disk.symlinks.sort();
}

/// Observed disks from lsblk, enriched from sysfs.
#[derive(Debug, Default, Clone)]
pub struct LsblkWorld {
    system_disk: Option<String>,
}

impl LsblkWorld {
    /// `system_disk` overrides detection by META partition.
    pub fn new(system_disk: Option<String>) -> Self {
        Self { system_disk }
    }

    async fn observe(&self) -> Result<ObservedWorld> {
        let json = run("lsblk", &["--json", "--bytes", "--output", LSBLK_COLUMNS]).await?;
        let (mut disks, volumes) = parse_lsblk(&json)?;

        for disk in &mut disks {
            fill_from_sysfs(disk).await;
        }

        let system_disk = self
            .system_disk
            .clone()
            .or_else(|| disk_with_meta(&volumes))
            .map(|dev_path| SystemDisk { dev_path });
        if system_disk.is_none() {
            warn!("system disk not found");
        }

        debug!(disks = disks.len(), volumes = volumes.len(), "observed block devices");
        Ok(ObservedWorld {
            disks,
            volumes,
            system_disk,
        })
    }
}

#[async_trait]
impl WorldSource for LsblkWorld {
    async fn snapshot(&self) -> std::result::Result<ObservedWorld, VolumeError> {
        Ok(self.observe().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSBLK: &str = r#"{
   "blockdevices": [
      {"name": "vda", "path": "/dev/vda", "size": 10737418240, "type": "disk", "rota": true, "ro": false,
       "tran": null, "serial": null, "model": null, "wwn": null, "fstype": null, "label": null, "uuid": null,
       "partlabel": null, "parttype": null, "partuuid": null, "partn": null, "start": null,
       "log-sec": 512, "min-io": 512, "subsystems": "block:virtio:pci",
       "children": [
          {"name": "vda1", "path": "/dev/vda1", "size": 1048576, "type": "part", "fstype": "talosmeta",
           "partlabel": "META", "parttype": "0fc63daf-8483-4772-8e79-3d69d8477de4", "partuuid": "a1", "partn": 1, "start": 2048},
          {"name": "vda2", "path": "/dev/vda2", "size": 104857600, "type": "part", "fstype": "xfs", "label": "STATE",
           "partlabel": "STATE", "partn": 2, "start": 4096}
       ]
      },
      {"name": "nvme0n1", "path": "/dev/nvme0n1", "size": "53687091200", "type": "disk", "rota": "0", "ro": "0",
       "tran": "nvme", "serial": "S4EVNX0N", "model": "Samsung SSD 970", "log-sec": "512", "min-io": "512"},
      {"name": "loop0", "path": "/dev/loop0", "size": 4096, "type": "loop"}
   ]
}"#;

    #[test]
    fn parses_disks_and_partitions() {
        let (disks, volumes) = parse_lsblk(LSBLK).unwrap();

        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].dev_path, "/dev/nvme0n1");
        assert_eq!(disks[0].size, 53687091200);
        assert_eq!(disks[0].transport, "nvme");
        assert!(!disks[0].rotational);
        assert!(disks[1].rotational);
        assert_eq!(disks[1].transport, "");

        assert_eq!(volumes.len(), 4);
        let meta = volumes.iter().find(|v| v.partition_label == "META").unwrap();
        assert_eq!(meta.name, "talosmeta");
        assert_eq!(meta.size, 1048576);
        assert_eq!(meta.offset, 2048 * 512);
        assert_eq!(meta.partition_index, 1);
        assert_eq!(meta.parent_dev_path, "/dev/vda");
        assert!(meta.is_partition());

        assert_eq!(disk_with_meta(&volumes).as_deref(), Some("/dev/vda"));
    }

    #[test]
    fn bus_path() {
        let path = Path::new("/sys/devices/pci0000:00/0000:00:04.0/virtio2/block/vda");
        assert_eq!(bus_path_from_sysfs(path), "/pci0000:00/0000:00:04.0/virtio2");
    }
}
