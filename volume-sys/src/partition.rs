// SPDX-License-Identifier: GPL-3.0-only

//! GPT access through `sfdisk --json` (read) and `sgdisk` (create)

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;
use volume_contracts::{
    PartitionEntry, PartitionOps, PartitionRequest, PartitionTable, VolumeError,
};

use crate::command::run;
use crate::{Result, SysError};

const NO_TABLE: &str = "does not contain a recognized partition table";

#[derive(Debug, Deserialize)]
struct SfdiskOutput {
    partitiontable: SfdiskTable,
}

#[derive(Debug, Deserialize)]
struct SfdiskTable {
    #[serde(default)]
    sectorsize: Option<u64>,
    #[serde(default)]
    partitions: Vec<SfdiskPartition>,
}

#[derive(Debug, Deserialize)]
struct SfdiskPartition {
    node: String,
    start: u64,
    size: u64,
    #[serde(rename = "type", default)]
    type_uuid: String,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    name: String,
}

/// `/dev/nvme0n1p12` on `/dev/nvme0n1` → 12
fn index_from_node(disk: &str, node: &str) -> Option<u32> {
    node.strip_prefix(disk)?
        .trim_start_matches('p')
        .parse()
        .ok()
}

fn parse_sfdisk(
    disk: &str,
    disk_size: u64,
    default_sector: u64,
    json: &str,
) -> Result<PartitionTable> {
    let output: SfdiskOutput =
        serde_json::from_str(json).map_err(|e| SysError::parse("sfdisk", e.to_string()))?;
    let sector = output.partitiontable.sectorsize.unwrap_or(default_sector);

    let mut partitions = output
        .partitiontable
        .partitions
        .into_iter()
        .map(|p| {
            let index = index_from_node(disk, &p.node)
                .ok_or_else(|| SysError::parse("sfdisk", format!("unexpected node {}", p.node)))?;
            Ok(PartitionEntry {
                index,
                dev_path: p.node,
                label: p.name,
                type_uuid: p.type_uuid.to_uppercase(),
                uuid: p.uuid.to_lowercase(),
                start: p.start * sector,
                size: p.size * sector,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    partitions.sort_by_key(|p| p.index);

    Ok(PartitionTable {
        dev_path: disk.to_string(),
        disk_size,
        partitions,
    })
}

async fn read_u64(program: &str, args: &[&str]) -> Result<u64> {
    let out = run(program, args).await?;
    out.trim()
        .parse()
        .map_err(|_| SysError::parse(program, format!("not a number: {:?}", out.trim())))
}

/// Partitioning through the util-linux and gdisk tools.
#[derive(Debug, Default, Clone)]
pub struct SgdiskPartitions;

impl SgdiskPartitions {
    async fn table(&self, disk: &str) -> Result<PartitionTable> {
        let disk_size = read_u64("blockdev", &["--getsize64", disk]).await?;
        let sector = read_u64("blockdev", &["--getss", disk]).await?;

        match run("sfdisk", &["--json", disk]).await {
            Ok(json) => parse_sfdisk(disk, disk_size, sector, &json),
            Err(SysError::CommandFailed { stderr, .. }) if stderr.contains(NO_TABLE) => {
                Ok(PartitionTable {
                    dev_path: disk.to_string(),
                    disk_size,
                    partitions: Vec::new(),
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn create(&self, disk: &str, request: &PartitionRequest) -> Result<PartitionEntry> {
        let table = self.table(disk).await?;
        let sector = read_u64("blockdev", &["--getss", disk]).await?;
        let index = table.next_index();

        let first = request.start / sector;
        let last = (request.start + request.size) / sector - 1;

        let new = format!("--new={index}:{first}:{last}");
        let typecode = format!("--typecode={index}:{}", request.type_uuid);
        let name = format!("--change-name={index}:{}", request.label);
        run("sgdisk", &[&new, &typecode, &name, disk]).await?;
        run("partx", &["--update", "--nr", &index.to_string(), disk]).await.ok();

        info!(disk, label = %request.label, index, size = request.size, "created partition");

        self.table(disk)
            .await?
            .find_by_label(&request.label)
            .cloned()
            .ok_or_else(|| {
                SysError::OperationFailed(format!(
                    "partition {:?} not found on {disk} after creation",
                    request.label
                ))
            })
    }
}

#[async_trait]
impl PartitionOps for SgdiskPartitions {
    async fn read_table(&self, disk: &str) -> std::result::Result<PartitionTable, VolumeError> {
        Ok(self.table(disk).await?)
    }

    async fn create_partition(
        &self,
        disk: &str,
        request: &PartitionRequest,
    ) -> std::result::Result<PartitionEntry, VolumeError> {
        Ok(self.create(disk, request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SFDISK: &str = r#"{
   "partitiontable": {
      "label": "gpt",
      "id": "5F8AC3D0-2D5E-4D6B-9B0C-5B0C7A3E9A10",
      "device": "/dev/nvme0n1",
      "unit": "sectors",
      "firstlba": 2048,
      "lastlba": 209715166,
      "sectorsize": 512,
      "partitions": [
         {"node": "/dev/nvme0n1p2", "start": 4096, "size": 2048, "type": "0fc63daf-8483-4772-8e79-3d69d8477de4", "uuid": "A1B2", "name": "META"},
         {"node": "/dev/nvme0n1p1", "start": 2048, "size": 2048, "type": "C12A7328-F81F-11D2-BA4B-00A0C93EC93B", "uuid": "C3D4", "name": "EFI"}
      ]
   }
}"#;

    #[test]
    fn parses_sfdisk_json() {
        let table = parse_sfdisk("/dev/nvme0n1", 107374182400, 512, SFDISK).unwrap();
        assert_eq!(table.partitions.len(), 2);
        assert_eq!(table.partitions[0].label, "EFI");
        assert_eq!(table.partitions[1].index, 2);
        assert_eq!(table.partitions[1].start, 4096 * 512);
        assert_eq!(table.partitions[1].size, 1024 * 1024);
        assert_eq!(
            table.partitions[1].type_uuid,
            "0FC63DAF-8483-4772-8E79-3D69D8477DE4"
        );
        assert_eq!(table.next_index(), 3);
    }

    #[test]
    fn partition_node_names() {
        assert_eq!(index_from_node("/dev/nvme0n1", "/dev/nvme0n1p12"), Some(12));
        assert_eq!(index_from_node("/dev/vda", "/dev/vda4"), Some(4));
    }
}
