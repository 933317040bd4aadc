// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use volume_types::{ByteRange, GPT_ALIGNMENT_BYTES, align_down, align_up};

use crate::Result;

/// One GPT entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// 1-based partition number
    pub index: u32,
    pub dev_path: String,
    pub label: String,
    pub type_uuid: String,
    pub uuid: String,
    /// Offset of the first byte
    pub start: u64,
    pub size: u64,
}

impl PartitionEntry {
    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.start, self.start.saturating_add(self.size))
    }
}

/// Partition table of one disk. A blank disk reads as an empty table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTable {
    pub dev_path: String,
    pub disk_size: u64,
    pub partitions: Vec<PartitionEntry>,
}

impl PartitionTable {
    /// First byte usable for partitions.
    pub fn first_usable(&self) -> u64 {
        GPT_ALIGNMENT_BYTES
    }

    /// End of the usable area, leaving room for the backup GPT.
    pub fn last_usable(&self) -> u64 {
        align_down(self.disk_size.saturating_sub(GPT_ALIGNMENT_BYTES), GPT_ALIGNMENT_BYTES)
    }

    pub fn find_by_label(&self, label: &str) -> Option<&PartitionEntry> {
        self.partitions.iter().find(|p| p.label == label)
    }

    pub fn next_index(&self) -> u32 {
        self.partitions.iter().map(|p| p.index).max().unwrap_or(0) + 1
    }

    /// Gaps between partitions, aligned to 1 MiB, in disk order.
    pub fn free_regions(&self) -> Vec<ByteRange> {
        let mut used: Vec<ByteRange> = self.partitions.iter().map(PartitionEntry::range).collect();
        used.sort_by_key(|r| r.start);

        let end = self.last_usable();
        let mut cursor = self.first_usable();
        let mut free = Vec::new();

        for range in used {
            if range.start > cursor {
                free.push(ByteRange::new(cursor, range.start.min(end)));
            }
            cursor = cursor.max(align_up(range.end, GPT_ALIGNMENT_BYTES));
        }
        if cursor < end {
            free.push(ByteRange::new(cursor, end));
        }

        free.into_iter()
            .map(|r| {
                let aligned = r.aligned(GPT_ALIGNMENT_BYTES);
                ByteRange::new(aligned.start, align_down(aligned.end, GPT_ALIGNMENT_BYTES))
            })
            .filter(|r| r.end > r.start)
            .collect()
    }

    pub fn largest_free_region(&self) -> Option<ByteRange> {
        self.free_regions().into_iter().max_by_key(ByteRange::size)
    }

    pub fn free_space(&self) -> u64 {
        self.free_regions().iter().map(ByteRange::size).sum()
    }
}

/// A partition to create at a fixed offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRequest {
    pub label: String,
    pub type_uuid: String,
    pub start: u64,
    pub size: u64,
}

#[async_trait]
pub trait PartitionOps: Send + Sync {
    async fn read_table(&self, disk: &str) -> Result<PartitionTable>;

    /// Creates the partition, writing a fresh GPT first when the disk has none.
    async fn create_partition(&self, disk: &str, request: &PartitionRequest)
    -> Result<PartitionEntry>;
}
