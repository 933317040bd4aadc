// SPDX-License-Identifier: GPL-3.0-only

//! Partition allocation for one provisioning wave.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use volume_contracts::{
    ObservedWorld, PartitionEntry, PartitionOps, PartitionRequest, PartitionTable, VolumeError,
};
use volume_types::{
    ByteRange, GPT_ALIGNMENT_BYTES, PartitionSpec, VolumeConfig, VolumeErrorKind, align_down,
    align_up, bytes_to_pretty,
};

use crate::Result;
use crate::matcher::match_disks;

/// Result of one wave: partitions per volume and per-volume failures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionOutcome {
    pub partitions: BTreeMap<String, PartitionEntry>,
    /// `volume_id → disk` for every entry of `partitions`
    pub disks: BTreeMap<String, String>,
    pub errors: BTreeMap<String, VolumeError>,
}

impl ProvisionOutcome {
    /// `volume_id → partition device path`
    pub fn locations(&self) -> BTreeMap<String, String> {
        self.partitions
            .iter()
            .map(|(id, entry)| (id.clone(), entry.dev_path.clone()))
            .collect()
    }
}

fn out_of_space(message: String) -> VolumeError {
    VolumeError::new(VolumeErrorKind::OutOfSpace, message)
}

fn partition_label(volume: &VolumeConfig) -> &str {
    let label = &volume.spec.provisioning.partition_spec.label;
    if label.is_empty() { &volume.id } else { label }
}

/// Byte range to allocate for `spec` inside `region`.
fn allocation(spec: &PartitionSpec, table: &PartitionTable, region: ByteRange) -> Result<ByteRange> {
    let min = align_up(spec.min_size.max(1), GPT_ALIGNMENT_BYTES);

    let mut end = region.end;
    if spec.negative_max_size {
        let limit = align_down(
            table.last_usable().saturating_sub(spec.max_size),
            GPT_ALIGNMENT_BYTES,
        );
        end = end.min(limit);
    }
    let available = end.saturating_sub(region.start);

    let cap = if spec.max_size > 0 && !spec.negative_max_size {
        spec.max_size
    } else if spec.relative_max_size > 0 {
        table.disk_size / 100 * spec.relative_max_size
    } else if spec.grow || spec.negative_max_size {
        available
    } else {
        min
    };

    if available < min {
        return Err(out_of_space(format!(
            "{} needs {}, largest free region on {} holds {}",
            spec.label,
            bytes_to_pretty(min, false),
            table.dev_path,
            bytes_to_pretty(available, false)
        )));
    }

    let size = align_down(cap.min(available), GPT_ALIGNMENT_BYTES).max(min);
    Ok(ByteRange::new(region.start, region.start + size))
}

/// Allocates partitions and serializes work per disk.
///
/// Partition table reads are bounded by `read_timeout`; partition creation
/// always runs to completion.
pub struct Provisioner {
    partitions: Arc<dyn PartitionOps>,
    read_timeout: Duration,
    disk_locks: Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner").finish_non_exhaustive()
    }
}

impl Provisioner {
    pub fn new(partitions: Arc<dyn PartitionOps>, read_timeout: Duration) -> Self {
        Self {
            partitions,
            read_timeout,
            disk_locks: Mutex::new(BTreeMap::new()),
        }
    }

    async fn read_table(&self, disk: &str) -> Result<PartitionTable> {
        tokio::time::timeout(self.read_timeout, self.partitions.read_table(disk))
            .await
            .map_err(|_| VolumeError::timeout("partition table read"))?
    }

    async fn disk_lock(&self, disk: &str) -> Arc<Mutex<()>> {
        let mut locks = self.disk_locks.lock().await;
        locks.entry(disk.to_string()).or_default().clone()
    }

    /// Provisions every volume of one wave. Disks are handled concurrently.
    pub async fn provision(&self, volumes: &[&VolumeConfig], world: &ObservedWorld) -> ProvisionOutcome {
        let mut outcome = ProvisionOutcome::default();
        let mut by_disk: BTreeMap<String, Vec<&VolumeConfig>> = BTreeMap::new();

        for &volume in volumes {
            let selector = &volume.spec.provisioning.disk_selector.match_;
            match match_disks(selector, world, false) {
                Ok(disks) => {
                    for disk in disks {
                        by_disk.entry(disk.dev_path.clone()).or_default().push(volume);
                    }
                }
                Err(err) => {
                    debug!(volume = %volume.id, %err, "no disk for volume");
                    outcome.errors.insert(volume.id.clone(), err);
                }
            }
        }

        let results = join_all(by_disk.into_iter().map(|(disk, volumes)| async move {
            let results = self.provision_disk(&disk, volumes).await;
            (disk, results)
        }))
        .await;

        for (disk, results) in results {
            for (id, result) in results {
                match result {
                    Ok(entry) => {
                        outcome.disks.insert(id.clone(), disk.clone());
                        outcome.partitions.insert(id, entry);
                    }
                    Err(err) => {
                        outcome.errors.insert(id, err);
                    }
                }
            }
        }

        outcome
    }

    async fn provision_disk(
        &self,
        disk: &str,
        mut volumes: Vec<&VolumeConfig>,
    ) -> Vec<(String, Result<PartitionEntry>)> {
        let lock = self.disk_lock(disk).await;
        let _guard = lock.lock().await;

        // Fixed sizes first, growing partitions take what is left.
        volumes.sort_by(|a, b| {
            let a = (&a.spec.provisioning.partition_spec, &a.id);
            let b = (&b.spec.provisioning.partition_spec, &b.id);
            a.0.grow
                .cmp(&b.0.grow)
                .then_with(|| b.0.min_size.cmp(&a.0.min_size))
                .then_with(|| a.1.cmp(b.1))
        });

        let mut table = match self.read_table(disk).await {
            Ok(table) => table,
            Err(err) => {
                return volumes
                    .iter()
                    .map(|v| (v.id.clone(), Err(err.clone())))
                    .collect();
            }
        };

        let mut results = Vec::with_capacity(volumes.len());
        let mut pending = Vec::new();

        for volume in volumes {
            let label = partition_label(volume);
            match table.find_by_label(label) {
                Some(existing) => {
                    let spec = &volume.spec.provisioning.partition_spec;
                    let fits = existing.size >= spec.min_size
                        && (spec.max_size == 0
                            || spec.negative_max_size
                            || existing.size <= align_up(spec.max_size, GPT_ALIGNMENT_BYTES));
                    if !fits {
                        warn!(volume = %volume.id, size = existing.size, "keeping existing partition outside the requested size range");
                    }
                    results.push((volume.id.clone(), Ok(existing.clone())));
                }
                None => pending.push(volume),
            }
        }

        if pending.is_empty() {
            return results;
        }

        let needed: u64 = pending
            .iter()
            .map(|v| align_up(v.spec.provisioning.partition_spec.min_size, GPT_ALIGNMENT_BYTES))
            .sum();
        let free = table.free_space();
        if needed > free {
            let message = format!(
                "new partitions on {disk} need {}, {} free",
                bytes_to_pretty(needed, false),
                bytes_to_pretty(free, false)
            );
            warn!(%message);
            results.extend(
                pending
                    .iter()
                    .map(|v| (v.id.clone(), Err(out_of_space(message.clone())))),
            );
            return results;
        }

        let mut pending = pending.into_iter();
        while let Some(volume) = pending.next() {
            match self.create(&mut table, volume).await {
                Ok(entry) => results.push((volume.id.clone(), Ok(entry))),
                Err(err) => {
                    // Partitions created so far stay; the rest share the failure kind.
                    warn!(volume = %volume.id, %err, "partition creation failed");
                    let skipped = VolumeError::new(
                        err.kind,
                        format!("not attempted, {} failed first: {}", volume.id, err.message),
                    );
                    results.push((volume.id.clone(), Err(err)));
                    results.extend(pending.by_ref().map(|v| (v.id.clone(), Err(skipped.clone()))));
                    break;
                }
            }
        }

        results
    }

    async fn create(&self, table: &mut PartitionTable, volume: &VolumeConfig) -> Result<PartitionEntry> {
        let spec = &volume.spec.provisioning.partition_spec;
        let label = partition_label(volume).to_string();

        let region = table
            .largest_free_region()
            .ok_or_else(|| out_of_space(format!("no free space on {}", table.dev_path)))?;
        let range = allocation(spec, table, region)?;

        let request = PartitionRequest {
            label: label.clone(),
            type_uuid: spec.type_uuid.clone(),
            start: range.start,
            size: range.size(),
        };
        let disk = table.dev_path.clone();
        let entry = self.partitions.create_partition(&disk, &request).await?;
        info!(
            volume = %volume.id,
            disk = %disk,
            partition = %entry.dev_path,
            size = %bytes_to_pretty(entry.size, false),
            "created partition"
        );

        *table = self.read_table(&disk).await?;
        Ok(table.find_by_label(&label).cloned().unwrap_or(entry))
    }
}
