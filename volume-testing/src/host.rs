// SPDX-License-Identifier: GPL-3.0-only

//! Disks, partition tables, filesystem signatures and META.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;
use volume_contracts::{
    FilesystemOps, FormatRequest, MetaStore, MountedEntry, ObservedWorld, PartitionEntry,
    PartitionOps, PartitionRequest, PartitionTable, ProbeResult, Result, VolumeError, WorldSource,
};
use volume_types::constants::META_PARTITION_LABEL;
use volume_types::{DiscoveredVolumeSpec, DiskSpec, LINUX_FILESYSTEM_DATA, SystemDisk};

use crate::keys::KmsState;
use crate::luks::LuksHeader;
use crate::mounts::PathEntry;

/// Node UUID reported unless a test picks another one.
pub const NODE_UUID: &str = "4c4c4544-0051-3510-8051-c2c04f4e3232";

/// Host operations a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    Snapshot,
    ReadTable,
    CreatePartition,
    Probe,
    Format,
    LuksFormat,
    LuksOpen,
    LuksClose,
    AddKey,
    WriteToken,
    Mount,
    Unmount,
    KmsSeal,
    KmsUnseal,
    TpmUnseal,
    MetaRead,
    MetaWrite,
}

/// A side effect, in the order it hit the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PartitionCreated { disk: String, label: String },
    Formatted { device: String, filesystem: String },
    LuksFormatted { device: String },
    LuksOpened { device: String, mapper: String },
    LuksClosed { mapper: String },
    KeyAdded { device: String, slot: u32 },
    TokenWritten { device: String, slot: u32 },
    Mounted { source: String, target: String },
    Remounted { target: String, read_only: bool },
    Unmounted { target: String },
    SwapOn { device: String },
    SwapOff { device: String },
    MetaWritten,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDisk {
    pub spec: DiskSpec,
    pub partitions: Vec<PartitionEntry>,
}

impl FakeDisk {
    fn table(&self) -> PartitionTable {
        PartitionTable {
            dev_path: self.spec.dev_path.clone(),
            disk_size: self.spec.size,
            partitions: self.partitions.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct HostState {
    pub disks: BTreeMap<String, FakeDisk>,
    pub system_disk: Option<String>,
    pub signatures: BTreeMap<String, ProbeResult>,
    pub luks: BTreeMap<String, LuksHeader>,
    /// Mapper name to backing device
    pub mappers: BTreeMap<String, String>,
    pub mounts: BTreeMap<String, MountedEntry>,
    pub swaps: BTreeSet<String>,
    pub paths: BTreeMap<String, PathEntry>,
    pub meta: Option<Vec<u8>>,
    pub node_uuid: String,
    pub secure_boot: bool,
    pub pcr7: u32,
    pub kms: KmsState,
    pub failures: BTreeMap<Op, (VolumeError, usize)>,
    pub delays: BTreeMap<Op, Duration>,
    pub started: BTreeMap<Op, usize>,
    pub events: Vec<Event>,
}

impl HostState {
    pub fn record(&mut self, event: Event) {
        debug!(?event, "host event");
        self.events.push(event);
    }

    /// Consumes one injected failure for `op`.
    pub fn check(&mut self, op: Op) -> Result<()> {
        let Some((err, remaining)) = self.failures.get_mut(&op) else {
            return Ok(());
        };
        let err = err.clone();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.failures.remove(&op);
        }
        Err(err)
    }

    pub fn device_exists(&self, device: &str) -> bool {
        if let Some(mapper) = device.strip_prefix("/dev/mapper/") {
            return self.mappers.contains_key(mapper);
        }
        self.disks.values().any(|disk| {
            disk.spec.dev_path == device || disk.partitions.iter().any(|p| p.dev_path == device)
        })
    }

    pub fn require_device(&self, device: &str) -> Result<()> {
        if self.device_exists(device) {
            Ok(())
        } else {
            Err(VolumeError::io(format!("{device}: no such device")))
        }
    }

    fn meta_disk(&self) -> Option<String> {
        self.disks
            .values()
            .find(|disk| disk.partitions.iter().any(|p| p.label == META_PARTITION_LABEL))
            .map(|disk| disk.spec.dev_path.clone())
    }
}

/// `/dev/sda` + 2 → `/dev/sda2`, `/dev/nvme0n1` + 2 → `/dev/nvme0n1p2`
pub fn partition_path(disk: &str, index: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p{index}")
    } else {
        format!("{disk}{index}")
    }
}

/// In-memory host. Clones share state.
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl std::fmt::Debug for FakeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeHost")
            .field("disks", &state.disks.keys().collect::<Vec<_>>())
            .field("mounts", &state.mounts.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FakeHost {
    pub fn new() -> Self {
        let state = HostState {
            node_uuid: NODE_UUID.to_string(),
            secure_boot: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_disk(self, dev_path: &str, size: u64, transport: &str) -> Self {
        self.plug_disk(dev_path, size, transport);
        self
    }

    /// Appends a partition at the start of the first free region.
    pub fn with_partition(self, disk: &str, label: &str, size: u64) -> Self {
        self.add_partition(disk, label, size);
        self
    }

    pub fn with_signature(self, device: &str, name: &str, label: &str) -> Self {
        self.lock().signatures.insert(
            device.to_string(),
            ProbeResult {
                name: name.to_string(),
                label: label.to_string(),
                uuid: Uuid::new_v4().to_string(),
            },
        );
        self
    }

    /// Overrides the disk-holding-META rule.
    pub fn with_system_disk(self, disk: &str) -> Self {
        self.lock().system_disk = Some(disk.to_string());
        self
    }

    pub fn with_secure_boot(self, enabled: bool) -> Self {
        self.lock().secure_boot = enabled;
        self
    }

    pub fn with_node_uuid(self, uuid: &str) -> Self {
        self.lock().node_uuid = uuid.to_string();
        self
    }

    pub fn plug_disk(&self, dev_path: &str, size: u64, transport: &str) {
        let name = dev_path.rsplit('/').next().unwrap_or(dev_path);
        let spec = DiskSpec {
            dev_path: dev_path.to_string(),
            size,
            io_size: 512,
            sector_size: 512,
            transport: transport.to_string(),
            serial: format!("FAKE-{name}"),
            model: "Fake Disk".to_string(),
            sub_system: "/sys/class/block".to_string(),
            ..Default::default()
        };
        self.lock().disks.insert(
            dev_path.to_string(),
            FakeDisk {
                spec,
                partitions: Vec::new(),
            },
        );
    }

    /// Removes the disk and whatever was on it.
    pub fn unplug_disk(&self, dev_path: &str) {
        let mut state = self.lock();
        if let Some(disk) = state.disks.remove(dev_path) {
            state.signatures.remove(dev_path);
            for partition in disk.partitions {
                state.signatures.remove(&partition.dev_path);
                state.luks.remove(&partition.dev_path);
            }
        }
    }

    pub fn add_partition(&self, disk: &str, label: &str, size: u64) -> Option<PartitionEntry> {
        let mut state = self.lock();
        let Some(fake) = state.disks.get_mut(disk) else {
            warn!(disk, "cannot add a partition to an unknown disk");
            return None;
        };
        let table = fake.table();
        let region = table.free_regions().into_iter().find(|r| r.size() >= size)?;
        let index = table.next_index();
        let entry = PartitionEntry {
            index,
            dev_path: partition_path(disk, index),
            label: label.to_string(),
            type_uuid: LINUX_FILESYSTEM_DATA.to_string(),
            uuid: Uuid::new_v4().to_string(),
            start: region.start,
            size,
        };
        fake.partitions.push(entry.clone());
        Some(entry)
    }

    pub fn fail_next(&self, op: Op, err: VolumeError) {
        self.fail_times(op, err, 1);
    }

    pub fn fail_times(&self, op: Op, err: VolumeError, times: usize) {
        if times > 0 {
            self.lock().failures.insert(op, (err, times));
        }
    }

    /// Makes every later `op` take `delay` before it touches the host.
    pub fn slow_down(&self, op: Op, delay: Duration) {
        self.lock().delays.insert(op, delay);
    }

    /// How often a slowed-down `op` was entered.
    pub fn started(&self, op: Op) -> usize {
        self.lock().started.get(&op).copied().unwrap_or_default()
    }

    pub(crate) async fn pause(&self, op: Op) {
        let delay = {
            let mut state = self.lock();
            let delay = state.delays.get(&op).copied();
            if delay.is_some() {
                *state.started.entry(op).or_default() += 1;
            }
            delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut self.lock().events)
    }

    pub fn partitions(&self, disk: &str) -> Vec<PartitionEntry> {
        self.lock()
            .disks
            .get(disk)
            .map(|d| d.partitions.clone())
            .unwrap_or_default()
    }

    pub fn partition(&self, label: &str) -> Option<PartitionEntry> {
        self.lock()
            .disks
            .values()
            .flat_map(|d| d.partitions.iter())
            .find(|p| p.label == label)
            .cloned()
    }

    pub fn signature(&self, device: &str) -> Option<ProbeResult> {
        self.lock().signatures.get(device).cloned()
    }

    pub fn meta_record(&self) -> Option<Vec<u8>> {
        self.lock().meta.clone()
    }

    pub fn set_meta_record(&self, record: &[u8]) {
        self.lock().meta = Some(record.to_vec());
    }
}

#[async_trait]
impl WorldSource for FakeHost {
    async fn snapshot(&self) -> Result<ObservedWorld> {
        let mut state = self.lock();
        state.check(Op::Snapshot)?;

        let signature = |device: &str| state.signatures.get(device).cloned().unwrap_or_default();
        let mut world = ObservedWorld::default();

        for disk in state.disks.values() {
            let dev_path = &disk.spec.dev_path;
            let probed = signature(dev_path);
            world.disks.push(disk.spec.clone());
            world.volumes.push(DiscoveredVolumeSpec {
                dev_path: dev_path.clone(),
                parent_dev_path: dev_path.clone(),
                size: disk.spec.size,
                ty: "disk".to_string(),
                name: probed.name,
                label: probed.label,
                uuid: probed.uuid,
                ..Default::default()
            });

            for partition in &disk.partitions {
                let probed = signature(&partition.dev_path);
                world.volumes.push(DiscoveredVolumeSpec {
                    dev_path: partition.dev_path.clone(),
                    parent_dev_path: dev_path.clone(),
                    size: partition.size,
                    ty: "partition".to_string(),
                    name: probed.name,
                    label: probed.label,
                    uuid: probed.uuid,
                    partition_label: partition.label.clone(),
                    partition_type: partition.type_uuid.clone(),
                    partition_uuid: partition.uuid.clone(),
                    partition_index: partition.index,
                    offset: partition.start,
                });
            }
        }

        world.system_disk = state
            .system_disk
            .clone()
            .or_else(|| state.meta_disk())
            .map(|dev_path| SystemDisk { dev_path });
        Ok(world)
    }
}

#[async_trait]
impl PartitionOps for FakeHost {
    async fn read_table(&self, disk: &str) -> Result<PartitionTable> {
        let mut state = self.lock();
        state.check(Op::ReadTable)?;
        state
            .disks
            .get(disk)
            .map(FakeDisk::table)
            .ok_or_else(|| VolumeError::io(format!("{disk}: no such disk")))
    }

    async fn create_partition(
        &self,
        disk: &str,
        request: &PartitionRequest,
    ) -> Result<PartitionEntry> {
        self.pause(Op::CreatePartition).await;
        let mut state = self.lock();
        state.check(Op::CreatePartition)?;

        let fake = state
            .disks
            .get_mut(disk)
            .ok_or_else(|| VolumeError::io(format!("{disk}: no such disk")))?;
        let table = fake.table();
        let end = request.start.saturating_add(request.size);

        if request.size == 0 || request.start < table.first_usable() || end > table.last_usable() {
            return Err(VolumeError::io(format!(
                "{disk}: {}..{end} is outside the usable area",
                request.start
            )));
        }
        if let Some(other) = fake
            .partitions
            .iter()
            .find(|p| p.start < end && request.start < p.start.saturating_add(p.size))
        {
            return Err(VolumeError::io(format!(
                "{disk}: new partition overlaps {}",
                other.dev_path
            )));
        }
        if table.find_by_label(&request.label).is_some() {
            return Err(VolumeError::io(format!(
                "{disk}: partition label {} is taken",
                request.label
            )));
        }

        let index = table.next_index();
        let entry = PartitionEntry {
            index,
            dev_path: partition_path(disk, index),
            label: request.label.clone(),
            type_uuid: request.type_uuid.clone(),
            uuid: Uuid::new_v4().to_string(),
            start: request.start,
            size: request.size,
        };
        fake.partitions.push(entry.clone());
        state.record(Event::PartitionCreated {
            disk: disk.to_string(),
            label: request.label.clone(),
        });
        Ok(entry)
    }
}

#[async_trait]
impl FilesystemOps for FakeHost {
    async fn probe(&self, device: &str) -> Result<Option<ProbeResult>> {
        let mut state = self.lock();
        state.check(Op::Probe)?;
        state.require_device(device)?;
        Ok(state.signatures.get(device).cloned())
    }

    async fn format(&self, device: &str, request: &FormatRequest) -> Result<()> {
        self.pause(Op::Format).await;
        let mut state = self.lock();
        state.check(Op::Format)?;
        state.require_device(device)?;

        let filesystem = request.kind.as_str().to_string();
        state.signatures.insert(
            device.to_string(),
            ProbeResult {
                name: filesystem.clone(),
                label: request.label.clone(),
                uuid: Uuid::new_v4().to_string(),
            },
        );
        state.record(Event::Formatted {
            device: device.to_string(),
            filesystem,
        });
        Ok(())
    }
}

#[async_trait]
impl MetaStore for FakeHost {
    async fn read_state_encryption(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.lock();
        state.check(Op::MetaRead)?;
        if state.meta_disk().is_none() {
            return Err(VolumeError::io("META partition not found"));
        }
        Ok(state.meta.clone())
    }

    async fn write_state_encryption(&self, record: &[u8]) -> Result<()> {
        let mut state = self.lock();
        state.check(Op::MetaWrite)?;
        if state.meta_disk().is_none() {
            return Err(VolumeError::io("META partition not found"));
        }
        state.meta = Some(record.to_vec());
        state.record(Event::MetaWritten);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volume_types::constants::META_SIZE;

    const GIB: u64 = 1 << 30;

    #[test]
    fn partition_paths() {
        assert_eq!(partition_path("/dev/sda", 2), "/dev/sda2");
        assert_eq!(partition_path("/dev/nvme0n1", 1), "/dev/nvme0n1p1");
    }

    #[tokio::test]
    async fn meta_disk_is_the_system_disk() {
        let host = FakeHost::new()
            .with_disk("/dev/vda", 10 * GIB, "virtio")
            .with_disk("/dev/vdb", 10 * GIB, "virtio")
            .with_partition("/dev/vdb", META_PARTITION_LABEL, META_SIZE);

        let world = host.snapshot().await.unwrap();
        assert!(world.is_system_disk("/dev/vdb"));

        let meta = world.volume("/dev/vdb1").unwrap();
        assert_eq!(meta.partition_label, META_PARTITION_LABEL);
        assert_eq!(meta.size, META_SIZE);
        assert!(meta.name.is_empty());
    }

    #[tokio::test]
    async fn overlapping_partitions_are_refused() {
        let host = FakeHost::new().with_disk("/dev/sda", 10 * GIB, "sata");
        let table = host.read_table("/dev/sda").await.unwrap();
        let request = PartitionRequest {
            label: "A".into(),
            type_uuid: LINUX_FILESYSTEM_DATA.into(),
            start: table.first_usable(),
            size: GIB,
        };
        host.create_partition("/dev/sda", &request).await.unwrap();

        let overlapping = PartitionRequest {
            label: "B".into(),
            ..request
        };
        assert!(host.create_partition("/dev/sda", &overlapping).await.is_err());
        assert_eq!(host.partitions("/dev/sda").len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let host = FakeHost::new().with_disk("/dev/sda", GIB, "sata");
        host.fail_next(Op::Snapshot, VolumeError::io("EIO"));
        assert!(host.snapshot().await.is_err());
        assert!(host.snapshot().await.is_ok());
    }
}
