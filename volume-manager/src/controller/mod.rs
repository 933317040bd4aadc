// SPDX-License-Identifier: GPL-3.0-only

//! The reconcile loop.
//!
//! Every tick loads the configuration, renders the desired volumes, merges
//! them into the tracked set and moves each volume at most one phase forward:
//!
//! ```text
//! Waiting ─┬─ locate ──────► Located ─► Provisioned ─► EncryptionOpened ─► Formatted ─► Mounted ─► Ready
//!          └─ provision ───────────────► Provisioned
//! ```
//!
//! Failures park a volume in `Failed` until its backoff expires. Volumes that
//! are no longer desired are unmounted and closed, children first.

pub mod state;
pub mod store;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use volume_config::Config;
use volume_contracts::{
    ConfigSource, FilesystemOps, FormatRequest, MetaStore, ObservedWorld, VolumeError, WorldSource,
};
use volume_types::constants::META_PARTITION_LABEL;
use volume_types::{
    EncryptionProvider, FilesystemType, VolumeErrorKind, VolumeMountRequest, VolumePhase,
    VolumeType, bytes_to_pretty,
};

pub use state::{Snapshot, VolumeEntry};
pub use store::{StoredState, StoredVolume};

use crate::Result;
use crate::adapters::Adapters;
use crate::encryption::{EncryptionManager, check_provider};
use crate::matcher::{locate_disk, locate_volume};
use crate::mount::{MountManager, MountSource};
use crate::provision::Provisioner;
use crate::settings::Settings;
use crate::transform::system::state_encryption_record;
use crate::transform::{Desired, TransformContext, parents, render};

async fn bounded<T>(
    limit: Duration,
    operation: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| VolumeError::timeout(operation))?
}

/// Phases in which a volume is bound to a device and usable.
fn is_bound(phase: VolumePhase) -> bool {
    (VolumePhase::Located..=VolumePhase::Ready).contains(&phase)
}

/// Block device a volume was found on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Location {
    device: String,
    parent: String,
    partition_index: u32,
    partition_uuid: String,
    size: u64,
}

impl Location {
    fn apply(self, entry: &mut VolumeEntry) {
        let status = &mut entry.status;
        status.location = self.device;
        status.parent_location = self.parent;
        status.partition_index = self.partition_index;
        status.partition_uuid = self.partition_uuid;
        status.size = self.size;
        status.pretty_size = bytes_to_pretty(self.size, false);
    }
}

fn locate(entry: &VolumeEntry, world: &ObservedWorld) -> Result<Option<Location>> {
    let locator = &entry.config.spec.locator;
    match entry.ty() {
        VolumeType::Partition if !locator.match_.is_zero() => {
            Ok(locate_volume(&locator.match_, world)?.map(|volume| Location {
                device: volume.dev_path.clone(),
                parent: volume.parent_dev_path.clone(),
                partition_index: volume.partition_index,
                partition_uuid: volume.partition_uuid.clone(),
                size: volume.size,
            }))
        }
        VolumeType::Disk if !locator.disk_match.is_zero() => {
            Ok(locate_disk(&locator.disk_match, world)?.map(|disk| Location {
                device: disk.dev_path.clone(),
                parent: disk.dev_path.clone(),
                size: disk.size,
                ..Default::default()
            }))
        }
        _ => Ok(None),
    }
}

/// Logs a phase change; block volumes at info, the rest at debug.
fn log_phase(entry: &VolumeEntry) {
    let volume = entry.id();
    let phase = entry.phase();
    if entry.ty().is_block() || entry.ty() == VolumeType::External {
        info!(volume, %phase, "volume phase changed");
    } else {
        debug!(volume, %phase, "volume phase changed");
    }
}

pub struct Controller {
    world: Arc<dyn WorldSource>,
    config: Arc<dyn ConfigSource>,
    meta: Arc<dyn MetaStore>,
    filesystems: Arc<dyn FilesystemOps>,
    provisioner: Provisioner,
    encryption: EncryptionManager,
    mounts: MountManager,
    settings: Settings,
    strict: bool,
    entries: BTreeMap<String, VolumeEntry>,
    saved: Option<StoredState>,
    config_error: Option<String>,
    generation: u64,
    snapshot: watch::Sender<Arc<Snapshot>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("volumes", &self.entries.len())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Controller {
    pub fn new(adapters: &Adapters, settings: Settings) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Snapshot::default()));
        Self {
            world: adapters.world(),
            config: adapters.config(),
            meta: adapters.meta(),
            filesystems: adapters.filesystems(),
            provisioner: Provisioner::new(adapters.partitions(), settings.timeouts.partition),
            encryption: EncryptionManager::new(
                adapters.luks(),
                adapters.filesystems(),
                adapters.keys(),
            ),
            mounts: MountManager::new(adapters.mounts(), adapters.paths()),
            settings,
            strict: false,
            entries: BTreeMap::new(),
            saved: None,
            config_error: None,
            generation: 0,
            snapshot,
        }
    }

    /// Rejects configurations with validation warnings.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }

    /// Resumes from the persisted store.
    pub async fn restore(&mut self) -> Result<()> {
        let state = store::load(&self.settings.controller.state_file).await?;
        info!(volumes = state.volumes.len(), "restored volume state");
        self.entries = state.clone().into_entries();
        self.saved = Some(state);
        Ok(())
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        if let Err(err) = self.restore().await {
            warn!(%err, "starting without stored volume state");
        }

        let mut interval = tokio::time::interval(self.settings.controller.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick = ?interval.period(), "volume controller started");

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(&cancel).await,
                _ = cancel.cancelled() => {
                    info!("shutdown requested, stopping volume controller");
                    break;
                }
            }
        }
    }

    /// One reconcile pass.
    pub async fn tick(&mut self, cancel: &CancellationToken) {
        match self.desired().await {
            Ok(desired) => {
                self.config_error = None;
                let removed = self.merge(desired);
                self.teardown(removed, cancel).await;

                let discovery = self.settings.timeouts.discovery;
                match bounded(discovery, "block device discovery", self.world.snapshot()).await {
                    Ok(world) => self.advance(&world, cancel).await,
                    Err(err) => warn!(%err, "block device discovery failed"),
                }
            }
            Err(err) => {
                warn!(%err, "configuration rejected, volumes left as they are");
                self.config_error = Some(err.to_string());
            }
        }

        self.publish();
        self.persist().await;
    }

    async fn desired(&self) -> Result<Desired> {
        let discovery = self.settings.timeouts.discovery;
        let config = bounded(discovery, "configuration load", self.config.load()).await?;
        for warning in config.validate_strict(self.strict)? {
            warn!(%warning, "configuration warning");
        }

        let stored = self.read_meta().await;
        let ctx = TransformContext {
            in_container: self.settings.controller.in_container,
            agent_mode: self.settings.controller.agent_mode,
            state_encryption_meta: stored.clone().flatten(),
        };
        let desired = render(&config, &ctx)?;

        if let Some(stored) = stored {
            self.write_meta(&config, stored.as_deref()).await;
        }
        Ok(desired)
    }

    fn meta_available(&self) -> bool {
        !self.settings.controller.in_container
            && self
                .entries
                .get(META_PARTITION_LABEL)
                .is_some_and(|meta| is_bound(meta.phase()))
    }

    /// `None` while META cannot be read.
    async fn read_meta(&self) -> Option<Option<Vec<u8>>> {
        if !self.meta_available() {
            return None;
        }
        let discovery = self.settings.timeouts.discovery;
        match bounded(discovery, "META read", self.meta.read_state_encryption()).await {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(%err, "failed to read META");
                None
            }
        }
    }

    async fn write_meta(&self, config: &Config, stored: Option<&[u8]>) {
        let record = match state_encryption_record(config) {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                warn!(%err, "cannot encode STATE encryption record");
                return;
            }
        };
        if stored == Some(record.as_slice()) {
            return;
        }

        let discovery = self.settings.timeouts.discovery;
        match bounded(discovery, "META write", self.meta.write_state_encryption(&record)).await {
            Ok(()) => info!("recorded STATE encryption in META"),
            Err(err) => warn!(%err, "failed to write META"),
        }
    }

    /// Applies the desired set; returns the IDs that are no longer desired.
    fn merge(&mut self, desired: Desired) -> Vec<String> {
        let mut requests: BTreeMap<String, VolumeMountRequest> = desired
            .mount_requests
            .into_iter()
            .map(|request| (request.volume_id.clone(), request))
            .collect();
        let mut wanted = BTreeSet::new();

        for config in desired.configs {
            let id = config.id.clone();
            let request = requests.remove(&id);
            wanted.insert(id.clone());

            let Some(entry) = self.entries.get_mut(&id) else {
                debug!(volume = %id, "tracking new volume");
                self.entries.insert(id, VolumeEntry::new(config, request));
                continue;
            };

            if entry.config != config {
                debug!(volume = %id, "volume spec changed");
                entry.config = config;
                let permanent = entry
                    .status
                    .error_kind
                    .is_some_and(|kind| !kind.is_retryable());
                if entry.phase() == VolumePhase::Failed && permanent {
                    let resume = entry.status.pre_fail_phase.unwrap_or_default();
                    entry.status.clear_error();
                    entry.status.phase = resume;
                    entry.attempts = 0;
                }
            }
            entry.mount_request = request;
        }

        self.entries
            .keys()
            .filter(|id| !wanted.contains(*id))
            .cloned()
            .collect()
    }

    /// Unmounts and closes removed volumes, deepest first.
    async fn teardown(&mut self, removed: Vec<String>, cancel: &CancellationToken) {
        let mut removed: Vec<(usize, String)> = removed
            .into_iter()
            .map(|id| (state::depth(&self.entries, &id), id))
            .collect();
        removed.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        for (_, id) in removed {
            if cancel.is_cancelled() {
                return;
            }
            let has_children = self
                .entries
                .values()
                .any(|e| e.id() != id && parents(&e.config).any(|p| p == id));
            if has_children {
                debug!(volume = %id, "children still present, teardown postponed");
                continue;
            }

            let Some(mut entry) = self.entries.remove(&id) else {
                continue;
            };
            match self.release(&entry).await {
                Ok(()) => info!(volume = %id, "volume removed"),
                Err(err) => {
                    self.fail(&mut entry, err);
                    self.entries.insert(id, entry);
                }
            }
        }
    }

    async fn release(&self, entry: &VolumeEntry) -> Result<()> {
        let timeouts = &self.settings.timeouts;
        if let Some(mount) = entry.mount.as_ref().or(entry.previous_mount.as_ref()) {
            bounded(timeouts.mount, "unmount", self.mounts.unmount(mount, entry.ty())).await?;
        }
        if entry.status.encryption_provider != EncryptionProvider::None
            || entry.config.spec.encryption.is_enabled()
        {
            bounded(
                timeouts.encryption,
                "encryption close",
                self.encryption.close(entry.id()),
            )
            .await?;
        }
        Ok(())
    }

    async fn advance(&mut self, world: &ObservedWorld, cancel: &CancellationToken) {
        let mut order: Vec<(i32, String)> = self
            .entries
            .values()
            .map(|e| (e.wave(), e.id().to_string()))
            .collect();
        order.sort();

        let mut stepped = BTreeSet::new();
        let candidates = self.locate_all(&order, world, &mut stepped);

        if cancel.is_cancelled() {
            return;
        }
        self.provision_wave(candidates, world, &mut stepped).await;

        let mut mounted: BTreeMap<String, String> = self
            .entries
            .iter()
            .filter_map(|(id, e)| e.mount_target().map(|t| (id.clone(), t.to_string())))
            .collect();

        for (_, id) in order {
            if cancel.is_cancelled() {
                return;
            }
            if stepped.contains(&id) {
                continue;
            }
            let Some(mut entry) = self.entries.remove(&id) else {
                continue;
            };

            let before = entry.phase();
            if let Err(err) = self.step(&mut entry, &mounted).await {
                self.fail(&mut entry, err);
            } else if entry.phase() != before {
                log_phase(&entry);
            }

            match entry.mount_target() {
                Some(target) => mounted.insert(id.clone(), target.to_string()),
                None => mounted.remove(&id),
            };
            self.entries.insert(id, entry);
        }
    }

    /// Binds waiting block volumes to what the locators find. Returns the
    /// volumes that have to be provisioned instead.
    fn locate_all(
        &mut self,
        order: &[(i32, String)],
        world: &ObservedWorld,
        stepped: &mut BTreeSet<String>,
    ) -> Vec<String> {
        let mut candidates = Vec::new();

        for (_, id) in order {
            let Some(entry) = self.entries.get(id) else {
                continue;
            };
            if !entry.ty().is_block()
                || !matches!(entry.phase(), VolumePhase::Waiting | VolumePhase::Missing)
            {
                continue;
            }

            let found = locate(entry, world);
            let provisionable = entry.is_provisionable();
            let Some(entry) = self.entries.get_mut(id) else {
                continue;
            };
            match found {
                Ok(Some(location)) => {
                    location.apply(entry);
                    entry.status.phase = VolumePhase::Located;
                    stepped.insert(id.clone());
                    log_phase(entry);
                }
                Ok(None) if provisionable => candidates.push(id.clone()),
                Ok(None) => {
                    if entry.phase() != VolumePhase::Missing {
                        entry.status.phase = VolumePhase::Missing;
                        log_phase(entry);
                    }
                    stepped.insert(id.clone());
                }
                Err(err) => {
                    let mut failed = entry.clone();
                    self.fail(&mut failed, err);
                    self.entries.insert(id.clone(), failed);
                    stepped.insert(id.clone());
                }
            }
        }

        candidates
    }

    /// Creates partitions for the lowest wave that still has volumes without
    /// one. Later waves wait.
    async fn provision_wave(
        &mut self,
        candidates: Vec<String>,
        world: &ObservedWorld,
        stepped: &mut BTreeSet<String>,
    ) {
        let Some(wave) = self
            .entries
            .values()
            .filter(|e| e.blocks_later_waves())
            .map(|e| e.wave())
            .min()
        else {
            return;
        };

        let batch: Vec<_> = candidates
            .iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|e| e.wave() == wave)
            .map(|e| e.config.clone())
            .collect();
        if batch.is_empty() {
            return;
        }

        let ids: Vec<String> = batch.iter().map(|c| c.id.clone()).collect();
        debug!(wave, volumes = ?ids, "provisioning wave");
        let volumes: Vec<_> = batch.iter().collect();
        let outcome = self.provisioner.provision(&volumes, world).await;

        for id in ids {
            let Some(mut entry) = self.entries.remove(&id) else {
                continue;
            };
            stepped.insert(id.clone());

            let result = match outcome.partitions.get(&id) {
                Some(partition) => Ok(Location {
                    device: partition.dev_path.clone(),
                    parent: outcome.disks.get(&id).cloned().unwrap_or_default(),
                    partition_index: partition.index,
                    partition_uuid: partition.uuid.clone(),
                    size: partition.size,
                }),
                None => Err(outcome.errors.get(&id).cloned().unwrap_or_else(|| {
                    VolumeError::new(
                        VolumeErrorKind::OutOfSpace,
                        "partition was not created, an earlier one on the disk failed",
                    )
                })),
            };

            match result {
                Ok(location) => {
                    location.apply(&mut entry);
                    entry.status.phase = VolumePhase::Provisioned;
                    log_phase(&entry);
                }
                Err(err) => self.fail(&mut entry, err),
            }
            self.entries.insert(id, entry);
        }
    }

    async fn step(&self, entry: &mut VolumeEntry, mounted: &BTreeMap<String, String>) -> Result<()> {
        match entry.phase() {
            VolumePhase::Waiting | VolumePhase::Missing => {
                if !entry.ty().is_block() {
                    self.bind_virtual(entry);
                }
            }
            VolumePhase::Located => entry.status.phase = VolumePhase::Provisioned,
            VolumePhase::Provisioned => self.open(entry).await?,
            VolumePhase::EncryptionOpened => self.format(entry).await?,
            VolumePhase::Formatted => self.mount(entry, mounted).await?,
            VolumePhase::Mounted => {
                entry.status.phase = VolumePhase::Ready;
                entry.attempts = 0;
            }
            VolumePhase::Ready => self.keep_ready(entry).await?,
            VolumePhase::Failed => self.resume(entry),
            VolumePhase::Closed => {}
        }
        Ok(())
    }

    /// Volumes that need no block device go straight to `Formatted`.
    fn bind_virtual(&self, entry: &mut VolumeEntry) {
        let spec = &entry.config.spec.provisioning;
        if entry.ty() == VolumeType::External {
            entry.status.location = spec.disk_selector.external.clone();
            entry.status.mount_location = spec.disk_selector.external.clone();
        }
        entry.status.filesystem = spec.filesystem_spec.kind;
        entry.status.phase = VolumePhase::Formatted;
    }

    async fn open(&self, entry: &mut VolumeEntry) -> Result<()> {
        let spec = &entry.config.spec.encryption;
        check_provider(entry.status.encryption_provider, spec)?;

        let device = entry.status.location.clone();
        if spec.is_enabled() {
            // May run luksFormat; KMS and TPM calls carry their own limits.
            let opened = self.encryption.open(&entry.config, &device).await?;
            if !opened.failed_syncs.is_empty() {
                warn!(volume = %entry.id(), failed = ?opened.failed_syncs, "key slots out of sync");
            }
            entry.status.mount_location = opened.mapper_path;
            entry.status.encryption_provider = EncryptionProvider::Luks2;
            entry.status.encryption_failed_syncs = opened.failed_syncs;
        } else {
            bounded(
                self.settings.timeouts.encryption,
                "LUKS header check",
                self.encryption.check_unencrypted(&device),
            )
            .await?;
            entry.status.mount_location = device;
        }

        entry.status.phase = VolumePhase::EncryptionOpened;
        Ok(())
    }

    /// Creates the filesystem on a blank device. Existing data is never
    /// overwritten.
    async fn format(&self, entry: &mut VolumeEntry) -> Result<()> {
        let limit = self.settings.timeouts.format;
        let device = entry.status.mount_location.clone();
        let wanted = entry.config.spec.provisioning.filesystem_spec.clone();

        let probed = bounded(limit, "filesystem probe", self.filesystems.probe(&device)).await?;
        let filesystem = match probed {
            Some(found) => match found.filesystem() {
                Some(existing) if existing == wanted.kind || wanted.kind == FilesystemType::None => {
                    existing
                }
                Some(existing) => {
                    warn!(
                        volume = %entry.id(),
                        device = %device,
                        found = existing.as_str(),
                        wanted = wanted.kind.as_str(),
                        "keeping existing filesystem"
                    );
                    existing
                }
                None if wanted.kind == FilesystemType::None => FilesystemType::None,
                None => {
                    return Err(VolumeError::invalid_config(format!(
                        "{device} carries a {} signature, refusing to format it as {}",
                        found.name,
                        wanted.kind.as_str()
                    )));
                }
            },
            None if wanted.kind.is_formattable() => {
                let request = FormatRequest {
                    kind: wanted.kind,
                    label: wanted.label.clone(),
                };
                self.filesystems.format(&device, &request).await?;
                info!(volume = %entry.id(), device = %device, filesystem = wanted.kind.as_str(), "created filesystem");
                wanted.kind
            }
            None => wanted.kind,
        };

        entry.status.filesystem = filesystem;
        entry.status.phase = VolumePhase::Formatted;
        Ok(())
    }

    async fn mount(&self, entry: &mut VolumeEntry, mounted: &BTreeMap<String, String>) -> Result<()> {
        let Some(request) = entry.mount_request.clone() else {
            entry.status.phase = VolumePhase::Ready;
            entry.attempts = 0;
            return Ok(());
        };

        let waiting: Vec<&str> = parents(&entry.config)
            .filter(|parent| !mounted.contains_key(*parent))
            .collect();
        if !waiting.is_empty() {
            debug!(volume = %entry.id(), parents = ?waiting, "waiting for parent mounts");
            return Ok(());
        }

        let source = MountSource {
            volume: &entry.config,
            request_id: &request.id,
            device: &entry.status.mount_location,
            filesystem: entry.status.filesystem,
            encrypted: entry.status.encryption_provider != EncryptionProvider::None,
            read_only: request.read_only,
        };
        let status = bounded(
            self.settings.timeouts.mount,
            "mount",
            self.mounts.mount(source, mounted),
        )
        .await?;

        entry.status.mount_target = status.target.clone();
        entry.mount = Some(status);
        entry.previous_mount = None;
        entry.status.phase = VolumePhase::Mounted;
        Ok(())
    }

    fn has_mounted_children(&self, id: &str) -> bool {
        self.entries
            .values()
            .any(|e| e.mount.is_some() && parents(&e.config).any(|p| p == id))
    }

    /// Follows mount request changes of a ready volume.
    async fn keep_ready(&self, entry: &mut VolumeEntry) -> Result<()> {
        let read_only = entry.config.spec.mount.read_only;
        match (&entry.mount_request, &entry.mount) {
            (Some(request), Some(mount)) if mount.read_only != (request.read_only || read_only) => {
                debug!(volume = %entry.id(), read_only = request.read_only, "read-only flag changed");
                entry.status.phase = VolumePhase::Formatted;
            }
            (Some(_), None) => entry.status.phase = VolumePhase::Formatted,
            (None, Some(mount)) => {
                if self.has_mounted_children(entry.id()) {
                    debug!(volume = %entry.id(), "mount request gone, children still mounted");
                    return Ok(());
                }
                bounded(
                    self.settings.timeouts.mount,
                    "unmount",
                    self.mounts.unmount(mount, entry.ty()),
                )
                .await?;
                entry.mount = None;
                entry.status.mount_target.clear();
                entry.status.phase = VolumePhase::Formatted;
            }
            _ => {}
        }
        Ok(())
    }

    fn resume(&self, entry: &mut VolumeEntry) {
        let retryable = entry.status.error_kind.is_some_and(|kind| kind.is_retryable());
        let due = entry.status.retry_after.is_none_or(|at| Utc::now() >= at);
        if retryable && due {
            let resume = entry.status.pre_fail_phase.unwrap_or_default();
            debug!(volume = %entry.id(), phase = %resume, attempts = entry.attempts, "retrying");
            entry.status.clear_error();
            entry.status.phase = resume;
        }
    }

    fn fail(&self, entry: &mut VolumeEntry, err: VolumeError) {
        entry.attempts = entry.attempts.saturating_add(1);
        let retry_after = if err.is_retryable() {
            let delay = self.settings.retry.backoff(entry.attempts);
            chrono::Duration::from_std(delay)
                .ok()
                .and_then(|delay| Utc::now().checked_add_signed(delay))
        } else {
            None
        };

        if entry.phase() != VolumePhase::Failed {
            entry.status.pre_fail_phase = Some(entry.phase());
        }
        entry.status.phase = VolumePhase::Failed;
        entry.status.error_kind = Some(err.kind);
        entry.status.error_message = err.message.clone();
        entry.status.retry_after = retry_after;

        warn!(
            volume = %entry.id(),
            kind = %err.kind,
            attempts = entry.attempts,
            "volume step failed: {}",
            err.message
        );
    }

    fn publish(&mut self) {
        self.generation += 1;
        let snapshot = Snapshot::from_entries(self.generation, &self.entries, self.config_error.clone());
        self.snapshot.send_replace(Arc::new(snapshot));
    }

    async fn persist(&mut self) {
        let state = StoredState::from_entries(&self.entries);
        if self.saved.as_ref() == Some(&state) {
            return;
        }
        match store::save(&self.settings.controller.state_file, &state).await {
            Ok(()) => self.saved = Some(state),
            Err(err) => warn!(%err, "failed to save volume state"),
        }
    }
}
