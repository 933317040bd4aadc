// SPDX-License-Identifier: GPL-3.0-only

//! A controller wired to a [`FakeHost`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use volume_manager::{AdapterSet, Adapters, Controller, Settings, Snapshot};
use volume_types::VolumePhase;

use crate::config::StaticConfig;
use crate::host::FakeHost;

/// Upper bound for [`Lab::settle`]; a healthy node converges well within it.
pub const MAX_TICKS: usize = 64;

pub fn adapters(host: &FakeHost, config: Arc<StaticConfig>) -> Adapters {
    let host = Arc::new(host.clone());
    let set = AdapterSet {
        world: host.clone(),
        config,
        meta: host.clone(),
        partitions: host.clone(),
        filesystems: host.clone(),
        luks: host.clone(),
        mounts: host.clone(),
        paths: host.clone(),
        node: host.clone(),
        kms: host.clone(),
        tpm: host,
    };
    Adapters::new(set, "memory")
}

fn phases(snapshot: &Snapshot) -> BTreeMap<String, VolumePhase> {
    snapshot
        .statuses
        .iter()
        .map(|(id, status)| (id.clone(), status.phase))
        .collect()
}

pub struct Lab {
    pub host: FakeHost,
    pub config: Arc<StaticConfig>,
    settings: Settings,
    controller: Controller,
    cancel: CancellationToken,
    _state_dir: TempDir,
}

impl std::fmt::Debug for Lab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lab")
            .field("host", &self.host)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl Lab {
    pub fn new(host: FakeHost, config: &str) -> std::io::Result<Self> {
        Self::with_settings(host, config, |_| {})
    }

    /// Failed volumes are retried on the next tick.
    pub fn with_settings(
        host: FakeHost,
        config: &str,
        adjust: impl FnOnce(&mut Settings),
    ) -> std::io::Result<Self> {
        let state_dir = tempfile::tempdir()?;
        let mut settings = Settings::default();
        settings.controller.state_file = state_dir.path().join("state.json");
        settings.retry.base_backoff = Duration::ZERO;
        settings.retry.max_backoff = Duration::ZERO;
        adjust(&mut settings);

        let config = Arc::new(StaticConfig::new(config));
        let controller = Controller::new(&adapters(&host, config.clone()), settings.clone());
        Ok(Self {
            host,
            config,
            settings,
            controller,
            cancel: CancellationToken::new(),
            _state_dir: state_dir,
        })
    }

    pub fn set_config(&self, text: &str) {
        self.config.set(text);
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.controller.snapshot()
    }

    pub fn state_file(&self) -> &std::path::Path {
        &self.settings.controller.state_file
    }

    pub async fn tick(&mut self) -> Arc<Snapshot> {
        self.controller.tick(&self.cancel).await;
        self.controller.snapshot()
    }

    /// Ticks until a tick changes no phase.
    pub async fn settle(&mut self) -> Arc<Snapshot> {
        let mut before = phases(&self.snapshot());
        for round in 1..=MAX_TICKS {
            let snapshot = self.tick().await;
            let after = phases(&snapshot);
            if after == before {
                debug!(ticks = round, "settled");
                return snapshot;
            }
            before = after;
        }
        self.snapshot()
    }

    /// Replaces the controller as a process restart would: the host and the
    /// state file survive, everything in memory is lost.
    pub async fn restart(&mut self) -> volume_manager::Result<()> {
        self.controller = Controller::new(
            &adapters(&self.host, self.config.clone()),
            self.settings.clone(),
        );
        self.controller.restore().await
    }
}
