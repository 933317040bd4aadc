// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::settings::LoggingSettings;

const LOG_PREFIX: &str = "volume-manager.log";
const KEEP_DAYS: u64 = 7;

fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new(crate::settings::DEFAULT_LOG_FILTER))
}

/// Installs the global subscriber: stderr, plus daily files when a log
/// directory is configured. Keep the returned guard alive until exit.
pub fn init(settings: &LoggingSettings) -> Option<WorkerGuard> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let Some(dir) = &settings.directory else {
        tracing_subscriber::registry()
            .with(env_filter(settings))
            .with(stderr_layer)
            .init();
        return None;
    };

    if let Err(e) = fs::create_dir_all(dir) {
        eprintln!(
            "volume-manager: log directory {} unavailable: {e}",
            dir.display()
        );
        tracing_subscriber::registry()
            .with(env_filter(settings))
            .with(stderr_layer)
            .init();
        return None;
    }

    cleanup_old_logs(dir);
    let appender = tracing_appender::rolling::daily(dir, LOG_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Some(guard)
}

fn cleanup_old_logs(dir: &Path) {
    let Some(cutoff) = SystemTime::now().checked_sub(Duration::from_secs(KEEP_DAYS * 24 * 60 * 60))
    else {
        return;
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(LOG_PREFIX) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        if metadata.modified().is_ok_and(|modified| modified < cutoff) {
            let _ = fs::remove_file(entry.path());
        }
    }
}
