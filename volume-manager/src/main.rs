// SPDX-License-Identifier: GPL-3.0-only

//! Volume manager - reconciles node volumes with their configuration
//!
//! `run` drives the reconcile loop against the host; `render` and
//! `validate` work on a configuration file offline.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use volume_config::Config;
use volume_manager::adapters::Concern;
use volume_manager::settings::DEFAULT_SETTINGS_PATH;
use volume_manager::{Adapters, Controller, Settings, TransformContext, logging, render};

#[derive(Debug, Parser)]
#[command(name = "volume-manager", version, about = "Node volume lifecycle manager")]
struct Cli {
    /// Runtime settings (TOML)
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    /// Volume configuration documents (YAML); overrides the settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Treat configuration warnings as errors
    #[arg(long)]
    strict: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile volumes until interrupted (default)
    Run,
    /// Print the desired VolumeConfigs as YAML
    Render,
    /// Check the configuration documents
    Validate,
}

fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Config::parse(&text).with_context(|| format!("parsing {}", path.display()))
}

fn validate(config: &Config, strict: bool) -> Result<()> {
    let warnings = config
        .validate_strict(strict)
        .context("configuration is invalid")?;
    for warning in &warnings {
        tracing::warn!(%warning, "configuration warning");
    }
    Ok(())
}

fn render_config(settings: &Settings, strict: bool) -> Result<()> {
    let config = load_config(&settings.controller.config_path)?;
    validate(&config, strict)?;

    let ctx = TransformContext {
        in_container: settings.controller.in_container,
        agent_mode: settings.controller.agent_mode,
        state_encryption_meta: None,
    };
    let desired = render(&config, &ctx).context("rendering volumes")?;
    for volume in &desired.configs {
        print!("---\n{}", volume.to_yaml()?);
    }
    Ok(())
}

async fn run(settings: Settings, strict: bool) -> Result<()> {
    tracing::info!("Starting volume manager v{}", env!("CARGO_PKG_VERSION"));

    // Check if running as root
    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("Volume manager must run as root");
        anyhow::bail!("Volume manager must run with root privileges");
    }

    let adapters = Adapters::system(&settings)?;
    tracing::info!(
        "Adapter routing: World -> {}, Partitions -> {}, Luks -> {}, Mounts -> {}",
        adapters.route_for(Concern::World).unwrap_or("<missing>"),
        adapters.route_for(Concern::Partitions).unwrap_or("<missing>"),
        adapters.route_for(Concern::Luks).unwrap_or("<missing>"),
        adapters.route_for(Concern::Mounts).unwrap_or("<missing>"),
    );

    let controller = Controller::new(&adapters, settings).with_strict(strict);
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {e}"),
        }
        shutdown.cancel();
    });

    controller.run(cancel).await;
    tracing::info!("Volume manager shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.settings)?;
    if let Some(config) = cli.config {
        settings.controller.config_path = config;
    }
    let _guard = logging::init(&settings.logging);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings, cli.strict).await,
        Command::Render => render_config(&settings, cli.strict),
        Command::Validate => {
            let config = load_config(&settings.controller.config_path)?;
            validate(&config, cli.strict)?;
            println!(
                "{}: {} documents, configuration is valid",
                settings.controller.config_path.display(),
                config.documents().len()
            );
            Ok(())
        }
    }
}
