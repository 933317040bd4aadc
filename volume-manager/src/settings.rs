// SPDX-License-Identifier: GPL-3.0-only

//! Runtime settings of the volume manager, read from a TOML file.
//!
//! ```toml
//! [controller]
//! tick_interval = "5s"
//! state_file = "/var/lib/volume-manager/state.json"
//!
//! [timeouts]
//! kms = "30s"
//!
//! [retry]
//! base_backoff = "1s"
//! max_backoff = "5m"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/volume-manager/settings.toml";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/volume-manager/config.yaml";
pub const DEFAULT_STATE_FILE: &str = "/var/lib/volume-manager/state.json";
pub const DEFAULT_LOG_FILTER: &str = "volume_manager=info,warn";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub controller: ControllerSettings,
    pub timeouts: Timeouts,
    pub retry: RetrySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerSettings {
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Running inside a container: only the standard directories are managed.
    pub in_container: bool,

    /// Worker node without a machine config of its own.
    pub agent_mode: bool,

    /// Overrides system disk detection.
    pub system_disk: Option<String>,

    /// Multi-document YAML with the volume configuration.
    pub config_path: PathBuf,
    pub state_file: PathBuf,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            in_container: false,
            agent_mode: false,
            system_disk: None,
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
        }
    }
}

/// Upper bound of each kind of external call.
///
/// Partition creation, mkfs, luksFormat and key enrollment are never cut
/// short; `partition`, `format` and `encryption` bound the reads and checks
/// around them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Block device discovery, config loading and META access.
    #[serde(with = "humantime_serde")]
    pub discovery: Duration,
    /// Partition table reads.
    #[serde(with = "humantime_serde")]
    pub partition: Duration,
    /// Filesystem probing.
    #[serde(with = "humantime_serde")]
    pub format: Duration,
    /// LUKS header checks and closing mappers.
    #[serde(with = "humantime_serde")]
    pub encryption: Duration,
    #[serde(with = "humantime_serde")]
    pub kms: Duration,
    #[serde(with = "humantime_serde")]
    pub tpm: Duration,
    #[serde(with = "humantime_serde")]
    pub mount: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            discovery: Duration::from_secs(30),
            partition: Duration::from_secs(60),
            format: Duration::from_secs(300),
            encryption: Duration::from_secs(120),
            kms: Duration::from_secs(30),
            tpm: Duration::from_secs(30),
            mount: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl RetrySettings {
    /// Delay before retry number `attempt` (1-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Used when `RUST_LOG` is unset.
    pub filter: String,

    /// Also write daily-rotated log files here.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            directory: None,
        }
    }
}

impl Settings {
    pub fn parse(text: &str, path: &Path) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads `path`; a missing file at the default location yields defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path),
            Err(err)
                if err.kind() == std::io::ErrorKind::NotFound
                    && path == Path::new(DEFAULT_SETTINGS_PATH) =>
            {
                Ok(Self::default())
            }
            Err(source) => Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.controller.tick_interval.is_zero() {
            return Err(SettingsError::Invalid(
                "controller.tick_interval must be positive".into(),
            ));
        }
        if self.retry.base_backoff > self.retry.max_backoff {
            return Err(SettingsError::Invalid(
                "retry.base_backoff exceeds retry.max_backoff".into(),
            ));
        }
        let timeouts = &self.timeouts;
        for (name, value) in [
            ("discovery", timeouts.discovery),
            ("partition", timeouts.partition),
            ("format", timeouts.format),
            ("encryption", timeouts.encryption),
            ("kms", timeouts.kms),
            ("tpm", timeouts.tpm),
            ("mount", timeouts.mount),
        ] {
            if value.is_zero() {
                return Err(SettingsError::Invalid(format!(
                    "timeouts.{name} must be positive"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings = Settings::parse("", Path::new("settings.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.logging.filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn durations_are_human_readable() {
        let settings = Settings::parse(
            r#"
[controller]
tick_interval = "2s"
agent_mode = true
system_disk = "/dev/vda"

[timeouts]
kms = "45s"

[retry]
base_backoff = "500ms"
max_backoff = "1m"
"#,
            Path::new("settings.toml"),
        )
        .unwrap();

        assert_eq!(settings.controller.tick_interval, Duration::from_secs(2));
        assert!(settings.controller.agent_mode);
        assert_eq!(settings.controller.system_disk.as_deref(), Some("/dev/vda"));
        assert_eq!(settings.timeouts.kms, Duration::from_secs(45));
        assert_eq!(settings.timeouts.mount, Timeouts::default().mount);
        assert_eq!(settings.retry.base_backoff, Duration::from_millis(500));
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        assert!(matches!(
            Settings::parse("[controller]\ntick = \"1s\"\n", Path::new("s.toml")),
            Err(SettingsError::Parse { .. })
        ));
        assert!(matches!(
            Settings::parse("[controller]\ntick_interval = \"0s\"\n", Path::new("s.toml")),
            Err(SettingsError::Invalid(_))
        ));
        assert!(matches!(
            Settings::parse(
                "[retry]\nbase_backoff = \"10m\"\nmax_backoff = \"1m\"\n",
                Path::new("s.toml")
            ),
            Err(SettingsError::Invalid(_))
        ));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let retry = RetrySettings {
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(retry.backoff(1), Duration::from_secs(1));
        assert_eq!(retry.backoff(2), Duration::from_secs(2));
        assert_eq!(retry.backoff(4), Duration::from_secs(8));
        assert_eq!(retry.backoff(5), Duration::from_secs(10));
        assert_eq!(retry.backoff(64), Duration::from_secs(10));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::Read { .. })
        ));

        std::fs::write(&path, "[logging]\nfilter = \"debug\"\n").unwrap();
        assert_eq!(Settings::load(&path).unwrap().logging.filter, "debug");
    }
}
