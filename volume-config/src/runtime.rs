// SPDX-License-Identifier: GPL-3.0-only

//! Runtime documents that ride along with volume configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use volume_types::constants::MAX_VOLUME_NAME_LENGTH;

use crate::error::ValidationReport;

pub const DEFAULT_ZSWAP_MAX_POOL_PERCENT: u32 = 20;
pub const DEFAULT_SCRUB_PERIOD: Duration = Duration::from_secs(168 * 60 * 60);
pub const MIN_SCRUB_PERIOD: Duration = Duration::from_secs(10 * 60);

/// `ZswapConfig`: compressed swap cache settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ZswapConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pool_percent: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shrinker_enabled: Option<bool>,
}

impl ZswapConfig {
    pub fn max_pool_percent(&self) -> u32 {
        self.max_pool_percent
            .unwrap_or(DEFAULT_ZSWAP_MAX_POOL_PERCENT)
    }

    pub fn shrinker_enabled(&self) -> bool {
        self.shrinker_enabled.unwrap_or(false)
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        if self.max_pool_percent() > 100 {
            report.error("maxPoolPercent must be between 0 and 100");
        }
        report
    }
}

/// `FilesystemScrubConfig`: periodic online scrub of a mounted filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilesystemScrubConfig {
    pub name: String,
    pub mountpoint: String,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub period: Option<Duration>,
}

impl FilesystemScrubConfig {
    pub fn period(&self) -> Duration {
        self.period.unwrap_or(DEFAULT_SCRUB_PERIOD)
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.name.is_empty() || self.name.len() > MAX_VOLUME_NAME_LENGTH {
            report.error(format!(
                "name must be between 1 and {MAX_VOLUME_NAME_LENGTH} characters long"
            ));
        }

        if !self.mountpoint.starts_with('/') {
            report.error("mountpoint must be an absolute path");
        }

        if self.period() < MIN_SCRUB_PERIOD {
            report.error("period must be at least 10m");
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zswap_defaults() {
        let config: ZswapConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.max_pool_percent(), 20);
        assert!(!config.shrinker_enabled());

        let config = ZswapConfig {
            max_pool_percent: Some(150),
            ..Default::default()
        };
        assert_eq!(config.validate().errors.len(), 1);
    }

    #[test]
    fn scrub_period_parses_durations() {
        let config: FilesystemScrubConfig =
            serde_yaml::from_str("name: var\nmountpoint: /var\nperiod: 24h\n").unwrap();
        assert_eq!(config.period(), Duration::from_secs(24 * 3600));
        assert!(config.validate().is_ok());

        let config: FilesystemScrubConfig =
            serde_yaml::from_str("name: var\nmountpoint: var\nperiod: 5m\n").unwrap();
        assert_eq!(
            config.validate().errors,
            vec!["mountpoint must be an absolute path", "period must be at least 10m"]
        );

        let config: FilesystemScrubConfig =
            serde_yaml::from_str("name: var\nmountpoint: /var\n").unwrap();
        assert_eq!(config.period(), DEFAULT_SCRUB_PERIOD);
    }
}
