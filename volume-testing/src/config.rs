// SPDX-License-Identifier: GPL-3.0-only

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use volume_config::Config;
use volume_contracts::{ConfigSource, Result};

/// Configuration documents held in memory; tests swap them between ticks.
#[derive(Debug, Default)]
pub struct StaticConfig {
    text: Mutex<String>,
}

impl StaticConfig {
    pub fn new(text: &str) -> Self {
        Self {
            text: Mutex::new(text.to_string()),
        }
    }

    pub fn set(&self, text: &str) {
        *self.text.lock().unwrap_or_else(PoisonError::into_inner) = text.to_string();
    }

    pub fn text(&self) -> String {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ConfigSource for StaticConfig {
    async fn load(&self) -> Result<Config> {
        let text = self.text();
        if text.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(Config::parse(&text)?)
    }
}
