// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use url::Url;

pub const APP_ID: &str = "io.github.sethcottle.Hangar";

pub const DEFAULT_PDS: &str = "https://bsky.social";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid service url {0:?}")]
    ServiceUrl(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Tunables for fetching and retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// PDS or entryway the client logs in to.
    pub service_url: String,
    /// Items requested per page (the AppView caps this at 100).
    pub page_limit: u8,
    /// Reply levels fetched below a thread's focus.
    pub thread_depth: u16,
    /// Ancestors fetched above a thread's focus.
    pub thread_parent_height: u16,
    /// Levels of quoted posts hydrated when reading from the cache.
    pub quote_depth: usize,
    pub feed_retention_hours: u32,
    pub orphan_retention_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_PDS.to_string(),
            page_limit: 30,
            thread_depth: 6,
            thread_parent_height: 80,
            quote_depth: 2,
            feed_retention_hours: 24,
            orphan_retention_days: 7,
        }
    }
}

impl SyncConfig {
    /// Get the config file path (~/.config/io.github.sethcottle.Hangar/sync.json)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push(APP_ID);
            p.push("sync.json");
            p
        })
    }

    /// Load from disk, or return defaults if missing or unusable
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(error) => {
                warn!(path = %path.display(), %error, "ignoring sync config");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to disk
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.service_url)
            .map_err(|_| ConfigError::ServiceUrl(self.service_url.clone()))?;
        if !matches!(url.scheme(), "https" | "http") || url.host_str().is_none() {
            return Err(ConfigError::ServiceUrl(self.service_url.clone()));
        }
        if self.page_limit == 0 {
            return Err(ConfigError::Zero("page_limit"));
        }
        if self.feed_retention_hours == 0 {
            return Err(ConfigError::Zero("feed_retention_hours"));
        }
        Ok(())
    }

    /// `page_limit` clamped to what the AppView accepts.
    pub fn request_limit(&self) -> u8 {
        self.page_limit.clamp(1, 100)
    }
}
