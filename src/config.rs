//! Configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::{AppError, Result};

/// Environment variable that overrides `share.url`.
pub const SHARE_URL_ENV: &str = "TETHER_SHARE_URL";

/// Remote share endpoint settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ShareConfig {
    /// Base URL of the share service (no trailing `/api`).
    #[serde(default = "default_share_url")]
    pub url: String,
    /// Quiescence window before a pending batch is flushed.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            url: default_share_url(),
            debounce_ms: default_debounce_ms(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl ShareConfig {
    /// Debounce window as a [`Duration`].
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// HTTP request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Process supervision settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessConfig {
    /// Delay between `SIGTERM` and `SIGKILL`.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
        }
    }
}

impl ProcessConfig {
    /// Grace period as a [`Duration`].
    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

/// Local record store settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    /// `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_share_url() -> String {
    "https://opncd.ai".into()
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_grace_ms() -> u64 {
    200
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".tether").join("tether.db")
}

/// Top-level configuration parsed from `tether.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TetherConfig {
    /// Share endpoint and debounce settings.
    #[serde(default)]
    pub share: ShareConfig,
    /// Process supervision settings.
    #[serde(default)]
    pub process: ProcessConfig,
    /// Local record store settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl TetherConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string, apply environment overrides,
    /// and validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if an override fails validation.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var(SHARE_URL_ENV) {
            if !url.is_empty() {
                info!(url, "share url overridden from environment");
                self.share.url = url;
            }
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.share.debounce_ms == 0 {
            return Err(AppError::Config(
                "share.debounce_ms must be greater than zero".into(),
            ));
        }

        if self.process.grace_ms == 0 {
            return Err(AppError::Config(
                "process.grace_ms must be greater than zero".into(),
            ));
        }

        if !(self.share.url.starts_with("http://") || self.share.url.starts_with("https://")) {
            return Err(AppError::Config(format!(
                "share.url must be an http(s) url: {}",
                self.share.url
            )));
        }

        let trimmed = self.share.url.trim_end_matches('/').len();
        self.share.url.truncate(trimmed);

        Ok(())
    }
}
