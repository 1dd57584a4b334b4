// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! TOML configuration for opening a [`FragmentStore`](crate::FragmentStore).
//!
//! ```toml
//! database_path = "/var/lib/canopy/canopy.sqlite"
//! open_mode = "read-write"
//! busy_timeout_ms = 5000
//! lock_poll_interval_ms = 10
//! lock_lease_ms = 300000
//! ```

use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::connection::OpenMode;

/// Environment variable naming the configuration file.
pub const CONFIG_FILE_ENV: &str = "CANOPY_CONFIG_FILE";

/// File consulted in the working directory when the variable is unset.
pub const DEFAULT_CONFIG_FILE: &str = "canopy.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

fn default_open_mode() -> OpenMode {
    OpenMode::Create
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_lock_poll_interval_ms() -> u64 {
    10
}

fn default_lock_lease_ms() -> u64 {
    300_000
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite file; an in-memory database when absent.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_open_mode")]
    pub open_mode: OpenMode,
    /// How long SQLite waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Sleep between attempts to take a held owner lock.
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,
    /// Age after which a held owner lock may be taken by another session.
    #[serde(default = "default_lock_lease_ms")]
    pub lock_lease_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            open_mode: default_open_mode(),
            busy_timeout_ms: default_busy_timeout_ms(),
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            lock_lease_ms: default_lock_lease_ms(),
        }
    }
}

impl StoreConfig {
    /// Read and validate a TOML file.
    pub fn load(settings_file: &Path) -> Result<StoreConfig, ConfigError> {
        let contents = read_to_string(settings_file).map_err(|e| ConfigError::ReadFile {
            path: settings_file.display().to_string(),
            source: e,
        })?;
        let config = Self::parse(&contents)?;
        debug!("Loaded configuration from {}", settings_file.display());
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(contents: &str) -> Result<StoreConfig, ConfigError> {
        let config: StoreConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `$CANOPY_CONFIG_FILE`, else `./canopy.toml` if it exists,
    /// else defaults.
    pub fn from_env() -> Result<StoreConfig, ConfigError> {
        match std::env::var(CONFIG_FILE_ENV) {
            Ok(settings_file) => Self::load(Path::new(&settings_file)),
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_FILE))
            }
            Err(_) => Ok(StoreConfig::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "busy_timeout_ms must be greater than 0".to_string(),
            });
        }
        if self.lock_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "lock_poll_interval_ms must be greater than 0".to_string(),
            });
        }
        if self.lock_lease_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "lock_lease_ms must be greater than 0".to_string(),
            });
        }
        if self.database_path.is_none() && self.open_mode != OpenMode::Create {
            return Err(ConfigError::Invalid {
                reason: "an in-memory database must use open_mode = \"create\"".to_string(),
            });
        }
        Ok(())
    }

    /// `busy_timeout_ms` as a duration.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// `lock_poll_interval_ms` as a duration.
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    /// `lock_lease_ms` as a duration.
    pub fn lock_lease(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ms)
    }
}
