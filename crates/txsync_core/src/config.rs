//! Data source configuration.
//!
//! # Responsibility
//! - Describe where the database lives and how the connection pool is sized.
//! - Parse configuration from JSON and reject unusable values early.
//!
//! # Invariants
//! - `max_size >= 1` and `min_idle <= max_size` for every validated config.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_SIZE: u32 = 10;
const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Database location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DbLocation {
    /// On-disk database file.
    File { path: PathBuf },
    /// Named in-memory database shared by every pooled connection.
    Memory { name: String },
}

/// Connection source configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    pub location: DbLocation,
    /// Upper bound of pooled physical connections.
    pub max_size: u32,
    /// Idle connections kept open. `None` keeps `max_size` idle.
    pub min_idle: Option<u32>,
    /// How long `acquire` waits for a free connection.
    pub connection_timeout_ms: u64,
    /// SQLite busy handler timeout applied to every connection.
    pub busy_timeout_ms: u64,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            location: DbLocation::Memory {
                name: "txsync".to_string(),
            },
            max_size: DEFAULT_MAX_SIZE,
            min_idle: None,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl DataSourceConfig {
    /// Config for an on-disk database with default pool settings.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DbLocation::File { path: path.into() },
            ..Self::default()
        }
    }

    /// Parses a JSON document and validates it.
    ///
    /// Missing fields fall back to [`DataSourceConfig::default`].
    pub fn from_json_str(raw: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| format!("invalid data source config: {err}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("max_size must be at least 1".to_string());
        }
        if let Some(min_idle) = self.min_idle {
            if min_idle > self.max_size {
                return Err(format!(
                    "min_idle {min_idle} cannot exceed max_size {}",
                    self.max_size
                ));
            }
        }
        if self.connection_timeout_ms == 0 {
            return Err("connection_timeout_ms must be positive".to_string());
        }
        match &self.location {
            DbLocation::File { path } if path.as_os_str().is_empty() => {
                Err("file location requires a non-empty path".to_string())
            }
            DbLocation::Memory { name } if name.trim().is_empty() => {
                Err("memory location requires a non-empty name".to_string())
            }
            _ => Ok(()),
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
