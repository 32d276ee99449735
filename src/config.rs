//! Store configuration.
//!
//! A [`StoreConfig`] can be built in code, or loaded from a JSON file where
//! every field is optional and falls back to its default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// Upper bound on bound parameters in a single statement.
/// Match batches and scan pages are never allowed to exceed it.
pub const MAX_BOUND_PARAMETERS: usize = 1000;

/// Idle connections kept by the pool unless configured otherwise.
pub const DEFAULT_POOL_CAPACITY: usize = 5;

/// Query hashes per match statement unless configured otherwise.
pub const DEFAULT_MATCH_BATCH_SIZE: usize = 1000;

pub const DEFAULT_SCAN_PAGE_SIZE: usize = 1000;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Single-file SQLite database holding both relations.
    pub path: PathBuf,
    /// Maximum number of idle connections cached by the pool.
    pub pool_capacity: usize,
    /// Number of query hashes bound per match statement.
    pub match_batch_size: usize,
    /// Rows fetched per page by the lazy full-table scans.
    pub scan_page_size: usize,
    pub busy_timeout_ms: u64,
    /// Open connections in WAL journal mode.
    pub wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("fingerprints.sqlite3"),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            match_batch_size: DEFAULT_MATCH_BATCH_SIZE,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            wal: true,
        }
    }
}

impl StoreConfig {
    /// Default configuration pointing at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Loads and validates a JSON config. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> StoreResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: StoreConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Checks the bounds the pool and the batched queries rely on.
    pub fn validate(&self) -> StoreResult<()> {
        if self.pool_capacity == 0 {
            return Err(StoreError::Config(
                "pool_capacity must be at least 1".to_string(),
            ));
        }
        check_parameter_bound("match_batch_size", self.match_batch_size)?;
        check_parameter_bound("scan_page_size", self.scan_page_size)?;
        Ok(())
    }
}

pub(crate) fn check_parameter_bound(field: &str, value: usize) -> StoreResult<()> {
    if value == 0 || value > MAX_BOUND_PARAMETERS {
        return Err(StoreError::Config(format!(
            "{} must be between 1 and {}, got {}",
            field, MAX_BOUND_PARAMETERS, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_capacity, 5);
        assert_eq!(config.match_batch_size, 1000);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = StoreConfig {
            pool_capacity: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool_capacity"));
    }

    #[test]
    fn test_batch_size_over_parameter_limit_rejected() {
        let config = StoreConfig {
            match_batch_size: MAX_BOUND_PARAMETERS + 1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("match_batch_size"));

        let config = StoreConfig {
            scan_page_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"path": "/tmp/fp.sqlite3", "match_batch_size": 250}}"#).unwrap();

        let config = StoreConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/fp.sqlite3"));
        assert_eq!(config.match_batch_size, 250);
        assert_eq!(config.pool_capacity, DEFAULT_POOL_CAPACITY);
        assert!(config.wal);
    }

    #[test]
    fn test_invalid_json_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"match_batch_size": 5000}}"#).unwrap();
        assert!(StoreConfig::from_json_file(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            StoreConfig::from_json_file(file.path()),
            Err(StoreError::Json(_))
        ));
    }
}
