//! `SpiderDB` configuration.
//!
//! Supports a `spiderdb.toml` file and `SPIDERDB_*` environment variables
//! layered over built-in defaults, using the same `figment` priority
//! chain as the teacher: environment overrides file, file overrides
//! defaults.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration from file, string, or environment.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Dotted key path of the offending value.
        key: String,
        /// Why the value was rejected.
        message: String,
    },
}

/// HNSW index tuning section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Target neighbor count per node per layer above 0 (`M`).
    pub m: usize,
    /// Candidate pool size during insertion.
    pub ef_construction: usize,
    /// Default candidate pool size during search when the caller omits one.
    pub ef_search: usize,
    /// Soft cap that flips `SpiderDB::over_capacity()` once exceeded.
    pub max_capacity: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            max_capacity: 100_000,
        }
    }
}

/// Persistence section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the snapshot file; empty means in-memory only until `save(Some(path))`.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `error` | `warn` | `info` | `debug` | `trace`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level `SpiderDB` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SpiderConfig {
    /// HNSW tuning.
    pub hnsw: HnswConfig,
    /// Snapshot path.
    pub storage: StorageConfig,
    /// Logging level.
    pub logging: LoggingConfig,
}

impl SpiderConfig {
    /// Loads configuration from `spiderdb.toml` in the current directory,
    /// overridden by `SPIDERDB_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but fails to parse.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("spiderdb.toml")
    }

    /// Loads configuration from a specific TOML file path.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SPIDERDB_").split("_").lowercase(false));

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every tunable against its documented range.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range value encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hnsw.m == 0 || self.hnsw.m > 256 {
            return Err(ConfigError::InvalidValue {
                key: "hnsw.m".to_string(),
                message: format!("value {} is out of range [1, 256]", self.hnsw.m),
            });
        }

        if self.hnsw.ef_construction < self.hnsw.m {
            return Err(ConfigError::InvalidValue {
                key: "hnsw.ef_construction".to_string(),
                message: "ef_construction must be >= m".to_string(),
            });
        }

        if self.hnsw.max_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "hnsw.max_capacity".to_string(),
                message: "max_capacity must be > 0".to_string(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SpiderConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_m() {
        let mut cfg = SpiderConfig::default();
        cfg.hnsw.m = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_ef_construction_below_m() {
        let mut cfg = SpiderConfig::default();
        cfg.hnsw.ef_construction = 4;
        cfg.hnsw.m = 16;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut cfg = SpiderConfig::default();
        cfg.logging.level = "verbose".to_string();
        assert!(cfg.validate().is_err());
    }
}
