use crate::engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default byte budget for all combined output packets.
pub const DEFAULT_POOL_SIZE_BYTES: usize = 6144;
pub const DEFAULT_POOL_ID: u32 = 0x484B_0001;
/// Default depth of the application pipe.
pub const DEFAULT_PIPE_DEPTH: usize = 40;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} must be non-zero")]
    Zero { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HkConfig {
    pub discard_incomplete: bool,
    pub pool_size_bytes: usize,
    pub pool_id: u32,
    pub pipe_depth: usize,
    /// JSON copy table loaded at startup. The sample table is used when unset.
    pub copy_table_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for HkConfig {
    fn default() -> Self {
        Self {
            discard_incomplete: false,
            pool_size_bytes: DEFAULT_POOL_SIZE_BYTES,
            pool_id: DEFAULT_POOL_ID,
            pipe_depth: DEFAULT_PIPE_DEPTH,
            copy_table_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl HkConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size_bytes == 0 {
            return Err(ConfigError::Zero { field: "pool_size_bytes" });
        }
        if self.pipe_depth == 0 {
            return Err(ConfigError::Zero { field: "pipe_depth" });
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            discard_incomplete: self.discard_incomplete,
        }
    }

    /// `tracing` level for the configured log level, `INFO` when unrecognised.
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = HkConfig::from_json(r#"{"discard_incomplete": true}"#).unwrap();
        assert!(config.discard_incomplete);
        assert_eq!(config.pool_size_bytes, DEFAULT_POOL_SIZE_BYTES);
        assert_eq!(config.pipe_depth, DEFAULT_PIPE_DEPTH);
        assert!(config.engine_config().discard_incomplete);
    }

    #[test]
    fn test_zero_pool_is_rejected() {
        let err = HkConfig::from_json(r#"{"pool_size_bytes": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Zero { field: "pool_size_bytes" }));
    }

    #[test]
    fn test_log_level_parsing() {
        let mut config = HkConfig::default();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
        config.log_level = "debug".into();
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
        config.log_level = "loud".into();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_demo_config() {
        let config = HkConfig::from_json(include_str!("../demos/hk_config.json")).unwrap();
        assert_eq!(config.pool_id, DEFAULT_POOL_ID);
        assert_eq!(config.copy_table_path, Some(PathBuf::from("demos/hk_copy_table.json")));
    }
}
