//! Configuration for the archivist store handle
//!
//! Handles loading and validating configuration from TOML files.
//! A `StoreConfig` can also be built directly in code; TOML loading exists
//! for deployments that keep connection settings on disk.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Store handle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// PostgreSQL connection string
    #[serde(default = "default_connection_string")]
    pub connection_string: String,

    /// Embedding dimension of the `chunks.embedding` column
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// BM25 text configuration used when creating the full-text index
    #[serde(default = "default_text_config")]
    pub text_config: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection_string: default_connection_string(),
            dimension: default_dimension(),
            text_config: default_text_config(),
        }
    }
}

impl StoreConfig {
    /// Build a config with an explicit connection string and defaults elsewhere
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: StoreConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.connection_string.is_empty() {
            return Err(Error::Config(
                "connection_string must not be empty".to_string(),
            ));
        }

        if self.dimension == 0 {
            return Err(Error::Config("dimension must be positive".to_string()));
        }

        if self.text_config.is_empty() {
            return Err(Error::Config("text_config must not be empty".to_string()));
        }

        // The text_config value is spliced into index DDL; reject anything
        // that could escape the quoted literal.
        if self.text_config.contains('\'') {
            return Err(Error::Config(
                "text_config must not contain quotes".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.dimension, 2048);
        assert_eq!(config.text_config, "simple");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = StoreConfig::default();

        config.dimension = 0;
        assert!(config.validate().is_err());

        config.dimension = 768;
        assert!(config.validate().is_ok());

        config.text_config = "english'; DROP TABLE chunks; --".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_load_with_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "connection_string = \"postgres://localhost/rag\"\n").unwrap();

        let loaded = StoreConfig::load(&path).unwrap();
        assert_eq!(loaded.connection_string, "postgres://localhost/rag");
        assert_eq!(loaded.dimension, 2048);
    }

    #[test]
    fn test_config_load_missing_file() {
        let tmp = TempDir::new().unwrap();
        assert!(StoreConfig::load(&tmp.path().join("nope.toml")).is_err());
    }
}
