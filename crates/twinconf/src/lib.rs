//! Configuration loading for twinstore.
//!
//! One `TwinConfig` is built at process start and handed by reference to the
//! store clients. Nothing downstream reads the environment on its own.
//!
//! # Usage
//!
//! ```rust,no_run
//! use twinconf::TwinConfig;
//!
//! let config = TwinConfig::load().expect("Failed to load config");
//! config.validate().expect("Invalid config");
//!
//! println!("IPFS API: {}", config.content_store.api_url);
//! println!("Bucket: {}", config.object_store.bucket);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/twinstore/config.toml` (system)
//! 2. `~/.config/twinstore/config.toml` (user)
//! 3. `./twinstore.toml` (local override, replaced by `--config`)
//! 4. Environment variables (`TWINSTORE_*`, plus the usual `AWS_*`)
//!
//! # Example Config
//!
//! ```toml
//! [bind]
//! http_port = 3000
//!
//! [content_store]
//! api_url = "http://127.0.0.1:5001"
//! stat_timeout_ms = 3000
//!
//! [object_store]
//! bucket = "media"
//! region = "us-east-2"
//! endpoint = "http://127.0.0.1:9000"
//! force_path_style = true
//!
//! [read]
//! mode = "url"
//! gateway_url = "https://ipfs.io"
//!
//! [orchestrator]
//! compensate_failed_create = true
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{
    BindConfig, ContentStoreConfig, ObjectStoreConfig, OrchestratorConfig, ReadConfig, ReadMode,
    TelemetryConfig, REDACTED,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to render configuration: {0}")]
    Render(String),
}

/// Complete twinstore configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwinConfig {
    pub bind: BindConfig,
    pub content_store: ContentStoreConfig,
    pub object_store: ObjectStoreConfig,
    pub read: ReadConfig,
    pub orchestrator: OrchestratorConfig,
    pub telemetry: TelemetryConfig,
}

impl TwinConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` standing in for `./twinstore.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        let (mut config, mut sources) = loader::load_files(&files)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Reject configurations the clients cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.content_store.api_url.trim().is_empty() {
            return Err(ConfigError::Invalid("content_store.api_url is empty".into()));
        }
        if self.object_store.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("object_store.bucket is empty".into()));
        }
        if self.object_store.region.trim().is_empty() {
            return Err(ConfigError::Invalid("object_store.region is empty".into()));
        }
        let timeouts = [
            ("content_store.stat_timeout_ms", self.content_store.stat_timeout_ms),
            ("content_store.request_timeout_ms", self.content_store.request_timeout_ms),
            ("object_store.timeout_ms", self.object_store.timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.bind.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("bind.max_upload_bytes must be greater than zero".into()));
        }
        Ok(())
    }

    /// Render as TOML with secrets redacted.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let display = TwinConfig {
            object_store: self.object_store.redacted(),
            ..self.clone()
        };
        let body = toml::to_string_pretty(&display).map_err(|e| ConfigError::Render(e.to_string()))?;
        Ok(format!("# twinstore configuration\n\n{body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TwinConfig::default();
        assert_eq!(config.bind.http_port, 3000);
        assert_eq!(config.content_store.stat_timeout_ms, 3000);
        assert_eq!(config.read.mode, ReadMode::Url);
        assert!(!config.orchestrator.compensate_failed_create);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_bucket() {
        let mut config = TwinConfig::default();
        config.object_store.bucket = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = TwinConfig::default();
        config.content_store.stat_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stat_timeout_ms"));
    }

    #[test]
    fn test_to_toml_redacts_secret() {
        let mut config = TwinConfig::default();
        config.object_store.secret_access_key = "hunter2".to_string();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[object_store]"));
        assert!(toml.contains("[content_store]"));
        assert!(!toml.contains("hunter2"));
        assert!(toml.contains(REDACTED));
    }

    #[test]
    fn test_to_toml_parses_back() {
        let config = TwinConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed: TwinConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
