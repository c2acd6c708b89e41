//! Configuration sections. Every field has a compiled default so a partial
//! TOML file (or none at all) still yields a usable config.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Placeholder written in place of secrets when a config is displayed.
pub const REDACTED: &str = "<redacted>";

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    /// Port for the HTTP surface.
    /// Default: 3000
    pub http_port: u16,

    /// Largest accepted upload body, in bytes.
    /// Default: 64 MiB
    pub max_upload_bytes: usize,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            http_port: 3000,
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

/// IPFS-compatible node reached over its HTTP RPC API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentStoreConfig {
    /// Base URL of the node's RPC API (without `/api/v0`).
    /// Default: http://127.0.0.1:5001
    pub api_url: String,

    /// Bound on `block/stat` lookups.
    /// Default: 3000
    pub stat_timeout_ms: u64,

    /// Bound on every other call (add, cat, pin/rm, repo/gc).
    /// Default: 30000
    pub request_timeout_ms: u64,
}

impl ContentStoreConfig {
    pub fn stat_timeout(&self) -> Duration {
        Duration::from_millis(self.stat_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:5001".to_string(),
            stat_timeout_ms: 3000,
            request_timeout_ms: 30_000,
        }
    }
}

/// S3-compatible object store.
///
/// Credentials are injected here and nowhere else. `Debug` never prints them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: String,

    /// Custom endpoint for MinIO and friends. `None` means AWS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`.
    pub force_path_style: bool,

    pub access_key_id: String,
    pub secret_access_key: String,

    /// Per-operation bound for put, list and delete.
    /// Default: 30000
    pub timeout_ms: u64,
}

impl ObjectStoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Copy with the secret replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.secret_access_key.is_empty() {
            copy.secret_access_key = REDACTED.to_string();
        }
        copy
    }
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            bucket: "twinstore".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            force_path_style: false,
            access_key_id: String::new(),
            secret_access_key: String::new(),
            timeout_ms: 30_000,
        }
    }
}

impl fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("force_path_style", &self.force_path_style)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &REDACTED)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// How `getFile` hands content back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Return a public gateway URL for the identifier.
    #[default]
    Url,
    /// Fetch the bytes from the node and return them in the response.
    Inline,
}

impl std::str::FromStr for ReadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "url" => Ok(ReadMode::Url),
            "inline" => Ok(ReadMode::Inline),
            other => Err(format!("unknown read mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    pub mode: ReadMode,

    /// Public gateway used to build read URLs.
    /// Default: https://ipfs.io
    pub gateway_url: String,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            mode: ReadMode::Url,
            gateway_url: "https://ipfs.io".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Unpin the content-store copy when the object-store write of a create
    /// fails. Off by default: the pinned orphan is left in place.
    pub compensate_failed_create: bool,
}

/// Telemetry and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint (host:port). Empty disables export.
    pub otlp_endpoint: String,

    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    /// Default: info
    pub log_level: String,
}

impl TelemetryConfig {
    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: "info".to_string(),
        }
    }
}
