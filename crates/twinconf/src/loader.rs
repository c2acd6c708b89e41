//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, ReadMode, TwinConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/twinstore/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("twinstore/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        let path = expand_home(path);
        if path.exists() {
            files.push(path);
            return files;
        }
    }

    let local = PathBuf::from("twinstore.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load and deep-merge the given files over the compiled defaults.
pub fn load_files(files: &[PathBuf]) -> Result<(TwinConfig, ConfigSources), ConfigError> {
    let mut sources = ConfigSources::default();
    let mut merged = toml::Table::new();

    for path in files {
        let table = read_table(path)?;
        merge_tables(&mut merged, table);
        sources.files.push(path.clone());
    }

    let config: TwinConfig = toml::Value::Table(merged)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: files.last().cloned().unwrap_or_default(),
            message: e.to_string(),
        })?;

    Ok((config, sources))
}

/// Read one file as a TOML table, checking it against the config schema so
/// errors name the file that caused them.
pub fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    toml::Value::Table(table.clone())
        .try_into::<TwinConfig>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(table)
}

/// Merge `overlay` into `base`; nested tables merge key by key, anything else
/// in `overlay` replaces what `base` had.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, incoming);
                } else {
                    base.insert(key, toml::Value::Table(incoming));
                }
            }
            other => {
                base.insert(key, other);
            }
        }
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut TwinConfig, sources: &mut ConfigSources) {
    apply_overrides_with(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary lookup. Later names in each list win.
pub fn apply_overrides_with<F>(config: &mut TwinConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut take = |names: &[&str]| -> Option<String> {
        let mut found = None;
        for name in names {
            if let Some(v) = lookup(name) {
                sources.env_overrides.push((*name).to_string());
                found = Some(v);
            }
        }
        found
    };

    // Bind
    if let Some(port) = take(&["TWINSTORE_HTTP_PORT"]).and_then(|v| v.parse().ok()) {
        config.bind.http_port = port;
    }
    if let Some(max) = take(&["TWINSTORE_MAX_UPLOAD_BYTES"]).and_then(|v| v.parse().ok()) {
        config.bind.max_upload_bytes = max;
    }

    // Content store
    if let Some(v) = take(&["TWINSTORE_IPFS_API"]) {
        config.content_store.api_url = v;
    }
    if let Some(ms) = take(&["TWINSTORE_IPFS_STAT_TIMEOUT_MS"]).and_then(|v| v.parse().ok()) {
        config.content_store.stat_timeout_ms = ms;
    }
    if let Some(ms) = take(&["TWINSTORE_IPFS_TIMEOUT_MS"]).and_then(|v| v.parse().ok()) {
        config.content_store.request_timeout_ms = ms;
    }

    // Object store (standard AWS names first so ours win)
    if let Some(v) = take(&["TWINSTORE_S3_BUCKET"]) {
        config.object_store.bucket = v;
    }
    if let Some(v) = take(&["AWS_REGION", "TWINSTORE_S3_REGION"]) {
        config.object_store.region = v;
    }
    if let Some(v) = take(&["TWINSTORE_S3_ENDPOINT"]) {
        config.object_store.endpoint = if v.is_empty() { None } else { Some(v) };
    }
    if let Some(v) = take(&["TWINSTORE_S3_FORCE_PATH_STYLE"]).and_then(|v| parse_bool(&v)) {
        config.object_store.force_path_style = v;
    }
    if let Some(v) = take(&["AWS_ACCESS_KEY_ID", "TWINSTORE_S3_ACCESS_KEY_ID"]) {
        config.object_store.access_key_id = v;
    }
    if let Some(v) = take(&["AWS_SECRET_ACCESS_KEY", "TWINSTORE_S3_SECRET_ACCESS_KEY"]) {
        config.object_store.secret_access_key = v;
    }
    if let Some(ms) = take(&["TWINSTORE_S3_TIMEOUT_MS"]).and_then(|v| v.parse().ok()) {
        config.object_store.timeout_ms = ms;
    }

    // Read path
    if let Some(mode) = take(&["TWINSTORE_READ_MODE"]).and_then(|v| v.parse::<ReadMode>().ok()) {
        config.read.mode = mode;
    }
    if let Some(v) = take(&["TWINSTORE_GATEWAY_URL"]) {
        config.read.gateway_url = v;
    }

    if let Some(v) = take(&["TWINSTORE_COMPENSATE"]).and_then(|v| parse_bool(&v)) {
        config.orchestrator.compensate_failed_create = v;
    }

    // Telemetry
    if let Some(v) = take(&["OTEL_EXPORTER_OTLP_ENDPOINT", "TWINSTORE_OTLP_ENDPOINT"]) {
        config.telemetry.otlp_endpoint = v;
    }
    if let Some(v) = take(&["RUST_LOG", "TWINSTORE_LOG_LEVEL"]) {
        config.telemetry.log_level = v;
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix("~/")) {
        Some(rest) => directories::BaseDirs::new()
            .map(|d| d.home_dir().join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        None => path.to_path_buf(),
    }
}
