//! Global configuration loader for Threadline.
//!
//! Reads `config.toml` (from `--config`, `$THREADLINE_CONFIG`, or the data
//! directory) and deserializes it into [`GlobalConfig`]. Falls back to
//! defaults when the file is missing or malformed, then applies the `REDIS_*`
//! environment overrides used by existing deployments.

use std::path::{Path, PathBuf};

use threadline_types::config::{GlobalConfig, StoreConfig};

/// Resolve the data directory.
///
/// Priority: `THREADLINE_DATA_DIR`, then `~/.threadline`, then `.threadline`
/// in the current directory.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("THREADLINE_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".threadline");
    }

    PathBuf::from(".threadline")
}

/// Resolve which config file to read.
///
/// An explicit path wins, then `THREADLINE_CONFIG`, then
/// `{data_dir}/config.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("THREADLINE_CONFIG") {
        return PathBuf::from(path);
    }
    resolve_data_dir().join("config.toml")
}

/// Load global configuration from `path`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_global_config(path: &Path) -> GlobalConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file found at {}, using defaults", path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(mut config) => {
            enforce_minimums(&mut config.store);
            config
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            GlobalConfig::default()
        }
    }
}

/// Replace zero `ttl_secs` / `command_timeout_ms` with their defaults.
///
/// A zero TTL would expire records as they are written and a zero timeout
/// would fail every backend call.
fn enforce_minimums(store: &mut StoreConfig) {
    let defaults = StoreConfig::default();
    if store.ttl_secs == 0 {
        tracing::warn!(default = defaults.ttl_secs, "store.ttl_secs must be positive, using default");
        store.ttl_secs = defaults.ttl_secs;
    }
    if store.command_timeout_ms == 0 {
        tracing::warn!(
            default = defaults.command_timeout_ms,
            "store.command_timeout_ms must be positive, using default"
        );
        store.command_timeout_ms = defaults.command_timeout_ms;
    }
}

/// Apply `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`, `REDIS_DB`, `REDIS_SSL`,
/// and `REDIS_TTL` on top of `config`.
///
/// `lookup` is normally `std::env::var(..).ok()`. Values that fail to parse
/// are ignored with a warning.
pub fn apply_env_overrides(config: &mut GlobalConfig, lookup: impl Fn(&str) -> Option<String>) {
    let store = &mut config.store;

    if let Some(host) = lookup("REDIS_HOST").filter(|h| !h.trim().is_empty()) {
        store.host = host.trim().to_string();
    }
    if let Some(port) = parse_override(&lookup, "REDIS_PORT", |v| v.parse::<u16>().ok()) {
        store.port = port;
    }
    if let Some(password) = lookup("REDIS_PASSWORD") {
        store.password = Some(password).filter(|p| !p.is_empty());
    }
    if let Some(db) = parse_override(&lookup, "REDIS_DB", |v| v.parse::<i64>().ok().filter(|d| *d >= 0)) {
        store.database = db;
    }
    if let Some(tls) = parse_override(&lookup, "REDIS_SSL", parse_bool) {
        store.tls = tls;
    }
    if let Some(ttl) = parse_override(&lookup, "REDIS_TTL", |v| v.parse::<u64>().ok().filter(|t| *t > 0)) {
        store.ttl_secs = ttl;
    }
}

/// Resolve, load, and apply process environment overrides.
pub async fn load_config(explicit: Option<&Path>) -> GlobalConfig {
    let path = resolve_config_path(explicit);
    let mut config = load_global_config(&path).await;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

fn parse_override<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(name)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        tracing::warn!(variable = name, value = %raw, "Ignoring unparseable environment override");
    }
    parsed
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
