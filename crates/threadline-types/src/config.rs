//! Configuration types for Threadline.
//!
//! `GlobalConfig` represents the top-level `config.toml`: backend connection
//! settings, store tuning, and logging output. All fields have defaults.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conversation::DEFAULT_KEY_PREFIX;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What to do with a turn whose timestamp is older than the last stored turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampPolicy {
    /// Store the turn with the last stored timestamp.
    #[default]
    Clamp,
    /// Refuse the append with `InvalidInput::TimestampRegression`.
    Reject,
}

/// Backend connection and conversation store settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    /// Connect with TLS (`rediss://`).
    #[serde(default)]
    pub tls: bool,

    /// Logical database index.
    #[serde(default)]
    pub database: i64,

    /// Record lifetime, reset on every successful read or append.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Bound on every individual backend call.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Immediate retries after a failed backend call before degrading.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Compare-and-swap attempts lost to concurrent writers before degrading.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default)]
    pub timestamp_policy: TimestampPolicy,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_ttl_secs() -> u64 {
    86_400
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_command_timeout_ms() -> u64 {
    2_000
}

fn default_max_retries() -> u32 {
    1
}

fn default_max_conflict_retries() -> u32 {
    32
}

fn default_pool_size() -> usize {
    16
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            tls: false,
            database: 0,
            ttl_secs: default_ttl_secs(),
            key_prefix: default_key_prefix(),
            command_timeout_ms: default_command_timeout_ms(),
            max_retries: default_max_retries(),
            max_conflict_retries: default_max_conflict_retries(),
            pool_size: default_pool_size(),
            timestamp_policy: TimestampPolicy::default(),
        }
    }
}

impl StoreConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

// Hand-written so the password never reaches logs.
impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("tls", &self.tls)
            .field("database", &self.database)
            .field("ttl_secs", &self.ttl_secs)
            .field("key_prefix", &self.key_prefix)
            .field("command_timeout_ms", &self.command_timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("max_conflict_retries", &self.max_conflict_retries)
            .field("pool_size", &self.pool_size)
            .field("timestamp_policy", &self.timestamp_policy)
            .finish()
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit newline-delimited JSON instead of human-readable lines.
    #[serde(default)]
    pub json: bool,

    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}
