//! Infrastructure layer for Threadline.
//!
//! Contains the Redis implementation of the `ConversationBackend` trait
//! defined in `threadline-core` (pooled connections, Lua compare-and-swap),
//! and the configuration loader (TOML file plus `REDIS_*` environment
//! overrides).

pub mod config;
pub mod redis;
