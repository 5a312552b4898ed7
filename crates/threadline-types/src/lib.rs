//! Shared domain types for Threadline.
//!
//! This crate contains the domain types used across the Threadline workspace:
//! conversation keys, turns and records, the degraded-mode outcome wrapper,
//! configuration, and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod conversation;
pub mod error;
pub mod outcome;
