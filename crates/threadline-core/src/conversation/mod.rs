//! Channel/thread-scoped conversation history.
//!
//! Defines the backend trait and the store built on it.
//! Backend implementations live in threadline-infra; an in-memory backend is
//! provided here for tests and local runs.

pub mod backend;
pub mod codec;
pub mod context;
pub mod memory;
pub mod store;
