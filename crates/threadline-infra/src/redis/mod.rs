//! Redis-backed conversation persistence.
//!
//! `RedisPool` owns the connection pool and its lifecycle;
//! `RedisConversationBackend` implements `ConversationBackend` on top of it.

pub mod backend;
pub mod pool;

pub use backend::RedisConversationBackend;
pub use pool::RedisPool;
