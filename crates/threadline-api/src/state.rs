//! Application state wiring the store to its backend.
//!
//! The store is generic over `ConversationBackend`; AppState pins it to the
//! Redis implementation and owns the pool lifecycle.

use std::sync::Arc;

use threadline_core::conversation::store::ConversationStore;
use threadline_infra::redis::{RedisConversationBackend, RedisPool};
use threadline_types::config::GlobalConfig;

/// Concrete store type pinned to the Redis backend.
pub type ConcreteConversationStore = ConversationStore<RedisConversationBackend>;

/// Shared application state used by every CLI command.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConcreteConversationStore>,
    pub pool: RedisPool,
}

impl AppState {
    /// Build the pool and wire the store.
    ///
    /// The pool connects lazily so that commands still run, degraded, while
    /// the backend is down. `ping` is the explicit reachability check.
    pub fn init(config: GlobalConfig) -> anyhow::Result<Self> {
        let pool = RedisPool::build(&config.store)?;
        tracing::debug!(store = ?config.store, "Conversation store configured");

        let backend = RedisConversationBackend::new(pool.clone());
        let store = ConversationStore::new(backend, config.store);

        Ok(Self {
            store: Arc::new(store),
            pool,
        })
    }

    /// Release backend connections.
    pub fn close(&self) {
        self.pool.close();
    }
}
