//! Redis connection pool.
//!
//! Wraps a `deadpool-redis` pool built from `StoreConfig`. Connections are
//! checked out per call and returned on drop, including on error paths. The
//! pool is created once at process start, injected into the backend, and
//! closed explicitly at shutdown.

use std::time::Duration;

use deadpool_redis::{Config, Connection, PoolConfig, PoolError, Runtime, Timeouts};
use secrecy::{ExposeSecret, SecretString};
use threadline_types::config::StoreConfig;
use threadline_types::error::BackendError;
use tracing::info;
use url::Url;

/// Shared, cloneable handle to the Redis connection pool.
#[derive(Clone)]
pub struct RedisPool {
    inner: deadpool_redis::Pool,
    timeout: Duration,
}

impl RedisPool {
    /// Build the pool and verify the backend answers `PING`.
    pub async fn connect(config: &StoreConfig) -> Result<Self, BackendError> {
        let pool = Self::build(config)?;
        let mut conn = pool.get().await?;
        let pong: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        drop(conn);

        info!(
            host = %config.host,
            port = config.port,
            database = config.database,
            tls = config.tls,
            pool_size = config.pool_size,
            reply = %pong,
            "Redis connection pool initialized"
        );
        Ok(pool)
    }

    /// Build the pool without contacting the backend.
    ///
    /// Connections are established lazily on first use.
    pub fn build(config: &StoreConfig) -> Result<Self, BackendError> {
        let url = connection_url(config)?;
        let timeout = config.command_timeout();

        let mut pool_config = PoolConfig::new(config.pool_size.max(1));
        pool_config.timeouts = Timeouts {
            wait: Some(timeout),
            create: Some(timeout),
            recycle: Some(timeout),
        };

        let mut cfg = Config::from_url(url.expose_secret());
        cfg.pool = Some(pool_config);
        let inner = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BackendError::Connection(format!("failed to create pool: {e}")))?;

        Ok(Self { inner, timeout })
    }

    /// Check out a connection. It returns to the pool when dropped.
    pub async fn get(&self) -> Result<Connection, BackendError> {
        self.inner.get().await.map_err(|e| self.map_pool_error(e))
    }

    /// Close the pool. Checked-out connections are dropped on return.
    pub fn close(&self) {
        self.inner.close();
        info!("Redis connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn map_pool_error(&self, err: PoolError) -> BackendError {
        match err {
            PoolError::Timeout(_) => BackendError::Timeout(self.timeout),
            PoolError::Backend(e) => map_redis_error(e),
            other => BackendError::Connection(other.to_string()),
        }
    }
}

/// Classify a client error. Transport failures are connection errors;
/// everything the server rejected is a command error.
pub(crate) fn map_redis_error(err: ::redis::RedisError) -> BackendError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
        BackendError::Connection(err.to_string())
    } else {
        BackendError::Command(err.to_string())
    }
}

/// Build `redis[s]://[:password@]host:port/db`. The result carries the
/// password, so it stays wrapped.
pub fn connection_url(config: &StoreConfig) -> Result<SecretString, BackendError> {
    let scheme = if config.tls { "rediss" } else { "redis" };
    let mut url = Url::parse(&format!(
        "{scheme}://{}:{}/{}",
        config.host, config.port, config.database
    ))
    .map_err(|e| BackendError::Connection(format!("invalid backend address: {e}")))?;

    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        url.set_password(Some(password))
            .map_err(|()| BackendError::Connection("backend address cannot carry a password".to_string()))?;
    }

    Ok(SecretString::from(String::from(url)))
}
