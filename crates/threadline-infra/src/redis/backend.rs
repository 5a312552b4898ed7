//! Redis implementation of `ConversationBackend`.
//!
//! Values are stored as plain strings (binary-safe). The compare-and-swap is a
//! Lua script so the read, comparison, and `SET ... EX` happen atomically on
//! the server, which serializes concurrent appends from any number of
//! processes without client-side locks.

use std::sync::LazyLock;
use std::time::Duration;

use threadline_core::conversation::backend::ConversationBackend;
use threadline_types::conversation::Expiry;
use threadline_types::error::BackendError;

use super::pool::{RedisPool, map_redis_error};

/// KEYS[1] = key; ARGV[1] = "1" if a current value is expected, "0" if the key
/// must be absent; ARGV[2] = expected bytes; ARGV[3] = new bytes; ARGV[4] = ttl
/// seconds. Returns 1 when written, 0 when the comparison failed.
const CAS_SOURCE: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= ARGV[2] then
    return 0
  end
elseif current then
  return 0
end
redis.call('SET', KEYS[1], ARGV[3], 'EX', ARGV[4])
return 1
";

static CAS_SCRIPT: LazyLock<::redis::Script> = LazyLock::new(|| ::redis::Script::new(CAS_SOURCE));

/// Conversation backend over a pooled Redis connection.
#[derive(Clone)]
pub struct RedisConversationBackend {
    pool: RedisPool,
}

impl RedisConversationBackend {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }
}

/// Redis rejects `EX 0`; sub-second TTLs round up to one second.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Interpret a `PTTL` reply.
fn expiry_from_pttl(pttl: i64) -> Expiry {
    match pttl {
        -2 => Expiry::Missing,
        ms if ms < 0 => Expiry::Persistent,
        ms => Expiry::Remaining(Duration::from_millis(ms.unsigned_abs())),
    }
}

impl ConversationBackend for RedisConversationBackend {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let mut conn = self.pool.get().await?;
        let value: Option<Vec<u8>> = ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(value)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        let mut invocation = CAS_SCRIPT.prepare_invoke();
        invocation
            .key(key)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(value)
            .arg(ttl_secs(ttl));

        let mut conn = self.pool.get().await?;
        let written: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(written == 1)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, BackendError> {
        let mut conn = self.pool.get().await?;
        let updated: i64 = ::redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(updated == 1)
    }

    async fn expiry(&self, key: &str) -> Result<Expiry, BackendError> {
        let mut conn = self.pool.get().await?;
        let pttl: i64 = ::redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(expiry_from_pttl(pttl))
    }

    async fn remove(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = ::redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.pool.get().await?;
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadline_core::conversation::store::ConversationStore;
    use threadline_types::config::StoreConfig;
    use threadline_types::conversation::{ConversationKey, Turn};

    #[test]
    fn test_expiry_from_pttl() {
        assert_eq!(expiry_from_pttl(-2), Expiry::Missing);
        assert_eq!(expiry_from_pttl(-1), Expiry::Persistent);
        assert_eq!(
            expiry_from_pttl(1_500),
            Expiry::Remaining(Duration::from_millis(1_500))
        );
    }

    #[test]
    fn test_ttl_secs_rounds_up_to_one() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(86_400)), 86_400);
    }

    // The tests below need a live server:
    // THREADLINE_TEST_REDIS_URL=redis://localhost:6379/15 cargo test -- --ignored

    async fn live_backend() -> RedisConversationBackend {
        let raw = std::env::var("THREADLINE_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379/15".to_string());
        let url = url::Url::parse(&raw).unwrap();
        let config = StoreConfig {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(6379),
            password: url.password().map(str::to_string),
            tls: url.scheme() == "rediss",
            database: url.path().trim_start_matches('/').parse().unwrap_or(0),
            ..StoreConfig::default()
        };
        RedisConversationBackend::new(RedisPool::connect(&config).await.unwrap())
    }

    fn unique_key(name: &str) -> String {
        format!("threadline-test:{name}:{}", uuid::Uuid::now_v7().simple())
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_compare_and_swap() {
        let backend = live_backend().await;
        let key = unique_key("cas");
        let ttl = Duration::from_secs(30);

        assert!(backend.compare_and_swap(&key, None, b"one", ttl).await.unwrap());
        assert!(!backend.compare_and_swap(&key, None, b"two", ttl).await.unwrap());
        assert!(!backend.compare_and_swap(&key, Some(&b"stale"[..]), b"two", ttl).await.unwrap());
        assert!(backend.compare_and_swap(&key, Some(&b"one"[..]), b"two", ttl).await.unwrap());
        assert_eq!(backend.load(&key).await.unwrap().as_deref(), Some(&b"two"[..]));

        match backend.expiry(&key).await.unwrap() {
            Expiry::Remaining(left) => assert!(left <= ttl),
            other => panic!("expected a TTL, got {other:?}"),
        }

        assert!(backend.remove(&key).await.unwrap());
        assert!(!backend.remove(&key).await.unwrap());
        assert_eq!(backend.expiry(&key).await.unwrap(), Expiry::Missing);
        assert!(!backend.expire(&key, ttl).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_store_round_trip() {
        let backend = live_backend().await;
        backend.ping().await.unwrap();

        let store = ConversationStore::new(backend, StoreConfig::default());
        let channel = unique_key("channel").replace(':', "-");
        let key = ConversationKey::thread(channel, "T1").unwrap();

        let receipt = store.append(&key, Turn::user("hello", 100.0)).await.unwrap();
        assert!(!receipt.is_degraded());
        store.append(&key, Turn::assistant("hi there", 101.0)).await.unwrap();

        let record = store.get(&key).await.into_value();
        let contents: Vec<_> = record.turns().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["hello", "hi there"]);

        assert!(store.delete(&key).await.unwrap());
        assert!(store.get(&key).await.into_value().is_empty());
    }
}
