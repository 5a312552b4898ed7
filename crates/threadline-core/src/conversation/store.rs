//! Conversation store: TTL-bound history with graceful degradation.
//!
//! `ConversationStore` wraps a `ConversationBackend` and enforces the
//! persistence contract:
//! - every backend call is bounded by a timeout and retried a small, fixed
//!   number of times;
//! - reads and appends refresh the record's TTL;
//! - appends are an optimistic compare-and-swap on the encoded record, so
//!   concurrent writers in other processes never lose a turn;
//! - backend and decode failures on the reply path degrade to an empty (but
//!   valid) result plus a warning instead of an error.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use threadline_types::config::{StoreConfig, TimestampPolicy};
use threadline_types::conversation::{ConversationKey, ConversationRecord, Expiry, Turn};
use threadline_types::error::{BackendError, ConversationError, InvalidInput};
use threadline_types::outcome::{DegradedReason, Outcome};
use tracing::{debug, info, warn};

use super::backend::ConversationBackend;
use super::codec;

/// Result of a successful append.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppendReceipt {
    /// Length of the record after the append.
    pub turn_count: usize,
    /// Timestamp the turn was stored with.
    pub timestamp: f64,
    /// Whether the timestamp was raised to keep the record ordered.
    pub clamped: bool,
}

/// Channel/thread-scoped conversation history on top of a key-value backend.
///
/// Generic over `ConversationBackend` to keep the store free of network
/// dependencies (threadline-core never depends on threadline-infra).
pub struct ConversationStore<B: ConversationBackend> {
    backend: B,
    config: StoreConfig,
}

impl<B: ConversationBackend> ConversationStore<B> {
    /// Create a store over an already-connected backend.
    pub fn new(backend: B, config: StoreConfig) -> Self {
        Self { backend, config }
    }

    /// Access the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Backend key for a conversation.
    pub fn storage_key(&self, key: &ConversationKey) -> String {
        key.storage_key(&self.config.key_prefix)
    }

    // --- Reply path (degrading) ---

    /// Fetch the history for `key`.
    ///
    /// A missing record is a normal, healthy empty history. Backend and decode
    /// failures yield an empty degraded record. A successful read refreshes
    /// the TTL; if only that refresh fails, the record is still returned,
    /// marked degraded.
    pub async fn get(&self, key: &ConversationKey) -> Outcome<ConversationRecord> {
        let storage_key = self.storage_key(key);

        let bytes = match self.call("get", &storage_key, || self.backend.load(&storage_key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Outcome::Healthy(ConversationRecord::default()),
            Err(err) => {
                let reason = DegradedReason::from(err);
                warn!(
                    event = reason.kind(),
                    conversation = %key,
                    error = %reason,
                    "Conversation history unavailable, continuing without it"
                );
                return Outcome::degraded(ConversationRecord::default(), reason);
            }
        };

        let record = match codec::decode(&bytes) {
            Ok(record) => record,
            Err(err) => {
                warn!(
                    event = "decode_failure",
                    conversation = %key,
                    error = %err,
                    bytes = bytes.len(),
                    "Stored conversation is unreadable, treating as empty"
                );
                return Outcome::degraded(ConversationRecord::default(), err);
            }
        };

        let ttl = self.config.ttl();
        match self
            .call("expire", &storage_key, || self.backend.expire(&storage_key, ttl))
            .await
        {
            Ok(_) => {
                debug!(conversation = %key, turns = record.len(), "Loaded conversation");
                Outcome::Healthy(record)
            }
            Err(err) => {
                let reason = DegradedReason::from(err);
                warn!(
                    event = reason.kind(),
                    conversation = %key,
                    error = %reason,
                    "Loaded conversation but could not refresh its TTL"
                );
                Outcome::degraded(record, reason)
            }
        }
    }

    /// Append a turn to the history for `key`.
    ///
    /// Invalid turns are rejected before touching the backend. Backend
    /// failures drop the turn and return a degraded outcome; they never fail
    /// the caller.
    pub async fn append(
        &self,
        key: &ConversationKey,
        turn: Turn,
    ) -> Result<Outcome<AppendReceipt>, ConversationError> {
        turn.validate()?;
        let storage_key = self.storage_key(key);
        let ttl = self.config.ttl();
        let mut conflicts: u32 = 0;

        loop {
            let current = match self
                .call("append", &storage_key, || self.backend.load(&storage_key))
                .await
            {
                Ok(current) => current,
                Err(err) => return Ok(self.drop_turn(key, err)),
            };

            let mut record = match current.as_deref().map(codec::decode) {
                None => ConversationRecord::default(),
                Some(Ok(record)) => record,
                Some(Err(err)) => {
                    warn!(
                        event = "decode_failure",
                        conversation = %key,
                        error = %err,
                        "Replacing unreadable conversation record"
                    );
                    ConversationRecord::default()
                }
            };

            // A previous attempt may have landed even though its reply was lost.
            if let Some(existing) = record.turns().iter().find(|t| t.id == turn.id) {
                let stored = existing.timestamp;
                let receipt = AppendReceipt {
                    turn_count: record.len(),
                    timestamp: stored,
                    clamped: stored != turn.timestamp,
                };
                return Ok(self.refresh_after_redelivery(key, &storage_key, receipt).await);
            }

            let (stamped, clamped) = self.admit(key, &record, turn.clone())?;
            let timestamp = stamped.timestamp;
            record.push(stamped);

            let encoded = match codec::encode(&record) {
                Ok(encoded) => encoded,
                Err(err) => {
                    warn!(
                        event = "decode_failure",
                        conversation = %key,
                        error = %err,
                        "Could not encode conversation record"
                    );
                    return Ok(Outcome::degraded(AppendReceipt::default(), err));
                }
            };

            let swapped = self
                .call("append", &storage_key, || {
                    self.backend
                        .compare_and_swap(&storage_key, current.as_deref(), &encoded, ttl)
                })
                .await;

            match swapped {
                Ok(true) => {
                    debug!(conversation = %key, turns = record.len(), "Appended turn");
                    return Ok(Outcome::Healthy(AppendReceipt {
                        turn_count: record.len(),
                        timestamp,
                        clamped,
                    }));
                }
                Ok(false) => {
                    conflicts += 1;
                    if conflicts > self.config.max_conflict_retries {
                        let reason = DegradedReason::Contention {
                            attempts: conflicts,
                        };
                        warn!(
                            event = reason.kind(),
                            conversation = %key,
                            attempts = conflicts,
                            "Dropping turn after repeated write conflicts"
                        );
                        return Ok(Outcome::degraded(AppendReceipt::default(), reason));
                    }
                    debug!(
                        event = "conflict_retry",
                        conversation = %key,
                        attempt = conflicts,
                        "Concurrent write detected, retrying append"
                    );
                }
                Err(err) => return Ok(self.drop_turn(key, err)),
            }
        }
    }

    /// Reset the TTL of an existing record. Returns whether it existed.
    pub async fn touch(&self, key: &ConversationKey) -> Outcome<bool> {
        let storage_key = self.storage_key(key);
        let ttl = self.config.ttl();
        match self
            .call("touch", &storage_key, || self.backend.expire(&storage_key, ttl))
            .await
        {
            Ok(existed) => {
                debug!(conversation = %key, existed, ttl_secs = ttl.as_secs(), "Extended conversation TTL");
                Outcome::Healthy(existed)
            }
            Err(err) => {
                let reason = DegradedReason::from(err);
                warn!(
                    event = reason.kind(),
                    conversation = %key,
                    error = %reason,
                    "Could not extend conversation TTL"
                );
                Outcome::degraded(false, reason)
            }
        }
    }

    // --- Operator actions (failures surface) ---

    /// Remove the record immediately, regardless of its remaining TTL.
    pub async fn delete(&self, key: &ConversationKey) -> Result<bool, ConversationError> {
        let storage_key = self.storage_key(key);
        let existed = self
            .call("delete", &storage_key, || self.backend.remove(&storage_key))
            .await
            .inspect_err(|err| {
                warn!(
                    event = "backend_unavailable",
                    conversation = %key,
                    error = %err,
                    "Failed to delete conversation"
                );
            })?;

        if existed {
            info!(conversation = %key, "Deleted conversation");
        } else {
            info!(event = "delete_missing", conversation = %key, "No conversation to delete");
        }
        Ok(existed)
    }

    /// Remaining lifetime of the record.
    pub async fn expiry(&self, key: &ConversationKey) -> Result<Expiry, ConversationError> {
        let storage_key = self.storage_key(key);
        Ok(self
            .call("expiry", &storage_key, || self.backend.expiry(&storage_key))
            .await?)
    }

    /// Check that the backend answers.
    pub async fn ping(&self) -> Result<(), ConversationError> {
        Ok(self.call("ping", "", || self.backend.ping()).await?)
    }

    // --- Internals ---

    /// Apply the timestamp policy and stamp `stored_at`.
    fn admit(
        &self,
        key: &ConversationKey,
        record: &ConversationRecord,
        mut turn: Turn,
    ) -> Result<(Turn, bool), InvalidInput> {
        let mut clamped = false;
        if let Some(last) = record.last() {
            if turn.timestamp < last.timestamp {
                match self.config.timestamp_policy {
                    TimestampPolicy::Reject => {
                        return Err(InvalidInput::TimestampRegression {
                            last: last.timestamp,
                            given: turn.timestamp,
                        });
                    }
                    TimestampPolicy::Clamp => {
                        debug!(
                            conversation = %key,
                            given = turn.timestamp,
                            last = last.timestamp,
                            "Clamping out-of-order turn timestamp"
                        );
                        turn.timestamp = last.timestamp;
                        clamped = true;
                    }
                }
            }
        }
        turn.stored_at = Some(Utc::now());
        Ok((turn, clamped))
    }

    /// A redelivered turn still counts as an append, so the TTL is reset.
    async fn refresh_after_redelivery(
        &self,
        key: &ConversationKey,
        storage_key: &str,
        receipt: AppendReceipt,
    ) -> Outcome<AppendReceipt> {
        let ttl = self.config.ttl();
        match self
            .call("append", storage_key, || self.backend.expire(storage_key, ttl))
            .await
        {
            Ok(_) => {
                debug!(conversation = %key, turns = receipt.turn_count, "Turn already stored");
                Outcome::Healthy(receipt)
            }
            Err(err) => {
                let reason = DegradedReason::from(err);
                warn!(
                    event = reason.kind(),
                    conversation = %key,
                    error = %reason,
                    "Turn already stored but could not refresh its TTL"
                );
                Outcome::degraded(receipt, reason)
            }
        }
    }

    fn drop_turn(&self, key: &ConversationKey, err: BackendError) -> Outcome<AppendReceipt> {
        let reason = DegradedReason::from(err);
        warn!(
            event = reason.kind(),
            conversation = %key,
            error = %reason,
            "Conversation backend unavailable, turn not persisted"
        );
        Outcome::degraded(AppendReceipt::default(), reason)
    }

    /// Run one backend call under the configured timeout, retrying failures
    /// immediately up to `max_retries` times.
    async fn call<T, F, Fut>(&self, op: &'static str, storage_key: &str, mut f: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let timeout = self.config.command_timeout();
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(timeout)),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.is_timeout() {
                warn!(
                    event = "timeout",
                    op,
                    key = storage_key,
                    attempt,
                    timeout_ms = duration_ms(timeout),
                    "Conversation backend call timed out"
                );
            }

            if attempt >= self.config.max_retries {
                return Err(err);
            }
            attempt += 1;
            debug!(op, key = storage_key, attempt, error = %err, "Retrying conversation backend call");
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use threadline_types::conversation::{MetadataValue, Role};
    use threadline_types::error::DecodeError;

    use super::*;
    use crate::conversation::memory::{FaultMode, InMemoryBackend};

    const TTL: Duration = Duration::from_secs(86_400);

    fn test_store() -> ConversationStore<InMemoryBackend> {
        ConversationStore::new(InMemoryBackend::new(), StoreConfig::default())
    }

    fn key() -> ConversationKey {
        ConversationKey::thread("C1", "T1").unwrap()
    }

    fn contents(record: &ConversationRecord) -> Vec<&str> {
        record.turns().iter().map(|t| t.content.as_str()).collect()
    }

    /// Backend wrapper that can let a rival writer win the race on the first
    /// N swaps, or refuse TTL refreshes.
    struct ScriptedBackend {
        inner: InMemoryBackend,
        rival_writes: AtomicU32,
        refuse_expire: AtomicBool,
    }

    impl ScriptedBackend {
        fn new(rival_writes: u32) -> Self {
            Self {
                inner: InMemoryBackend::new(),
                rival_writes: AtomicU32::new(rival_writes),
                refuse_expire: AtomicBool::new(false),
            }
        }
    }

    impl ConversationBackend for ScriptedBackend {
        async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
            self.inner.load(key).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: Option<&[u8]>,
            value: &[u8],
            ttl: Duration,
        ) -> Result<bool, BackendError> {
            let remaining = self.rival_writes.load(Ordering::SeqCst);
            if remaining > 0 {
                self.rival_writes.store(remaining - 1, Ordering::SeqCst);
                let mut rival = match expected {
                    Some(bytes) => codec::decode(bytes).unwrap(),
                    None => ConversationRecord::default(),
                };
                rival.push(Turn::user(format!("rival {remaining}"), 0.0));
                let encoded = codec::encode(&rival).unwrap();
                assert!(self.inner.compare_and_swap(key, expected, &encoded, ttl).await?);
            }
            self.inner.compare_and_swap(key, expected, value, ttl).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, BackendError> {
            if self.refuse_expire.load(Ordering::SeqCst) {
                return Err(BackendError::Command("READONLY".to_string()));
            }
            self.inner.expire(key, ttl).await
        }

        async fn expiry(&self, key: &str) -> Result<Expiry, BackendError> {
            self.inner.expiry(key).await
        }

        async fn remove(&self, key: &str) -> Result<bool, BackendError> {
            self.inner.remove(key).await
        }

        async fn ping(&self) -> Result<(), BackendError> {
            self.inner.ping().await
        }
    }

    fn scripted_store(rival_writes: u32, max_conflict_retries: u32) -> ConversationStore<ScriptedBackend> {
        let config = StoreConfig {
            max_conflict_retries,
            ..StoreConfig::default()
        };
        ConversationStore::new(ScriptedBackend::new(rival_writes), config)
    }

    #[tokio::test]
    async fn test_get_unknown_key_is_healthy_empty() {
        let store = test_store();
        let outcome = store.get(&key()).await;
        assert!(!outcome.is_degraded());
        assert!(outcome.value().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_example_conversation_lifecycle() {
        let store = test_store();
        let key = key();

        store.append(&key, Turn::user("hello", 100.0)).await.unwrap();
        let receipt = store
            .append(&key, Turn::assistant("hi there", 101.0))
            .await
            .unwrap();
        assert_eq!(
            receipt,
            Outcome::Healthy(AppendReceipt {
                turn_count: 2,
                timestamp: 101.0,
                clamped: false,
            })
        );

        let record = store.get(&key).await.into_value();
        let summary: Vec<(Role, &str, f64)> = record
            .turns()
            .iter()
            .map(|t| (t.role, t.content.as_str(), t.timestamp))
            .collect();
        assert_eq!(
            summary,
            vec![(Role::User, "hello", 100.0), (Role::Assistant, "hi there", 101.0)]
        );
        assert!(record.turns().iter().all(|t| t.stored_at.is_some()));

        tokio::time::advance(TTL).await;
        let expired = store.get(&key).await;
        assert!(!expired.is_degraded());
        assert!(expired.value().is_empty());
    }

    #[tokio::test]
    async fn test_sequential_appends_preserve_order_and_count() {
        let store = test_store();
        let key = key();
        for i in 0..25 {
            store
                .append(&key, Turn::user(format!("message {i}"), f64::from(i)))
                .await
                .unwrap();
        }
        let record = store.get(&key).await.into_value();
        assert_eq!(record.len(), 25);
        for (i, turn) in record.turns().iter().enumerate() {
            assert_eq!(turn.content, format!("message {i}"));
        }
    }

    #[tokio::test]
    async fn test_metadata_is_persisted() {
        let store = test_store();
        let key = key();
        store
            .append(&key, Turn::user("hi", 1.0).with_metadata("user_id", "U42"))
            .await
            .unwrap();
        let record = store.get(&key).await.into_value();
        assert_eq!(
            record.turns()[0].metadata["user_id"],
            MetadataValue::Text("U42".to_string())
        );
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let store = test_store();
        let threaded = key();
        let channel = ConversationKey::channel("C1").unwrap();
        let other_thread = ConversationKey::thread("C1", "T2").unwrap();

        store.append(&threaded, Turn::user("in thread", 1.0)).await.unwrap();
        store.append(&channel, Turn::user("in channel", 1.0)).await.unwrap();

        assert_eq!(contents(store.get(&threaded).await.value()), vec!["in thread"]);
        assert_eq!(contents(store.get(&channel).await.value()), vec!["in channel"]);
        assert!(store.get(&other_thread).await.value().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_refreshes_ttl() {
        let store = test_store();
        let key = key();
        store.append(&key, Turn::user("hello", 100.0)).await.unwrap();

        tokio::time::advance(Duration::from_secs(3_600)).await;
        assert_eq!(
            store.expiry(&key).await.unwrap(),
            Expiry::Remaining(TTL - Duration::from_secs(3_600))
        );

        let _ = store.get(&key).await;
        assert_eq!(store.expiry(&key).await.unwrap(), Expiry::Remaining(TTL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_refreshes_ttl() {
        let store = test_store();
        let key = key();
        store.append(&key, Turn::user("hello", 100.0)).await.unwrap();

        tokio::time::advance(Duration::from_secs(80_000)).await;
        store.append(&key, Turn::assistant("hi", 101.0)).await.unwrap();
        assert_eq!(store.expiry(&key).await.unwrap(), Expiry::Remaining(TTL));

        // Still alive past the original deadline.
        tokio::time::advance(Duration::from_secs(10_000)).await;
        assert_eq!(store.get(&key).await.value().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_refreshes_ttl() {
        let store = test_store();
        let key = key();
        assert_eq!(store.touch(&key).await, Outcome::Healthy(false));

        store.append(&key, Turn::user("hello", 100.0)).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(store.touch(&key).await, Outcome::Healthy(true));
        assert_eq!(store.expiry(&key).await.unwrap(), Expiry::Remaining(TTL));
    }

    #[tokio::test]
    async fn test_delete_existing_and_missing() {
        let store = test_store();
        let key = key();
        store.append(&key, Turn::user("hello", 100.0)).await.unwrap();

        assert!(store.delete(&key).await.unwrap());
        assert!(store.get(&key).await.value().is_empty());
        assert!(!store.delete(&key).await.unwrap());
        assert_eq!(store.expiry(&key).await.unwrap(), Expiry::Missing);
    }

    #[tokio::test]
    async fn test_invalid_turn_rejected_before_backend() {
        let store = test_store();
        let err = store.append(&key(), Turn::user("  ", 1.0)).await.unwrap_err();
        assert!(matches!(
            err,
            ConversationError::InvalidInput(InvalidInput::EmptyContent)
        ));
        assert_eq!(store.backend().calls(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_timestamp_is_clamped() {
        let store = test_store();
        let key = key();
        store.append(&key, Turn::user("first", 200.0)).await.unwrap();
        let outcome = store
            .append(&key, Turn::assistant("late", 150.0))
            .await
            .unwrap();
        assert_eq!(
            outcome.into_value(),
            AppendReceipt {
                turn_count: 2,
                timestamp: 200.0,
                clamped: true,
            }
        );
        let record = store.get(&key).await.into_value();
        assert_eq!(record.turns()[1].timestamp, 200.0);
        assert_eq!(contents(&record), vec!["first", "late"]);
    }

    #[tokio::test]
    async fn test_out_of_order_timestamp_rejected_by_policy() {
        let config = StoreConfig {
            timestamp_policy: TimestampPolicy::Reject,
            ..StoreConfig::default()
        };
        let store = ConversationStore::new(InMemoryBackend::new(), config);
        let key = key();
        store.append(&key, Turn::user("first", 200.0)).await.unwrap();

        let err = store
            .append(&key, Turn::assistant("late", 150.0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConversationError::InvalidInput(InvalidInput::TimestampRegression { .. })
        ));
        assert_eq!(store.get(&key).await.value().len(), 1);

        // Equal timestamps are allowed.
        store.append(&key, Turn::assistant("same", 200.0)).await.unwrap();
        assert_eq!(store.get(&key).await.value().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_backend_degrades_get_and_append() {
        let store = test_store();
        let key = key();
        store.backend().set_fault(FaultMode::Unavailable);

        let got = store.get(&key).await;
        assert!(got.value().is_empty());
        assert_eq!(got.reason().unwrap().kind(), "backend_unavailable");

        let appended = store.append(&key, Turn::user("hello", 1.0)).await.unwrap();
        assert!(appended.is_degraded());
        assert_eq!(appended.value(), &AppendReceipt::default());

        let touched = store.touch(&key).await;
        assert!(touched.is_degraded());

        store.backend().set_fault(FaultMode::Healthy);
        assert!(store.get(&key).await.value().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails_delete() {
        let store = test_store();
        store.backend().set_fault(FaultMode::Unavailable);
        let err = store.delete(&key()).await.unwrap_err();
        assert!(matches!(
            err,
            ConversationError::BackendUnavailable(BackendError::Connection(_))
        ));
        assert!(store.ping().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_backend_times_out() {
        let config = StoreConfig {
            command_timeout_ms: 500,
            max_retries: 2,
            ..StoreConfig::default()
        };
        let store = ConversationStore::new(InMemoryBackend::new(), config);
        store.backend().set_fault(FaultMode::Stalled);

        let started = tokio::time::Instant::now();
        let got = store.get(&key()).await;
        assert_eq!(started.elapsed(), Duration::from_millis(1_500));
        assert_eq!(got.reason().unwrap().kind(), "timeout");
        assert!(got.value().is_empty());
        assert_eq!(store.backend().calls(), 3);

        let appended = store.append(&key(), Turn::user("hi", 1.0)).await.unwrap();
        assert_eq!(appended.reason().unwrap().kind(), "timeout");

        let err = store.delete(&key()).await.unwrap_err();
        assert!(matches!(
            err,
            ConversationError::BackendUnavailable(BackendError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = test_store();
        let key = key();
        store.backend().fail_next(1);
        let outcome = store.append(&key, Turn::user("hello", 1.0)).await.unwrap();
        assert!(!outcome.is_degraded());

        store.backend().fail_next(2);
        let got = store.get(&key).await;
        assert!(got.is_degraded(), "max_retries = 1 allows only two attempts");
    }

    #[tokio::test]
    async fn test_failed_ttl_refresh_still_returns_history() {
        let store = scripted_store(0, 32);
        let key = key();
        store.append(&key, Turn::user("hello", 1.0)).await.unwrap();
        store.backend().refuse_expire.store(true, Ordering::SeqCst);

        let got = store.get(&key).await;
        assert_eq!(contents(got.value()), vec!["hello"]);
        assert!(matches!(
            got.reason(),
            Some(DegradedReason::Backend(BackendError::Command(_)))
        ));

        let touched = store.touch(&key).await;
        assert!(!touched.into_parts().0);
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_as_empty() {
        let store = test_store();
        let key = key();
        let storage_key = store.storage_key(&key);
        store
            .backend()
            .insert_raw(&storage_key, b"\x00\x01garbage".to_vec(), Some(TTL));

        let got = store.get(&key).await;
        assert!(got.value().is_empty());
        assert!(matches!(
            got.reason(),
            Some(DegradedReason::Decode(DecodeError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_append_replaces_corrupt_record() {
        let store = test_store();
        let key = key();
        let storage_key = store.storage_key(&key);
        store
            .backend()
            .insert_raw(&storage_key, b"not a record".to_vec(), Some(TTL));

        let outcome = store.append(&key, Turn::user("fresh", 1.0)).await.unwrap();
        assert_eq!(outcome.value().turn_count, 1);
        assert_eq!(contents(store.get(&key).await.value()), vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_lost_race_is_retried_without_losing_turns() {
        let store = scripted_store(3, 32);
        let key = key();

        let outcome = store.append(&key, Turn::user("mine", 1.0)).await.unwrap();
        assert!(!outcome.is_degraded());
        assert_eq!(outcome.value().turn_count, 4);

        let record = store.get(&key).await.into_value();
        assert_eq!(contents(&record), vec!["rival 3", "rival 2", "rival 1", "mine"]);
    }

    #[tokio::test]
    async fn test_conflict_retries_are_bounded() {
        let store = scripted_store(10, 2);
        let key = key();

        let outcome = store.append(&key, Turn::user("mine", 1.0)).await.unwrap();
        assert_eq!(
            outcome.reason(),
            Some(&DegradedReason::Contention { attempts: 3 })
        );
        let record = store.get(&key).await.into_value();
        assert!(!contents(&record).contains(&"mine"));
    }

    #[tokio::test]
    async fn test_retried_append_is_idempotent() {
        let store = test_store();
        let key = key();
        let turn = Turn::user("once", 1.0);

        store.append(&key, turn.clone()).await.unwrap();
        let again = store.append(&key, turn).await.unwrap();
        assert_eq!(again.value().turn_count, 1);
        assert_eq!(store.get(&key).await.value().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivered_append_refreshes_ttl() {
        let store = test_store();
        let key = key();
        let turn = Turn::user("once", 1.0);

        store.append(&key, turn.clone()).await.unwrap();
        tokio::time::advance(Duration::from_secs(3_600)).await;

        let again = store.append(&key, turn).await.unwrap();
        assert!(!again.is_degraded());
        assert_eq!(store.expiry(&key).await.unwrap(), Expiry::Remaining(TTL));
    }

    #[tokio::test]
    async fn test_redelivered_append_degrades_when_ttl_refresh_fails() {
        let store = scripted_store(0, 32);
        let key = key();
        let turn = Turn::user("once", 1.0);

        store.append(&key, turn.clone()).await.unwrap();
        store.backend().refuse_expire.store(true, Ordering::SeqCst);

        let again = store.append(&key, turn).await.unwrap();
        assert_eq!(again.value().turn_count, 1);
        assert!(matches!(
            again.reason(),
            Some(DegradedReason::Backend(BackendError::Command(_)))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_do_not_lose_updates() {
        const WRITERS: usize = 16;
        let store = Arc::new(test_store());
        let key = key();

        let tasks: Vec<_> = (0..WRITERS)
            .map(|i| {
                let store = Arc::clone(&store);
                let key = key.clone();
                tokio::spawn(async move {
                    store
                        .append(&key, Turn::user(format!("writer {i}"), 1.0))
                        .await
                })
            })
            .collect();

        for outcome in futures_util::future::join_all(tasks).await {
            let outcome = outcome.unwrap().unwrap();
            assert!(!outcome.is_degraded());
        }

        let record = store.get(&key).await.into_value();
        assert_eq!(record.len(), WRITERS);
        for i in 0..WRITERS {
            assert!(contents(&record).contains(&format!("writer {i}").as_str()));
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let store = test_store();
        assert!(store.ping().await.is_ok());
    }
}
