//! In-memory `ConversationBackend`.
//!
//! Keeps values in a `DashMap` with per-key deadlines measured on the tokio
//! clock, so tests can use a paused clock to drive expiry. Supports fault
//! injection (unavailable, stalled, failing the next N calls) to exercise the
//! store's degradation paths without a network.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use threadline_types::conversation::Expiry;
use threadline_types::error::BackendError;
use tokio::time::Instant;

use super::backend::ConversationBackend;

/// Injected failure behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultMode {
    #[default]
    Healthy,
    /// Every call fails immediately with a connection error.
    Unavailable,
    /// Every call hangs forever (callers must time out).
    Stalled,
}

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    deadline: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline.is_none_or(|deadline| deadline > now)
    }
}

/// Process-local backend with native per-key expiry.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: DashMap<String, StoredValue>,
    fault: Mutex<FaultMode>,
    fail_next: AtomicUsize,
    calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fault(&self, mode: FaultMode) {
        *self.fault.lock().unwrap_or_else(|e| e.into_inner()) = mode;
    }

    /// Fail the next `n` calls with a connection error, then recover.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Total backend calls received, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Write a raw value, bypassing the store (e.g. to plant a corrupt record).
    pub fn insert_raw(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>) {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), StoredValue { bytes, deadline });
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn enter(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.fault.lock().unwrap_or_else(|e| e.into_inner());
        match mode {
            FaultMode::Healthy => {}
            FaultMode::Unavailable => {
                return Err(BackendError::Connection("connection refused".to_string()));
            }
            FaultMode::Stalled => std::future::pending::<()>().await,
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BackendError::Connection("connection reset".to_string()));
        }
        Ok(())
    }

    fn live_bytes(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.bytes.clone());
        if live.is_none() {
            self.entries.remove_if(key, |_, v| !v.is_live(now));
        }
        live
    }

    fn swap(&self, key: &str, expected: Option<&[u8]>, value: &[u8], ttl: Duration) -> bool {
        let now = Instant::now();
        let replacement = StoredValue {
            bytes: value.to_vec(),
            deadline: Some(now + ttl),
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = Some(occupied.get())
                    .filter(|v| v.is_live(now))
                    .map(|v| v.bytes.as_slice());
                if current != expected {
                    return false;
                }
                occupied.insert(replacement);
                true
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return false;
                }
                vacant.insert(replacement);
                true
            }
        }
    }

    fn refresh(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut value) if value.is_live(now) => {
                value.deadline = Some(now + ttl);
                true
            }
            _ => false,
        }
    }

    fn remaining(&self, key: &str) -> Expiry {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(value) if value.is_live(now) => match value.deadline {
                Some(deadline) => Expiry::Remaining(deadline - now),
                None => Expiry::Persistent,
            },
            _ => Expiry::Missing,
        }
    }

    fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove(key)
            .is_some_and(|(_, value)| value.is_live(now))
    }
}

impl ConversationBackend for InMemoryBackend {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.enter().await?;
        Ok(self.live_bytes(key))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        self.enter().await?;
        Ok(self.swap(key, expected, value, ttl))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, BackendError> {
        self.enter().await?;
        Ok(self.refresh(key, ttl))
    }

    async fn expiry(&self, key: &str) -> Result<Expiry, BackendError> {
        self.enter().await?;
        Ok(self.remaining(key))
    }

    async fn remove(&self, key: &str) -> Result<bool, BackendError> {
        self.enter().await?;
        Ok(self.delete(key))
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.enter().await
    }
}
