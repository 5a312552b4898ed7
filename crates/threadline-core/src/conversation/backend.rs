//! Key-value backend trait.
//!
//! Defines the narrow set of primitives the conversation store needs from a
//! networked key-value store with native per-key expiry.
//! Implementations live in threadline-infra.

use std::time::Duration;

use threadline_types::conversation::Expiry;
use threadline_types::error::BackendError;

/// Trait for the persistence substrate behind `ConversationStore`.
///
/// Values are opaque byte blobs. Every write carries an expiry. Reads never
/// extend the expiry implicitly.
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait ConversationBackend: Send + Sync {
    /// Fetch the raw value stored under `key`, if any.
    fn load(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<Vec<u8>>, BackendError>> + Send;

    /// Atomically replace the value under `key` with `value` (expiring after
    /// `ttl`) if and only if the current value equals `expected`.
    ///
    /// `expected = None` means "only if the key is absent". Returns `false`
    /// when the comparison failed and nothing was written.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<bool, BackendError>> + Send;

    /// Reset the expiry of an existing key. Returns `false` if the key is absent.
    fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<bool, BackendError>> + Send;

    /// Report the remaining lifetime of `key`.
    fn expiry(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Expiry, BackendError>> + Send;

    /// Delete `key`. Returns whether it existed.
    fn remove(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<bool, BackendError>> + Send;

    /// Round-trip health check.
    fn ping(&self) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;
}
