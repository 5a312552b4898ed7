use std::time::Duration;

use thiserror::Error;

/// Caller programming errors, rejected before any backend call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidInput {
    #[error("{field} must not be empty")]
    EmptyId { field: &'static str },

    #[error("{field} contains forbidden character {ch:?}")]
    ForbiddenCharacter { field: &'static str, ch: char },

    #[error("turn content must not be empty")]
    EmptyContent,

    #[error("unknown role: '{0}'")]
    UnknownRole(String),

    #[error("turn timestamp must be a finite, non-negative epoch value (got {0})")]
    InvalidTimestamp(f64),

    #[error("turn timestamp {given} is older than the last stored turn ({last})")]
    TimestampRegression { last: f64, given: f64 },
}

/// Failures reaching or talking to the key-value backend.
///
/// Every variant classifies as "backend unavailable" for degradation purposes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("command error: {0}")]
    Command(String),
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout(_))
    }
}

/// A stored value that does not decode as a conversation record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u32),
}

/// Hard failures surfaced by the conversation store.
///
/// Only invalid input and backend failures during explicit operator actions
/// (delete, expiry introspection, ping) are reported this way; everything
/// else degrades.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),

    #[error("conversation backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_display() {
        let err = InvalidInput::ForbiddenCharacter {
            field: "thread_id",
            ch: ':',
        };
        assert_eq!(err.to_string(), "thread_id contains forbidden character ':'");
    }

    #[test]
    fn test_conversation_error_from_backend() {
        let err: ConversationError = BackendError::Connection("refused".to_string()).into();
        assert_eq!(
            err.to_string(),
            "conversation backend unavailable: connection error: refused"
        );
    }

    #[test]
    fn test_timeout_classification() {
        assert!(BackendError::Timeout(Duration::from_secs(2)).is_timeout());
        assert!(!BackendError::Command("WRONGTYPE".to_string()).is_timeout());
    }
}
