//! Degraded-mode results.
//!
//! Operations that must never abort the caller's reply path return an
//! [`Outcome`]: either a healthy value or a usable fallback together with the
//! reason persistence was unavailable.

use std::fmt;

use crate::error::{BackendError, DecodeError};

/// Why an operation fell back to degraded mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedReason {
    /// The backend was unreachable, timed out, or rejected the command.
    Backend(BackendError),
    /// The stored record could not be decoded.
    Decode(DecodeError),
    /// Concurrent writers kept winning the compare-and-swap race.
    Contention { attempts: u32 },
}

impl DegradedReason {
    /// Stable identifier used as the `event` field in log records.
    pub fn kind(&self) -> &'static str {
        match self {
            DegradedReason::Backend(err) if err.is_timeout() => "timeout",
            DegradedReason::Backend(_) => "backend_unavailable",
            DegradedReason::Decode(_) => "decode_failure",
            DegradedReason::Contention { .. } => "conflict_exhausted",
        }
    }
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradedReason::Backend(err) => write!(f, "backend unavailable: {err}"),
            DegradedReason::Decode(err) => write!(f, "undecodable record: {err}"),
            DegradedReason::Contention { attempts } => {
                write!(f, "gave up after {attempts} conflicting writes")
            }
        }
    }
}

impl From<BackendError> for DegradedReason {
    fn from(err: BackendError) -> Self {
        DegradedReason::Backend(err)
    }
}

impl From<DecodeError> for DegradedReason {
    fn from(err: DecodeError) -> Self {
        DegradedReason::Decode(err)
    }
}

/// Result of a best-effort operation.
#[must_use = "a degraded outcome should be surfaced to observability or the caller"]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Healthy(T),
    Degraded { value: T, reason: DegradedReason },
}

impl<T> Outcome<T> {
    pub fn degraded(value: T, reason: impl Into<DegradedReason>) -> Self {
        Outcome::Degraded {
            value,
            reason: reason.into(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    pub fn reason(&self) -> Option<&DegradedReason> {
        match self {
            Outcome::Healthy(_) => None,
            Outcome::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Healthy(value) | Outcome::Degraded { value, .. } => value,
        }
    }

    /// Discard the health information and keep the (possibly fallback) value.
    pub fn into_value(self) -> T {
        match self {
            Outcome::Healthy(value) | Outcome::Degraded { value, .. } => value,
        }
    }

    pub fn into_parts(self) -> (T, Option<DegradedReason>) {
        match self {
            Outcome::Healthy(value) => (value, None),
            Outcome::Degraded { value, reason } => (value, Some(reason)),
        }
    }
}
