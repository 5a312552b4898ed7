//! Binary encoding of conversation records.
//!
//! Records are MessagePack maps (named fields) inside a versioned envelope:
//! `{ "v": 1, "turns": [ {..}, .. ] }`. The version is read on its own first so
//! a record written by an unknown schema is reported as such instead of as a
//! generic parse error. Unknown turn fields are ignored and optional fields
//! default, so additive schema changes stay readable.

use serde::{Deserialize, Serialize};
use threadline_types::conversation::{ConversationRecord, Turn};
use threadline_types::error::DecodeError;

/// Envelope version written by this build.
pub const RECORD_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    v: u32,
    turns: &'a [Turn],
}

#[derive(Deserialize)]
struct Header {
    v: u32,
}

#[derive(Deserialize)]
struct Envelope {
    turns: Vec<Turn>,
}

/// Encode a record for storage.
pub fn encode(record: &ConversationRecord) -> Result<Vec<u8>, DecodeError> {
    let envelope = EnvelopeRef {
        v: RECORD_VERSION,
        turns: record.turns(),
    };
    rmp_serde::to_vec_named(&envelope).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Decode a stored record. Never panics on arbitrary input.
pub fn decode(bytes: &[u8]) -> Result<ConversationRecord, DecodeError> {
    let header: Header =
        rmp_serde::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if header.v != RECORD_VERSION {
        return Err(DecodeError::UnsupportedVersion(header.v));
    }
    let envelope: Envelope =
        rmp_serde::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    Ok(ConversationRecord::new(envelope.turns))
}
