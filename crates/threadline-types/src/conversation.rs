//! Conversation key, turn, and record types.
//!
//! A conversation is scoped to a chat channel and, optionally, a thread within
//! it. Its history is an ordered list of immutable turns.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InvalidInput;

/// Separator between the prefix, channel, and thread segments of a storage key.
pub const KEY_SEPARATOR: char = ':';

/// Default storage key prefix, shared with earlier deployments of the bot.
pub const DEFAULT_KEY_PREFIX: &str = "conversation";

// ---------------------------------------------------------------------------
// ConversationKey
// ---------------------------------------------------------------------------

/// Composite (channel, thread) identifier scoping a conversation record.
///
/// Both parts are opaque platform-assigned ids. They are validated on
/// construction so that [`ConversationKey::storage_key`] is injective.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawConversationKey")]
pub struct ConversationKey {
    channel_id: String,
    thread_id: Option<String>,
}

/// Unvalidated wire form; deserialization goes through [`ConversationKey::new`].
#[derive(Deserialize)]
struct RawConversationKey {
    channel_id: String,
    #[serde(default)]
    thread_id: Option<String>,
}

impl TryFrom<RawConversationKey> for ConversationKey {
    type Error = InvalidInput;

    fn try_from(raw: RawConversationKey) -> Result<Self, Self::Error> {
        Self::new(raw.channel_id, raw.thread_id)
    }
}

impl ConversationKey {
    /// Build a key, rejecting empty ids and ids containing the separator,
    /// whitespace, or control characters.
    pub fn new(
        channel_id: impl Into<String>,
        thread_id: Option<String>,
    ) -> Result<Self, InvalidInput> {
        let channel_id = channel_id.into();
        validate_id("channel_id", &channel_id)?;
        if let Some(thread) = &thread_id {
            validate_id("thread_id", thread)?;
        }
        Ok(Self {
            channel_id,
            thread_id,
        })
    }

    /// Key for a channel-level conversation (no thread).
    pub fn channel(channel_id: impl Into<String>) -> Result<Self, InvalidInput> {
        Self::new(channel_id, None)
    }

    /// Key for a conversation inside a thread.
    pub fn thread(
        channel_id: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> Result<Self, InvalidInput> {
        Self::new(channel_id, Some(thread_id.into()))
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Deterministic backend key: `{prefix}:{channel}` or `{prefix}:{channel}:{thread}`.
    pub fn storage_key(&self, prefix: &str) -> String {
        match &self.thread_id {
            Some(thread) => format!(
                "{prefix}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{thread}",
                self.channel_id
            ),
            None => format!("{prefix}{KEY_SEPARATOR}{}", self.channel_id),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread_id {
            Some(thread) => write!(f, "{}/{}", self.channel_id, thread),
            None => write!(f, "{}", self.channel_id),
        }
    }
}

fn validate_id(field: &'static str, value: &str) -> Result<(), InvalidInput> {
    if value.is_empty() {
        return Err(InvalidInput::EmptyId { field });
    }
    if let Some(ch) = value
        .chars()
        .find(|c| *c == KEY_SEPARATOR || c.is_whitespace() || c.is_control())
    {
        return Err(InvalidInput::ForbiddenCharacter { field, ch });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

impl FromStr for Role {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(InvalidInput::UnknownRole(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Turn
// ---------------------------------------------------------------------------

/// Primitive value allowed in turn metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Null => write!(f, "null"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(x) => write!(f, "{x}"),
            MetadataValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

/// One message in a conversation.
///
/// `timestamp` is epoch seconds as delivered by the chat platform (fractional
/// seconds allowed). `stored_at` is stamped by the store when the turn is
/// persisted. The `id` lets a retried append recognise a turn that already
/// landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, MetadataValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<DateTime<Utc>>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>, timestamp: f64) -> Self {
        Self {
            id: Uuid::now_v7(),
            role,
            content: content.into(),
            timestamp,
            metadata: BTreeMap::new(),
            stored_at: None,
        }
    }

    pub fn user(content: impl Into<String>, timestamp: f64) -> Self {
        Self::new(Role::User, content, timestamp)
    }

    pub fn assistant(content: impl Into<String>, timestamp: f64) -> Self {
        Self::new(Role::Assistant, content, timestamp)
    }

    pub fn system(content: impl Into<String>, timestamp: f64) -> Self {
        Self::new(Role::System, content, timestamp)
    }

    /// Attach a metadata entry (builder style).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Reject turns that must never reach the backend.
    pub fn validate(&self) -> Result<(), InvalidInput> {
        if self.content.trim().is_empty() {
            return Err(InvalidInput::EmptyContent);
        }
        if !self.timestamp.is_finite() || self.timestamp < 0.0 {
            return Err(InvalidInput::InvalidTimestamp(self.timestamp));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ConversationRecord
// ---------------------------------------------------------------------------

/// Ordered history of a single conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    turns: Vec<Turn>,
}

impl ConversationRecord {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// The newest `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

/// Remaining lifetime of a stored record, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// No record is stored under the key.
    Missing,
    /// The record exists without an expiry (written outside the store).
    Persistent,
    /// The record expires after the given duration.
    Remaining(Duration),
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expiry::Missing => write!(f, "missing"),
            Expiry::Persistent => write!(f, "persistent"),
            Expiry::Remaining(d) => write!(f, "{}s", d.as_secs()),
        }
    }
}
