//! Prompt context rendering.
//!
//! Agents receive prior conversation as a short plain-text block prepended to
//! their task description. Only the newest turns are included.

use std::fmt::Write as _;

use threadline_types::conversation::ConversationRecord;

/// Number of turns included when the caller does not choose.
pub const DEFAULT_CONTEXT_TURNS: usize = 3;

const EMPTY_CONTEXT: &str = "No previous conversation context.";

/// Render the newest `limit` turns as a bullet list:
///
/// ```text
/// Previous messages:
/// - user: hello
/// - assistant: hi there
/// ```
///
/// Multi-line content is flattened onto a single line so every turn stays one
/// bullet.
pub fn render_history(record: &ConversationRecord, limit: usize) -> String {
    let recent = record.recent(limit);
    if recent.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }

    let mut out = String::from("Previous messages:\n");
    for turn in recent {
        let flattened = turn.content.split_whitespace().collect::<Vec<_>>().join(" ");
        let _ = writeln!(out, "- {}: {}", turn.role, flattened);
    }
    out
}
