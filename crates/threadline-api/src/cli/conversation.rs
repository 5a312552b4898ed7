//! Conversation CLI subcommands.
//!
//! Reads and writes go through `ConversationStore`, so these commands see the
//! same degraded-mode behavior as an agent would: an unreachable backend shows
//! an empty history with a notice instead of failing.

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use dialoguer::Confirm;

use threadline_core::conversation::context::render_history;
use threadline_types::conversation::{ConversationKey, Expiry, MetadataValue, Role, Turn};
use threadline_types::outcome::DegradedReason;

use crate::state::AppState;

/// Print the stored turns of a conversation.
pub async fn show(state: &AppState, key: &ConversationKey, last: Option<usize>, json: bool) -> Result<()> {
    let (record, degraded) = state.store.get(key).await.into_parts();
    let turns = match last {
        Some(n) => record.recent(n),
        None => record.turns(),
    };

    if json {
        let result = serde_json::json!({
            "channel": key.channel_id(),
            "thread": key.thread_id(),
            "turns": turns,
            "count": turns.len(),
            "degraded": degraded.as_ref().map(DegradedReason::kind),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if let Some(reason) = &degraded {
        print_degraded(reason);
    }

    if turns.is_empty() {
        println!();
        println!(
            "  {} No history for '{}'.",
            style("i").blue().bold(),
            style(key).cyan(),
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("#").fg(Color::White),
        Cell::new("Role").fg(Color::White),
        Cell::new("Time").fg(Color::White),
        Cell::new("Content").fg(Color::White),
        Cell::new("Metadata").fg(Color::White),
    ]);

    let offset = record.len() - turns.len();
    for (i, turn) in turns.iter().enumerate() {
        table.add_row(vec![
            Cell::new(offset + i + 1),
            Cell::new(turn.role).fg(role_color(turn.role)),
            Cell::new(format_timestamp(turn.timestamp)),
            Cell::new(&turn.content),
            Cell::new(format_metadata(turn)),
        ]);
    }

    println!();
    println!("{table}");
    println!(
        "  {} of {} turn(s) in '{}'",
        turns.len(),
        record.len(),
        style(key).cyan(),
    );
    println!();

    Ok(())
}

/// Append one turn. A degraded append is reported but is not an error.
pub async fn append(
    state: &AppState,
    key: &ConversationKey,
    role: Role,
    content: String,
    timestamp: Option<f64>,
    metadata: Vec<(String, MetadataValue)>,
    json: bool,
) -> Result<()> {
    let timestamp = timestamp.unwrap_or_else(now_timestamp);
    let turn = metadata
        .into_iter()
        .fold(Turn::new(role, content, timestamp), |turn, (k, v)| {
            turn.with_metadata(k, v)
        });
    let turn_id = turn.id;

    let (receipt, degraded) = state
        .store
        .append(key, turn)
        .await
        .with_context(|| format!("Cannot append to '{key}'"))?
        .into_parts();

    if json {
        let result = serde_json::json!({
            "channel": key.channel_id(),
            "thread": key.thread_id(),
            "id": turn_id,
            "stored": degraded.is_none(),
            "turn_count": receipt.turn_count,
            "timestamp": receipt.timestamp,
            "clamped": receipt.clamped,
            "degraded": degraded.as_ref().map(DegradedReason::kind),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    match &degraded {
        Some(reason) => {
            print_degraded(reason);
            println!(
                "  {} Turn was not stored in '{}'",
                style("!").yellow().bold(),
                style(key).cyan(),
            );
        }
        None => {
            println!(
                "  {} Appended {} turn to '{}' ({} total)",
                style("ok").green(),
                style(role).cyan(),
                style(key).cyan(),
                receipt.turn_count,
            );
            if receipt.clamped {
                println!(
                    "     {}",
                    style(format!(
                        "Timestamp raised to {} to keep history ordered",
                        receipt.timestamp
                    ))
                    .dim()
                );
            }
        }
    }
    println!();

    Ok(())
}

/// Delete a conversation after confirmation. Backend failure is an error.
pub async fn delete(state: &AppState, key: &ConversationKey, force: bool, json: bool) -> Result<()> {
    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Permanently delete conversation '{}'?",
                style(key).red().bold()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let existed = state
        .store
        .delete(key)
        .await
        .with_context(|| format!("Failed to delete '{key}'"))?;

    if json {
        let result = serde_json::json!({
            "channel": key.channel_id(),
            "thread": key.thread_id(),
            "deleted": existed,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if existed {
        println!();
        println!("  {} Deleted '{}'", style("ok").green(), style(key).cyan());
        println!();
    } else {
        println!();
        println!(
            "  {} Nothing stored for '{}'",
            style("i").blue().bold(),
            style(key).cyan(),
        );
        println!();
    }

    Ok(())
}

/// Print the remaining lifetime of a conversation.
pub async fn ttl(state: &AppState, key: &ConversationKey, json: bool) -> Result<()> {
    let expiry = state
        .store
        .expiry(key)
        .await
        .with_context(|| format!("Failed to read expiry of '{key}'"))?;

    if json {
        let remaining = match expiry {
            Expiry::Remaining(d) => Some(d.as_secs_f64()),
            _ => None,
        };
        let result = serde_json::json!({
            "channel": key.channel_id(),
            "thread": key.thread_id(),
            "expiry": expiry.to_string(),
            "remaining_secs": remaining,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!();
        println!("  {} expires in: {}", style(key).cyan(), style(expiry).bold());
        println!();
    }

    Ok(())
}

/// Reset the lifetime of a conversation.
pub async fn touch(state: &AppState, key: &ConversationKey, json: bool) -> Result<()> {
    let (refreshed, degraded) = state.store.touch(key).await.into_parts();

    if json {
        let result = serde_json::json!({
            "channel": key.channel_id(),
            "thread": key.thread_id(),
            "refreshed": refreshed,
            "degraded": degraded.as_ref().map(DegradedReason::kind),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    if let Some(reason) = &degraded {
        print_degraded(reason);
    } else if refreshed {
        println!(
            "  {} Lifetime of '{}' reset to {}s",
            style("ok").green(),
            style(key).cyan(),
            state.store.config().ttl_secs,
        );
    } else {
        println!(
            "  {} Nothing stored for '{}'",
            style("i").blue().bold(),
            style(key).cyan(),
        );
    }
    println!();

    Ok(())
}

/// Print the prompt context block for the newest `last` turns.
pub async fn context(state: &AppState, key: &ConversationKey, last: usize, json: bool) -> Result<()> {
    let (record, degraded) = state.store.get(key).await.into_parts();
    let rendered = render_history(&record, last);

    if json {
        let result = serde_json::json!({
            "channel": key.channel_id(),
            "thread": key.thread_id(),
            "context": rendered,
            "degraded": degraded.as_ref().map(DegradedReason::kind),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if let Some(reason) = &degraded {
        print_degraded(reason);
    }
    print!("{rendered}");
    if !rendered.ends_with('\n') {
        println!();
    }

    Ok(())
}

fn print_degraded(reason: &DegradedReason) {
    eprintln!(
        "  {} Backend degraded ({}): {}",
        style("!").yellow().bold(),
        reason.kind(),
        style(reason).dim(),
    );
}

fn role_color(role: Role) -> Color {
    match role {
        Role::User => Color::Cyan,
        Role::Assistant => Color::Green,
        Role::System => Color::Yellow,
    }
}

fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Render a Unix timestamp as UTC time, falling back to the raw number.
fn format_timestamp(ts: f64) -> String {
    let secs = ts.trunc() as i64;
    let nanos = (ts.fract() * 1e9) as u32;
    chrono::DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn format_metadata(turn: &Turn) -> String {
    turn.metadata
        .iter()
        .map(|(k, v)| match v {
            MetadataValue::Null => format!("{k}=null"),
            MetadataValue::Bool(b) => format!("{k}={b}"),
            MetadataValue::Integer(i) => format!("{k}={i}"),
            MetadataValue::Float(f) => format!("{k}={f}"),
            MetadataValue::Text(s) => format!("{k}={s}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_timestamp_renders_utc() {
        assert_eq!(format_timestamp(0.0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(100.5), "1970-01-01 00:01:40");
    }

    #[test]
    fn format_metadata_joins_entries() {
        let turn = Turn::user("hi", 1.0)
            .with_metadata("agent", "researcher")
            .with_metadata("tokens", 42i64);
        assert_eq!(format_metadata(&turn), "agent=researcher, tokens=42");
    }

    #[test]
    fn now_timestamp_is_recent() {
        let ts = now_timestamp();
        assert!(ts > 1_600_000_000.0);
    }
}
