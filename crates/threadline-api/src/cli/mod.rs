//! CLI command definitions for the `tline` binary.
//!
//! Every conversation command addresses one record by channel and optional
//! thread (e.g., `tline show C1 --thread T1`).

pub mod conversation;
pub mod status;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use threadline_core::conversation::context::DEFAULT_CONTEXT_TURNS;
use threadline_types::conversation::{ConversationKey, MetadataValue, Role};
use threadline_types::error::InvalidInput;

/// Inspect and maintain channel/thread conversation history.
#[derive(Parser)]
#[command(name = "tline", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to $THREADLINE_CONFIG or ~/.threadline/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Channel and optional thread identifying one conversation.
#[derive(Args, Debug, Clone)]
pub struct KeyArgs {
    /// Channel id.
    pub channel: String,

    /// Thread id within the channel.
    #[arg(short, long)]
    pub thread: Option<String>,
}

impl KeyArgs {
    pub fn to_key(&self) -> Result<ConversationKey, InvalidInput> {
        ConversationKey::new(self.channel.clone(), self.thread.clone())
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the stored history of a conversation.
    Show {
        #[command(flatten)]
        key: KeyArgs,

        /// Only show the newest N turns.
        #[arg(short = 'n', long)]
        last: Option<usize>,
    },

    /// Append a turn to a conversation.
    Append {
        #[command(flatten)]
        key: KeyArgs,

        /// Speaker role (user, assistant, system).
        #[arg(short, long, default_value = "user")]
        role: Role,

        /// Message text.
        #[arg(short, long)]
        content: String,

        /// Unix timestamp in seconds (defaults to now).
        #[arg(long = "ts")]
        timestamp: Option<f64>,

        /// Metadata entry as key=value (repeatable).
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
        metadata: Vec<(String, MetadataValue)>,
    },

    /// Delete a conversation.
    #[command(alias = "rm")]
    Delete {
        #[command(flatten)]
        key: KeyArgs,

        /// Skip confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Show the remaining lifetime of a conversation.
    Ttl {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Reset the lifetime of a conversation without changing it.
    Touch {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Render the prompt context block an agent would receive.
    Context {
        #[command(flatten)]
        key: KeyArgs,

        /// Number of newest turns to include.
        #[arg(short = 'n', long, default_value_t = DEFAULT_CONTEXT_TURNS)]
        last: usize,
    },

    /// Check that the backend is reachable.
    Ping,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Parse `key=value`. Values that look like integers, floats, or booleans
/// are stored typed; `null` is stored as null; anything else is text.
pub fn parse_meta(raw: &str) -> Result<(String, MetadataValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("metadata key is empty in '{raw}'"));
    }

    let value = if value == "null" {
        MetadataValue::Null
    } else if let Ok(b) = value.parse::<bool>() {
        MetadataValue::Bool(b)
    } else if let Ok(i) = value.parse::<i64>() {
        MetadataValue::Integer(i)
    } else if let Some(f) = value.parse::<f64>().ok().filter(|f| f.is_finite()) {
        MetadataValue::Float(f)
    } else {
        MetadataValue::Text(value.to_string())
    };

    Ok((key.to_string(), value))
}
