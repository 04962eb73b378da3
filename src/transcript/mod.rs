//! Conversation transcript.
//!
//! Every prompt the owner sends and every final answer the agent gives is
//! appended to a JSONL file under the working directory, so other tools
//! working in the same project can read what was said in the chat.

pub mod writer;

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use writer::ConversationLog;

/// Who said it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The chat owner.
    User,
    /// The agent's final answer for a turn.
    Assistant,
}

/// One transcript line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// When the entry was written.
    pub ts: DateTime<Utc>,
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub text: String,
}

impl TranscriptEntry {
    /// Entry stamped with the current time.
    #[must_use]
    pub fn now(role: Role, text: &str) -> Self {
        Self {
            ts: Utc::now(),
            role,
            text: text.to_owned(),
        }
    }
}

/// Characters of one entry shown by [`format_context`].
pub const CONTEXT_ENTRY_CHARS: usize = 500;

/// Render entries as `[HH:MM] <speaker> <text>` lines, one per entry,
/// shortening long texts to [`CONTEXT_ENTRY_CHARS`] characters.
#[must_use]
pub fn format_context(entries: &[TranscriptEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        if !out.is_empty() {
            out.push('\n');
        }
        let speaker = match entry.role {
            Role::User => "\u{1f464}",
            Role::Assistant => "\u{1f916}",
        };
        let mut text: String = entry.text.chars().take(CONTEXT_ENTRY_CHARS).collect();
        if entry.text.chars().nth(CONTEXT_ENTRY_CHARS).is_some() {
            text.push('\u{2026}');
        }
        let _ = write!(out, "[{}] {speaker} {text}", entry.ts.format("%H:%M"));
    }
    out
}
