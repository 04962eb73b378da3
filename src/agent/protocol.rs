//! Stream-json protocol spoken by the child process.
//!
//! Every stdout line is one JSON object whose `type` field selects the
//! shape. [`decode`] turns a line into one of three outcomes:
//!
//! | Outcome                 | When                                              |
//! |-------------------------|---------------------------------------------------|
//! | [`Decoded::Event`]      | a recognized line with user-visible content       |
//! | [`Decoded::Housekeeping`] | blank lines, lifecycle notices, unknown `type`s |
//! | [`Decoded::Malformed`]  | invalid JSON or a known type with a broken shape  |
//!
//! Malformed lines still produce an event (a raw [`Event::TextDelta`]) so
//! child output is never silently dropped.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Terminal statistics reported by the child's `result` line.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Resumable conversation identifier.
    pub conversation_id: String,
    /// Wall-clock duration of the turn.
    pub duration_ms: u64,
    /// Agentic turns the child took.
    pub turn_count: u32,
    /// Total spend reported by the child.
    pub cost_usd: f64,
    /// Final assistant text for the turn.
    pub final_text: String,
}

impl Completion {
    /// Caller-visible footer. Cost is deliberately absent.
    #[must_use]
    pub fn footer(&self) -> String {
        format!(
            "\u{23f1} {}s \u{b7} {} turns",
            self.duration_ms / 1000,
            self.turn_count
        )
    }
}

/// Typed event decoded from one line of child output.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The child started (or resumed) a conversation.
    Init {
        /// Resumable conversation identifier.
        conversation_id: String,
    },
    /// Streamed assistant text.
    TextDelta {
        /// Text fragment, appended verbatim.
        text: String,
    },
    /// A tool call block opened in the stream.
    ToolStarted {
        /// Tool name.
        name: String,
    },
    /// The complete tool call with its arguments.
    ToolInvoked {
        /// Tool name.
        name: String,
        /// Tool input object.
        arguments: Value,
    },
    /// Output of a tool call.
    ToolResult {
        /// Flattened result text.
        text: String,
        /// Whether the tool reported failure.
        is_error: bool,
    },
    /// The child finished answering one prompt.
    Completed(Completion),
}

/// Outcome of decoding a single line.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A recognized event.
    Event(Event),
    /// Nothing to show.
    Housekeeping,
    /// Unparseable line, passed through as raw text.
    Malformed(Event),
}

impl Decoded {
    /// The event to present, if any. Malformed lines yield their fallback.
    #[must_use]
    pub fn into_event(self) -> Option<Event> {
        match self {
            Self::Event(event) | Self::Malformed(event) => Some(event),
            Self::Housekeeping => None,
        }
    }
}

// ── Wire shapes ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SystemLine {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    event: StreamInner,
}

#[derive(Debug, Deserialize)]
struct StreamInner {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    content_block: Option<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct MessageLine {
    message: MessageBody,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ToolUseBlock {
    #[serde(default)]
    name: String,
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Deserialize)]
struct ToolResultBlock {
    #[serde(default)]
    content: Value,
    #[serde(default)]
    is_error: bool,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decode one line of child output. Never fails.
#[must_use]
pub fn decode(line: &str) -> Decoded {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Decoded::Housekeeping;
    }

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return malformed(line, "invalid json");
    };

    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return malformed(line, "missing `type`");
    };

    match kind {
        "system" => decode_system(line, value),
        "stream_event" => decode_stream_event(line, value),
        "assistant" => decode_assistant(line, value),
        "user" => decode_user(line, value),
        "result" => decode_result(&value),
        other => {
            debug!(kind = other, "protocol: ignoring unknown line type");
            Decoded::Housekeeping
        }
    }
}

/// Encode a user prompt as one stdin line (without the trailing newline).
#[must_use]
pub fn encode_user_message(prompt: &str) -> String {
    json!({
        "type": "user",
        "message": { "role": "user", "content": prompt }
    })
    .to_string()
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn malformed(line: &str, reason: &str) -> Decoded {
    warn!(reason, raw_line = line, "protocol: passing malformed line through");
    Decoded::Malformed(Event::TextDelta {
        text: line.to_owned(),
    })
}

fn shape<T: DeserializeOwned>(line: &str, value: Value) -> Result<T, Decoded> {
    serde_json::from_value(value).map_err(|err| malformed(line, &err.to_string()))
}

fn decode_system(line: &str, value: Value) -> Decoded {
    let parsed: SystemLine = match shape(line, value) {
        Ok(parsed) => parsed,
        Err(fallback) => return fallback,
    };

    if parsed.subtype.as_deref() == Some("init") {
        Decoded::Event(Event::Init {
            conversation_id: parsed.session_id.unwrap_or_default(),
        })
    } else {
        Decoded::Housekeeping
    }
}

fn decode_stream_event(line: &str, value: Value) -> Decoded {
    let parsed: StreamLine = match shape(line, value) {
        Ok(parsed) => parsed,
        Err(fallback) => return fallback,
    };
    let inner = parsed.event;

    match inner.kind.as_str() {
        "content_block_delta" => match inner.delta {
            Some(delta) if delta.kind == "text_delta" => {
                Decoded::Event(Event::TextDelta { text: delta.text })
            }
            _ => Decoded::Housekeeping,
        },
        "content_block_start" => match inner.content_block {
            Some(block) if block.kind == "tool_use" => {
                Decoded::Event(Event::ToolStarted { name: block.name })
            }
            _ => Decoded::Housekeeping,
        },
        _ => Decoded::Housekeeping,
    }
}

fn decode_assistant(line: &str, value: Value) -> Decoded {
    let parsed: MessageLine = match shape(line, value) {
        Ok(parsed) => parsed,
        Err(fallback) => return fallback,
    };

    let Some(block) = first_block(&parsed.message.content, "tool_use") else {
        return Decoded::Housekeeping;
    };

    match shape::<ToolUseBlock>(line, block) {
        Ok(tool) => Decoded::Event(Event::ToolInvoked {
            name: tool.name,
            arguments: tool.input,
        }),
        Err(fallback) => fallback,
    }
}

fn decode_user(line: &str, value: Value) -> Decoded {
    let parsed: MessageLine = match shape(line, value) {
        Ok(parsed) => parsed,
        Err(fallback) => return fallback,
    };

    let Some(block) = first_block(&parsed.message.content, "tool_result") else {
        return Decoded::Housekeeping;
    };

    match shape::<ToolResultBlock>(line, block) {
        Ok(result) => Decoded::Event(Event::ToolResult {
            text: flatten_content(&result.content),
            is_error: result.is_error,
        }),
        Err(fallback) => fallback,
    }
}

/// A `result` line always ends the turn: absent, `null` or mistyped fields
/// fall back to zero values instead of making the line malformed.
fn decode_result(value: &Value) -> Decoded {
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_default()
    };
    Decoded::Event(Event::Completed(Completion {
        conversation_id: text("session_id"),
        duration_ms: value
            .get("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or_default(),
        turn_count: value
            .get("num_turns")
            .and_then(Value::as_u64)
            .and_then(|turns| u32::try_from(turns).ok())
            .unwrap_or_default(),
        cost_usd: value
            .get("total_cost_usd")
            .and_then(Value::as_f64)
            .unwrap_or_default(),
        final_text: text("result"),
    }))
}

/// First content block of the given `type`, if the content is a block list.
fn first_block(content: &Value, kind: &str) -> Option<Value> {
    content
        .as_array()?
        .iter()
        .find(|block| block.get("type").and_then(Value::as_str) == Some(kind))
        .cloned()
}

/// Tool result content is either a string or a list of typed blocks.
fn flatten_content(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| match block.get("type").and_then(Value::as_str) {
                Some("text") => block.get("text").and_then(Value::as_str).map(str::to_owned),
                Some(other) => Some(format!("[{other}]")),
                None => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
