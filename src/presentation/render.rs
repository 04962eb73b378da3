//! One-line tool call summaries and tool result blocks.

use serde_json::Value;

/// Longest shell command shown before truncation, in characters.
pub const MAX_COMMAND_CHARS: usize = 60;

/// Longest tool result shown before truncation, in characters.
pub const MAX_RESULT_CHARS: usize = 1000;

fn tool_icon(name: &str) -> &'static str {
    match name {
        "Read" => "\u{1f4c2}",
        "Edit" | "MultiEdit" => "\u{270f}\u{fe0f}",
        "Write" => "\u{1f4dd}",
        "Bash" => "\u{25b6}\u{fe0f}",
        "Grep" | "Glob" => "\u{1f50d}",
        "Task" => "\u{1f916}",
        "WebSearch" | "WebFetch" => "\u{1f310}",
        _ => "\u{1f527}",
    }
}

fn string_arg<'a>(arguments: &'a Value, key: &str) -> &'a str {
    arguments.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Last two components of a slash-separated path.
#[must_use]
pub fn short_path(path: &str) -> &str {
    let mut slashes = path.rmatch_indices('/').map(|(at, _)| at);
    match (slashes.next(), slashes.next()) {
        (Some(_), Some(second)) => &path[second + 1..],
        _ => path,
    }
}

/// Compact one-liner for a tool call, e.g. `▶️ Bash: cargo test`.
#[must_use]
pub fn format_tool_call(name: &str, arguments: &Value) -> String {
    let icon = tool_icon(name);
    match name {
        "Read" | "Edit" | "MultiEdit" | "Write" => {
            format!(
                "{icon} {name}: {}",
                short_path(string_arg(arguments, "file_path"))
            )
        }
        "Bash" => {
            let command = string_arg(arguments, "command");
            if command.chars().count() > MAX_COMMAND_CHARS {
                let head: String = command.chars().take(MAX_COMMAND_CHARS).collect();
                format!("{icon} Bash: {head}...")
            } else {
                format!("{icon} Bash: {command}")
            }
        }
        "Grep" | "Glob" => format!("{icon} {name}: {}", string_arg(arguments, "pattern")),
        _ => format!("{icon} {name}"),
    }
}

/// Tool output as a fenced block, truncated to [`MAX_RESULT_CHARS`].
#[must_use]
pub fn format_tool_result(text: &str) -> String {
    let total = text.chars().count();
    let mut body: String = text.chars().take(MAX_RESULT_CHARS).collect();
    if total > MAX_RESULT_CHARS {
        body.push_str(&format!("\n... ({total} chars total)"));
    }
    // A fence inside the output would close the block early.
    let body = body.replace("```", "'''");
    format!("```\n{}\n```\n", body.trim_end())
}
