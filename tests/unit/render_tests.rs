//! Unit tests for tool call summaries and tool result blocks.

use serde_json::json;

use agent_bridge::presentation::render::{
    format_tool_call, format_tool_result, short_path, MAX_COMMAND_CHARS, MAX_RESULT_CHARS,
};

#[test]
fn short_path_keeps_last_two_components() {
    assert_eq!(short_path("/home/dev/project/src/main.rs"), "src/main.rs");
    assert_eq!(short_path("src/main.rs"), "src/main.rs");
    assert_eq!(short_path("main.rs"), "main.rs");
}

#[test]
fn file_tools_show_short_path() {
    let args = json!({"file_path": "/w/project/src/lib.rs"});
    assert_eq!(format_tool_call("Read", &args), "\u{1f4c2} Read: src/lib.rs");
    assert_eq!(
        format_tool_call("Write", &args),
        "\u{1f4dd} Write: src/lib.rs"
    );
    assert_eq!(
        format_tool_call("Edit", &args),
        "\u{270f}\u{fe0f} Edit: src/lib.rs"
    );
}

#[test]
fn short_bash_command_is_shown_whole() {
    let args = json!({"command": "cargo test"});
    assert_eq!(
        format_tool_call("Bash", &args),
        "\u{25b6}\u{fe0f} Bash: cargo test"
    );
}

#[test]
fn long_bash_command_is_truncated() {
    let command = "x".repeat(MAX_COMMAND_CHARS + 10);
    let line = format_tool_call("Bash", &json!({ "command": command }));
    assert_eq!(
        line,
        format!("\u{25b6}\u{fe0f} Bash: {}...", "x".repeat(MAX_COMMAND_CHARS))
    );
}

#[test]
fn search_tools_show_pattern() {
    let args = json!({"pattern": "fn main"});
    assert_eq!(format_tool_call("Grep", &args), "\u{1f50d} Grep: fn main");
    assert_eq!(format_tool_call("Glob", &args), "\u{1f50d} Glob: fn main");
}

#[test]
fn other_tools_show_name_only() {
    assert_eq!(
        format_tool_call("mcp__github__create_issue", &json!({})),
        "\u{1f527} mcp__github__create_issue"
    );
    assert_eq!(format_tool_call("Task", &json!({})), "\u{1f916} Task");
}

#[test]
fn missing_arguments_do_not_panic() {
    assert_eq!(format_tool_call("Read", &json!(null)), "\u{1f4c2} Read: ");
}

#[test]
fn tool_result_is_fenced() {
    assert_eq!(format_tool_result("ok\n"), "```\nok\n```\n");
}

#[test]
fn long_tool_result_is_truncated_with_total() {
    let text = "y".repeat(MAX_RESULT_CHARS + 500);
    let block = format_tool_result(&text);
    assert!(block.contains(&"y".repeat(MAX_RESULT_CHARS)));
    assert!(!block.contains(&"y".repeat(MAX_RESULT_CHARS + 1)));
    assert!(block.contains("(1500 chars total)"));
}

#[test]
fn inner_fences_cannot_close_the_block() {
    let block = format_tool_result("before\n```\nafter");
    assert_eq!(block.matches("```").count(), 2);
    assert!(block.contains("'''"));
}
