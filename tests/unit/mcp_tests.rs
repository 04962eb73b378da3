//! Unit tests for the MCP tools that need no network, and for project
//! registration of the MCP server.

use std::path::Path;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use agent_bridge::mcp::handler::{BridgeMcpServer, McpState};
use agent_bridge::mcp::registration::{ensure_registered, is_registered};
use agent_bridge::mcp::tools::conversation_context::{
    conversation_context, ContextInput, NO_HISTORY,
};
use agent_bridge::mcp::tools::send_file::{send_file, SendFileInput};
use agent_bridge::mcp::MCP_SERVER_NAME;
use agent_bridge::transcript::{format_context, ConversationLog, Role, TranscriptEntry};
use agent_bridge::AppError;

fn state_in(dir: &Path) -> McpState {
    McpState {
        channel_id: "C_TEST".into(),
        uploader: None,
        transcript: ConversationLog::new(dir.join("data").join("conversation_log.jsonl"))
            .expect("log opens"),
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).expect("file exists")).expect("json")
}

// ── Tool surface ────────────────────────────────────────────────────────────

#[test]
fn server_lists_both_tools() {
    let names: Vec<String> = BridgeMcpServer::all_tools()
        .iter()
        .map(|tool| tool.name.to_string())
        .collect();
    assert_eq!(names, ["send_file", "get_conversation_context"]);
}

// ── Conversation context ────────────────────────────────────────────────────

#[test]
fn empty_transcript_reports_no_history() {
    let temp = tempfile::tempdir().expect("tempdir");
    let state = state_in(temp.path());

    assert_eq!(
        conversation_context(&state, ContextInput::default()),
        NO_HISTORY
    );
}

#[test]
fn context_lists_both_speakers_oldest_first() {
    let temp = tempfile::tempdir().expect("tempdir");
    let state = state_in(temp.path());
    state.transcript.log_user("how big is it?").expect("write");
    state.transcript.log_assistant("About 4 kB.").expect("write");

    let context = conversation_context(&state, ContextInput::default());
    let lines: Vec<&str> = context.lines().collect();

    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("\u{1f464} how big is it?"), "got {lines:?}");
    assert!(lines[1].ends_with("\u{1f916} About 4 kB."), "got {lines:?}");
}

#[test]
fn context_honors_the_limit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let state = state_in(temp.path());
    for i in 0..5 {
        state.transcript.log_user(&format!("message {i}")).expect("write");
    }

    let context = conversation_context(
        &state,
        ContextInput {
            limit: 2,
            max_chars: 20_000,
        },
    );

    assert_eq!(context.lines().count(), 2);
    assert!(context.ends_with("message 4"));
}

#[test]
fn formatted_entry_shows_time_and_shortens_long_text() {
    let ts = Utc
        .with_ymd_and_hms(2026, 3, 1, 9, 5, 0)
        .single()
        .expect("valid time");
    let entries = [
        TranscriptEntry {
            ts,
            role: Role::User,
            text: "short".into(),
        },
        TranscriptEntry {
            ts,
            role: Role::Assistant,
            text: "y".repeat(600),
        },
    ];

    let formatted = format_context(&entries);
    let lines: Vec<&str> = formatted.lines().collect();

    assert_eq!(lines[0], "[09:05] \u{1f464} short");
    assert_eq!(
        lines[1],
        format!("[09:05] \u{1f916} {}\u{2026}", "y".repeat(500))
    );
}

// ── send_file without the network ───────────────────────────────────────────

#[tokio::test]
async fn send_file_without_token_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let state = state_in(temp.path());
    let file = temp.path().join("report.txt");
    std::fs::write(&file, b"data").expect("write");

    let result = send_file(
        &state,
        &SendFileInput {
            file_path: file.to_string_lossy().into_owned(),
            caption: String::new(),
            temp_file: true,
        },
    )
    .await;

    assert!(matches!(result, Err(AppError::Slack(_))), "got {result:?}");
    assert!(file.exists(), "an unsent file is never deleted");
}

#[test]
fn send_file_input_defaults_to_a_temp_file() {
    let input: SendFileInput =
        serde_json::from_value(json!({ "file_path": "/tmp/x.png" })).expect("valid input");
    assert!(input.temp_file);
    assert_eq!(input.caption, "");
}

// ── Registration ────────────────────────────────────────────────────────────

#[test]
fn registration_writes_a_project_entry() {
    let temp = tempfile::tempdir().expect("tempdir");
    let command = Path::new("/opt/agent-bridge/agent-bridge-mcp");
    let config = Path::new("/etc/agent-bridge/config.toml");

    assert!(!is_registered(temp.path()));
    let written = ensure_registered(temp.path(), command, config).expect("registration");

    assert!(written);
    assert!(is_registered(temp.path()));
    let root = read_json(&temp.path().join(".mcp.json"));
    assert_eq!(
        root["mcpServers"][MCP_SERVER_NAME],
        json!({
            "command": "/opt/agent-bridge/agent-bridge-mcp",
            "args": ["--config", "/etc/agent-bridge/config.toml"],
        })
    );
}

#[test]
fn registration_is_idempotent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let command = Path::new("/bin/agent-bridge-mcp");
    let config = Path::new("/cfg.toml");

    assert!(ensure_registered(temp.path(), command, config).expect("first"));
    let before = std::fs::read_to_string(temp.path().join(".mcp.json")).expect("written");
    assert!(!ensure_registered(temp.path(), command, config).expect("second"));
    let after = std::fs::read_to_string(temp.path().join(".mcp.json")).expect("still there");

    assert_eq!(before, after);
}

#[test]
fn registration_keeps_other_servers() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        temp.path().join(".mcp.json"),
        r#"{"mcpServers":{"db":{"command":"db-mcp"}},"other":1}"#,
    )
    .expect("seed");

    ensure_registered(
        temp.path(),
        Path::new("/bin/agent-bridge-mcp"),
        Path::new("/cfg.toml"),
    )
    .expect("registration");

    let root = read_json(&temp.path().join(".mcp.json"));
    assert_eq!(root["mcpServers"]["db"]["command"], "db-mcp");
    assert_eq!(root["other"], 1);
    assert!(root["mcpServers"][MCP_SERVER_NAME].is_object());
}

#[test]
fn entry_in_claude_settings_counts_as_registered() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(temp.path().join(".claude")).expect("dir");
    std::fs::write(
        temp.path().join(".claude").join("settings.json"),
        format!(r#"{{"mcpServers":{{"{MCP_SERVER_NAME}":{{"command":"x"}}}}}}"#),
    )
    .expect("seed");

    let written = ensure_registered(
        temp.path(),
        Path::new("/bin/agent-bridge-mcp"),
        Path::new("/cfg.toml"),
    )
    .expect("registration");

    assert!(!written);
    assert!(!temp.path().join(".mcp.json").exists());
}

#[test]
fn malformed_mcp_json_is_left_alone() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join(".mcp.json");
    std::fs::write(&path, "not json").expect("seed");

    let result = ensure_registered(
        temp.path(),
        Path::new("/bin/agent-bridge-mcp"),
        Path::new("/cfg.toml"),
    );

    assert!(matches!(result, Err(AppError::Config(_))), "got {result:?}");
    assert_eq!(std::fs::read_to_string(&path).expect("kept"), "not json");
}
