//! `send_file` MCP tool handler.
//!
//! Shares a local file into the bridge channel. Files made only for
//! sending are deleted once delivered.

use std::path::Path;
use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use tracing::{info, info_span, warn, Instrument};

use crate::mcp::handler::{BridgeMcpServer, McpState};
use crate::mcp::tools::{parse_input, text_result};
use crate::{AppError, Result};

/// Input parameters.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SendFileInput {
    /// Path of the file to send.
    pub file_path: String,
    /// Comment posted with the file.
    #[serde(default)]
    pub caption: String,
    /// Delete the file after delivery (default: `true`).
    #[serde(default = "default_temp_file")]
    pub temp_file: bool,
}

fn default_temp_file() -> bool {
    true
}

/// Handle the `send_file` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` when the arguments are invalid.
pub async fn handle(
    context: ToolCallContext<'_, BridgeMcpServer>,
) -> std::result::Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: SendFileInput = parse_input("send_file", context.arguments)?;
    let span = info_span!("send_file", temp_file = input.temp_file);

    Ok(text_result(send_file(&state, &input).instrument(span).await))
}

/// Upload the file and report what was sent.
///
/// # Errors
///
/// Returns `AppError::Slack` when no bot token is configured or the upload
/// fails, and `AppError::Io` when the file cannot be read.
pub async fn send_file(state: &McpState, input: &SendFileInput) -> Result<String> {
    let Some(ref uploader) = state.uploader else {
        return Err(AppError::Slack("no Slack bot token is configured".into()));
    };

    let path = Path::new(&input.file_path);
    if !tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
    {
        return Err(AppError::Io(format!("file not found: {}", input.file_path)));
    }
    let name = path
        .file_name()
        .map_or_else(|| input.file_path.clone(), |n| n.to_string_lossy().into_owned());
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| AppError::Io(format!("failed to read {}: {err}", input.file_path)))?;

    let caption = Some(input.caption.as_str()).filter(|c| !c.trim().is_empty());
    uploader
        .upload(&state.channel_id, &name, bytes, caption)
        .await?;

    if input.temp_file {
        if let Err(err) = tokio::fs::remove_file(path).await {
            warn!(%err, path = %path.display(), "failed to delete sent temp file");
        }
    }
    info!(file = %name, "file sent");
    Ok(format!("File {name} sent to Slack"))
}
