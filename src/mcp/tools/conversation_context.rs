//! `get_conversation_context` MCP tool handler.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolCallContext;
use rmcp::model::CallToolResult;
use tracing::debug;

use crate::mcp::handler::{BridgeMcpServer, McpState};
use crate::mcp::tools::{parse_input, text_result};
use crate::transcript::format_context;

/// Shown when the transcript holds nothing yet.
pub const NO_HISTORY: &str = "(no conversation history yet)";

/// Input parameters.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct ContextInput {
    /// Most entries to return (default: 30).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Character budget across returned entries (default: 20000).
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ContextInput {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            max_chars: default_max_chars(),
        }
    }
}

fn default_limit() -> usize {
    30
}

fn default_max_chars() -> usize {
    20_000
}

/// Handle the `get_conversation_context` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` when the arguments are invalid.
pub async fn handle(
    context: ToolCallContext<'_, BridgeMcpServer>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let state = Arc::clone(context.service.state());
    let input: ContextInput = parse_input("get_conversation_context", context.arguments)?;

    Ok(text_result(Ok(conversation_context(&state, input))))
}

/// Recent transcript entries as readable lines.
#[must_use]
pub fn conversation_context(state: &McpState, input: ContextInput) -> String {
    let entries = state.transcript.recent(input.limit, input.max_chars);
    debug!(entries = entries.len(), "conversation context read");
    if entries.is_empty() {
        NO_HISTORY.to_owned()
    } else {
        format_context(&entries)
    }
}
