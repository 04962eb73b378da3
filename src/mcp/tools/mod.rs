//! MCP tool handlers.

pub mod conversation_context;
pub mod send_file;

use rmcp::model::{CallToolResult, Content};

use crate::Result;

/// Arguments of a tool call as a typed input.
///
/// # Errors
///
/// Returns `rmcp::ErrorData::invalid_params` if the arguments do not fit.
pub(crate) fn parse_input<T: serde::de::DeserializeOwned>(
    tool: &str,
    arguments: Option<serde_json::Map<String, serde_json::Value>>,
) -> std::result::Result<T, rmcp::ErrorData> {
    serde_json::from_value(serde_json::Value::Object(arguments.unwrap_or_default())).map_err(
        |err| rmcp::ErrorData::invalid_params(format!("invalid {tool} parameters: {err}"), None),
    )
}

/// Text result, or a tool-level error the agent can read and act on.
pub(crate) fn text_result(outcome: Result<String>) -> CallToolResult {
    match outcome {
        Ok(text) => CallToolResult::success(vec![Content::text(text)]),
        Err(err) => CallToolResult::error(vec![Content::text(format!("Error: {err}"))]),
    }
}
