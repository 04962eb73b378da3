//! MCP server handler, shared state, and tool router.

use std::future::Future;
use std::sync::Arc;

use rmcp::handler::server::{
    tool::{ToolCallContext, ToolRoute, ToolRouter},
    ServerHandler,
};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Implementation, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use tracing::info_span;

use crate::slack::FileUploader;
use crate::transcript::ConversationLog;

/// Name the server registers under and reports in its handshake.
pub const MCP_SERVER_NAME: &str = "agent-bridge";

/// What the tools work against.
pub struct McpState {
    /// Channel files are shared into.
    pub channel_id: String,
    /// Absent when no bot token could be loaded.
    pub uploader: Option<FileUploader>,
    /// The bridge's conversation transcript.
    pub transcript: ConversationLog,
}

/// MCP server exposing the bridge's tools to the agent.
pub struct BridgeMcpServer {
    state: Arc<McpState>,
}

impl BridgeMcpServer {
    /// Create a server bound to shared state.
    #[must_use]
    pub fn new(state: Arc<McpState>) -> Self {
        Self { state }
    }

    /// Access the shared state.
    #[must_use]
    pub fn state(&self) -> &Arc<McpState> {
        &self.state
    }

    fn tool_router() -> ToolRouter<Self> {
        let mut router = ToolRouter::new();

        for tool in Self::all_tools() {
            let name = tool.name.to_string();
            match name.as_str() {
                "send_file" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::mcp::tools::send_file::handle(context))
                    }));
                }
                "get_conversation_context" => {
                    router.add_route(ToolRoute::new_dyn(tool, |context| {
                        Box::pin(crate::mcp::tools::conversation_context::handle(context))
                    }));
                }
                _ => {
                    router.add_route(ToolRoute::new_dyn(tool, |_context| {
                        Box::pin(async {
                            Err(rmcp::ErrorData::internal_error(
                                "tool not implemented",
                                None,
                            ))
                        })
                    }));
                }
            }
        }

        router
    }

    /// Convert a `serde_json::Value::Object` into the `Arc<Map>` expected by `Tool`.
    fn schema(value: serde_json::Value) -> Arc<serde_json::Map<String, serde_json::Value>> {
        match value {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::default()),
        }
    }

    /// Tool definitions in the order `tools/list` reports them.
    #[must_use]
    pub fn all_tools() -> Vec<Tool> {
        vec![
            Tool::new(
                "send_file",
                "Send a file to the user in the Slack channel. With temp_file=true \
                 (default) the file was made only for sending and is deleted after \
                 delivery; with temp_file=false it is part of the project and kept.",
                Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" },
                        "caption": { "type": "string", "default": "" },
                        "temp_file": { "type": "boolean", "default": true }
                    },
                    "required": ["file_path"]
                })),
            ),
            Tool::new(
                "get_conversation_context",
                "Recent chat history between the user and the agent, oldest first. \
                 Use it to understand what was said in Slack.",
                Self::schema(serde_json::json!({
                    "type": "object",
                    "properties": {
                        "limit": { "type": "integer", "default": 30 },
                        "max_chars": { "type": "integer", "default": 20000 }
                    }
                })),
            ),
        ]
    }
}

impl ServerHandler for BridgeMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: MCP_SERVER_NAME.into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Implementation::default()
            },
            instructions: Some(
                "Tools for the Slack conversation this agent is driven from.".into(),
            ),
            ..ServerInfo::default()
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, rmcp::ErrorData>> + Send + '_ {
        let router = Self::tool_router();
        let _span = info_span!("call_tool", tool = %request.name).entered();

        async move {
            router
                .call(ToolCallContext::new(self, request, context))
                .await
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, rmcp::ErrorData>> + Send + '_ {
        let tools = Self::all_tools();

        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }
}
