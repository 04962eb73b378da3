//! Model Context Protocol server the agent uses to reach back into the
//! chat: sharing files and reading the conversation transcript.

pub mod handler;
pub mod registration;
pub mod tools;
pub mod transport;

pub use handler::{BridgeMcpServer, McpState, MCP_SERVER_NAME};
