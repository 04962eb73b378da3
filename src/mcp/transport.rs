//! Stdio transport: the agent launches the server and speaks MCP over its
//! stdin and stdout.

use std::sync::Arc;

use rmcp::service::ServiceExt;
use rmcp::transport::io::stdio;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::handler::{BridgeMcpServer, McpState};
use crate::{AppError, Result};

/// Serve over stdio until the client disconnects or `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the transport fails to initialize.
pub async fn serve_stdio(state: Arc<McpState>, ct: CancellationToken) -> Result<()> {
    let server = BridgeMcpServer::new(state);
    let transport = stdio();

    info!("starting stdio MCP transport");
    let service = server
        .serve_with_ct(transport, ct)
        .await
        .map_err(|err| AppError::Config(format!("stdio transport failed: {err}")))?;

    service
        .waiting()
        .await
        .map_err(|err| AppError::Config(format!("stdio service error: {err}")))?;

    info!("stdio MCP transport shut down");
    Ok(())
}
