#![forbid(unsafe_code)]

//! `agent-bridge-mcp`: MCP server the agent launches over stdio.
//!
//! Shares files into the bridge's Slack channel and reads the
//! conversation transcript. Logs go to stderr; stdout carries the
//! protocol.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_bridge::config::BridgeConfig;
use agent_bridge::mcp::{transport, McpState};
use agent_bridge::slack::FileUploader;
use agent_bridge::transcript::ConversationLog;
use agent_bridge::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "agent-bridge-mcp",
    about = "MCP tools for an agent driven from agent-bridge",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the bridge's TOML configuration file.
    #[arg(long)]
    config: PathBuf,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing()?;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = BridgeConfig::load_from_path(&args.config)?;
    // The agent's environment has the Slack tokens stripped, so this
    // usually comes from the keychain.
    let uploader = match config.load_bot_token().await {
        Ok(()) => Some(FileUploader::new(&config.slack.bot_token)),
        Err(err) => {
            warn!(%err, "no bot token, send_file will report an error");
            None
        }
    };

    let state = Arc::new(McpState {
        channel_id: config.slack.channel_id.clone(),
        uploader,
        transcript: ConversationLog::new(config.conversation_log_path())?,
    });

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_ct.cancel();
        }
    });

    info!(channel_id = %config.slack.channel_id, "agent-bridge-mcp ready");
    transport::serve_stdio(state, ct).await
}

fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))
}
