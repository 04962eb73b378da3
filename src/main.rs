#![forbid(unsafe_code)]

//! `agent-bridge`: Slack front end for a long-lived Claude Code process.
//!
//! Loads configuration and credentials, connects to Slack over Socket
//! Mode, and routes the owner's messages into agent turns until ctrl-c or
//! SIGTERM.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_bridge::config::BridgeConfig;
use agent_bridge::mcp::registration;
use agent_bridge::orchestrator::Bridge;
use agent_bridge::presentation::ChatEndpoint;
use agent_bridge::slack::SlackService;
use agent_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-bridge", about = "Slack bridge for a Claude Code process", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the working directory of the agent.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Show tool results in the chat.
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-bridge bootstrap");

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = BridgeConfig::load_from_path(&args.config)?;
    if let Some(ws) = args.workspace {
        config.override_work_dir(&ws)?;
    }
    if args.verbose {
        config.verbose = true;
    }
    config.load_credentials().await?;
    info!(work_dir = %config.work_dir.display(), "configuration loaded");
    register_mcp_server(&config, &args.config);

    // ── Wire Slack and the bridge ───────────────────────
    let slack = Arc::new(SlackService::new(&config.slack).map_err(|err| {
        error!(%err, "slack service start failed");
        err
    })?);
    let endpoint: Arc<dyn ChatEndpoint> = Arc::clone(&slack) as Arc<dyn ChatEndpoint>;
    let (bridge, inputs) = Bridge::new(&config, endpoint)?;
    bridge.startup().await;

    let dispatcher = bridge.spawn_dispatcher(inputs);
    let socket = slack.spawn_socket_mode(&config.slack, Arc::clone(&bridge));
    info!("agent-bridge ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    bridge.shutdown().await;
    socket.abort();
    let _ = dispatcher.await;
    info!("agent-bridge shut down");

    Ok(())
}

/// Register `agent-bridge-mcp` for the agent's project when it sits next
/// to this binary.
fn register_mcp_server(config: &BridgeConfig, config_path: &Path) {
    let command = match std::env::current_exe() {
        Ok(exe) => exe.with_file_name(format!(
            "agent-bridge-mcp{}",
            std::env::consts::EXE_SUFFIX
        )),
        Err(err) => {
            warn!(%err, "cannot locate own binary, skipping MCP registration");
            return;
        }
    };
    if !command.is_file() {
        warn!(path = %command.display(), "MCP server binary not found, skipping registration");
        return;
    }
    let config_path = config_path
        .canonicalize()
        .unwrap_or_else(|_| config_path.to_path_buf());
    if let Err(err) = registration::ensure_registered(&config.work_dir, &command, &config_path) {
        warn!(%err, "MCP registration failed");
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
