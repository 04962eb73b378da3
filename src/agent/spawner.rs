//! Child process spawner.
//!
//! Builds the Claude Code command line for persistent stream-json mode and
//! launches it with:
//! - `kill_on_drop(true)` so a dropped handle never leaks a process.
//! - The bridge's own Slack tokens removed from the child's environment.
//! - All three stdio streams piped; stdout and stderr are handed straight
//!   to the drain tasks.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::Value;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info};

use crate::agent::drain::{spawn_drain, Drain};
use crate::config::{BridgeConfig, PermissionMode};
use crate::{AppError, Result};

/// Bridge secrets that must never reach the child.
pub const STRIPPED_ENV_VARS: &[&str] = &["SLACK_APP_TOKEN", "SLACK_BOT_TOKEN"];

/// Built-in tools allowed when permissions cannot be skipped (root).
pub const BUILTIN_TOOLS: &[&str] = &[
    "Bash()",
    "Edit()",
    "MultiEdit()",
    "Write()",
    "Read()",
    "Glob()",
    "Grep()",
    "WebFetch()",
    "WebSearch()",
    "Task()",
    "TodoWrite()",
    "NotebookEdit()",
    "NotebookRead()",
];

/// Configuration for spawning the child process.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnConfig {
    /// Child binary.
    pub host_cli: String,
    /// Base arguments, placed first.
    pub host_cli_args: Vec<String>,
    /// Working directory of the child.
    pub work_dir: PathBuf,
    /// Tool permission handling.
    pub permission_mode: PermissionMode,
    /// Optional `--model` value.
    pub model: Option<String>,
    /// Optional `--max-budget-usd` value.
    pub max_budget_usd: Option<f64>,
}

impl SpawnConfig {
    /// Derive the spawn settings from the bridge configuration.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            host_cli: config.host_cli.clone(),
            host_cli_args: config.host_cli_args.clone(),
            work_dir: config.work_dir.clone(),
            permission_mode: config.permission_mode,
            model: config.model.clone(),
            max_budget_usd: config.max_budget_usd,
        }
    }

    /// Full argument list for one spawn.
    #[must_use]
    pub fn build_args(&self, resume_id: Option<&str>, running_as_root: bool) -> Vec<String> {
        let mut args = self.host_cli_args.clone();

        match (self.permission_mode, running_as_root) {
            (PermissionMode::Skip, _) | (PermissionMode::Auto, false) => {
                args.push("--dangerously-skip-permissions".into());
            }
            (PermissionMode::Auto, true) => {
                args.push("--allowedTools".into());
                args.extend(BUILTIN_TOOLS.iter().map(|tool| (*tool).to_owned()));
                let home = env::var_os("HOME").map(PathBuf::from);
                args.extend(discover_mcp_servers(&self.work_dir, home.as_deref()));
            }
            (PermissionMode::None, _) => {}
        }

        if let Some(id) = resume_id.filter(|id| !id.is_empty()) {
            args.push("--resume".into());
            args.push(id.to_owned());
        }
        if let Some(ref model) = self.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        if let Some(budget) = self.max_budget_usd {
            args.push("--max-budget-usd".into());
            args.push(budget.to_string());
        }

        args
    }
}

/// A live child with its stdin and drain queue.
#[derive(Debug)]
pub struct AgentProcess {
    /// OS process id.
    pub pid: u32,
    /// Child handle, kept alive for `kill_on_drop`.
    pub child: Child,
    /// Stdin for user messages.
    pub stdin: ChildStdin,
    /// Queue fed by stdout.
    pub drain: Drain,
}

/// Spawn the child and start draining its output.
///
/// # Errors
///
/// - `AppError::Process("failed to spawn agent: …")` on OS spawn failure.
/// - `AppError::Process("failed to capture …")` if a pipe is missing.
pub fn spawn_agent(config: &SpawnConfig, resume_id: Option<&str>) -> Result<AgentProcess> {
    let args = config.build_args(resume_id, running_as_root());

    let mut cmd = Command::new(&config.host_cli);
    cmd.args(&args);
    for key in STRIPPED_ENV_VARS {
        cmd.env_remove(key);
    }
    cmd.current_dir(&config.work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Process(format!("failed to spawn agent: {err}")))?;

    let pid = child.id().unwrap_or_default();
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stderr".into()))?;

    let drain = spawn_drain(pid, stdout, stderr);

    info!(
        pid,
        host_cli = config.host_cli.as_str(),
        resume = resume_id.unwrap_or(""),
        "started agent process"
    );

    Ok(AgentProcess {
        pid,
        child,
        stdin,
        drain,
    })
}

/// MCP server tool prefixes registered in the user's and project's config.
///
/// Reads `mcpServers` from `<home>/.claude.json` and `<work_dir>/.mcp.json`.
/// Unreadable or invalid files are skipped.
#[must_use]
pub fn discover_mcp_servers(work_dir: &Path, home: Option<&Path>) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(home) = home {
        candidates.push(home.join(".claude.json"));
    }
    candidates.push(work_dir.join(".mcp.json"));

    let mut servers = BTreeSet::new();
    for path in candidates {
        let Ok(raw) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            debug!(path = %path.display(), "skipping invalid mcp config");
            continue;
        };
        if let Some(map) = value.get("mcpServers").and_then(Value::as_object) {
            servers.extend(map.keys().map(|name| format!("mcp__{name}")));
        }
    }

    servers.into_iter().collect()
}

#[cfg(unix)]
fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}
