//! Bridge configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keychain service name used for Slack credentials.
pub const KEYRING_SERVICE: &str = "agent-bridge";

/// Slack connectivity and ownership settings.
///
/// Tokens are loaded at runtime via OS keychain or environment variables,
/// never from the TOML config file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// Channel the bridge listens on and posts into.
    pub channel_id: String,
    /// The single Slack user allowed to drive the conversation.
    pub owner_user_id: String,
    /// App-level token used for Socket Mode (populated at runtime).
    #[serde(skip)]
    pub app_token: String,
    /// Bot user token used for posting messages (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

/// Timing knobs for turns, presentation, and debounce.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimingConfig {
    /// Inactivity after which the conversation identifier is dropped.
    #[serde(default = "default_session_timeout_seconds")]
    pub session_timeout_seconds: u64,
    /// Minimum gap between two edits of the streaming message.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Quiet period that closes an input burst.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Time a cancelled child gets between SIGTERM and SIGKILL.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Longest silence tolerated from the child during a turn.
    #[serde(default = "default_event_timeout_seconds")]
    pub event_timeout_seconds: u64,
    /// Upper bound on a single stdin write for an injected message.
    #[serde(default = "default_inject_timeout_ms")]
    pub inject_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            session_timeout_seconds: default_session_timeout_seconds(),
            update_interval_ms: default_update_interval_ms(),
            debounce_ms: default_debounce_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            event_timeout_seconds: default_event_timeout_seconds(),
            inject_timeout_ms: default_inject_timeout_ms(),
        }
    }
}

impl TimingConfig {
    /// Session inactivity timeout.
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_seconds)
    }

    /// Minimum interval between remote edits.
    #[must_use]
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Input debounce window.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Grace period between SIGTERM and SIGKILL.
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Maximum silence from the child during a turn.
    #[must_use]
    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.event_timeout_seconds)
    }

    /// Bound on one injected stdin write.
    #[must_use]
    pub fn inject_timeout(&self) -> Duration {
        Duration::from_millis(self.inject_timeout_ms)
    }
}

fn default_session_timeout_seconds() -> u64 {
    3600
}

fn default_update_interval_ms() -> u64 {
    2000
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_cancel_grace_ms() -> u64 {
    2000
}

fn default_event_timeout_seconds() -> u64 {
    300
}

fn default_inject_timeout_ms() -> u64 {
    500
}

/// Presentation limits for the outbound message chain.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PresentationConfig {
    /// Character budget of one remote message before the chain splits.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
        }
    }
}

fn default_max_message_length() -> usize {
    3800
}

/// How the child is told to handle tool permissions.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Skip prompts for regular users; pass an explicit tool allowlist as root.
    #[default]
    Auto,
    /// Always pass `--dangerously-skip-permissions`.
    Skip,
    /// Add no permission arguments.
    None,
}

fn default_host_cli() -> String {
    "claude".into()
}

/// Flags that put the Claude Code CLI into persistent stream-json mode.
#[must_use]
pub fn default_host_cli_args() -> Vec<String> {
    [
        "-p",
        "--output-format",
        "stream-json",
        "--input-format",
        "stream-json",
        "--verbose",
        "--include-partial-messages",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

fn default_true() -> bool {
    true
}

/// Bridge configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Directory the child process runs in.
    pub work_dir: PathBuf,
    /// Slack connectivity settings.
    pub slack: SlackConfig,
    /// Child binary (normally `claude`).
    #[serde(default = "default_host_cli")]
    pub host_cli: String,
    /// Base arguments for the child binary.
    #[serde(default = "default_host_cli_args")]
    pub host_cli_args: Vec<String>,
    /// Tool permission handling for the child.
    #[serde(default)]
    pub permission_mode: PermissionMode,
    /// Model override passed as `--model`.
    #[serde(default)]
    pub model: Option<String>,
    /// Spend cap passed as `--max-budget-usd`.
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
    /// Render tool results into the chat.
    #[serde(default)]
    pub verbose: bool,
    /// Keep a JSONL transcript under `work_dir/data/`.
    #[serde(default = "default_true")]
    pub conversation_log: bool,
    /// Where downloaded attachments are stored.
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
    /// Turn, presentation, and debounce timing.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Message length limits.
    #[serde(default)]
    pub presentation: PresentationConfig,
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load Slack credentials from OS keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env vars provide
    /// the required tokens.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.slack.app_token = load_credential("slack_app_token", "SLACK_APP_TOKEN").await?;
        self.slack.bot_token = load_credential("slack_bot_token", "SLACK_BOT_TOKEN").await?;
        Ok(())
    }

    /// Load only the bot token, for processes that never open Socket Mode.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor `SLACK_BOT_TOKEN`
    /// provides it.
    pub async fn load_bot_token(&mut self) -> Result<()> {
        self.slack.bot_token = load_credential("slack_bot_token", "SLACK_BOT_TOKEN").await?;
        Ok(())
    }

    /// Replace the working directory, canonicalizing the new path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the path does not exist.
    pub fn override_work_dir(&mut self, path: &Path) -> Result<()> {
        self.work_dir = path
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
        Ok(())
    }

    /// Directory for downloaded attachments.
    #[must_use]
    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("agent-bridge-uploads"))
    }

    /// Path of the JSONL conversation transcript.
    #[must_use]
    pub fn conversation_log_path(&self) -> PathBuf {
        self.work_dir.join("data").join("conversation_log.jsonl")
    }

    /// Validate that a Slack user owns this bridge.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unauthorized` if the user is not the owner.
    pub fn ensure_owner(&self, user_id: &str) -> Result<()> {
        if self.slack.owner_user_id == user_id {
            Ok(())
        } else {
            Err(AppError::Unauthorized("user is not the bridge owner".into()))
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.slack.channel_id.trim().is_empty() {
            return Err(AppError::Config("slack.channel_id must not be empty".into()));
        }

        if self.slack.owner_user_id.trim().is_empty() {
            return Err(AppError::Config(
                "slack.owner_user_id must not be empty".into(),
            ));
        }

        if self.host_cli.trim().is_empty() {
            return Err(AppError::Config("host_cli must not be empty".into()));
        }

        if self.presentation.max_message_length < 100 {
            return Err(AppError::Config(
                "presentation.max_message_length must be at least 100".into(),
            ));
        }

        if self.timing.debounce_ms == 0 {
            return Err(AppError::Config(
                "timing.debounce_ms must be greater than zero".into(),
            ));
        }

        if let Some(budget) = self.max_budget_usd {
            if budget <= 0.0 {
                return Err(AppError::Config(
                    "max_budget_usd must be greater than zero".into(),
                ));
            }
        }

        let canonical = self
            .work_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("work_dir invalid: {err}")))?;
        if !canonical.is_dir() {
            return Err(AppError::Config(format!(
                "work_dir '{}' is not a directory",
                canonical.display()
            )));
        }
        self.work_dir = canonical;

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::Config(format!(
                "credential {keyring_key} not found in keychain or {env_key} env var"
            ))
        })
}
