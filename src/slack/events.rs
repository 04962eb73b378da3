//! Slack event handlers.
//!
//! Push events carry the owner's messages and attachments; interaction
//! events carry the cancel button. Everything from another user, another
//! channel, or a bot is ignored, with a log line for unauthorized users.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector, SlackEventCallbackBody,
    SlackInteractionEvent, SlackMessageEvent, SlackPushEventCallback,
};
use tracing::{debug, info, warn};

use crate::config::SlackConfig;
use crate::orchestrator::Bridge;
use crate::slack::blocks::CANCEL_ACTION_ID;
use crate::{AppError, Result};

/// Shared state handed to every Socket Mode callback.
pub struct SlackAppState {
    /// The bridge events are routed into.
    pub bridge: Arc<Bridge>,
    /// Channel the bridge listens on.
    pub channel_id: String,
    /// The only user allowed to drive the bridge.
    pub owner_user_id: String,
    bot_token: String,
    http: reqwest::Client,
}

impl SlackAppState {
    /// Bundle the bridge with the Slack settings the handlers need.
    #[must_use]
    pub fn new(config: &SlackConfig, bridge: Arc<Bridge>) -> Self {
        Self {
            bridge,
            channel_id: config.channel_id.clone(),
            owner_user_id: config.owner_user_id.clone(),
            bot_token: config.bot_token.clone(),
            http: reqwest::Client::new(),
        }
    }

    /// Whether a message from `user_id` in `channel_id` may drive the bridge.
    #[must_use]
    pub fn accepts(&self, user_id: &str, channel_id: &str) -> bool {
        if channel_id != self.channel_id {
            debug!(channel_id, "ignoring event from another channel");
            return false;
        }
        if user_id != self.owner_user_id {
            warn!(user_id, "unauthorized user attempted to use the bridge (ignored)");
            return false;
        }
        true
    }

    /// Download a private Slack file with the bot token.
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| AppError::Slack(format!("file download failed: {err}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AppError::Slack(format!("file download failed: {err}")))?;
        Ok(bytes.to_vec())
    }
}

/// Fields of a shared file needed to fetch it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FileAttachment {
    /// Slack file id.
    pub id: String,
    /// Original file name.
    #[serde(default)]
    pub name: Option<String>,
    /// Authenticated download URL.
    #[serde(default)]
    pub url_private_download: Option<String>,
}

/// Owner-visible content of a message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Author.
    pub user_id: String,
    /// Channel.
    pub channel_id: String,
    /// Message text, possibly empty.
    pub text: String,
    /// Attached files.
    pub files: Vec<FileAttachment>,
}

/// Reduce a message event to what the bridge consumes.
///
/// Returns `None` for bot messages, edits, deletions, and other subtypes
/// that do not represent new input, except file shares.
#[must_use]
pub fn inbound_message(event: &SlackMessageEvent) -> Option<InboundMessage> {
    if event.sender.bot_id.is_some() {
        return None;
    }
    if let Some(ref subtype) = event.subtype {
        let subtype = serde_json::to_value(subtype).ok()?;
        if subtype.as_str() != Some("file_share") {
            debug!(?subtype, "ignoring message subtype");
            return None;
        }
    }

    let user_id = event.sender.user.as_ref()?.to_string();
    let channel_id = event.origin.channel.as_ref()?.to_string();
    let text = event
        .content
        .as_ref()
        .and_then(|content| content.text.clone())
        .unwrap_or_default();
    let files = event
        .content
        .as_ref()
        .and_then(|content| content.files.as_ref())
        .map(|files| {
            files
                .iter()
                .filter_map(|file| {
                    serde_json::to_value(file)
                        .ok()
                        .and_then(|value| serde_json::from_value::<FileAttachment>(value).ok())
                })
                .collect()
        })
        .unwrap_or_default();

    Some(InboundMessage {
        user_id,
        channel_id,
        text,
        files,
    })
}

/// Handle push events delivered via Socket Mode.
///
/// # Errors
///
/// Never fails; problems are logged so Slack does not redeliver.
pub async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let SlackEventCallbackBody::Message(message) = event.event else {
        debug!("ignoring non-message push event");
        return Ok(());
    };

    let app_state: Option<Arc<SlackAppState>> = {
        let guard = state.read().await;
        guard.get_user_state::<Arc<SlackAppState>>().cloned()
    };
    let Some(app) = app_state else {
        warn!("app state not available; cannot process message");
        return Ok(());
    };

    let Some(inbound) = inbound_message(&message) else {
        return Ok(());
    };
    if !app.accepts(&inbound.user_id, &inbound.channel_id) {
        return Ok(());
    }

    info!(
        chars = inbound.text.chars().count(),
        files = inbound.files.len(),
        "owner message received"
    );

    let mut saved: Vec<PathBuf> = Vec::new();
    for file in &inbound.files {
        let Some(ref url) = file.url_private_download else {
            debug!(file_id = file.id.as_str(), "file has no download url");
            continue;
        };
        let name = file
            .name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("{}.bin", file.id));
        match app.download(url).await {
            Ok(bytes) => match app.bridge.media().save(&file.id, &name, &bytes).await {
                Ok(path) => saved.push(path),
                Err(err) => warn!(%err, file_id = file.id.as_str(), "failed to store attachment"),
            },
            Err(err) => warn!(%err, file_id = file.id.as_str(), "failed to download attachment"),
        }
    }

    // The text travels as the caption of the first attachment.
    let mut caption = Some(inbound.text.as_str()).filter(|text| !text.trim().is_empty());
    for path in saved {
        app.bridge.accept_file(path, caption.take()).await;
    }
    if let Some(text) = caption {
        app.bridge.accept_text(text).await;
    }

    Ok(())
}

/// Handle interactive payloads (the cancel button) delivered via Socket Mode.
///
/// # Errors
///
/// Never fails; problems are logged.
pub async fn handle_interaction(
    event: SlackInteractionEvent,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let SlackInteractionEvent::BlockActions(block_event) = event else {
        debug!("ignoring non-block interaction");
        return Ok(());
    };

    let app_state: Option<Arc<SlackAppState>> = {
        let guard = state.read().await;
        guard.get_user_state::<Arc<SlackAppState>>().cloned()
    };
    let Some(app) = app_state else {
        warn!("app state not available; cannot process interaction");
        return Ok(());
    };

    let user_id = block_event
        .user
        .as_ref()
        .map(|u| u.id.to_string())
        .unwrap_or_default();
    let channel_id = block_event
        .channel
        .as_ref()
        .map(|c| c.id.to_string())
        .unwrap_or_default();
    if !app.accepts(&user_id, &channel_id) {
        return Ok(());
    }

    for action in block_event.actions.iter().flatten() {
        let action_id = action.action_id.to_string();
        info!(action_id, user_id, "dispatching block action");
        if action_id == CANCEL_ACTION_ID {
            let reply = app.bridge.cancel_turn().await;
            debug!(reply, "cancel button handled");
        } else {
            debug!(action_id, "unknown action ignored");
        }
    }

    Ok(())
}
