//! Slack Web API and Socket Mode client.
//!
//! [`SlackService`] implements [`ChatEndpoint`] on top of
//! `chat.postMessage` and `chat.update`, retrying transient failures with
//! exponential backoff and honoring `retry_after` on rate limits.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use slack_morphism::errors::SlackClientError;
use slack_morphism::prelude::{
    SlackApiChatPostMessageRequest, SlackApiChatUpdateRequest, SlackApiToken, SlackApiTokenType,
    SlackApiTokenValue, SlackChannelId, SlackClient, SlackClientEventsListenerEnvironment,
    SlackClientHyperHttpsConnector, SlackClientSession, SlackClientSocketModeConfig,
    SlackClientSocketModeListener, SlackMessageContent, SlackSocketModeListenerCallbacks, SlackTs,
};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::orchestrator::Bridge;
use crate::presentation::{ChatEndpoint, Controls, EditOutcome, MessageRef};
use crate::slack::events::SlackAppState;
use crate::slack::{blocks, commands, events};
use crate::{config::SlackConfig, AppError, Result};

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 5;

/// Slack API error codes meaning the edit changed nothing.
const UNCHANGED_CODES: &[&str] = &["message_not_modified", "no_change"];

/// How a failed call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long and try again.
    RetryAfter(Duration),
    /// Do not retry.
    GiveUp,
}

/// Backoff for `attempt` (1-based): 1 s doubling, capped at 30 s.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(5);
    (INITIAL_RETRY_DELAY * 2_u32.pow(exponent)).min(MAX_RETRY_DELAY)
}

/// Retry-relevant shape of a failed Slack call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// HTTP 429, with Slack's `Retry-After` when it sent one.
    RateLimited(Option<Duration>),
    /// Slack answered and refused, or the answer could not be decoded.
    Rejected,
    /// Network, HTTP or stream failure that may clear up.
    Transient,
}

impl FailureKind {
    /// Classify a slack-morphism error.
    #[must_use]
    pub fn of(error: &SlackClientError) -> Self {
        match error {
            SlackClientError::RateLimitError(rate) => Self::RateLimited(rate.retry_after),
            SlackClientError::ApiError(_) | SlackClientError::ProtocolError(_) => Self::Rejected,
            // EndOfStream (connection closed mid-response) lands here with
            // the HTTP and socket failures.
            _ => Self::Transient,
        }
    }
}

/// Decide whether failed `attempt` (1-based) is worth another try.
#[must_use]
pub fn retry_decision(kind: FailureKind, attempt: u32) -> RetryDecision {
    if attempt >= MAX_ATTEMPTS {
        return RetryDecision::GiveUp;
    }
    match kind {
        FailureKind::RateLimited(retry_after) => {
            RetryDecision::RetryAfter(retry_after.unwrap_or_else(|| backoff_delay(attempt)))
        }
        FailureKind::Rejected => RetryDecision::GiveUp,
        FailureKind::Transient => RetryDecision::RetryAfter(backoff_delay(attempt)),
    }
}

fn api_error_code(error: &SlackClientError) -> Option<&str> {
    match error {
        SlackClientError::ApiError(api) => Some(api.code.as_str()),
        _ => None,
    }
}

/// Build a Slack API token.
#[must_use]
pub fn api_token(value: &str, token_type: SlackApiTokenType) -> SlackApiToken {
    SlackApiToken {
        token_value: SlackApiTokenValue(value.to_owned()),
        cookie: None,
        team_id: None,
        scope: None,
        token_type: Some(token_type),
    }
}

fn content(text: &str, controls: Controls) -> SlackMessageContent {
    SlackMessageContent {
        text: Some(blocks::fallback_text(text)),
        blocks: Some(blocks::message_blocks(text, controls)),
        attachments: None,
        upload: None,
        files: None,
        reactions: None,
        metadata: None,
    }
}

/// Slack client bound to the bridge's channel.
pub struct SlackService {
    client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
    channel: SlackChannelId,
}

impl SlackService {
    /// Create the HTTPS client.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the HTTPS connector cannot be created.
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Slack(format!("failed to init slack connector: {err}")))?;
        Ok(Self {
            client: Arc::new(SlackClient::new(connector)),
            bot_token: api_token(&config.bot_token, SlackApiTokenType::Bot),
            app_token: api_token(&config.app_token, SlackApiTokenType::App),
            channel: SlackChannelId(config.channel_id.clone()),
        })
    }

    /// Create an HTTP session for direct API calls using the bot token.
    #[must_use]
    pub fn http_session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.bot_token)
    }

    /// Listen for events over Socket Mode, routing them into `bridge`.
    #[must_use]
    pub fn spawn_socket_mode(&self, config: &SlackConfig, bridge: Arc<Bridge>) -> JoinHandle<()> {
        let state = Arc::new(SlackAppState::new(config, bridge));
        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_error_handler(|err, _client, _state| {
                    error!(?err, "socket mode error");
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                })
                .with_user_state(state),
        );
        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_hello_events(|event, _client, _state| async move {
                debug!(?event, "socket hello");
            })
            .with_command_events(commands::handle_command)
            .with_interaction_events(events::handle_interaction)
            .with_push_events(events::handle_push_event);
        let socket_config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times:
                SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };

        let listener = SlackClientSocketModeListener::new(&socket_config, listener_env, callbacks);
        let app_token = self.app_token.clone();
        tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                error!(?error, "socket mode listen failed");
                return;
            }

            info!("socket mode listener connected");
            listener.serve().await;
            info!("socket mode listener exited");
        })
    }

    async fn post_with_retry(
        &self,
        text: String,
        reply_to: Option<MessageRef>,
        controls: Controls,
    ) -> Result<MessageRef> {
        let request = SlackApiChatPostMessageRequest {
            channel: reply_to
                .as_ref()
                .map_or_else(|| self.channel.clone(), |r| SlackChannelId(r.channel_id.clone())),
            content: content(&text, controls),
            as_user: None,
            icon_emoji: None,
            icon_url: None,
            link_names: None,
            parse: None,
            thread_ts: reply_to.map(|r| SlackTs(r.message_id)),
            username: None,
            reply_broadcast: None,
            unfurl_links: Some(false),
            unfurl_media: Some(false),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.http_session().chat_post_message(&request).await {
                Ok(response) => {
                    debug!(ts = %response.ts, "posted slack message");
                    return Ok(MessageRef {
                        channel_id: response.channel.to_string(),
                        message_id: response.ts.to_string(),
                    });
                }
                Err(error) => match retry_decision(FailureKind::of(&error), attempt) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(?error, ?delay, attempt, "slack post failed; retrying");
                        sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        return Err(AppError::Slack(format!("failed to post message: {error}")));
                    }
                },
            }
        }
    }

    async fn edit_with_retry(
        &self,
        target: MessageRef,
        text: String,
        controls: Controls,
    ) -> Result<EditOutcome> {
        let request = SlackApiChatUpdateRequest::new(
            SlackChannelId(target.channel_id),
            content(&text, controls),
            SlackTs(target.message_id),
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.http_session().chat_update(&request).await {
                Ok(_) => return Ok(EditOutcome::Applied),
                Err(error) => {
                    if api_error_code(&error).is_some_and(|code| UNCHANGED_CODES.contains(&code)) {
                        return Ok(EditOutcome::Unchanged);
                    }
                    match retry_decision(FailureKind::of(&error), attempt) {
                        RetryDecision::RetryAfter(delay) => {
                            warn!(?error, ?delay, attempt, "slack update failed; retrying");
                            sleep(delay).await;
                        }
                        RetryDecision::GiveUp => {
                            return Err(AppError::Slack(format!(
                                "failed to update message: {error}"
                            )));
                        }
                    }
                }
            }
        }
    }
}

impl ChatEndpoint for SlackService {
    fn post(
        &self,
        text: String,
        reply_to: Option<MessageRef>,
        controls: Controls,
    ) -> Pin<Box<dyn Future<Output = Result<MessageRef>> + Send + '_>> {
        Box::pin(self.post_with_retry(text, reply_to, controls))
    }

    fn edit(
        &self,
        target: MessageRef,
        text: String,
        controls: Controls,
    ) -> Pin<Box<dyn Future<Output = Result<EditOutcome>> + Send + '_>> {
        Box::pin(self.edit_with_retry(target, text, controls))
    }
}
