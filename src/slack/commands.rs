//! Slack slash command router.
//!
//! One slash command (for example `/agent`) carries the bridge commands as
//! its first word: `clear`, `cancel`, `cost`, `model [name]`, `compact`.
//! Replies are ephemeral.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector, SlackCommandEvent,
    SlackCommandEventResponse, SlackMessageContent, SlackMessageResponseType,
};
use tracing::{info, warn};

use crate::slack::events::SlackAppState;

fn ephemeral(text: String) -> SlackCommandEventResponse {
    SlackCommandEventResponse {
        content: SlackMessageContent {
            text: Some(text),
            blocks: None,
            attachments: None,
            upload: None,
            files: None,
            reactions: None,
            metadata: None,
        },
        response_type: Some(SlackMessageResponseType::Ephemeral),
    }
}

/// Handle incoming slash commands routed via Socket Mode.
///
/// # Errors
///
/// Returns an error if the command response cannot be constructed.
pub async fn handle_command(
    event: SlackCommandEvent,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::AnyStdResult<SlackCommandEventResponse> {
    info!(command = ?event.command, user = ?event.user_id, "received slash command");

    let app_state: Option<Arc<SlackAppState>> = {
        let guard = state.read().await;
        guard.get_user_state::<Arc<SlackAppState>>().cloned()
    };
    let Some(app) = app_state else {
        warn!("app state not available; cannot run command");
        return Ok(ephemeral("The bridge is not ready yet.".to_owned()));
    };

    if !app.accepts(&event.user_id.to_string(), &event.channel_id.to_string()) {
        return Ok(ephemeral("This bridge belongs to someone else.".to_owned()));
    }

    let line = event.text.unwrap_or_default();
    let reply = app.bridge.handle_command(&line).await;
    Ok(ephemeral(reply))
}
