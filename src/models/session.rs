//! Conversation session record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::info;

use crate::agent::Event;

/// The one live conversation between the chat owner and the agent.
///
/// Created at startup with no identifier. The identifier arrives with the
/// child's `Init` line and is confirmed by every `Completed` line; it is
/// what `--resume` hands back to a respawned child.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Resumable conversation identifier.
    pub conversation_id: Option<String>,
    /// Last accepted input or agent activity.
    pub last_activity: Instant,
    /// Spend reported by completed turns.
    pub cumulative_cost_usd: f64,
    /// Completed turns.
    pub turn_count: u32,
    /// Wall-clock start of the conversation.
    pub started_at: DateTime<Utc>,
    timeout: Duration,
}

impl Session {
    /// Fresh session with the given inactivity timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            conversation_id: None,
            last_activity: Instant::now(),
            cumulative_cost_usd: 0.0,
            turn_count: 0,
            started_at: Utc::now(),
            timeout,
        }
    }

    /// Record an accepted caller input.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Fold an agent event into the session.
    pub fn observe(&mut self, event: &Event) {
        match event {
            Event::Init { conversation_id } if !conversation_id.is_empty() => {
                self.conversation_id = Some(conversation_id.clone());
                self.last_activity = Instant::now();
            }
            Event::Completed(completion) => {
                if !completion.conversation_id.is_empty() {
                    self.conversation_id = Some(completion.conversation_id.clone());
                }
                self.cumulative_cost_usd += completion.cost_usd;
                self.turn_count += 1;
                self.last_activity = Instant::now();
            }
            _ => {}
        }
    }

    /// Expire the conversation after inactivity.
    ///
    /// Returns `true` when the session was reset, in which case the caller
    /// discards turn-scoped artifacts before handling the new input.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        if self.conversation_id.is_none() {
            return false;
        }
        let idle = now.saturating_duration_since(self.last_activity);
        if idle <= self.timeout {
            return false;
        }

        info!(
            idle_secs = idle.as_secs(),
            conversation_id = self.conversation_id.as_deref().unwrap_or(""),
            "session timed out, starting a fresh conversation"
        );
        self.reset();
        true
    }

    /// Forget the conversation and its counters.
    pub fn reset(&mut self) {
        self.conversation_id = None;
        self.cumulative_cost_usd = 0.0;
        self.turn_count = 0;
        self.started_at = Utc::now();
        self.last_activity = Instant::now();
    }
}
