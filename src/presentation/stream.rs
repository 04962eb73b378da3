//! Streaming a turn's output into remote messages.
//!
//! The first message is posted as a placeholder with a cancel control and
//! then edited in place at most once per update interval. When the buffer
//! outgrows one message, the finished part is committed without controls
//! and a continuation is threaded under the first message.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::presentation::chain::MessageChain;
use crate::presentation::{
    ChatEndpoint, Controls, EditOutcome, MessageRef, CANCELLED_MARKER, CONTINUATION_PLACEHOLDER,
    THINKING_PLACEHOLDER,
};
use crate::Result;

/// Remote rendering of one turn.
pub struct PresentationChain {
    endpoint: Arc<dyn ChatEndpoint>,
    chain: MessageChain,
    update_interval: Duration,
    first: Option<MessageRef>,
    current: Option<MessageRef>,
    last_commit: Option<Instant>,
    last_rendered: Option<(String, Controls)>,
    dirty: bool,
    finalized: bool,
}

impl PresentationChain {
    /// New chain; nothing is posted until [`Self::start`].
    #[must_use]
    pub fn new(endpoint: Arc<dyn ChatEndpoint>, max_length: usize, update_interval: Duration) -> Self {
        Self {
            endpoint,
            chain: MessageChain::new(max_length),
            update_interval,
            first: None,
            current: None,
            last_commit: None,
            last_rendered: None,
            dirty: false,
            finalized: false,
        }
    }

    /// Post the placeholder message.
    ///
    /// # Errors
    ///
    /// Returns the endpoint error if the placeholder could not be posted.
    /// The chain stays usable and posts a fresh message on its next flush.
    pub async fn start(&mut self) -> Result<MessageRef> {
        let posted = self
            .endpoint
            .post(THINKING_PLACEHOLDER.to_owned(), None, Controls::Cancel)
            .await?;
        self.first = Some(posted.clone());
        self.current = Some(posted.clone());
        Ok(posted)
    }

    /// The text buffer.
    #[must_use]
    pub fn chain(&self) -> &MessageChain {
        &self.chain
    }

    /// First message of the chain, the thread anchor.
    #[must_use]
    pub fn first_message(&self) -> Option<&MessageRef> {
        self.first.as_ref()
    }

    /// Message currently being edited.
    #[must_use]
    pub fn current_message(&self) -> Option<&MessageRef> {
        self.current.as_ref()
    }

    /// Whether the chain has been finalized.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Append streamed assistant text.
    pub async fn push_text(&mut self, text: &str) {
        if self.finalized || text.is_empty() {
            return;
        }
        self.chain.append_text(text);
        self.dirty = true;
        self.maybe_flush().await;
    }

    /// Append a one-line tool call summary.
    pub async fn push_tool_call(&mut self, line: &str) {
        if self.finalized {
            return;
        }
        self.chain.append_tool_call(line);
        self.dirty = true;
        self.maybe_flush().await;
    }

    /// Append a bridge notice on its own line.
    pub async fn push_notice(&mut self, line: &str) {
        self.push_tool_call(line).await;
    }

    /// Append a rendered tool result block.
    pub async fn push_tool_result(&mut self, block: &str) {
        if self.finalized {
            return;
        }
        self.chain.append_text(block);
        self.dirty = true;
        self.maybe_flush().await;
    }

    /// When pending output becomes due, or `None` when nothing is pending.
    #[must_use]
    pub fn next_flush_at(&self) -> Option<Instant> {
        if !self.dirty || self.finalized {
            return None;
        }
        Some(
            self.last_commit
                .map_or_else(Instant::now, |at| at + self.update_interval),
        )
    }

    /// Flush if the update interval has passed since the last commit.
    pub async fn maybe_flush(&mut self) {
        let due = match self.last_commit {
            Some(at) => at.elapsed() >= self.update_interval,
            None => true,
        };
        if due {
            self.flush().await;
        }
    }

    /// Commit pending output now, splitting as needed.
    pub async fn flush(&mut self) {
        if !self.dirty || self.finalized {
            return;
        }
        self.roll_over().await;

        let display = self.chain.render();
        if !display.trim().is_empty() {
            self.commit(display, Controls::Cancel).await;
        }
        self.last_commit = Some(Instant::now());
        self.dirty = false;
    }

    /// Show the final state: optional cancel marker, optional footer, no
    /// controls. Later calls do nothing.
    pub async fn finalize(&mut self, footer: Option<&str>, cancelled: bool) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        if cancelled {
            self.chain.prepend_marker(CANCELLED_MARKER);
        }
        if let Some(footer) = footer {
            self.chain.set_footer(footer);
        }
        self.roll_over().await;

        let display = self.chain.render();
        if !display.trim().is_empty() {
            self.commit(display, Controls::None).await;
        }
        self.dirty = false;
        debug!(
            messages = self.chain.chunks().len() + 1,
            cancelled, "presentation finalized"
        );
    }

    /// Finalize with an error marker in place of the footer.
    pub async fn fail(&mut self, error: &str) {
        let marker = format!("\u{26a0}\u{fe0f} {error}");
        self.finalize(Some(&marker), false).await;
    }

    /// Move full messages out of the open buffer.
    async fn roll_over(&mut self) {
        while self.chain.needs_split() {
            let completed = self.chain.split();
            self.commit(completed, Controls::None).await;

            match self
                .endpoint
                .post(
                    CONTINUATION_PLACEHOLDER.to_owned(),
                    self.first.clone(),
                    Controls::Cancel,
                )
                .await
            {
                Ok(next) => {
                    if self.first.is_none() {
                        self.first = Some(next.clone());
                    }
                    self.current = Some(next);
                }
                Err(err) => {
                    warn!(%err, "failed to post continuation message");
                    self.current = None;
                }
            }
            self.last_rendered = None;
        }
    }

    /// Show `text` on the current message, skipping identical re-renders.
    async fn commit(&mut self, text: String, controls: Controls) {
        if self
            .last_rendered
            .as_ref()
            .is_some_and(|(shown, shown_controls)| *shown == text && *shown_controls == controls)
        {
            return;
        }

        let Some(target) = self.current.clone() else {
            // Start or a continuation failed to post; try a fresh message.
            match self
                .endpoint
                .post(text.clone(), self.first.clone(), controls)
                .await
            {
                Ok(posted) => {
                    if self.first.is_none() {
                        self.first = Some(posted.clone());
                    }
                    self.current = Some(posted);
                    self.last_rendered = Some((text, controls));
                }
                Err(err) => warn!(%err, "failed to post message"),
            }
            return;
        };

        match self.endpoint.edit(target, text.clone(), controls).await {
            Ok(EditOutcome::Applied | EditOutcome::Unchanged) => {
                self.last_rendered = Some((text, controls));
            }
            Err(err) => warn!(%err, "failed to update message"),
        }
    }
}
