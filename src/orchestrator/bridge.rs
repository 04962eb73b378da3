//! The bridge: routes chat input into agent turns and turn output back
//! into the chat.
//!
//! Input flows `chat → Coalescer → dispatcher`. The dispatcher either
//! injects a burst into the running turn or starts a new one. Each turn
//! gets its own task that pumps [`TurnEvent`]s into a
//! [`PresentationChain`] and flushes it on its deadline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agent::spawner::SpawnConfig;
use crate::agent::{Event, Supervisor, SupervisorSettings, TurnEvent};
use crate::config::BridgeConfig;
use crate::inbound::{Coalescer, PendingInput};
use crate::media::MediaStore;
use crate::models::Session;
use crate::presentation::render::{format_tool_call, format_tool_result};
use crate::presentation::{ChatEndpoint, Controls, PresentationChain};
use crate::transcript::ConversationLog;
use crate::Result;

/// Characters of stderr quoted in an exit report.
const EXIT_REPORT_STDERR_CHARS: usize = 500;

/// Shown in the running turn when a follow-up could not be injected.
pub const INJECT_FAILED_NOTICE: &str = "\u{26a0}\u{fe0f} Could not add your message to the \
    running turn. It will be sent as a new turn once this one ends.";

/// Side channel into the presentation loop of the running turn.
struct TurnNotices {
    turn_id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// Per-turn presentation knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PresentationSettings {
    max_message_length: usize,
    update_interval: Duration,
    verbose: bool,
}

/// The running bridge.
pub struct Bridge {
    endpoint: Arc<dyn ChatEndpoint>,
    supervisor: Arc<Supervisor>,
    session: Mutex<Session>,
    coalescer: Coalescer,
    direct_tx: mpsc::UnboundedSender<PendingInput>,
    media: MediaStore,
    transcript: Option<ConversationLog>,
    presentation: PresentationSettings,
    notices: Mutex<Option<TurnNotices>>,
    shutdown: CancellationToken,
}

impl Bridge {
    /// Build the bridge. Input bursts arrive on the returned receiver, to
    /// be handed to [`Bridge::spawn_dispatcher`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the conversation log cannot be prepared.
    pub fn new(
        config: &BridgeConfig,
        endpoint: Arc<dyn ChatEndpoint>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<PendingInput>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transcript = if config.conversation_log {
            Some(ConversationLog::new(config.conversation_log_path())?)
        } else {
            None
        };

        let bridge = Self {
            endpoint,
            supervisor: Arc::new(Supervisor::new(
                SpawnConfig::from_config(config),
                SupervisorSettings::from_config(config),
            )),
            session: Mutex::new(Session::new(config.timing.session_timeout())),
            coalescer: Coalescer::spawn(config.timing.debounce(), tx.clone()),
            direct_tx: tx,
            media: MediaStore::new(config.upload_dir()),
            transcript,
            presentation: PresentationSettings {
                max_message_length: config.presentation.max_message_length,
                update_interval: config.timing.update_interval(),
                verbose: config.verbose,
            },
            notices: Mutex::new(None),
            shutdown: CancellationToken::new(),
        };
        Ok((Arc::new(bridge), rx))
    }

    /// The process supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Attachment storage.
    #[must_use]
    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    /// Snapshot of the session record.
    pub async fn session(&self) -> Session {
        self.session.lock().await.clone()
    }

    /// Token cancelled when the bridge shuts down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // ── Inbound ─────────────────────────────────────────────

    /// Accept a text message from the owner.
    pub async fn accept_text(&self, text: &str) {
        self.admit().await;
        self.coalescer.push_text(text).await;
    }

    /// Accept a downloaded attachment; images become photo references.
    pub async fn accept_file(&self, path: PathBuf, caption: Option<&str>) {
        self.admit().await;
        if crate::media::is_image(&path) {
            self.coalescer.push_photo(path, caption).await;
        } else {
            self.coalescer.push_document(path, caption).await;
        }
    }

    /// Session bookkeeping for every accepted input.
    async fn admit(&self) {
        let expired = {
            let mut session = self.session.lock().await;
            let expired = session.check_timeout(Instant::now());
            session.touch();
            expired
        };
        if expired {
            self.discard_turn_artifacts().await;
        }
    }

    /// Delete attachments and stop an idle child.
    async fn discard_turn_artifacts(&self) {
        self.media.cleanup().await;
        if !self.supervisor.is_running() {
            self.supervisor.shutdown().await;
        }
    }

    // ── Dispatch ────────────────────────────────────────────

    /// Run the dispatcher until shutdown.
    #[must_use]
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        mut inputs: mpsc::UnboundedReceiver<PendingInput>,
    ) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(
            async move {
                loop {
                    let input = tokio::select! {
                        () = bridge.shutdown.cancelled() => break,
                        input = inputs.recv() => match input {
                            Some(input) => input,
                            None => break,
                        },
                    };
                    bridge.dispatch(input).await;
                }
                debug!("dispatcher exiting");
            }
            .instrument(info_span!("dispatcher")),
        )
    }

    async fn dispatch(self: &Arc<Self>, input: PendingInput) {
        if input.is_empty() {
            return;
        }
        let prompt = input.to_prompt();

        if input.escalated {
            debug!("escalated input waits for the running turn to end");
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                () = self.supervisor.wait_idle() => {}
            }
        } else if self.supervisor.is_running() {
            match self.supervisor.inject(&prompt).await {
                Ok(()) => {
                    info!(chars = prompt.chars().count(), "input injected into running turn");
                    self.log_user(&prompt);
                }
                Err(err) => {
                    warn!(%err, "injection failed, input requeued for a new turn");
                    self.notice_running_turn(INJECT_FAILED_NOTICE).await;
                    self.coalescer.requeue(input).await;
                }
            }
            return;
        }

        self.start_turn(&prompt).await;
    }

    /// Start a turn for `prompt` and spawn its presentation loop.
    async fn start_turn(self: &Arc<Self>, prompt: &str) {
        let resume_id = self.session.lock().await.conversation_id.clone();

        let mut chain = PresentationChain::new(
            Arc::clone(&self.endpoint),
            self.presentation.max_message_length,
            self.presentation.update_interval,
        );
        if let Err(err) = chain.start().await {
            warn!(%err, "failed to post placeholder message");
        }

        if let Err(err) = self.supervisor.start(prompt, resume_id.as_deref()).await {
            error!(%err, "failed to start turn");
            chain.fail(&format!("Could not start the agent: {err}")).await;
            return;
        }
        self.log_user(prompt);

        let turn_id = Uuid::new_v4();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        *self.notices.lock().await = Some(TurnNotices {
            turn_id,
            tx: notice_tx,
        });
        let bridge = Arc::clone(self);
        tokio::spawn(
            async move { bridge.run_turn(turn_id, chain, notice_rx).await }.instrument(info_span!(
                "turn",
                %turn_id,
                resumed = resume_id.is_some()
            )),
        );
    }

    /// Pump the turn's events and notices into its chain until a terminal
    /// event.
    async fn run_turn(
        self: Arc<Self>,
        turn_id: Uuid,
        mut chain: PresentationChain,
        mut notices: mpsc::UnboundedReceiver<String>,
    ) {
        enum Step {
            Event(TurnEvent),
            Notice(String),
            Flush,
        }

        // One `next_event` future lives across flushes: dropping it after it
        // took an item off the queue would lose that item.
        let mut next = Box::pin(self.supervisor.next_event());
        loop {
            let deadline = chain.next_flush_at();
            let step = tokio::select! {
                event = &mut next => Step::Event(event),
                Some(notice) = notices.recv() => Step::Notice(notice),
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => Step::Flush,
            };

            let event = match step {
                Step::Flush => {
                    chain.flush().await;
                    continue;
                }
                Step::Notice(notice) => {
                    chain.push_notice(&notice).await;
                    continue;
                }
                Step::Event(event) => event,
            };

            let terminal = event.is_terminal();
            self.present(&mut chain, event).await;
            if terminal {
                break;
            }
            next = Box::pin(self.supervisor.next_event());
        }

        let mut slot = self.notices.lock().await;
        if slot.as_ref().is_some_and(|open| open.turn_id == turn_id) {
            *slot = None;
        }
        drop(slot);
        // Notices sent after the terminal event still get shown.
        while let Ok(notice) = notices.try_recv() {
            self.notify(&notice).await;
        }
    }

    /// Show `text` inside the running turn's messages, or on its own when
    /// no turn is being presented.
    async fn notice_running_turn(&self, text: &str) {
        let delivered = self
            .notices
            .lock()
            .await
            .as_ref()
            .is_some_and(|open| open.tx.send(text.to_owned()).is_ok());
        if !delivered {
            self.notify(text).await;
        }
    }

    async fn present(&self, chain: &mut PresentationChain, event: TurnEvent) {
        match event {
            TurnEvent::Agent(event) => self.present_agent_event(chain, event).await,
            TurnEvent::Finished(completion) => {
                self.session
                    .lock()
                    .await
                    .observe(&Event::Completed(completion.clone()));
                chain.finalize(Some(&completion.footer()), false).await;
                self.log_assistant(&completion.final_text);
                info!(
                    duration_ms = completion.duration_ms,
                    turns = completion.turn_count,
                    cost_usd = completion.cost_usd,
                    "turn completed"
                );
            }
            TurnEvent::Cancelled => {
                chain.finalize(None, true).await;
                info!("turn cancelled");
            }
            TurnEvent::Exited { exit_code, stderr } => {
                let code = exit_code.map_or_else(|| "signal".to_owned(), |c| c.to_string());
                let mut report = format!("Agent process exited ({code})");
                let stderr = stderr.trim();
                if !stderr.is_empty() {
                    let tail = crate::agent::drain::tail_chars(stderr, EXIT_REPORT_STDERR_CHARS);
                    report.push_str(&format!(": {tail}"));
                }
                chain.fail(&report).await;
            }
            TurnEvent::Stalled => {
                chain
                    .fail("No output from the agent for too long; turn abandoned")
                    .await;
            }
            TurnEvent::ReaderFailed(reason) => {
                chain
                    .fail(&format!("Lost the agent's output: {reason}"))
                    .await;
            }
        }
    }

    async fn present_agent_event(&self, chain: &mut PresentationChain, event: Event) {
        match event {
            Event::TextDelta { text } => chain.push_text(&text).await,
            Event::ToolInvoked { name, arguments } => {
                chain
                    .push_tool_call(&format_tool_call(&name, &arguments))
                    .await;
            }
            Event::ToolResult { text, .. } => {
                if self.presentation.verbose {
                    chain.push_tool_result(&format_tool_result(&text)).await;
                }
            }
            Event::ToolStarted { name } => debug!(tool = name.as_str(), "tool call opened"),
            event @ (Event::Init { .. } | Event::Completed(_)) => {
                self.session.lock().await.observe(&event);
                if let Event::Completed(completion) = event {
                    // An injected prompt was answered; the turn continues.
                    self.log_assistant(&completion.final_text);
                    chain.push_text("\n\n").await;
                }
            }
        }
    }

    // ── Commands ────────────────────────────────────────────

    /// Run a chat command and return the reply shown to the owner.
    pub async fn handle_command(&self, line: &str) -> String {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or("").to_ascii_lowercase();
        let argument = words.next();

        match command.as_str() {
            "clear" => self.clear().await,
            "cancel" => self.cancel_turn().await,
            "cost" => {
                let cost = self.session.lock().await.cumulative_cost_usd;
                format!("\u{1f4b0} Session cost: ${cost:.4}")
            }
            "model" => self.model(argument).await,
            "compact" => {
                if self.supervisor.is_running() {
                    "\u{26a0}\u{fe0f} The agent is busy. Cancel the running turn first.".to_owned()
                } else {
                    self.submit("/compact");
                    "\u{1f5dc}\u{fe0f} Compacting the conversation.".to_owned()
                }
            }
            _ => "Commands: clear, cancel, cost, model [name], compact".to_owned(),
        }
    }

    /// Cancel the running turn.
    pub async fn cancel_turn(&self) -> String {
        if !self.supervisor.is_running() {
            return "Nothing running.".to_owned();
        }
        if let Err(err) = self.supervisor.cancel().await {
            warn!(%err, "cancel failed");
        }
        "\u{1f6d1} Cancelled.".to_owned()
    }

    async fn clear(&self) -> String {
        self.supervisor.shutdown().await;
        self.coalescer.clear().await;
        self.session.lock().await.reset();
        self.media.cleanup().await;
        info!("session cleared");
        "\u{1f195} Session cleared.".to_owned()
    }

    async fn model(&self, name: Option<&str>) -> String {
        let Some(name) = name else {
            let current = self
                .supervisor
                .model()
                .await
                .unwrap_or_else(|| "default".to_owned());
            return format!("Current model: {current}\nUsage: model <name>");
        };

        let busy = self.supervisor.is_running();
        // The next turn respawns the child with the new model and resumes.
        self.supervisor.set_model(Some(name.to_owned())).await;
        info!(model = name, busy, "model changed");
        if busy {
            format!("Model set to: {name} (applies from the next turn)")
        } else {
            format!("Model set to: {name}")
        }
    }

    /// Send a prompt to the dispatcher, bypassing the debounce.
    fn submit(&self, text: &str) {
        let input = PendingInput {
            texts: vec![text.to_owned()],
            ..PendingInput::default()
        };
        if self.direct_tx.send(input).is_err() {
            warn!("dispatcher gone, dropping command prompt");
        }
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Clear uploads left over by a previous run.
    pub async fn startup(&self) {
        self.media.cleanup_all().await;
        info!(upload_dir = %self.media.upload_dir().display(), "bridge ready");
    }

    /// Stop dispatching, stop the child, and post a shutdown notice.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.supervisor.shutdown().await;
        self.notify("\u{1f44b} Bridge shutting down.").await;
        info!("bridge stopped");
    }

    /// Post a standalone message, logging failures.
    pub async fn notify(&self, text: &str) {
        if let Err(err) = self
            .endpoint
            .post(text.to_owned(), None, Controls::None)
            .await
        {
            warn!(%err, "failed to post notice");
        }
    }

    fn log_user(&self, text: &str) {
        if let Some(ref log) = self.transcript {
            if let Err(err) = log.log_user(text) {
                warn!(%err, "failed to record prompt");
            }
        }
    }

    fn log_assistant(&self, text: &str) {
        if let Some(ref log) = self.transcript {
            if let Err(err) = log.log_assistant(text) {
                warn!(%err, "failed to record answer");
            }
        }
    }
}
