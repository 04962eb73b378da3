//! Process supervisor.
//!
//! Owns at most one long-lived child process and runs turns against it.
//! A turn starts with [`Supervisor::start`], is consumed through
//! [`Supervisor::next_event`], and may receive extra prompts through
//! [`Supervisor::inject`] while it runs.
//!
//! Turn state machine:
//!
//! ```text
//! Idle ──start──▶ Starting ──prompt written──▶ Running
//!   ▲                                             │
//!   └──────── Completed | Cancelled | Crashed ◀───┘
//! ```
//!
//! Terminal states are recorded in [`Supervisor::last_outcome`] and the
//! supervisor drops straight back to `Idle`, so `Idle` is the only state a
//! new turn may start from.
//!
//! Every prompt written into a turn (the initial one plus each successful
//! injection) is answered by exactly one `result` line. The turn completes
//! when the last outstanding prompt has been answered.
//!
//! Locking: `lifecycle` serializes start, cancel, and shutdown. `control`
//! guards the live process, the turn token, and the outstanding count, and
//! is taken after `lifecycle`. The output queue has its own lock, held only
//! by the event consumer while it waits.

use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::agent::drain::{Drain, DrainItem};
use crate::agent::protocol::{self, Completion, Decoded, Event};
use crate::agent::spawner::{spawn_agent, AgentProcess, SpawnConfig};
use crate::agent::writer::{run_writer, INPUT_QUEUE_CAPACITY};
use crate::config::BridgeConfig;
use crate::{AppError, Result};

/// How long `shutdown` waits for the child to exit on closed stdin.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long the consumer waits for an exit status after stdout closed.
const EXIT_STATUS_WAIT: Duration = Duration::from_secs(2);

/// Lifecycle state of the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No turn; a new one may start.
    Idle,
    /// The child is being spawned or the first prompt written.
    Starting,
    /// The child is answering.
    Running,
    /// Every prompt of the turn was answered.
    Completed,
    /// The turn was cancelled by the caller.
    Cancelled,
    /// The child exited, stalled, or its output could not be read.
    Crashed,
}

impl TurnState {
    /// Whether a turn currently occupies the child.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// What [`Supervisor::next_event`] yields.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// An event to present. The turn continues.
    Agent(Event),
    /// The last outstanding prompt was answered. The turn is over.
    Finished(Completion),
    /// The child's output closed before the turn finished.
    Exited {
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Tail of the child's stderr.
        stderr: String,
    },
    /// The turn was cancelled.
    Cancelled,
    /// The child stayed silent longer than the event timeout.
    Stalled,
    /// The child's output could not be read.
    ReaderFailed(String),
}

impl TurnEvent {
    /// Whether this event ends the turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Agent(_))
    }
}

/// Timing knobs of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Time between SIGTERM and SIGKILL on cancel.
    pub cancel_grace: Duration,
    /// Longest tolerated silence during a turn.
    pub event_timeout: Duration,
    /// How long an injection may wait for the child's input queue.
    pub inject_timeout: Duration,
}

impl SupervisorSettings {
    /// Extract the supervisor timings from the bridge configuration.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            cancel_grace: config.timing.cancel_grace(),
            event_timeout: config.timing.event_timeout(),
            inject_timeout: config.timing.inject_timeout(),
        }
    }
}

/// A live child with its stdin writer task.
struct LiveProcess {
    pid: u32,
    child: Child,
    input_tx: mpsc::Sender<String>,
    writer_cancel: CancellationToken,
    writer: JoinHandle<()>,
}

impl LiveProcess {
    fn launch(agent: AgentProcess) -> (Self, Drain) {
        let AgentProcess {
            pid,
            child,
            stdin,
            drain,
        } = agent;

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let writer_cancel = CancellationToken::new();
        let writer = tokio::spawn(
            {
                let cancel = writer_cancel.clone();
                async move {
                    if let Err(err) = run_writer(pid, stdin, input_rx, cancel).await {
                        warn!(%err, "writer task exited with error");
                    }
                }
            }
            .instrument(info_span!("writer", pid)),
        );

        let live = Self {
            pid,
            child,
            input_tx,
            writer_cancel,
            writer,
        };
        (live, drain)
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, wait `grace`, then SIGKILL.
    async fn terminate(mut self, grace: Duration) {
        self.writer_cancel.cancel();
        send_sigterm(self.pid, &mut self.child);

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!(pid = self.pid, %status, "agent exited after SIGTERM"),
            Ok(Err(err)) => warn!(pid = self.pid, %err, "waiting for agent failed"),
            Err(_elapsed) => {
                warn!(pid = self.pid, "agent ignored SIGTERM, killing");
                if let Err(err) = self.child.kill().await {
                    warn!(pid = self.pid, %err, "failed to kill agent");
                }
            }
        }
        self.writer.abort();
    }

    /// Close stdin and wait for a voluntary exit, killing after `grace`.
    async fn close(self, grace: Duration) {
        let Self {
            pid,
            mut child,
            input_tx,
            writer_cancel: _,
            writer,
        } = self;

        // Dropping the last sender makes the writer shut stdin down.
        drop(input_tx);
        let _ = tokio::time::timeout(grace, writer).await;

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => info!(pid, %status, "agent process exited"),
            Ok(Err(err)) => warn!(pid, %err, "waiting for agent failed"),
            Err(_elapsed) => {
                warn!(pid, "agent did not exit on closed stdin, killing");
                if let Err(err) = child.kill().await {
                    warn!(pid, %err, "failed to kill agent");
                }
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32, child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => {
            if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                debug!(pid, %err, "SIGTERM failed, process likely gone");
            }
        }
        _ => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32, child: &mut Child) {
    let _ = child.start_kill();
}

struct Control {
    spawn: SpawnConfig,
    process: Option<LiveProcess>,
    turn_cancel: CancellationToken,
    outstanding: u32,
    last_outcome: Option<TurnState>,
    /// The live child was spawned with settings that have since changed.
    respawn: bool,
}

/// Result of one wait on the output queue.
enum Received {
    Cancelled,
    TimedOut,
    Item(Option<DrainItem>),
}

/// Supervisor of the single child process.
pub struct Supervisor {
    settings: SupervisorSettings,
    lifecycle: Mutex<()>,
    control: Mutex<Control>,
    queue: Mutex<Option<Drain>>,
    state: watch::Sender<TurnState>,
}

impl Supervisor {
    /// Create an idle supervisor. No process is spawned until the first turn.
    #[must_use]
    pub fn new(spawn: SpawnConfig, settings: SupervisorSettings) -> Self {
        let (state, _) = watch::channel(TurnState::Idle);
        Self {
            settings,
            lifecycle: Mutex::new(()),
            control: Mutex::new(Control {
                spawn,
                process: None,
                turn_cancel: CancellationToken::new(),
                outstanding: 0,
                last_outcome: None,
                respawn: false,
            }),
            queue: Mutex::new(None),
            state,
        }
    }

    /// Current turn state.
    #[must_use]
    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    /// Whether a turn is starting or running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state().is_busy()
    }

    /// Terminal state of the most recent turn.
    pub async fn last_outcome(&self) -> Option<TurnState> {
        self.control.lock().await.last_outcome
    }

    /// Whether a child process is currently held.
    pub async fn has_process(&self) -> bool {
        self.control.lock().await.process.is_some()
    }

    /// Wait until no turn is starting or running.
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| !state.is_busy()).await;
    }

    /// Model used for subsequent spawns.
    ///
    /// A live child keeps its model until the current turn is over; the
    /// next [`Self::start`] replaces it with one that resumes the
    /// conversation on the new model.
    pub async fn set_model(&self, model: Option<String>) {
        let mut control = self.control.lock().await;
        if control.spawn.model != model && control.process.is_some() {
            control.respawn = true;
        }
        control.spawn.model = model;
    }

    /// Model configured for the next spawn.
    pub async fn model(&self) -> Option<String> {
        self.control.lock().await.spawn.model.clone()
    }

    /// Begin a turn by writing `prompt` to the child.
    ///
    /// Reuses the live child when there is one; otherwise spawns a new one,
    /// resuming `resume_id` when given. Output left over from an earlier
    /// turn is discarded first.
    ///
    /// # Errors
    ///
    /// - `AppError::Process("a turn is already running")` when busy.
    /// - `AppError::Process(…)` when spawning or writing the prompt fails;
    ///   the supervisor is back to `Idle` with outcome `Crashed`.
    pub async fn start(&self, prompt: &str, resume_id: Option<&str>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut control = self.control.lock().await;

        if self.is_running() {
            return Err(AppError::Process("a turn is already running".into()));
        }
        self.state.send_replace(TurnState::Starting);

        let mut reuse = !control.respawn
            && control
                .process
                .as_mut()
                .is_some_and(LiveProcess::is_alive);
        {
            let mut queue = self.queue.lock().await;
            if reuse && discard_stale(queue.as_mut()) {
                reuse = false;
            }

            if !reuse {
                if let Some(old) = control.process.take() {
                    if control.respawn {
                        info!(pid = old.pid, "replacing agent process after a model change");
                        tokio::spawn(old.close(SHUTDOWN_GRACE));
                    } else {
                        debug!(pid = old.pid, "dropping dead agent process");
                        old.writer_cancel.cancel();
                    }
                }
                control.respawn = false;
                match spawn_agent(&control.spawn, resume_id) {
                    Ok(agent) => {
                        let (live, drain) = LiveProcess::launch(agent);
                        control.process = Some(live);
                        *queue = Some(drain);
                    }
                    Err(err) => {
                        *queue = None;
                        self.finish(&mut control, TurnState::Crashed);
                        return Err(err);
                    }
                }
            }
        }

        control.turn_cancel = CancellationToken::new();
        control.outstanding = 0;

        let line = protocol::encode_user_message(prompt);
        let sent = match control.process.as_ref() {
            Some(process) => {
                tokio::time::timeout(self.settings.event_timeout, process.input_tx.send(line))
                    .await
                    .map_err(|_| AppError::Process("timed out writing the prompt".into()))
                    .and_then(|res| {
                        res.map_err(|_| AppError::Process("agent stdin is closed".into()))
                    })
            }
            None => Err(AppError::Process("agent process is missing".into())),
        };

        if let Err(err) = sent {
            warn!(%err, "failed to start turn");
            if let Some(process) = control.process.take() {
                process.writer_cancel.cancel();
            }
            self.finish(&mut control, TurnState::Crashed);
            return Err(err);
        }

        control.outstanding = 1;
        self.state.send_replace(TurnState::Running);
        info!(
            pid = control.process.as_ref().map_or(0, |p| p.pid),
            resumed = resume_id.is_some(),
            "turn started"
        );
        Ok(())
    }

    /// Write another prompt into the running turn.
    ///
    /// Waits at most the inject timeout for room in the child's input
    /// queue. On success the turn lasts until this prompt is answered too.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Delivery` when no turn is running (including
    /// after a cancel), when the child has exited, or when its input does
    /// not drain in time. The caller should start a new turn instead.
    pub async fn inject(&self, text: &str) -> Result<()> {
        let line = protocol::encode_user_message(text);

        let attempt = async {
            let mut control = self.control.lock().await;
            if self.state() != TurnState::Running {
                return Err(AppError::Delivery("no turn is running".into()));
            }
            let process = control
                .process
                .as_mut()
                .ok_or_else(|| AppError::Delivery("agent process is gone".into()))?;
            if !process.is_alive() {
                return Err(AppError::Delivery("agent process has exited".into()));
            }
            process
                .input_tx
                .send(line)
                .await
                .map_err(|_| AppError::Delivery("agent stdin is closed".into()))?;
            control.outstanding += 1;
            debug!(outstanding = control.outstanding, "prompt injected");
            Ok(())
        };

        match tokio::time::timeout(self.settings.inject_timeout, attempt).await {
            Ok(result) => result,
            Err(_elapsed) => Err(AppError::Delivery(
                "agent did not accept input in time".into(),
            )),
        }
    }

    /// Next event of the running turn.
    ///
    /// Skips housekeeping lines. Returns a terminal [`TurnEvent`] exactly
    /// once per turn; after that the supervisor is idle.
    pub async fn next_event(&self) -> TurnEvent {
        loop {
            let cancel = self.control.lock().await.turn_cancel.clone();
            if cancel.is_cancelled() {
                return TurnEvent::Cancelled;
            }
            if !self.is_running() {
                return TurnEvent::ReaderFailed("no turn is running".into());
            }

            let received = {
                let mut queue = self.queue.lock().await;
                match queue.as_mut() {
                    None => Received::Item(None),
                    Some(drain) => tokio::select! {
                        biased;

                        () = cancel.cancelled() => Received::Cancelled,

                        item = tokio::time::timeout(self.settings.event_timeout, drain.rx.recv()) => {
                            item.map_or(Received::TimedOut, Received::Item)
                        }
                    },
                }
            };

            match received {
                Received::Cancelled => return TurnEvent::Cancelled,
                Received::TimedOut => {
                    warn!(
                        timeout_secs = self.settings.event_timeout.as_secs(),
                        "agent went silent, abandoning turn"
                    );
                    let stalled = {
                        let mut control = self.control.lock().await;
                        if control.turn_cancel.is_cancelled() {
                            return TurnEvent::Cancelled;
                        }
                        self.finish(&mut control, TurnState::Crashed);
                        control.process.take()
                    };
                    // Its unanswered prompt would otherwise be answered
                    // inside the next turn.
                    if let Some(process) = stalled {
                        process.terminate(self.settings.cancel_grace).await;
                    }
                    return TurnEvent::Stalled;
                }
                Received::Item(Some(DrainItem::Line(line))) => {
                    if let Some(event) = self.on_line(&line).await {
                        return event;
                    }
                }
                Received::Item(Some(DrainItem::Closed { stderr })) => {
                    return self.on_closed(stderr).await;
                }
                Received::Item(Some(DrainItem::Failed(reason))) => {
                    let mut control = self.control.lock().await;
                    if control.turn_cancel.is_cancelled() {
                        return TurnEvent::Cancelled;
                    }
                    if let Some(process) = control.process.take() {
                        process.writer_cancel.cancel();
                    }
                    self.finish(&mut control, TurnState::Crashed);
                    return TurnEvent::ReaderFailed(reason);
                }
                Received::Item(None) => {
                    let mut control = self.control.lock().await;
                    if control.turn_cancel.is_cancelled() {
                        return TurnEvent::Cancelled;
                    }
                    if self.is_running() {
                        self.finish(&mut control, TurnState::Crashed);
                    }
                    return TurnEvent::ReaderFailed("agent output queue closed".into());
                }
            }
        }
    }

    async fn on_line(&self, line: &str) -> Option<TurnEvent> {
        let event = match protocol::decode(line) {
            Decoded::Housekeeping => return None,
            Decoded::Event(event) | Decoded::Malformed(event) => event,
        };

        let Event::Completed(completion) = event else {
            return Some(TurnEvent::Agent(event));
        };

        let mut control = self.control.lock().await;
        if control.turn_cancel.is_cancelled() {
            return Some(TurnEvent::Cancelled);
        }
        control.outstanding = control.outstanding.saturating_sub(1);
        if control.outstanding > 0 {
            debug!(outstanding = control.outstanding, "injected prompt still pending");
            return Some(TurnEvent::Agent(Event::Completed(completion)));
        }

        self.finish(&mut control, TurnState::Completed);
        Some(TurnEvent::Finished(completion))
    }

    async fn on_closed(&self, stderr: String) -> TurnEvent {
        let mut control = self.control.lock().await;
        if control.turn_cancel.is_cancelled() {
            return TurnEvent::Cancelled;
        }

        let exit_code = match control.process.take() {
            Some(mut process) => {
                process.writer_cancel.cancel();
                match tokio::time::timeout(EXIT_STATUS_WAIT, process.child.wait()).await {
                    Ok(Ok(status)) => status.code(),
                    Ok(Err(err)) => {
                        warn!(%err, "failed to collect agent exit status");
                        None
                    }
                    Err(_elapsed) => {
                        let _ = process.child.start_kill();
                        None
                    }
                }
            }
            None => None,
        };

        warn!(
            exit_code = exit_code.unwrap_or(-1),
            stderr = stderr.as_str(),
            "agent output closed mid-turn"
        );
        self.finish(&mut control, TurnState::Crashed);
        TurnEvent::Exited { exit_code, stderr }
    }

    /// Cancel the running turn. Does nothing when idle.
    ///
    /// The turn is marked cancelled first, so injections racing with the
    /// cancel fail. The child then gets SIGTERM, and SIGKILL if it is
    /// still alive after the grace period. The next turn spawns afresh.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for callers that propagate.
    pub async fn cancel(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let process = {
            let mut control = self.control.lock().await;
            if !self.is_running() {
                debug!("cancel requested with no running turn");
                return Ok(());
            }
            self.state.send_replace(TurnState::Cancelled);
            control.last_outcome = Some(TurnState::Cancelled);
            control.turn_cancel.cancel();
            control.outstanding = 0;
            control.process.take()
        };

        if let Some(process) = process {
            info!(pid = process.pid, "cancelling turn");
            process.terminate(self.settings.cancel_grace).await;
        }

        self.state.send_replace(TurnState::Idle);
        Ok(())
    }

    /// Stop the child: cancel a running turn, otherwise close its stdin
    /// and wait up to five seconds before killing it.
    pub async fn shutdown(&self) {
        if self.is_running() {
            let _ = self.cancel().await;
        }

        let _lifecycle = self.lifecycle.lock().await;
        let process = self.control.lock().await.process.take();
        if let Some(process) = process {
            process.close(SHUTDOWN_GRACE).await;
        }
        if let Some(drain) = self.queue.lock().await.take() {
            drain.stop();
        }
    }

    fn finish(&self, control: &mut Control, outcome: TurnState) {
        control.outstanding = 0;
        control.last_outcome = Some(outcome);
        self.state.send_replace(outcome);
        debug!(?outcome, "turn finished");
        self.state.send_replace(TurnState::Idle);
    }
}

/// Drop output left over from a previous turn.
///
/// Returns `true` when the leftovers show that the child is gone.
fn discard_stale(drain: Option<&mut Drain>) -> bool {
    let Some(drain) = drain else {
        return true;
    };

    let mut discarded = 0_usize;
    loop {
        match drain.rx.try_recv() {
            Ok(DrainItem::Line(_)) => discarded += 1,
            Ok(DrainItem::Closed { .. } | DrainItem::Failed(_))
            | Err(mpsc::error::TryRecvError::Disconnected) => {
                debug!(discarded, "stale output ends with a closed stream");
                return true;
            }
            Err(mpsc::error::TryRecvError::Empty) => break,
        }
    }
    if discarded > 0 {
        debug!(discarded, "discarded stale agent output");
    }
    false
}
