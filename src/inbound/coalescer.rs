//! Debounced input buffer.
//!
//! Chat messages often arrive in bursts: a photo, then its caption, then a
//! correction. The [`Coalescer`] collects them and hands the whole burst to
//! the dispatcher once no new input arrived for the debounce window.
//!
//! A single long-lived timer task per buffer does the waiting. Every push
//! restarts the quiet period through a [`Notify`]; when it elapses, the
//! buffer is drained and sent over an unbounded channel.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

/// Input accumulated during one quiet period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingInput {
    /// Text fragments in arrival order.
    pub texts: Vec<String>,
    /// Local paths of received images.
    pub photos: Vec<PathBuf>,
    /// Local paths of other received files.
    pub documents: Vec<PathBuf>,
    /// Set once an injection of this input failed; it must start a new turn.
    pub escalated: bool,
}

impl PendingInput {
    /// Whether nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.photos.is_empty() && self.documents.is_empty()
    }

    /// The prompt sent to the agent: file references first, then the text.
    #[must_use]
    pub fn to_prompt(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        lines.extend(
            self.photos
                .iter()
                .map(|path| format!("[User sent a photo: {}]", path.display())),
        );
        lines.extend(
            self.documents
                .iter()
                .map(|path| format!("[User sent a file: {}]", path.display())),
        );
        lines.extend(self.texts.iter().cloned());
        lines.join("\n")
    }

    /// Put `earlier` in front of this input.
    fn prepend(&mut self, earlier: Self) {
        let later = std::mem::replace(self, earlier);
        self.texts.extend(later.texts);
        self.photos.extend(later.photos);
        self.documents.extend(later.documents);
        self.escalated |= later.escalated;
    }
}

/// Handle to a running debounce buffer.
///
/// Dropping the handle stops the timer task; input still buffered is lost.
pub struct Coalescer {
    pending: Arc<Mutex<PendingInput>>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Coalescer {
    /// Start the timer task. Flushed bursts are sent on `tx`.
    #[must_use]
    pub fn spawn(debounce: Duration, tx: mpsc::UnboundedSender<PendingInput>) -> Self {
        let pending = Arc::new(Mutex::new(PendingInput::default()));
        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(
            run_timer(
                debounce,
                Arc::clone(&pending),
                Arc::clone(&notify),
                cancel.clone(),
                tx,
            )
            .instrument(info_span!("coalescer")),
        );

        Self {
            pending,
            notify,
            cancel,
            task: Some(task),
        }
    }

    /// Add a text fragment.
    pub async fn push_text(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.pending.lock().await.texts.push(text.to_owned());
        self.notify.notify_one();
    }

    /// Add a received image with an optional caption.
    pub async fn push_photo(&self, path: PathBuf, caption: Option<&str>) {
        {
            let mut pending = self.pending.lock().await;
            pending.photos.push(path);
            push_caption(&mut pending, caption);
        }
        self.notify.notify_one();
    }

    /// Add a received file with an optional caption.
    pub async fn push_document(&self, path: PathBuf, caption: Option<&str>) {
        {
            let mut pending = self.pending.lock().await;
            pending.documents.push(path);
            push_caption(&mut pending, caption);
        }
        self.notify.notify_one();
    }

    /// Put input whose delivery failed back at the front, marked escalated.
    pub async fn requeue(&self, mut input: PendingInput) {
        input.escalated = true;
        self.pending.lock().await.prepend(input);
        self.notify.notify_one();
    }

    /// Discard buffered input.
    pub async fn clear(&self) {
        *self.pending.lock().await = PendingInput::default();
    }
}

impl Drop for Coalescer {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn push_caption(pending: &mut PendingInput, caption: Option<&str>) {
    if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
        pending.texts.push(caption.to_owned());
    }
}

/// Core timer loop.
async fn run_timer(
    debounce: Duration,
    pending: Arc<Mutex<PendingInput>>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<PendingInput>,
) {
    loop {
        // ── Wait for the first input of a burst ───────────
        tokio::select! {
            () = cancel.cancelled() => return,
            () = notify.notified() => {}
        }

        // ── Quiet period, restarted by every push ─────────
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = notify.notified() => {}
                () = tokio::time::sleep(debounce) => break,
            }
        }

        let burst = std::mem::take(&mut *pending.lock().await);
        if burst.is_empty() {
            continue;
        }

        debug!(
            texts = burst.texts.len(),
            photos = burst.photos.len(),
            documents = burst.documents.len(),
            escalated = burst.escalated,
            "input burst flushed"
        );
        if tx.send(burst).is_err() {
            debug!("dispatcher gone, stopping coalescer");
            return;
        }
    }
}
