//! Output drain queue.
//!
//! A background task reads the child's stdout one line at a time and pushes
//! the raw lines onto an unbounded FIFO channel as fast as the pipe allows.
//! Nothing is decoded here. Draining never waits on the consumer, so the
//! child can always make progress writing output, which in turn keeps it
//! reading its stdin and lets injected messages through.
//!
//! A sibling task collects stderr into a bounded tail so a chatty stderr
//! cannot fill its pipe either. When stdout reaches EOF the drain task
//! attaches the collected tail to [`DrainItem::Closed`].

use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::agent::codec::LineCodec;
use crate::AppError;

/// Characters of stderr kept for error reporting.
pub const STDERR_TAIL_CHARS: usize = 2000;

/// How long to wait for stderr to close after stdout did.
const STDERR_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Item flowing through the drain queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainItem {
    /// One raw stdout line without its newline.
    Line(String),
    /// Stdout reached EOF; the child is gone or going.
    Closed {
        /// Trailing stderr output, trimmed.
        stderr: String,
    },
    /// Reading stdout failed.
    Failed(String),
}

/// Consumer side of a running drain task.
#[derive(Debug)]
pub struct Drain {
    /// FIFO of raw output items.
    pub rx: mpsc::UnboundedReceiver<DrainItem>,
    /// The background reader.
    pub task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Drain {
    /// Stop the reader tasks. Items already queued stay readable.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn the drain task pair for one child process.
#[must_use]
pub fn spawn_drain<R, E>(pid: u32, stdout: R, stderr: E) -> Drain
where
    R: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let stderr_task = tokio::spawn(collect_stderr(stderr, cancel.clone()));
    let task = tokio::spawn(
        run_drain(stdout, stderr_task, tx, cancel.clone()).instrument(info_span!("drain", pid)),
    );

    Drain { rx, task, cancel }
}

/// Read stdout lines into `tx` until EOF, error, or cancellation.
async fn run_drain<R>(
    stdout: R,
    mut stderr_task: JoinHandle<String>,
    tx: mpsc::UnboundedSender<DrainItem>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, LineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("drain: cancellation received, stopping");
                stderr_task.abort();
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("drain: stdout closed");
                        let stderr = match tokio::time::timeout(
                            STDERR_JOIN_TIMEOUT,
                            &mut stderr_task,
                        )
                        .await
                        {
                            Ok(Ok(text)) => text,
                            Ok(Err(_)) => String::new(),
                            Err(_elapsed) => {
                                stderr_task.abort();
                                String::new()
                            }
                        };
                        let _ = tx.send(DrainItem::Closed { stderr });
                        break;
                    }

                    Some(Err(AppError::Protocol(ref msg))) => {
                        warn!(error = msg.as_str(), "drain: framing error, skipping line");
                    }

                    Some(Err(err)) => {
                        warn!(%err, "drain: stdout read failed, stopping");
                        stderr_task.abort();
                        let _ = tx.send(DrainItem::Failed(err.to_string()));
                        break;
                    }

                    Some(Ok(line)) => {
                        if tx.send(DrainItem::Line(line)).is_err() {
                            debug!("drain: consumer gone, stopping");
                            stderr_task.abort();
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Accumulate stderr, keeping only a bounded tail.
async fn collect_stderr<E>(mut stderr: E, cancel: CancellationToken) -> String
where
    E: AsyncRead + Unpin + Send,
{
    let mut collected = String::new();
    let mut buf = [0_u8; 4096];

    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => break,
            read = stderr.read(&mut buf) => read,
        };

        match read {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                collected.push_str(&String::from_utf8_lossy(&buf[..n]));
                if collected.len() > STDERR_TAIL_CHARS * 8 {
                    collected = tail_chars(&collected, STDERR_TAIL_CHARS * 2);
                }
            }
        }
    }

    tail_chars(collected.trim(), STDERR_TAIL_CHARS)
}

/// Last `max` characters of `text`.
#[must_use]
pub fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_owned();
    }
    text.chars().skip(count - max).collect()
}
