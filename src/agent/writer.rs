//! Stdin writer task.
//!
//! Owns the child's stdin and writes pre-encoded lines received over a
//! bounded [`mpsc`] channel. Every line is written whole, so a caller that
//! gives up waiting for channel capacity never leaves a partial JSON object
//! in the pipe.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Lines that may wait for the child to read its stdin.
pub const INPUT_QUEUE_CAPACITY: usize = 8;

/// Writer task: appends `\n` to each line and writes it to `stdin`.
///
/// Exits when `cancel` fires, when every sender is dropped (which closes
/// stdin and signals end-of-input to the child), or on a write failure.
///
/// # Errors
///
/// Returns [`AppError::Process`]`("write failed: …")` if writing to stdin
/// fails, typically because the child has exited.
pub async fn run_writer<W>(
    pid: u32,
    mut stdin: W,
    mut line_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(pid, "writer: cancellation received, stopping");
                break;
            }

            line = line_rx.recv() => {
                let Some(line) = line else {
                    debug!(pid, "writer: input channel closed, closing stdin");
                    break;
                };

                let mut bytes = line.into_bytes();
                bytes.push(b'\n');

                let written = async {
                    stdin.write_all(&bytes).await?;
                    stdin.flush().await
                }
                .await;

                if let Err(err) = written {
                    warn!(pid, %err, "writer: write to stdin failed");
                    return Err(AppError::Process(format!("write failed: {err}")));
                }
            }
        }
    }

    let _ = stdin.shutdown().await;
    Ok(())
}
