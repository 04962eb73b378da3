//! Append-only JSONL transcript file.

use std::{
    collections::VecDeque,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use super::{Role, TranscriptEntry};
use crate::{AppError, Result};

/// Transcript writer for `<work_dir>/data/conversation_log.jsonl`.
///
/// The file is opened lazily on the first write and kept open.
pub struct ConversationLog {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl ConversationLog {
    /// Construct a log writing to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the parent directory cannot be created.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Io(format!(
                    "failed to create transcript directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        Ok(Self {
            path,
            writer: Mutex::new(None),
        })
    }

    /// Location of the transcript file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a prompt from the owner.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the entry cannot be written.
    pub fn log_user(&self, text: &str) -> Result<()> {
        self.append(&TranscriptEntry::now(Role::User, text))
    }

    /// Record a final answer. Blank answers are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the entry cannot be written.
    pub fn log_assistant(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        self.append(&TranscriptEntry::now(Role::Assistant, text))
    }

    /// Append one entry and flush.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on open, serialize, or write failure.
    pub fn append(&self, entry: &TranscriptEntry) -> Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| AppError::Io("transcript writer mutex poisoned".into()))?;

        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| {
                    AppError::Io(format!(
                        "failed to open transcript {}: {e}",
                        self.path.display()
                    ))
                })?;
            *guard = Some(BufWriter::new(file));
        }

        if let Some(writer) = guard.as_mut() {
            let line = serde_json::to_string(entry)
                .map_err(|e| AppError::Io(format!("failed to serialize transcript entry: {e}")))?;
            writeln!(writer, "{line}")
                .and_then(|()| writer.flush())
                .map_err(|e| {
                    warn!("failed to write transcript entry: {e}");
                    AppError::Io(format!("transcript write failed: {e}"))
                })?;
        }

        Ok(())
    }

    /// Most recent entries, oldest first.
    ///
    /// Looks at the last `limit` lines and keeps entries from newest to
    /// oldest while their combined text stays within `max_chars`; the
    /// newest entry is always kept. Unparseable lines are skipped.
    #[must_use]
    pub fn recent(&self, limit: usize, max_chars: usize) -> Vec<TranscriptEntry> {
        let Ok(file) = File::open(&self.path) else {
            return Vec::new();
        };

        let mut tail: VecDeque<String> = VecDeque::with_capacity(limit);
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else {
                break;
            };
            if tail.len() == limit {
                tail.pop_front();
            }
            if limit > 0 {
                tail.push_back(line);
            }
        }

        let mut entries = Vec::new();
        let mut total_chars = 0_usize;
        for line in tail.iter().rev() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(entry) = serde_json::from_str::<TranscriptEntry>(line) else {
                debug!("skipping unparseable transcript line");
                continue;
            };
            let len = entry.text.chars().count();
            if total_chars + len > max_chars && !entries.is_empty() {
                break;
            }
            total_chars += len;
            entries.push(entry);
        }

        entries.reverse();
        entries
    }
}
