//! Storage for files the owner sends into the chat.
//!
//! Attachments are written to the upload directory and referenced from the
//! prompt by path. They belong to the conversation: a reset or session
//! timeout deletes them, and startup clears whatever a previous run left.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Whether `path` names an image the agent can view.
#[must_use]
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Reduce an uploaded file name to a safe single path component.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_owned()
    } else {
        cleaned.to_owned()
    }
}

/// Tracks downloaded attachments.
pub struct MediaStore {
    upload_dir: PathBuf,
    files: Mutex<Vec<PathBuf>>,
}

impl MediaStore {
    /// Store rooted at `upload_dir`. Nothing touches the disk until used.
    #[must_use]
    pub fn new(upload_dir: PathBuf) -> Self {
        Self {
            upload_dir,
            files: Mutex::new(Vec::new()),
        }
    }

    /// Directory attachments are written to.
    #[must_use]
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Write an attachment as `<id>_<name>` and track it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the directory or file cannot be written.
    pub async fn save(&self, file_id: &str, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.upload_dir).await.map_err(|e| {
            AppError::Io(format!(
                "failed to create upload dir {}: {e}",
                self.upload_dir.display()
            ))
        })?;

        let name = format!(
            "{}_{}",
            sanitize_file_name(file_id),
            sanitize_file_name(file_name)
        );
        let path = self.upload_dir.join(name);
        fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::Io(format!("failed to save {}: {e}", path.display())))?;

        info!(path = %path.display(), bytes = bytes.len(), "saved attachment");
        self.files.lock().await.push(path.clone());
        Ok(path)
    }

    /// Number of tracked files.
    pub async fn tracked(&self) -> usize {
        self.files.lock().await.len()
    }

    /// Delete every tracked file.
    pub async fn cleanup(&self) {
        let files = std::mem::take(&mut *self.files.lock().await);
        for path in files {
            match fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed attachment"),
                Err(err) => debug!(path = %path.display(), %err, "attachment already gone"),
            }
        }
    }

    /// Delete tracked files and everything else in the upload directory.
    pub async fn cleanup_all(&self) {
        self.cleanup().await;

        let mut entries = match fs::read_dir(&self.upload_dir).await {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %self.upload_dir.display(), %err, "no upload dir to clear");
                return;
            }
        };
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.is_file() {
                        if let Err(err) = fs::remove_file(&path).await {
                            warn!(path = %path.display(), %err, "failed to remove stale upload");
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "failed to list upload dir");
                    break;
                }
            }
        }
    }
}
