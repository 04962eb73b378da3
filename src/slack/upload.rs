//! File uploads into the bridge channel.
//!
//! Uses Slack's external upload flow: reserve an upload URL, send the
//! bytes there, then complete the upload into the channel with an
//! optional comment.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{AppError, Result};

/// Public Slack Web API base URL.
pub const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Deserialize)]
struct UploadUrlResponse {
    ok: bool,
    upload_url: Option<String>,
    file_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompleteUploadResponse {
    ok: bool,
    error: Option<String>,
}

/// Uploads files with the bot token.
#[derive(Debug, Clone)]
pub struct FileUploader {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl FileUploader {
    /// Uploader against the public Slack API.
    #[must_use]
    pub fn new(bot_token: &str) -> Self {
        Self::with_api_base(SLACK_API_BASE, bot_token)
    }

    /// Uploader against another API base, such as a local stand-in.
    #[must_use]
    pub fn with_api_base(api_base: &str, bot_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_owned(),
            bot_token: bot_token.to_owned(),
        }
    }

    /// Upload `bytes` as `filename` into `channel_id` and return the file id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the payload is empty, a request fails,
    /// or Slack refuses a step.
    pub async fn upload(
        &self,
        channel_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        comment: Option<&str>,
    ) -> Result<String> {
        if filename.trim().is_empty() {
            return Err(AppError::Slack("upload needs a file name".into()));
        }
        if bytes.is_empty() {
            return Err(AppError::Slack(format!("{filename} is empty")));
        }

        let reserved: UploadUrlResponse = self
            .call(
                "files.getUploadURLExternal",
                &json!({ "filename": filename, "length": bytes.len() }),
            )
            .await?;
        if !reserved.ok {
            return Err(refused("files.getUploadURLExternal", reserved.error));
        }
        let (Some(upload_url), Some(file_id)) = (reserved.upload_url, reserved.file_id) else {
            return Err(AppError::Slack(
                "files.getUploadURLExternal returned no upload url".into(),
            ));
        };

        let size = bytes.len();
        self.http
            .post(&upload_url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| AppError::Slack(format!("file upload failed: {err}")))?;
        debug!(%file_id, size, "file bytes uploaded");

        let mut completion = json!({
            "files": [{ "id": file_id, "title": filename }],
            "channel_id": channel_id,
        });
        if let Some(comment) = comment.map(str::trim).filter(|c| !c.is_empty()) {
            completion["initial_comment"] = Value::String(comment.to_owned());
        }
        let completed: CompleteUploadResponse = self
            .call("files.completeUploadExternal", &completion)
            .await?;
        if !completed.ok {
            return Err(refused("files.completeUploadExternal", completed.error));
        }

        info!(%file_id, filename, "file shared to slack");
        Ok(file_id)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        self.http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| AppError::Slack(format!("{method} failed: {err}")))?
            .json::<T>()
            .await
            .map_err(|err| AppError::Slack(format!("{method} returned bad json: {err}")))
    }
}

fn refused(method: &str, error: Option<String>) -> AppError {
    AppError::Slack(format!(
        "{method} refused: {}",
        error.unwrap_or_else(|| "unknown error".to_owned())
    ))
}
