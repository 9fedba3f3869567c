//! The upload capability the pipeline depends on.
//!
//! An [`Uploader`] transfers one local file, makes the resulting video
//! publicly viewable and hands back its public link. Ordinary failures come
//! back as [`UploadError`]; the pipeline turns them into a skipped record
//! rather than a failed run.

use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to read video file: {0}")]
    Io(#[from] std::io::Error),

    /// Transport failure, including request timeouts.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Vimeo returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Vimeo response is missing `{0}`")]
    MissingField(&'static str),

    #[error("upload stopped at byte {sent} of {expected}")]
    Incomplete { sent: u64, expected: u64 },

    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("upload rejected: {0}")]
    Rejected(String),
}

impl UploadError {
    /// Whether the same request may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        match self {
            UploadError::Request(err) => !err.is_builder() && !err.is_decode(),
            UploadError::Status { status, .. } => *status == 429 || *status >= 500,
            UploadError::Incomplete { .. } => true,
            UploadError::Io(_)
            | UploadError::MissingField(_)
            | UploadError::Config(_)
            | UploadError::Rejected(_) => false,
        }
    }

    /// Whether the request is known not to have taken effect remotely, so
    /// that a non-idempotent request can be repeated.
    pub fn is_safe_to_resend(&self) -> bool {
        match self {
            UploadError::Request(err) => err.is_connect(),
            UploadError::Status { status, .. } => *status == 429 || *status == 503,
            _ => false,
        }
    }
}

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Uploads `file_path` and returns the public link of the new video.
    async fn upload(
        &self,
        file_path: &Path,
        title: &str,
        description: &str,
    ) -> Result<String, UploadError>;
}

/// Bounded exponential backoff for a single upload step.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. `1` disables retries.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let ms = (self.initial_backoff.as_millis() as f64 * factor) as u64;
        Duration::from_millis(ms).min(self.max_backoff)
    }

    /// Runs `op` until it succeeds, fails with an error `retry_if` rejects,
    /// or runs out of attempts. `op` receives the 1-based attempt number.
    ///
    /// Backoff sleeps end early when `cancel_token` is cancelled, returning
    /// the last error.
    pub async fn retry<T, F, Fut>(
        &self,
        cancel_token: &CancellationToken,
        step: &str,
        retry_if: fn(&UploadError) -> bool,
        mut op: F,
    ) -> Result<T, UploadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= self.max_attempts || !retry_if(&err) {
                return Err(err);
            }

            let delay = self.backoff(attempt);
            warn!(
                step,
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Upload step failed, retrying"
            );

            tokio::select! {
                _ = cancel_token.cancelled() => return Err(err),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
