//! Direct HTTP engine on reqwest.
//!
//! Streams the body to disk, resumes partial files with `Range`, and retries
//! 429/5xx responses and stalled transfers with exponential backoff.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

use super::{finish_file, is_direct_url, DownloadEngine, EngineOutput, EngineProgress, EngineRequest, ProgressSender};
use crate::core::config;
use crate::core::config::engines::EngineSettings;
use crate::core::retry::{is_retryable_status, retry, RetryConfig, Retryable};
use crate::core::utils::percent_of;
use crate::download::error::DownloadError;

/// Why a single HTTP attempt failed.
#[derive(Debug)]
enum AttemptError {
    Status {
        status: StatusCode,
        retry_after: Option<Duration>,
    },
    Transport(reqwest::Error),
    Io(std::io::Error),
    Stalled(Duration),
    Cancelled,
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Status { status, .. } => write!(f, "HTTP {}", status),
            AttemptError::Transport(e) => write!(f, "request failed: {}", e),
            AttemptError::Io(e) => write!(f, "write failed: {}", e),
            AttemptError::Stalled(after) => write!(f, "no data received for {}s", after.as_secs()),
            AttemptError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Status { status, .. } => is_retryable_status(*status),
            AttemptError::Transport(e) => e.is_retryable(),
            AttemptError::Stalled(_) => true,
            AttemptError::Io(_) | AttemptError::Cancelled => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            AttemptError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<AttemptError> for DownloadError {
    fn from(e: AttemptError) -> Self {
        match e {
            AttemptError::Status { .. } => DownloadError::Http(e.to_string()),
            AttemptError::Transport(inner) => DownloadError::from(inner),
            AttemptError::Io(inner) => DownloadError::from(inner),
            AttemptError::Stalled(_) => DownloadError::Timeout(e.to_string()),
            AttemptError::Cancelled => DownloadError::Cancelled,
        }
    }
}

/// Total size from a `Content-Range: bytes 100-199/1000` header.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

/// `Retry-After` in seconds. HTTP-date values are ignored.
fn retry_after_secs(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

pub struct HttpEngine {
    settings: EngineSettings,
    client: Client,
    progress_interval: Duration,
}

impl HttpEngine {
    pub fn new(settings: EngineSettings) -> Self {
        let client = Client::builder()
            .user_agent(config::download::USER_AGENT)
            .connect_timeout(settings.timeout)
            .danger_accept_invalid_certs(*config::download::ALLOW_INSECURE_TLS)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("HTTP client config rejected ({}), using defaults", e);
                Client::new()
            });
        Self {
            settings,
            client,
            progress_interval: config::download::progress_interval(),
        }
    }

    /// Override how often progress is reported.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    async fn attempt(&self, request: &EngineRequest, progress: &ProgressSender) -> Result<u64, AttemptError> {
        let existing = tokio::fs::metadata(&request.filepath)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let mut req = self.client.get(&request.url);
        if existing > 0 {
            log::info!("Resuming {} from byte {}", request.filepath.display(), existing);
            req = req.header(header::RANGE, format!("bytes={}-", existing));
        }

        let response = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return Err(AttemptError::Cancelled),
            sent = req.send() => sent.map_err(AttemptError::Transport)?,
        };

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE && existing > 0 {
            log::info!("{} is already complete", request.filepath.display());
            return Ok(existing);
        }
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(retry_after_secs);
            return Err(AttemptError::Status { status, retry_after });
        }

        let partial = status == StatusCode::PARTIAL_CONTENT && existing > 0;
        let total = if partial {
            response
                .headers()
                .get(header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(content_range_total)
        } else {
            response.content_length()
        };

        let mut file = if partial {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&request.filepath)
                .await
                .map_err(AttemptError::Io)?
        } else {
            tokio::fs::File::create(&request.filepath)
                .await
                .map_err(AttemptError::Io)?
        };

        let mut downloaded = if partial { existing } else { 0 };
        let mut last_emit = Instant::now();
        let mut bytes_at_emit = downloaded;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = request.cancel.cancelled() => {
                    let _ = file.flush().await;
                    return Err(AttemptError::Cancelled);
                }
                next = tokio::time::timeout(self.settings.timeout, stream.next()) => next,
            };
            let chunk = match next {
                Err(_) => return Err(AttemptError::Stalled(self.settings.timeout)),
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(AttemptError::Transport(e)),
                Ok(Some(Ok(chunk))) => chunk,
            };
            file.write_all(&chunk).await.map_err(AttemptError::Io)?;
            downloaded += chunk.len() as u64;

            let elapsed = last_emit.elapsed();
            if elapsed >= self.progress_interval {
                let secs = elapsed.as_secs_f64();
                let speed = if secs > 0.0 {
                    Some((downloaded - bytes_at_emit) as f64 / secs)
                } else {
                    None
                };
                let _ = progress.send(EngineProgress {
                    percent: total.map_or(0.0, |t| percent_of(downloaded, t)),
                    speed,
                    downloaded: Some(downloaded),
                    total,
                });
                last_emit = Instant::now();
                bytes_at_emit = downloaded;
            }
        }

        file.flush().await.map_err(AttemptError::Io)?;
        let _ = progress.send(EngineProgress {
            percent: 100.0,
            speed: None,
            downloaded: Some(downloaded),
            total: total.or(Some(downloaded)),
        });
        Ok(downloaded)
    }
}

#[async_trait]
impl DownloadEngine for HttpEngine {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn can_handle(&self, url: &str) -> bool {
        is_direct_url(url)
    }

    async fn download(&self, request: &EngineRequest, progress: ProgressSender) -> Result<EngineOutput, DownloadError> {
        log::info!("HTTP download {} -> {}", request.url, request.filepath.display());
        let policy = RetryConfig::http_download(self.settings.max_retries);
        let progress = &progress;
        let outcome = retry(&policy, move || self.attempt(request, progress)).await;
        let bytes = outcome.into_result().map_err(DownloadError::from)?;
        log::info!("HTTP download finished: {} bytes", bytes);
        finish_file(&request.filepath).await
    }
}
