//! Background worker that posts queued files to the Telegram channel.
//!
//! One item at a time, paced between sends. Each item gets up to
//! `max_attempts` tries; how long to wait before the next one depends on the
//! failure (server hint for rate limits, linear backoff for network errors
//! and timeouts, no retry for rejected requests). A caption Telegram cannot
//! parse is sent once more as a document with a plain caption.

use async_trait::async_trait;
use chrono::Local;
use pdmcore::core::platform::detect_file_type;
use pdmcore::core::{config, FileType};
use pdmcore::download::{DownloadListener, DownloadRecord};
use pdmcore::storage::db::{self, TelegramInfo};
use pdmcore::{get_connection, AppError, AppResult, DownloadManager};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::caption::{markdown_caption, plain_caption, CaptionInput};
use super::profile::{select_method, select_profile, UploadMethod, PROFILES};
use super::queue::{ItemKind, QueueOutcome, QueueStatus, UploadItem, UploadQueue};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Upload timed out")]
    Timeout,

    /// Telegram rejected the request; retrying will not help
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl UploadError {
    /// Telegram could not parse the MarkdownV2 entities of the caption.
    pub fn is_entity_parse_error(&self) -> bool {
        matches!(self, UploadError::BadRequest(msg) if msg.to_lowercase().contains("can't parse entities"))
    }
}

/// One send call.
#[derive(Debug, Clone, Copy)]
pub struct SendRequest<'a> {
    pub path: &'a Path,
    pub method: UploadMethod,
    pub caption: &'a str,
    /// Caption is MarkdownV2
    pub markdown: bool,
    /// Preview image for videos
    pub thumbnail: Option<&'a Path>,
}

/// Posts a file to the channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, request: SendRequest<'_>) -> Result<TelegramInfo, UploadError>;
}

#[derive(Debug, Clone)]
pub struct UploaderSettings {
    pub max_attempts: u32,
    /// Multiplied by the attempt number
    pub network_backoff: Duration,
    /// Multiplied by the attempt number
    pub timeout_backoff: Duration,
    pub success_pause: Duration,
    pub failure_pause: Duration,
    /// Consecutive failures before the worker cools down
    pub failure_limit: u32,
    pub failure_cooldown: Duration,
    pub idle_poll: Duration,
    pub delete_after_upload: bool,
    pub auto_upload: bool,
}

impl Default for UploaderSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            network_backoff: Duration::from_secs(15),
            timeout_backoff: Duration::from_secs(10),
            success_pause: Duration::from_secs(2),
            failure_pause: Duration::from_secs(10),
            failure_limit: 10,
            failure_cooldown: Duration::from_secs(60),
            idle_poll: Duration::from_secs(3),
            delete_after_upload: true,
            auto_upload: true,
        }
    }
}

impl UploaderSettings {
    pub fn from_config() -> Self {
        Self {
            delete_after_upload: *config::telegram::DELETE_AFTER_UPLOAD,
            auto_upload: *config::telegram::AUTO_UPLOAD,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TelegramStatus {
    pub bot_available: bool,
    pub worker_running: bool,
    pub profiles: usize,
    #[serde(flatten)]
    pub queue: QueueStatus,
}

/// Media first.
pub fn upload_priority(file_type: FileType) -> i32 {
    if file_type.is_media() {
        2
    } else {
        1
    }
}

enum Outcome {
    Sent,
    Failed,
    Skipped,
}

pub struct TelegramUploader {
    sender: Arc<dyn ChannelSender>,
    manager: DownloadManager,
    settings: UploaderSettings,
    queue: Mutex<UploadQueue>,
    wake: Notify,
    stop: CancellationToken,
    running: AtomicBool,
}

impl TelegramUploader {
    pub fn new(sender: Arc<dyn ChannelSender>, manager: DownloadManager, settings: UploaderSettings) -> Arc<Self> {
        Arc::new(Self {
            sender,
            manager,
            settings,
            queue: Mutex::new(UploadQueue::new()),
            wake: Notify::new(),
            stop: CancellationToken::new(),
            running: AtomicBool::new(false),
        })
    }

    fn queue(&self) -> MutexGuard<'_, UploadQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn enqueue(&self, item: UploadItem) -> QueueOutcome {
        let name = item.filename();
        let (id, kind, priority) = (item.id.clone(), item.kind, item.priority);
        let outcome = self.queue().push(item);
        match outcome {
            QueueOutcome::Queued(position) => {
                log::info!(
                    "Queued for Telegram: {} (priority {}, position {})",
                    name,
                    priority,
                    position + 1
                );
                if kind == ItemKind::Upload {
                    self.set_upload_status(&id, "queued", None);
                }
                self.wake.notify_one();
            }
            QueueOutcome::Missing => log::warn!("File does not exist, not queued: {}", name),
            other => log::debug!("Not queueing {}: {:?}", name, other),
        }
        outcome
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            log::info!("Telegram upload worker started");
            this.run().await;
            this.running.store(false, Ordering::SeqCst);
            log::info!("Telegram upload worker stopped");
        })
    }

    /// Ask the worker to exit after the current send.
    pub fn stop(&self) {
        self.stop.cancel();
        self.wake.notify_one();
    }

    pub fn status(&self) -> TelegramStatus {
        TelegramStatus {
            bot_available: true,
            worker_running: self.running.load(Ordering::SeqCst),
            profiles: PROFILES.len(),
            queue: self.queue().status(),
        }
    }

    pub fn clear_queue(&self) -> usize {
        let cleared = self.queue().clear();
        log::info!("Cleared {} items from the Telegram queue", cleared);
        cleared
    }

    pub fn retry_failed(&self) -> usize {
        let requeued = self.queue().retry_failed();
        if requeued > 0 {
            self.wake.notify_one();
        }
        log::info!("Requeued {} failed Telegram uploads", requeued);
        requeued
    }

    /// Queue one file again, even if it failed before.
    pub fn retry(&self, item: UploadItem) -> QueueOutcome {
        if self.queue().forget_failed(&item.filepath) {
            log::info!("Retrying failed upload {}", item.filename());
        }
        self.enqueue(item)
    }

    async fn run(&self) {
        let mut failures = 0u32;
        while !self.stop.is_cancelled() {
            let next = self.queue().pop();
            let Some(item) = next else {
                failures = 0;
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(self.settings.idle_poll) => {}
                }
                continue;
            };

            let pause = match self.process(item).await {
                Outcome::Skipped => continue,
                Outcome::Sent => {
                    failures = 0;
                    self.settings.success_pause
                }
                Outcome::Failed => {
                    failures += 1;
                    if failures >= self.settings.failure_limit {
                        log::error!(
                            "{} consecutive Telegram failures, pausing for {:?}",
                            failures,
                            self.settings.failure_cooldown
                        );
                        failures = 0;
                        self.settings.failure_cooldown
                    } else {
                        self.settings.failure_pause
                    }
                }
            };
            if self.sleep_or_stop(pause).await {
                break;
            }
        }
    }

    /// True when stopped while waiting.
    async fn sleep_or_stop(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    async fn process(&self, item: UploadItem) -> Outcome {
        let path = item.filepath.clone();
        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                self.record_failure(&item, "File not found");
                self.queue().fail(item);
                return Outcome::Skipped;
            }
        };

        log::info!("Uploading {} to Telegram", item.filename());
        let files = self.manager.files();
        let thumbnail = match select_method(detect_file_type(&item.filename()), size) {
            UploadMethod::Video => files.generate_thumbnail(&path).await,
            _ => None,
        };
        files.lock(&path);
        let result = self.upload(&item, size, thumbnail.as_deref()).await;
        files.unlock(&path);
        if let Some(thumb) = &thumbnail {
            files.safe_delete(thumb, true);
        }

        match result {
            Ok(info) => {
                self.record_success(&item, &info);
                self.queue().complete(&path);
                if self.settings.delete_after_upload {
                    files.safe_delete(&path, true);
                }
                log::info!("Upload completed: {} (message {})", item.filename(), info.message_id);
                Outcome::Sent
            }
            Err(e) => {
                log::error!("Upload failed: {}: {}", item.filename(), e);
                self.record_failure(&item, &e.to_string());
                self.queue().fail(item);
                Outcome::Failed
            }
        }
    }

    async fn send_within(&self, timeout: Duration, request: SendRequest<'_>) -> Result<TelegramInfo, UploadError> {
        tokio::time::timeout(timeout, self.sender.send(request))
            .await
            .unwrap_or(Err(UploadError::Timeout))
    }

    async fn upload(&self, item: &UploadItem, size: u64, thumbnail: Option<&Path>) -> Result<TelegramInfo, UploadError> {
        let filename = item.filename();
        let file_type = detect_file_type(&filename);
        let profile = select_profile(size);
        let method = select_method(file_type, size);
        let input = CaptionInput {
            filename: &filename,
            description: &item.description,
            tags: &item.tags,
            size,
            file_type,
            timestamp: Local::now(),
        };
        let caption = markdown_caption(&input);
        log::debug!("{}: profile {}, method {:?}", filename, profile.name, method);

        let mut last_error = UploadError::Other("No upload attempt made".to_string());
        for attempt in 1..=self.settings.max_attempts {
            let request = SendRequest {
                path: &item.filepath,
                method,
                caption: &caption,
                markdown: true,
                thumbnail,
            };
            let error = match self.send_within(profile.timeout, request).await {
                Ok(info) => return Ok(info),
                Err(e) => e,
            };

            if error.is_entity_parse_error() {
                log::warn!("Caption rejected for {}, resending with a plain caption", filename);
                let plain = plain_caption(&input);
                let fallback = SendRequest {
                    path: &item.filepath,
                    method: UploadMethod::Document,
                    caption: &plain,
                    markdown: false,
                    thumbnail: None,
                };
                return self.send_within(profile.timeout, fallback).await;
            }

            let delay = match &error {
                UploadError::RateLimited(wait) => Some(*wait),
                UploadError::Network(_) => Some(self.settings.network_backoff * attempt),
                UploadError::Timeout => Some(self.settings.timeout_backoff * attempt),
                UploadError::BadRequest(_) | UploadError::Io(_) | UploadError::Other(_) => None,
            };
            log::warn!(
                "Telegram attempt {}/{} for {} failed: {}",
                attempt,
                self.settings.max_attempts,
                filename,
                error
            );
            last_error = error;

            match delay {
                Some(wait) if attempt < self.settings.max_attempts => {
                    if self.sleep_or_stop(wait).await {
                        break;
                    }
                }
                Some(_) => {}
                None => break,
            }
        }
        Err(last_error)
    }

    fn set_upload_status(&self, id: &str, status: &str, error: Option<&str>) {
        let result = get_connection(self.manager.pool())
            .map_err(AppError::from)
            .and_then(|conn| db::set_upload_status(&conn, id, status, error).map_err(AppError::from));
        if let Err(e) = result {
            log::warn!("Failed to update upload {}: {}", id, e);
        }
    }

    fn record_success(&self, item: &UploadItem, info: &TelegramInfo) {
        let saved: AppResult<bool> = match item.kind {
            ItemKind::Download => self.manager.set_telegram_info(&item.id, info),
            ItemKind::Upload => get_connection(self.manager.pool())
                .map_err(AppError::from)
                .and_then(|conn| db::set_upload_telegram_info(&conn, &item.id, info).map_err(AppError::from)),
        };
        match saved {
            Ok(true) => log::info!("Stored Telegram info on {} {}", item.kind, item.id),
            Ok(false) => log::warn!("No {} {} to attach Telegram info to", item.kind, item.id),
            Err(e) => log::error!("Failed to store Telegram info for {}: {}", item.id, e),
        }
    }

    fn record_failure(&self, item: &UploadItem, message: &str) {
        match item.kind {
            ItemKind::Upload => self.set_upload_status(&item.id, "failed", Some(message)),
            ItemKind::Download => match self.manager.set_telegram_error(&item.id, message) {
                Ok(true) => {}
                Ok(false) => log::warn!("No download {} to record the upload failure on", item.id),
                Err(e) => log::error!("Failed to record upload failure for {}: {}", item.id, e),
            },
        }
    }
}

#[async_trait]
impl DownloadListener for TelegramUploader {
    async fn on_completed(&self, record: &DownloadRecord) {
        if !self.settings.auto_upload {
            return;
        }
        let mut item = UploadItem::new(&record.id, ItemKind::Download, &record.filepath);
        item.description = record.description.clone();
        item.tags = record.tags.clone();
        item.priority = upload_priority(record.file_type);
        self.enqueue(item);
    }
}
