//! Download orchestration.
//!
//! [`DownloadManager`] owns the in-memory download table, persists every
//! state change to SQLite and runs one worker task per active download. A
//! worker walks the compatible engines in priority order until one succeeds.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::platform::{detect_platform, DEFAULT_FORMAT_SELECTOR};
use crate::core::utils::{escape_filename, format_size, format_speed};
use crate::download::engine::{ytdlp, EngineManager, EngineOutput, EngineProgress, EngineRequest};
use crate::download::naming::{extract_filename, generate_download_id, unique_filepath};
use crate::download::types::{DownloadOptions, DownloadRecord, DownloadStats, DownloadStatus};
use crate::storage::db::{self, EngineAttempt, TelegramInfo};
use crate::storage::{get_connection, DbPool, FileManager};

/// Most rows loaded back into memory at startup.
const RESTORE_LIMIT: usize = 10_000;

/// Runtime settings for the manager.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub max_workers: usize,
    pub downloads_dir: PathBuf,
    /// Log progress every N percent
    pub progress_log_step: f64,
}

impl ManagerSettings {
    pub fn from_config() -> Self {
        Self {
            max_workers: *config::server::MAX_WORKERS,
            downloads_dir: config::DOWNLOADS_DIR.clone(),
            progress_log_step: config::download::PROGRESS_LOG_STEP,
        }
    }
}

/// Notified when a download completes (used for the Telegram upload).
#[async_trait]
pub trait DownloadListener: Send + Sync {
    async fn on_completed(&self, record: &DownloadRecord);
}

/// Cancellation handle of the current worker for a download.
struct Worker {
    generation: u64,
    token: CancellationToken,
}

struct Inner {
    pool: DbPool,
    engines: EngineManager,
    files: Arc<FileManager>,
    settings: ManagerSettings,
    records: Mutex<HashMap<String, DownloadRecord>>,
    workers: Mutex<HashMap<String, Worker>>,
    /// Last spawned task per download; a new worker waits for it to exit.
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    next_generation: AtomicU64,
    listener: RwLock<Option<Arc<dyn DownloadListener>>>,
}

/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reject URLs that are too long, unparsable or use an unsupported scheme.
pub fn validate_url(url: &str) -> AppResult<Url> {
    if url.len() > config::validation::MAX_URL_LENGTH {
        return Err(AppError::Validation(format!(
            "URL is too long ({} > {} characters)",
            url.len(),
            config::validation::MAX_URL_LENGTH
        )));
    }
    let parsed = Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;
    if !config::validation::ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(AppError::Validation(format!(
            "Unsupported URL scheme '{}'",
            parsed.scheme()
        )));
    }
    Ok(parsed)
}

impl DownloadManager {
    pub fn new(pool: DbPool, engines: EngineManager, files: Arc<FileManager>, settings: ManagerSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                engines,
                files,
                settings,
                records: Mutex::new(HashMap::new()),
                workers: Mutex::new(HashMap::new()),
                handles: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                listener: RwLock::new(None),
            }),
        }
    }

    pub fn engines(&self) -> &EngineManager {
        &self.inner.engines
    }

    pub fn files(&self) -> &Arc<FileManager> {
        &self.inner.files
    }

    pub fn pool(&self) -> &DbPool {
        &self.inner.pool
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    pub fn set_listener(&self, listener: Arc<dyn DownloadListener>) {
        let mut slot = self.inner.listener.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(listener);
    }

    fn listener(&self) -> Option<Arc<dyn DownloadListener>> {
        self.inner.listener.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, DownloadRecord>> {
        lock(&self.inner.records)
    }

    /// Apply `f` to a record and return the updated copy.
    fn update<F>(&self, id: &str, f: F) -> Option<DownloadRecord>
    where
        F: FnOnce(&mut DownloadRecord),
    {
        let mut records = self.records();
        let record = records.get_mut(id)?;
        f(record);
        Some(record.clone())
    }

    fn persist(&self, record: &DownloadRecord) {
        let saved = get_connection(&self.inner.pool)
            .map_err(AppError::from)
            .and_then(|conn| db::save_download(&conn, record).map_err(AppError::from));
        if let Err(e) = saved {
            log::error!("Failed to persist download {}: {}", record.id, e);
        }
    }

    fn active_count(records: &HashMap<String, DownloadRecord>) -> usize {
        records.values().filter(|r| r.status.is_active()).count()
    }

    fn limit_error(&self) -> AppError {
        AppError::Validation(format!(
            "Maximum concurrent downloads reached ({})",
            self.inner.settings.max_workers
        ))
    }

    /// Queue a new download and start its worker. Returns the download id.
    pub fn start_download(&self, url: &str, options: DownloadOptions) -> AppResult<String> {
        let url = url.trim();
        validate_url(url)?;
        if self.inner.engines.compatible_engines(url).is_empty() {
            return Err(AppError::Validation(format!("No download engine can handle {}", url)));
        }

        let id = generate_download_id(url);
        let platform = detect_platform(url);
        let filename = match (&options.filename, platform) {
            (Some(name), _) if !name.trim().is_empty() => escape_filename(name.trim()),
            (_, Some(p)) => format!("{}_{}.mp4", p, id),
            _ => extract_filename(url, None),
        };
        std::fs::create_dir_all(&self.inner.settings.downloads_dir)?;
        let filepath = unique_filepath(&self.inner.settings.downloads_dir, &filename);
        let filename = filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(filename);

        let mut record = DownloadRecord::new(id.clone(), url.to_string(), filename, filepath.to_string_lossy().into_owned());
        record.description = options.description;
        record.tags = options.tags;
        record.platform = platform;
        record.quality = options
            .quality
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| platform.map_or(DEFAULT_FORMAT_SELECTOR, |p| p.format_selector()).to_string());
        record.extract_audio = options
            .extract_audio
            .unwrap_or_else(|| platform.is_some_and(|p| p.extracts_audio()));

        {
            let mut records = self.records();
            if Self::active_count(&records) >= self.inner.settings.max_workers {
                return Err(self.limit_error());
            }
            records.insert(id.clone(), record.clone());
        }

        let conn = get_connection(&self.inner.pool);
        if let Err(e) = conn.map_err(AppError::from).and_then(|c| db::save_download(&c, &record).map_err(AppError::from)) {
            self.records().remove(&id);
            return Err(e);
        }

        log::info!("Download {} queued: {} -> {}", id, url, record.filepath);
        self.spawn_worker(&id);
        Ok(id)
    }

    fn spawn_worker(&self, id: &str) {
        let token = CancellationToken::new();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.workers).insert(
            id.to_string(),
            Worker {
                generation,
                token: token.clone(),
            },
        );

        let mut handles = lock(&self.inner.handles);
        let previous = handles.remove(id);
        let this = self.clone();
        let worker_id = id.to_string();
        let handle = tokio::spawn(async move {
            // a paused worker may still be unwinding its engine
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    log::warn!("Previous worker for {} ended abnormally: {}", worker_id, e);
                }
            }
            if !token.is_cancelled() {
                this.run_worker(&worker_id, &token).await;
            }
            let mut workers = lock(&this.inner.workers);
            if workers.get(&worker_id).is_some_and(|w| w.generation == generation) {
                workers.remove(&worker_id);
            }
        });
        handles.insert(id.to_string(), handle);
    }

    async fn run_worker(&self, id: &str, token: &CancellationToken) {
        let Some(snapshot) = self.get(id) else {
            return;
        };
        if snapshot.status != DownloadStatus::Initializing {
            return;
        }
        let engines = self.inner.engines.compatible_engines(&snapshot.url);
        if engines.is_empty() {
            self.mark_error(id, "No compatible download engine available".to_string());
            return;
        }

        let filepath = PathBuf::from(&snapshot.filepath);
        let mut last_error = None;

        for engine in engines {
            if token.is_cancelled() {
                return;
            }
            let Some(record) = self.update(id, |r| {
                r.status = DownloadStatus::Downloading;
                r.engine = Some(engine.name().to_string());
                r.started_at.get_or_insert_with(Utc::now);
                r.error_message = None;
            }) else {
                return;
            };
            self.persist(&record);
            log::info!("Download {} trying engine {}", id, engine.name());

            let request = EngineRequest {
                url: snapshot.url.clone(),
                filepath: filepath.clone(),
                platform: snapshot.platform,
                quality: snapshot.quality.clone(),
                extract_audio: snapshot.extract_audio,
                cancel: token.clone(),
            };
            let (tx, rx) = mpsc::unbounded_channel();
            let started = Instant::now();
            let (result, ()) = tokio::join!(engine.download(&request, tx), self.consume_progress(id, rx));

            if let Err(e) = &result {
                if e.is_cancelled() {
                    self.stopped(id, &filepath);
                    return;
                }
            }
            self.record_attempt(EngineAttempt {
                engine: engine.name().to_string(),
                download_id: Some(id.to_string()),
                success: result.is_ok(),
                duration_secs: started.elapsed().as_secs_f64(),
                bytes: result.as_ref().map_or(0, |o| o.size),
                error_category: result.as_ref().err().map(|e| e.subcategory().to_string()),
                error_message: result.as_ref().err().map(|e| e.to_string()),
            });

            match result {
                Ok(output) => {
                    self.finish(id, output).await;
                    return;
                }
                Err(e) => {
                    log::warn!("Download {}: engine {} failed: {}", id, engine.name(), e);
                    self.inner.files.safe_delete(&filepath, true);
                    self.update(id, |r| {
                        r.progress = 0.0;
                        r.speed = 0.0;
                        r.downloaded = 0;
                        r.eta = None;
                    });
                    last_error = Some(e.to_string());
                }
            }
        }

        self.mark_error(
            id,
            last_error.unwrap_or_else(|| "All download engines failed".to_string()),
        );
    }

    async fn consume_progress(&self, id: &str, mut rx: mpsc::UnboundedReceiver<EngineProgress>) {
        let step = self.inner.settings.progress_log_step.max(1.0);
        let mut last_step = -1i64;
        while let Some(update) = rx.recv().await {
            let Some(record) = self.update(id, |r| {
                r.progress = update.percent.clamp(0.0, 100.0);
                if let Some(speed) = update.speed {
                    r.speed = speed;
                }
                if let Some(total) = update.total {
                    r.size = total;
                }
                r.downloaded = update
                    .downloaded
                    .unwrap_or_else(|| (r.size as f64 * r.progress / 100.0) as u64);
                r.eta = (r.speed > 0.0 && r.size > r.downloaded)
                    .then(|| ((r.size - r.downloaded) as f64 / r.speed) as u64);
            }) else {
                continue;
            };

            let current = (record.progress / step).floor() as i64;
            if current > last_step {
                last_step = current;
                log::info!(
                    "Download {}: {:.0}% of {} at {}",
                    id,
                    record.progress,
                    format_size(record.size),
                    format_speed(record.speed)
                );
                self.persist(&record);
            }
        }
    }

    fn record_attempt(&self, attempt: EngineAttempt) {
        let saved = get_connection(&self.inner.pool)
            .map_err(AppError::from)
            .and_then(|conn| db::save_engine_stats(&conn, &attempt).map_err(AppError::from));
        if let Err(e) = saved {
            log::warn!("Failed to record engine stats for {}: {}", attempt.engine, e);
        }
    }

    async fn finish(&self, id: &str, output: EngineOutput) {
        let Some(record) = self.update(id, |r| {
            r.status = DownloadStatus::Completed;
            r.set_filepath(&output.filepath);
            r.progress = 100.0;
            r.size = output.size;
            r.downloaded = output.size;
            r.speed = 0.0;
            r.eta = None;
            r.finished_at = Some(Utc::now());
        }) else {
            // cancelled while the engine was finishing
            self.inner.files.safe_delete(&output.filepath, true);
            return;
        };
        self.persist(&record);
        log::info!(
            "Download {} completed: {} ({}) via {}",
            id,
            record.filename,
            format_size(record.size),
            record.engine.as_deref().unwrap_or("?")
        );

        if let Some(listener) = self.listener() {
            listener.on_completed(&record).await;
        }
    }

    /// Worker stopped by pause or cancel.
    ///
    /// Files are only removed once the record is gone. A paused download may
    /// already have been resumed by a newer worker that owns the same file.
    fn stopped(&self, id: &str, filepath: &Path) {
        match self.get(id) {
            Some(record) => {
                log::info!("Download {} worker stopped at {:.1}%", id, record.progress);
            }
            None => {
                self.inner.files.safe_delete(filepath, true);
                remove_staging(filepath);
                log::info!("Download {} cancelled", id);
            }
        }
    }

    fn mark_error(&self, id: &str, message: String) {
        log::error!("Download {} failed: {}", id, message);
        if let Some(record) = self.update(id, |r| {
            r.status = DownloadStatus::Error;
            r.error_message = Some(message);
            r.speed = 0.0;
            r.eta = None;
            r.finished_at = Some(Utc::now());
        }) {
            self.persist(&record);
        }
    }

    fn stop_worker(&self, id: &str) {
        if let Some(worker) = lock(&self.inner.workers).remove(id) {
            worker.token.cancel();
        }
    }

    /// Stop the worker and keep the partial file for a later resume.
    pub fn pause(&self, id: &str) -> AppResult<()> {
        let record = {
            let mut records = self.records();
            let record = records
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("Download {}", id)))?;
            if !record.status.is_active() {
                return Err(AppError::Validation(format!(
                    "Download {} is {}, not active",
                    id, record.status
                )));
            }
            record.status = DownloadStatus::Paused;
            record.speed = 0.0;
            record.eta = None;
            record.clone()
        };
        self.stop_worker(id);
        self.persist(&record);
        log::info!("Download {} pause requested", id);
        Ok(())
    }

    /// Restart a paused download, subject to the worker limit.
    pub fn resume(&self, id: &str) -> AppResult<()> {
        let record = {
            let mut records = self.records();
            let active = Self::active_count(&records);
            let record = records
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("Download {}", id)))?;
            if record.status != DownloadStatus::Paused {
                return Err(AppError::Validation(format!(
                    "Download {} is {}, only paused downloads can be resumed",
                    id, record.status
                )));
            }
            if active >= self.inner.settings.max_workers {
                return Err(self.limit_error());
            }
            record.status = DownloadStatus::Initializing;
            record.retry_count += 1;
            record.error_message = None;
            record.clone()
        };
        self.persist(&record);
        log::info!("Download {} resumed (retry {})", id, record.retry_count);
        self.spawn_worker(id);
        Ok(())
    }

    /// Stop the worker, delete the file and forget the download.
    pub fn cancel(&self, id: &str) -> AppResult<()> {
        let record = self
            .records()
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("Download {}", id)))?;
        self.stop_worker(id);
        lock(&self.inner.handles).remove(id);

        let conn = get_connection(&self.inner.pool)?;
        db::delete_download(&conn, id)?;

        let path = PathBuf::from(&record.filepath);
        self.inner.files.safe_delete(&path, true);
        remove_staging(&path);
        log::info!("Download {} cancelled and removed", id);
        Ok(())
    }

    /// Pause every active download. Returns how many were paused.
    pub fn pause_all(&self) -> usize {
        let ids: Vec<String> = self
            .records()
            .values()
            .filter(|r| r.status.is_active())
            .map(|r| r.id.clone())
            .collect();
        ids.iter().filter(|id| self.pause(id).is_ok()).count()
    }

    /// Forget completed downloads, in memory and in the database. Files stay.
    pub fn clear_completed(&self) -> AppResult<usize> {
        let removed: Vec<String> = {
            let mut records = self.records();
            let ids: Vec<String> = records
                .values()
                .filter(|r| r.status == DownloadStatus::Completed)
                .map(|r| r.id.clone())
                .collect();
            let mut handles = lock(&self.inner.handles);
            for id in &ids {
                records.remove(id);
                handles.remove(id);
            }
            ids
        };
        let conn = get_connection(&self.inner.pool)?;
        for id in &removed {
            db::delete_download(&conn, id)?;
        }
        log::info!("Cleared {} completed downloads", removed.len());
        Ok(removed.len())
    }

    /// Store a channel upload result on the record, in memory and in the database.
    pub fn set_telegram_info(&self, id: &str, info: &TelegramInfo) -> AppResult<bool> {
        self.update(id, |r| {
            r.telegram_file_id = Some(info.file_id.clone());
            r.telegram_file_unique_id = Some(info.file_unique_id.clone());
            r.telegram_message_id = Some(info.message_id);
            r.share_link = info.share_link.clone();
            r.telegram_error = None;
        });
        let conn = get_connection(&self.inner.pool)?;
        Ok(db::set_download_telegram_info(&conn, id, info)?)
    }

    /// Store a failed channel upload on the record, in memory and in the database.
    pub fn set_telegram_error(&self, id: &str, message: &str) -> AppResult<bool> {
        self.update(id, |r| r.telegram_error = Some(message.to_string()));
        let conn = get_connection(&self.inner.pool)?;
        Ok(db::set_download_telegram_error(&conn, id, message)?)
    }

    pub fn get(&self, id: &str) -> Option<DownloadRecord> {
        self.records().get(id).cloned()
    }

    /// All downloads, newest first.
    pub fn list(&self) -> Vec<DownloadRecord> {
        let mut all: Vec<DownloadRecord> = self.records().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub fn stats(&self) -> DownloadStats {
        let records = self.records();
        let mut stats = DownloadStats {
            total: records.len(),
            max_workers: self.inner.settings.max_workers,
            ..DownloadStats::default()
        };
        for record in records.values() {
            match record.status {
                DownloadStatus::Downloading => {
                    stats.downloading += 1;
                    stats.total_speed += record.speed;
                }
                DownloadStatus::Completed => stats.completed += 1,
                DownloadStatus::Paused => stats.paused += 1,
                DownloadStatus::Error => stats.failed += 1,
                DownloadStatus::Initializing | DownloadStatus::Cancelled => {}
            }
        }
        stats.active_workers = Self::active_count(&records);
        stats
    }

    /// Load persisted downloads. Ones interrupted mid-flight come back paused.
    ///
    /// Returns how many were turned into paused downloads.
    pub fn restore_from_db(&self) -> AppResult<usize> {
        let conn = get_connection(&self.inner.pool)?;
        let stored = db::list_downloads(&conn, None, RESTORE_LIMIT)?;
        let mut restored = 0;
        let mut records = self.records();
        for mut record in stored {
            if record.status.is_active() {
                record.status = DownloadStatus::Paused;
                record.speed = 0.0;
                record.eta = None;
                db::save_download(&conn, &record)?;
                restored += 1;
            }
            records.insert(record.id.clone(), record);
        }
        if restored > 0 {
            log::info!("Restored {} interrupted downloads as paused", restored);
        }
        Ok(restored)
    }

    /// Poll until the download is finished or paused. `None` if it disappeared.
    pub async fn wait_until_finished(&self, id: &str, poll: Duration) -> Option<DownloadRecord> {
        loop {
            let record = self.get(id)?;
            if record.status.is_finished() || record.status == DownloadStatus::Paused {
                return Some(record);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

fn remove_staging(filepath: &Path) {
    let staging = ytdlp::staging_dir(filepath);
    if staging.is_dir() {
        if let Err(e) = std::fs::remove_dir_all(&staging) {
            log::warn!("Failed to remove {}: {}", staging.display(), e);
        }
    }
}
