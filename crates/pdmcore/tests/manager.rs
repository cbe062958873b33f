//! Download manager lifecycle with scripted engines.
//!
//! Run with: cargo test -p pdmcore --test manager

use async_trait::async_trait;
use pdmcore::config::engines::EngineSettings;
use pdmcore::download::engine::{is_direct_url, DownloadEngine, EngineOutput, EngineProgress, EngineRequest, ProgressSender};
use pdmcore::download::manager::ManagerSettings;
use pdmcore::download::{DownloadError, DownloadOptions, DownloadRecord, DownloadStatus};
use pdmcore::storage::db;
use pdmcore::storage::FileDirs;
use pdmcore::{create_pool, get_connection, AppError, DbPool, DownloadListener, DownloadManager, EngineManager, FileManager};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Block,
}

struct FakeEngine {
    settings: EngineSettings,
    behavior: Behavior,
    platforms: bool,
    calls: AtomicUsize,
}

impl FakeEngine {
    fn new(name: &str, priority: u8, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            settings: EngineSettings::new(name, priority, 10),
            behavior,
            platforms: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn for_platforms(name: &str, priority: u8) -> Arc<Self> {
        Arc::new(Self {
            settings: EngineSettings::new(name, priority, 10),
            behavior: Behavior::Succeed,
            platforms: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DownloadEngine for FakeEngine {
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
        self.platforms || is_direct_url(url)
    }

    async fn download(&self, request: &EngineRequest, progress: ProgressSender) -> Result<EngineOutput, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => {
                let _ = progress.send(EngineProgress {
                    percent: 50.0,
                    speed: Some(1024.0),
                    downloaded: Some(5),
                    total: Some(10),
                });
                tokio::fs::write(&request.filepath, b"0123456789").await?;
                Ok(EngineOutput {
                    filepath: request.filepath.clone(),
                    size: 10,
                })
            }
            Behavior::Fail => {
                tokio::fs::write(&request.filepath, b"junk").await?;
                Err(DownloadError::Process(format!("{} exploded", self.settings.name)))
            }
            Behavior::Block => {
                tokio::fs::write(&request.filepath, b"partial").await?;
                let _ = progress.send(EngineProgress {
                    percent: 30.0,
                    ..EngineProgress::default()
                });
                request.cancel.cancelled().await;
                Err(DownloadError::Cancelled)
            }
        }
    }
}

/// Takes a while to unwind after cancellation, then resumes from the partial file.
struct SlowStopEngine {
    settings: EngineSettings,
    calls: AtomicUsize,
    seen_on_resume: Mutex<Option<String>>,
}

impl SlowStopEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            settings: EngineSettings::new("aria2", 2, 10),
            calls: AtomicUsize::new(0),
            seen_on_resume: Mutex::new(None),
        })
    }
}

#[async_trait]
impl DownloadEngine for SlowStopEngine {
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
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::fs::write(&request.filepath, b"partial").await?;
            let _ = progress.send(EngineProgress {
                percent: 40.0,
                ..EngineProgress::default()
            });
            request.cancel.cancelled().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Err(DownloadError::Cancelled);
        }
        let existing = tokio::fs::read_to_string(&request.filepath).await.unwrap_or_default();
        *self.seen_on_resume.lock().unwrap() = Some(existing.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        let full = format!("{} rest", existing);
        tokio::fs::write(&request.filepath, &full).await?;
        Ok(EngineOutput {
            filepath: request.filepath.clone(),
            size: full.len() as u64,
        })
    }
}

struct Recorder(Mutex<Vec<String>>);

#[async_trait]
impl DownloadListener for Recorder {
    async fn on_completed(&self, record: &DownloadRecord) {
        self.0.lock().unwrap().push(record.id.clone());
    }
}

struct Fixture {
    _tmp: TempDir,
    pool: DbPool,
    manager: DownloadManager,
    downloads: std::path::PathBuf,
}

fn fixture(engines: Vec<Arc<dyn DownloadEngine>>, max_workers: usize) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let downloads = tmp.path().join("downloads");
    let pool = create_pool(&tmp.path().join("pdm.sqlite")).unwrap();
    let files = Arc::new(FileManager::new(FileDirs {
        downloads: downloads.clone(),
        uploads: tmp.path().join("uploads"),
        temp: tmp.path().join("temp"),
    }));
    let settings = ManagerSettings {
        max_workers,
        downloads_dir: downloads.clone(),
        progress_log_step: 10.0,
    };
    let manager = DownloadManager::new(pool.clone(), EngineManager::with_engines(engines), files, settings);
    Fixture {
        _tmp: tmp,
        pool,
        manager,
        downloads,
    }
}

async fn wait_for<F>(manager: &DownloadManager, id: &str, cond: F) -> DownloadRecord
where
    F: Fn(&DownloadRecord) -> bool,
{
    for _ in 0..500 {
        if let Some(record) = manager.get(id) {
            if cond(&record) {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("download {} never reached the expected state: {:?}", id, manager.get(id));
}

#[tokio::test]
async fn falls_back_to_next_engine_and_records_stats() {
    let broken = FakeEngine::new("aria2", 2, Behavior::Fail);
    let working = FakeEngine::new("http", 3, Behavior::Succeed);
    let fx = fixture(vec![working.clone(), broken.clone()], 5);

    let id = fx
        .manager
        .start_download("https://example.com/files/report.pdf", DownloadOptions::default())
        .unwrap();
    let record = fx
        .manager
        .wait_until_finished(&id, Duration::from_millis(10))
        .await
        .unwrap();

    assert_eq!(record.status, DownloadStatus::Completed);
    assert_eq!(record.engine.as_deref(), Some("http"));
    assert_eq!(record.progress, 100.0);
    assert_eq!(record.size, 10);
    assert_eq!(record.filename, "report.pdf");
    assert!(record.finished_at.is_some());
    assert_eq!(std::fs::read(fx.downloads.join("report.pdf")).unwrap(), b"0123456789");
    assert_eq!(broken.calls.load(Ordering::SeqCst), 1);

    let conn = get_connection(&fx.pool).unwrap();
    let perf = db::engine_performance(&conn).unwrap();
    assert_eq!(perf.len(), 2);
    let stored = db::get_download(&conn, &id).unwrap().unwrap();
    assert_eq!(stored.status, DownloadStatus::Completed);
}

#[tokio::test]
async fn all_engines_failing_marks_error_with_last_message() {
    let fx = fixture(
        vec![
            FakeEngine::new("aria2", 2, Behavior::Fail),
            FakeEngine::new("wget", 4, Behavior::Fail),
        ],
        5,
    );
    let id = fx
        .manager
        .start_download("https://example.com/a.iso", DownloadOptions::default())
        .unwrap();
    let record = fx
        .manager
        .wait_until_finished(&id, Duration::from_millis(10))
        .await
        .unwrap();

    assert_eq!(record.status, DownloadStatus::Error);
    assert_eq!(record.error_message.as_deref(), Some("wget exploded"));
    assert!(!fx.downloads.join("a.iso").exists());
    assert_eq!(fx.manager.stats().failed, 1);
}

#[tokio::test]
async fn refuses_downloads_past_the_worker_limit() {
    let fx = fixture(vec![FakeEngine::new("http", 3, Behavior::Block)], 1);
    let first = fx
        .manager
        .start_download("https://example.com/one.bin", DownloadOptions::default())
        .unwrap();

    let err = fx
        .manager
        .start_download("https://example.com/two.bin", DownloadOptions::default())
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(err.to_string().contains("Maximum concurrent downloads reached (1)"));

    fx.manager.cancel(&first).unwrap();
    fx.manager
        .start_download("https://example.com/two.bin", DownloadOptions::default())
        .unwrap();
}

#[tokio::test]
async fn pause_resume_and_cancel() {
    let fx = fixture(vec![FakeEngine::new("http", 3, Behavior::Block)], 2);
    let id = fx
        .manager
        .start_download("https://example.com/big.zip", DownloadOptions::default())
        .unwrap();
    let path = fx.downloads.join("big.zip");

    wait_for(&fx.manager, &id, |r| r.status == DownloadStatus::Downloading && r.progress > 0.0).await;
    fx.manager.pause(&id).unwrap();
    let paused = fx.manager.get(&id).unwrap();
    assert_eq!(paused.status, DownloadStatus::Paused);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(path.exists(), "partial file is kept while paused");
    assert!(fx.manager.pause(&id).is_err());

    fx.manager.resume(&id).unwrap();
    let resumed = wait_for(&fx.manager, &id, |r| r.status == DownloadStatus::Downloading).await;
    assert_eq!(resumed.retry_count, 1);
    assert!(fx.manager.resume(&id).is_err(), "only paused downloads resume");

    fx.manager.cancel(&id).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fx.manager.get(&id).is_none());
    assert!(!path.exists());
    let conn = get_connection(&fx.pool).unwrap();
    assert!(db::get_download(&conn, &id).unwrap().is_none());
    assert!(matches!(fx.manager.cancel(&id), Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn quick_resume_waits_for_the_stopping_worker() {
    let engine = SlowStopEngine::new();
    let fx = fixture(vec![engine.clone()], 2);
    let id = fx
        .manager
        .start_download("https://example.com/movie.mkv", DownloadOptions::default())
        .unwrap();
    let path = fx.downloads.join("movie.mkv");

    wait_for(&fx.manager, &id, |r| r.status == DownloadStatus::Downloading && r.progress > 0.0).await;
    fx.manager.pause(&id).unwrap();
    fx.manager.resume(&id).unwrap();

    let record = wait_for(&fx.manager, &id, |r| r.status.is_finished()).await;
    assert_eq!(record.status, DownloadStatus::Completed);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.seen_on_resume.lock().unwrap().as_deref(), Some("partial"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "partial rest");
    assert_eq!(record.size, 12);

    // the interrupted attempt is not counted as an engine failure
    let conn = get_connection(&fx.pool).unwrap();
    let perf = db::engine_performance(&conn).unwrap();
    assert_eq!(perf.len(), 1);
    assert_eq!(perf[0].attempts, 1);
    assert_eq!(perf[0].successes, 1);
}

#[tokio::test]
async fn pause_all_and_stats() {
    let fx = fixture(vec![FakeEngine::new("http", 3, Behavior::Block)], 3);
    let a = fx
        .manager
        .start_download("https://example.com/a.bin", DownloadOptions::default())
        .unwrap();
    let b = fx
        .manager
        .start_download("https://example.com/b.bin", DownloadOptions::default())
        .unwrap();
    wait_for(&fx.manager, &a, |r| r.status == DownloadStatus::Downloading).await;
    wait_for(&fx.manager, &b, |r| r.status == DownloadStatus::Downloading).await;
    assert_eq!(fx.manager.stats().active_workers, 2);

    assert_eq!(fx.manager.pause_all(), 2);
    let stats = fx.manager.stats();
    assert_eq!(stats.paused, 2);
    assert_eq!(stats.active_workers, 0);
    assert_eq!(stats.total, 2);
    assert_eq!(stats.max_workers, 3);
}

#[tokio::test]
async fn completion_notifies_listener_and_clear_completed_forgets_it() {
    let fx = fixture(vec![FakeEngine::new("http", 3, Behavior::Succeed)], 5);
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    fx.manager.set_listener(recorder.clone());

    let id = fx
        .manager
        .start_download("https://example.com/song.mp3", DownloadOptions::default())
        .unwrap();
    fx.manager
        .wait_until_finished(&id, Duration::from_millis(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*recorder.0.lock().unwrap(), vec![id.clone()]);

    assert_eq!(fx.manager.clear_completed().unwrap(), 1);
    assert!(fx.manager.list().is_empty());
    assert!(fx.downloads.join("song.mp3").exists(), "files stay on disk");
    let conn = get_connection(&fx.pool).unwrap();
    assert!(db::get_download(&conn, &id).unwrap().is_none());
}

#[tokio::test]
async fn platform_urls_need_a_platform_engine() {
    let fx = fixture(vec![FakeEngine::new("http", 3, Behavior::Succeed)], 5);
    let err = fx
        .manager
        .start_download("https://www.youtube.com/watch?v=abc", DownloadOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("No download engine"));

    let fx = fixture(vec![FakeEngine::for_platforms("yt-dlp", 1)], 5);
    let id = fx
        .manager
        .start_download("https://www.youtube.com/watch?v=abc", DownloadOptions::default())
        .unwrap();
    let record = fx.manager.get(&id).unwrap();
    assert_eq!(record.filename, format!("youtube_{}.mp4", id));
    assert_eq!(record.quality, "best[filesize<4G]/best");
}

#[tokio::test]
async fn rejects_bad_urls() {
    let fx = fixture(vec![FakeEngine::new("http", 3, Behavior::Succeed)], 5);
    for url in ["file:///etc/passwd", "not a url", ""] {
        let err = fx.manager.start_download(url, DownloadOptions::default()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "{url}");
    }
}

#[tokio::test]
async fn custom_filename_and_collisions() {
    let fx = fixture(vec![FakeEngine::new("http", 3, Behavior::Block)], 5);
    std::fs::create_dir_all(&fx.downloads).unwrap();
    std::fs::write(fx.downloads.join("mine.bin"), b"taken").unwrap();

    let options = DownloadOptions {
        filename: Some("mine.bin".to_string()),
        description: "nightly build".to_string(),
        ..DownloadOptions::default()
    };
    let id = fx.manager.start_download("https://example.com/x", options).unwrap();
    let record = fx.manager.get(&id).unwrap();
    assert_eq!(record.filename, "mine_1.bin");
    assert_eq!(record.description, "nightly build");
    assert!(Path::new(&record.filepath).ends_with("mine_1.bin"));
    fx.manager.cancel(&id).unwrap();
}

#[tokio::test]
async fn restore_turns_interrupted_downloads_into_paused() {
    let fx = fixture(vec![FakeEngine::new("http", 3, Behavior::Succeed)], 5);
    {
        let conn = get_connection(&fx.pool).unwrap();
        let mut busy = DownloadRecord::new(
            "busy".into(),
            "https://example.com/busy.bin".into(),
            "busy.bin".into(),
            fx.downloads.join("busy.bin").to_string_lossy().into_owned(),
        );
        busy.status = DownloadStatus::Downloading;
        db::save_download(&conn, &busy).unwrap();
        let mut done = busy.clone();
        done.id = "done".into();
        done.status = DownloadStatus::Completed;
        db::save_download(&conn, &done).unwrap();
    }

    assert_eq!(fx.manager.restore_from_db().unwrap(), 1);
    assert_eq!(fx.manager.get("busy").unwrap().status, DownloadStatus::Paused);
    assert_eq!(fx.manager.get("done").unwrap().status, DownloadStatus::Completed);
    let conn = get_connection(&fx.pool).unwrap();
    assert_eq!(
        db::get_download(&conn, "busy").unwrap().unwrap().status,
        DownloadStatus::Paused
    );

    fx.manager.resume("busy").unwrap();
    let record = fx
        .manager
        .wait_until_finished("busy", Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(record.status, DownloadStatus::Completed);
}
