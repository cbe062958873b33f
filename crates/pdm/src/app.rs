//! Startup, background maintenance and shutdown for the `pdm` commands.

use anyhow::Result;
use pdmcore::core::disk::get_disk_space;
use pdmcore::core::logging::log_section;
use pdmcore::core::utils::{format_size, format_speed, progress_bar};
use pdmcore::download::{DownloadOptions, DownloadStatus, ManagerSettings};
use pdmcore::setup::{render_report, run_doctor};
use pdmcore::storage::db;
use pdmcore::storage::files::FileDirs;
use pdmcore::{config, create_pool, get_connection, DbPool, DownloadManager, EngineManager, FileManager};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::server::{self, AppState, Credentials};
use crate::settings;
use crate::telegram::{create_bot, BotSender, TelegramUploader, UploaderSettings};

const BANNER: &str = r"
╔══════════════════════════════════════════════╗
║        Professional Download Manager         ║
╚══════════════════════════════════════════════╝";

const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const FOREGROUND_POLL: Duration = Duration::from_millis(500);

/// Everything `pdm run` starts.
pub struct Services {
    pub pool: DbPool,
    pub manager: DownloadManager,
    pub uploader: Option<Arc<TelegramUploader>>,
    worker: Option<JoinHandle<()>>,
}

/// Database, engines, file manager and download manager.
///
/// Stored settings override the environment for the worker limit.
pub async fn build_manager(pool: &DbPool) -> Result<DownloadManager> {
    let engines = EngineManager::detect(&config::engines::load()).await;
    if engines.is_empty() {
        log::warn!("No download engine available; run `pdm setup`");
    }
    let files = Arc::new(FileManager::with_lock_ttl(
        FileDirs::from_config(),
        config::cleanup::lock_ttl(),
    ));

    let mut manager_settings = ManagerSettings::from_config();
    let conn = get_connection(pool)?;
    if let Some(max) = settings::stored_max_concurrent(&conn) {
        log::info!("Using stored max concurrent downloads: {}", max);
        manager_settings.max_workers = max;
    }
    Ok(DownloadManager::new(pool.clone(), engines, files, manager_settings))
}

/// Start the channel uploader when a bot token and a channel are configured.
async fn start_uploader(pool: &DbPool, manager: &DownloadManager) -> Result<Option<(Arc<TelegramUploader>, JoinHandle<()>)>> {
    let conn = get_connection(pool)?;
    let channel = settings::stored_channel(&conn).or_else(|| config::telegram::CHANNEL_ID.clone());
    let (true, Some(channel)) = (
        config::telegram::token_is_usable(&config::telegram::BOT_TOKEN),
        channel,
    ) else {
        log::info!("Telegram upload disabled (TELEGRAM_BOT_TOKEN or TELEGRAM_CHANNEL_ID not set)");
        return Ok(None);
    };

    let bot = create_bot(&config::telegram::BOT_TOKEN)?;
    match bot.get_me().await {
        Ok(me) => log::info!(
            "Telegram bot @{} connected",
            me.user.username.as_deref().unwrap_or("unknown")
        ),
        Err(e) => log::warn!("Telegram bot check failed, uploads will be retried: {}", e),
    }

    let mut uploader_settings = UploaderSettings::from_config();
    if let Some(auto) = settings::stored_bool(&conn, settings::AUTO_TELEGRAM_UPLOAD) {
        uploader_settings.auto_upload = auto;
    }
    if let Some(delete) = settings::stored_bool(&conn, settings::DELETE_AFTER_UPLOAD) {
        uploader_settings.delete_after_upload = delete;
    }
    log::info!(
        "Telegram channel {} (auto upload: {}, delete after upload: {})",
        channel,
        uploader_settings.auto_upload,
        uploader_settings.delete_after_upload
    );

    let sender = Arc::new(BotSender::new(bot, &channel));
    let uploader = TelegramUploader::new(sender, manager.clone(), uploader_settings);
    let worker = uploader.start();
    manager.set_listener(uploader.clone());
    Ok(Some((uploader, worker)))
}

fn log_report(pool: &DbPool, report: &pdmcore::setup::DoctorReport) {
    let mut rendered = Vec::new();
    if render_report(report, &mut rendered).is_ok() {
        for line in String::from_utf8_lossy(&rendered).lines() {
            log::info!("{}", console::strip_ansi_codes(line));
        }
    }
    let missing = report.missing_tools();
    if !missing.is_empty() {
        log::warn!("Missing tools: {}", missing.join(", "));
    }
    if let Ok(conn) = get_connection(pool) {
        if let Ok(stats) = db::get_stats(&conn) {
            log::info!(
                "Database: {} downloads ({} completed), {} uploads",
                stats.total_downloads,
                stats.completed_downloads,
                stats.total_uploads
            );
        }
    }
}

fn log_system_info(manager: &DownloadManager) {
    log_section("System");
    log::info!("OS: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    log::info!("Downloads: {}", config::DOWNLOADS_DIR.display());
    log::info!("Database: {}", config::DATABASE_PATH.display());
    match get_disk_space(&config::DOWNLOADS_DIR) {
        Ok(disk) => log::info!(
            "Disk: {} free of {} ({:.1}% used)",
            format_size(disk.available_bytes),
            format_size(disk.total_bytes),
            disk.used_percent
        ),
        Err(e) => log::warn!("Disk space unknown: {}", e),
    }
    log::info!("Engines: {}", manager.engines().available_names().join(", "));
    log::info!("Max concurrent downloads: {}", manager.settings().max_workers);
}

/// Bring up everything `pdm run` needs.
pub async fn start_services() -> Result<Services> {
    config::ensure_directories()?;
    let pool = create_pool(&config::DATABASE_PATH)?;

    let report = run_doctor(Some(&pool)).await;
    log_report(&pool, &report);
    if !report.healthy() {
        log::warn!("Startup checks reported problems, continuing anyway");
    }

    let manager = build_manager(&pool).await?;
    manager.restore_from_db()?;
    log_system_info(&manager);

    let (uploader, worker) = match start_uploader(&pool, &manager).await? {
        Some((uploader, worker)) => (Some(uploader), Some(worker)),
        None => (None, None),
    };

    Ok(Services {
        pool,
        manager,
        uploader,
        worker,
    })
}

/// Sweep expired locks and old temp files until `shutdown` fires.
pub fn spawn_maintenance(files: Arc<FileManager>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut locks = interval(config::cleanup::lock_sweep_interval());
        let mut temp = interval(config::cleanup::temp_sweep_interval());
        // first tick fires immediately
        locks.tick().await;
        temp.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = locks.tick() => {
                    files.cleanup_expired_locks();
                }
                _ = temp.tick() => {
                    files.cleanup_temp_files(config::cleanup::temp_max_age());
                }
            }
        }
        log::debug!("Maintenance task stopped");
    })
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received SIGINT"),
        _ = terminate => log::info!("Received SIGTERM"),
    }
}

/// Pause downloads, stop the uploader, clear temp files and log final numbers.
pub async fn shutdown(services: Services) {
    log_section("Shutting down");

    let paused = services.manager.pause_all();
    if paused > 0 {
        log::info!("Paused {} active downloads; they resume as paused on next start", paused);
    }

    if let Some(uploader) = &services.uploader {
        uploader.stop();
    }
    if let Some(worker) = services.worker {
        if tokio::time::timeout(WORKER_STOP_TIMEOUT, worker).await.is_err() {
            log::warn!("Telegram worker did not stop within {:?}", WORKER_STOP_TIMEOUT);
        }
    }

    services.manager.files().cleanup_temp_files(Duration::ZERO);

    let stats = services.manager.stats();
    log::info!(
        "Final stats: {} downloads, {} completed, {} failed, {} paused",
        stats.total,
        stats.completed,
        stats.failed,
        stats.paused
    );
    if let Ok(conn) = get_connection(&services.pool) {
        if let Ok(db_stats) = db::get_stats(&conn) {
            log::info!(
                "Database totals: {} downloads, {} uploads, {} sent to Telegram",
                db_stats.total_downloads,
                db_stats.total_uploads,
                db_stats.telegram_uploads
            );
        }
    }
    log::info!("Goodbye");
}

/// `pdm run`
pub async fn run() -> Result<()> {
    println!("{}", BANNER);
    log_section(&format!("Professional Download Manager v{}", env!("CARGO_PKG_VERSION")));

    let services = start_services().await?;
    let shutdown_token = CancellationToken::new();
    let maintenance = spawn_maintenance(Arc::clone(services.manager.files()), shutdown_token.clone());

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_token.cancel();
    });

    let state = AppState::new(
        services.manager.clone(),
        services.uploader.clone(),
        Credentials::from_config(),
    );
    let addr = config::server::bind_addr();
    log::info!("Web API login user: {}", state.credentials.username());

    let served = server::serve(state, &addr, shutdown_token.clone()).await;
    shutdown_token.cancel();
    if let Err(e) = maintenance.await {
        log::warn!("Maintenance task ended abnormally: {}", e);
    }
    shutdown(services).await;
    served
}

/// `pdm download <url>`: download in the foreground, Ctrl+C cancels.
pub async fn download_once(url: &str, options: DownloadOptions) -> Result<()> {
    config::ensure_directories()?;
    let pool = create_pool(&config::DATABASE_PATH)?;
    let manager = build_manager(&pool).await?;

    let id = manager.start_download(url, options)?;
    println!("Download {} started: {}", id, url);

    let interrupted = tokio::select! {
        _ = signal::ctrl_c() => true,
        _ = async {
            loop {
                let Some(record) = manager.get(&id) else { break };
                if record.status.is_finished() || record.status == DownloadStatus::Paused {
                    break;
                }
                print!(
                    "\r{} {:>10} {}   ",
                    progress_bar(record.progress, 30),
                    format_speed(record.speed),
                    record.engine.as_deref().unwrap_or("")
                );
                let _ = std::io::stdout().flush();
                tokio::time::sleep(FOREGROUND_POLL).await;
            }
        } => false,
    };
    println!();

    if interrupted {
        manager.cancel(&id)?;
        anyhow::bail!("Download cancelled");
    }

    match manager.get(&id) {
        Some(record) if record.status == DownloadStatus::Completed => {
            println!(
                "{} Saved {} ({}) with {}",
                console::style("✓").green(),
                record.filepath,
                format_size(record.size),
                record.engine.as_deref().unwrap_or("unknown engine")
            );
            Ok(())
        }
        Some(record) => anyhow::bail!(
            "Download {}: {}",
            record.status,
            record.error_message.unwrap_or_else(|| "no details".to_string())
        ),
        None => anyhow::bail!("Download {} disappeared", id),
    }
}

/// `pdm cleanup`
pub fn cleanup_once() -> Result<()> {
    let files = FileManager::with_lock_ttl(FileDirs::from_config(), config::cleanup::lock_ttl());
    let locks = files.cleanup_expired_locks();
    let temp = files.cleanup_temp_files(config::cleanup::temp_max_age());
    println!("Expired locks removed: {}", locks);
    println!("Temp files removed: {}", temp);

    let storage = files.storage_info();
    println!(
        "Downloads: {} in {} files, uploads: {} in {} files",
        format_size(storage.downloads.size),
        storage.downloads.count,
        format_size(storage.uploads.size),
        storage.uploads.count
    );
    Ok(())
}

/// `pdm doctor`: print the report; false when unhealthy.
pub async fn doctor() -> Result<bool> {
    let pool = create_pool(&config::DATABASE_PATH).ok();
    let report = run_doctor(pool.as_ref()).await;
    render_report(&report, &mut std::io::stdout())?;
    Ok(report.healthy())
}
