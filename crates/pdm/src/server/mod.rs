//! JSON web API over the download manager and the Telegram uploader.
//!
//! Everything under `/api` requires HTTP Basic auth; `/health` is open.

pub mod auth;
pub mod channel;
pub mod downloads;
pub mod error;
pub mod system;
pub mod uploads;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use pdmcore::{config, DownloadManager};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::telegram::TelegramUploader;

pub use auth::Credentials;
pub use error::{ApiError, ApiResult};

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub manager: DownloadManager,
    /// `None` when Telegram is not configured
    pub uploader: Option<Arc<TelegramUploader>>,
    pub credentials: Arc<Credentials>,
    pub logs_dir: PathBuf,
}

impl AppState {
    pub fn new(manager: DownloadManager, uploader: Option<Arc<TelegramUploader>>, credentials: Credentials) -> Self {
        Self {
            manager,
            uploader,
            credentials: Arc::new(credentials),
            logs_dir: config::LOGS_DIR.clone(),
        }
    }

    pub fn with_logs_dir(mut self, logs_dir: PathBuf) -> Self {
        self.logs_dir = logs_dir;
        self
    }

    /// The uploader, or 400 when Telegram is off.
    pub fn uploader(&self) -> ApiResult<&Arc<TelegramUploader>> {
        self.uploader
            .as_ref()
            .ok_or_else(|| ApiError::bad_request("Telegram is not configured"))
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // downloads
        .route("/api/download", post(downloads::start_download))
        .route("/api/download/control", post(downloads::control_download))
        .route("/api/download/pause-all", post(downloads::pause_all))
        .route("/api/download/clear-completed", post(downloads::clear_completed))
        .route("/api/downloads", get(downloads::list_downloads))
        .route("/api/downloads/{id}", get(downloads::get_download))
        // uploads
        .route("/api/upload", post(uploads::upload_files))
        .route("/api/upload/control", post(uploads::control_upload))
        .route("/api/uploads", get(uploads::list_uploads))
        // system
        .route("/api/files", get(system::list_files))
        .route("/api/recent-activity", get(system::recent_activity))
        .route("/api/engine-performance", get(system::engine_performance))
        .route("/api/analytics/stats", get(system::stats))
        .route("/api/analytics/storage", get(system::storage))
        .route("/api/settings", get(system::get_settings).post(system::update_settings))
        .route("/api/maintenance/cleanup", post(system::cleanup))
        .route("/api/maintenance/clear-database", post(system::clear_database))
        .route("/api/maintenance/export-logs", get(system::export_logs))
        // telegram
        .route("/api/telegram/status", get(channel::status))
        .route("/api/telegram/clear-queue", post(channel::clear_queue))
        .route("/api/telegram/retry-failed", post(channel::retry_failed))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth));

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(DefaultBodyLimit::max(*config::server::MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(state: AppState, addr: &str, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Web API listening on http://{}", listener.local_addr()?);
    log::info!("  /health       - Health check (no auth)");
    log::info!("  /api/...      - Download, upload and maintenance API (Basic auth)");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    log::info!("Web API stopped");
    Ok(())
}
