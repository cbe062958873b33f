use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Local;
use pdmcore::core::config;
use pdmcore::core::logging::log_file_names;
use pdmcore::storage::db;
use pdmcore::storage::files::{FileEntry, StorageInfo};
use pdmcore::get_connection;
use serde_json::{json, Map, Value};
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::settings;

const RECENT_ACTIVITY_LIMIT: usize = 15;

/// GET /api/files
pub async fn list_files(State(state): State<AppState>) -> Json<Vec<FileEntry>> {
    Json(state.manager.files().list_files())
}

/// GET /api/recent-activity
pub async fn recent_activity(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let conn = get_connection(state.manager.pool())?;
    let activity = db::recent_activity(&conn, RECENT_ACTIVITY_LIMIT)?;
    Ok(Json(json!({ "activity": activity })))
}

/// GET /api/engine-performance
pub async fn engine_performance(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let conn = get_connection(state.manager.pool())?;
    let engines = db::engine_performance(&conn)?;
    Ok(Json(json!({ "engines": engines })))
}

/// GET /api/analytics/stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let conn = get_connection(state.manager.pool())?;
    let database = db::get_stats(&conn)?;
    let telegram = state.uploader.as_ref().map(|u| u.status());
    Ok(Json(json!({
        "database": database,
        "downloads": state.manager.stats(),
        "engines": state.manager.engines().available_names(),
        "telegram": telegram,
    })))
}

/// GET /api/analytics/storage
pub async fn storage(State(state): State<AppState>) -> Json<StorageInfo> {
    Json(state.manager.files().storage_info())
}

/// GET /api/settings
pub async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let conn = get_connection(state.manager.pool())?;
    Ok(Json(json!({ "settings": settings::effective(&conn)? })))
}

/// POST /api/settings
///
/// Every key is validated before anything is written. Changes apply on restart.
pub async fn update_settings(
    State(state): State<AppState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(updates) = payload?;
    if updates.is_empty() {
        return Err(ApiError::bad_request("No settings given"));
    }
    let normalized = updates
        .iter()
        .map(|(key, value)| settings::normalize(key, value).map(|v| (key.as_str(), v)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(ApiError::bad_request)?;

    let conn = get_connection(state.manager.pool())?;
    for (key, value) in &normalized {
        db::set_setting(&conn, key, value)?;
        log::info!("Setting {} = {}", key, value);
    }
    Ok(Json(json!({
        "success": true,
        "settings": settings::effective(&conn)?,
        "restart_required": true,
    })))
}

/// POST /api/maintenance/cleanup
pub async fn cleanup(State(state): State<AppState>) -> Json<Value> {
    let files = state.manager.files();
    let locks = files.cleanup_expired_locks();
    let temp = files.cleanup_temp_files(config::cleanup::temp_max_age());
    Json(json!({
        "success": true,
        "expired_locks": locks,
        "temp_files": temp,
    }))
}

/// POST /api/maintenance/clear-database
pub async fn clear_database(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let cleared = state.manager.clear_completed()?;
    let conn = get_connection(state.manager.pool())?;
    db::clear_all(&conn)?;
    Ok(Json(json!({ "success": true, "cleared_downloads": cleared })))
}

/// Zip every log file that exists in `logs_dir`.
fn zip_logs(logs_dir: &Path) -> Result<Vec<u8>, zip::result::ZipError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for name in log_file_names() {
        let Ok(contents) = std::fs::read(logs_dir.join(name)) else {
            continue;
        };
        writer.start_file(name, options)?;
        writer.write_all(&contents)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// GET /api/maintenance/export-logs
pub async fn export_logs(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let logs_dir = state.logs_dir.clone();
    let archive = tokio::task::spawn_blocking(move || zip_logs(&logs_dir))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(|e| ApiError::internal(format!("Failed to export logs: {}", e)))?;

    let disposition = format!(
        "attachment; filename=\"logs_{}.zip\"",
        Local::now().format("%Y%m%d_%H%M%S")
    );
    Ok((
        [
            (CONTENT_TYPE, "application/zip".to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        archive,
    ))
}
