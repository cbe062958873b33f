use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use pdmcore::download::{DownloadOptions, DownloadRecord, DownloadStatus};
use pdmcore::storage::db;
use pdmcore::get_connection;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

use super::error::{ApiError, ApiResult};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct StartDownload {
    #[serde(default)]
    pub url: String,
    #[serde(flatten)]
    pub options: DownloadOptions,
}

/// POST /api/download
pub async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<StartDownload>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = payload?;
    if request.url.trim().is_empty() {
        return Err(ApiError::bad_request("URL is required"));
    }
    let id = state.manager.start_download(&request.url, request.options)?;
    Ok(Json(json!({ "success": true, "id": id })))
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub id: String,
    pub action: String,
}

/// POST /api/download/control
pub async fn control_download(
    State(state): State<AppState>,
    payload: Result<Json<ControlRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(ControlRequest { id, action }) = payload?;
    match action.as_str() {
        "pause" => state.manager.pause(&id)?,
        "resume" => state.manager.resume(&id)?,
        "cancel" | "remove" => state.manager.cancel(&id)?,
        other => return Err(ApiError::bad_request(format!("Unknown action: {}", other))),
    }
    Ok(Json(json!({ "success": true, "id": id, "action": action })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// GET /api/downloads
pub async fn list_downloads(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ApiResult<Json<Value>> {
    let filter = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            DownloadStatus::from_str(raw).map_err(|_| ApiError::bad_request(format!("Unknown status: {}", raw)))?,
        ),
        None => None,
    };
    let downloads: Vec<DownloadRecord> = state
        .manager
        .list()
        .into_iter()
        .filter(|r| filter.map_or(true, |status| r.status == status))
        .collect();
    Ok(Json(json!({
        "downloads": downloads,
        "stats": state.manager.stats(),
    })))
}

/// GET /api/downloads/{id}
///
/// Falls back to the database for downloads no longer held in memory.
pub async fn get_download(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<DownloadRecord>> {
    if let Some(record) = state.manager.get(&id) {
        return Ok(Json(record));
    }
    let conn = get_connection(state.manager.pool())?;
    db::get_download(&conn, &id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Download {} not found", id)))
}

/// POST /api/download/pause-all
pub async fn pause_all(State(state): State<AppState>) -> Json<Value> {
    let count = state.manager.pause_all();
    Json(json!({ "success": true, "count": count }))
}

/// POST /api/download/clear-completed
pub async fn clear_completed(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let count = state.manager.clear_completed()?;
    Ok(Json(json!({ "success": true, "count": count })))
}
