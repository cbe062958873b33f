//! Telegram uploader endpoints.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::error::ApiResult;
use super::AppState;

/// GET /api/telegram/status
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    match &state.uploader {
        Some(uploader) => Json(json!(uploader.status())),
        None => Json(json!({
            "bot_available": false,
            "worker_running": false,
            "queue_length": 0,
            "processing_count": 0,
            "failed_count": 0,
        })),
    }
}

/// POST /api/telegram/clear-queue
pub async fn clear_queue(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let cleared = state.uploader()?.clear_queue();
    Ok(Json(json!({ "success": true, "count": cleared })))
}

/// POST /api/telegram/retry-failed
pub async fn retry_failed(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let requeued = state.uploader()?.retry_failed();
    Ok(Json(json!({ "success": true, "count": requeued })))
}
