use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use chrono::Utc;
use pdmcore::core::platform::{detect_file_type, is_blocked_extension, is_safe_filename};
use pdmcore::core::utils::escape_filename;
use pdmcore::download::naming::generate_download_id;
use pdmcore::storage::db::{self, UploadRecord};
use pdmcore::get_connection;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::telegram::{upload_priority, ItemKind, UploadItem};

const LIST_LIMIT: usize = 100;

struct SavedFile {
    id: String,
    filename: String,
    path: PathBuf,
    size: u64,
}

/// Base name of a client supplied file name, or why it was refused.
fn accept_filename(raw: &str) -> Result<String, String> {
    let base = Path::new(raw)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !is_safe_filename(raw) || base.is_empty() {
        return Err(format!("{}: unsafe file name", raw));
    }
    if is_blocked_extension(&base) {
        return Err(format!("{}: file type not allowed", base));
    }
    Ok(escape_filename(&base))
}

/// POST /api/upload
///
/// Multipart form: one or more `files` parts plus optional `description`
/// and `tags`. Each file is stored as `<uploads>/<id>_<name>` and queued
/// for the channel when Telegram is configured.
pub async fn upload_files(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<Value>> {
    let uploads_dir = state.manager.files().dirs().uploads.clone();
    tokio::fs::create_dir_all(&uploads_dir).await?;

    let mut description = String::new();
    let mut tags = String::new();
    let mut saved: Vec<SavedFile> = Vec::new();
    let mut rejected: Vec<String> = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        match field.name() {
            Some("description") => description = field.text().await?,
            Some("tags") => tags = field.text().await?,
            Some("files") => {
                let Some(raw) = field.file_name().map(str::to_string).filter(|n| !n.is_empty()) else {
                    continue;
                };
                let filename = match accept_filename(&raw) {
                    Ok(name) => name,
                    Err(reason) => {
                        log::warn!("Upload rejected: {}", reason);
                        rejected.push(reason);
                        continue;
                    }
                };

                let id = generate_download_id(&filename);
                let path = uploads_dir.join(format!("{}_{}", id, filename));
                let mut file = tokio::fs::File::create(&path).await?;
                let mut size = 0u64;
                while let Some(chunk) = field.chunk().await? {
                    size += chunk.len() as u64;
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
                log::info!("Received upload {} ({} bytes)", filename, size);
                saved.push(SavedFile { id, filename, path, size });
            }
            _ => {}
        }
    }

    if saved.is_empty() {
        if rejected.is_empty() {
            return Err(ApiError::bad_request("No files selected"));
        }
        return Err(ApiError::bad_request(rejected.join("; ")));
    }

    let conn = get_connection(state.manager.pool())?;
    let mut records = Vec::with_capacity(saved.len());
    for file in saved {
        let file_type = detect_file_type(&file.filename);
        let record = UploadRecord {
            id: file.id,
            filename: file.filename,
            filepath: file.path.to_string_lossy().into_owned(),
            file_type,
            size: file.size,
            description: description.clone(),
            tags: tags.clone(),
            status: "uploaded".to_string(),
            created_at: Utc::now(),
            telegram_file_id: None,
            telegram_file_unique_id: None,
            telegram_message_id: None,
            share_link: None,
            error_message: None,
        };
        db::save_upload(&conn, &record)?;

        match state.manager.files().analyze_file(&file.path).await {
            Ok(analysis) => log::debug!(
                "Analyzed {}: {} ({} bytes, media info: {})",
                record.filename,
                analysis.file_type,
                analysis.size,
                analysis.media.is_some()
            ),
            Err(e) => log::warn!("Failed to analyze {}: {}", record.filename, e),
        }

        if let Some(uploader) = &state.uploader {
            let mut item = UploadItem::new(&record.id, ItemKind::Upload, &file.path);
            item.description = record.description.clone();
            item.tags = record.tags.clone();
            item.priority = upload_priority(file_type);
            uploader.enqueue(item);
        }
        records.push(record);
    }

    Ok(Json(json!({
        "success": true,
        "uploads": records,
        "rejected": rejected,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UploadControl {
    pub id: String,
    pub action: String,
}

/// POST /api/upload/control
///
/// `retry` queues the file for the channel again, `remove` deletes the
/// file and its record.
pub async fn control_upload(
    State(state): State<AppState>,
    payload: Result<Json<UploadControl>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(UploadControl { id, action }) = payload?;
    let conn = get_connection(state.manager.pool())?;
    let record = db::get_upload(&conn, &id)?.ok_or_else(|| ApiError::not_found(format!("Upload {} not found", id)))?;
    let path = PathBuf::from(&record.filepath);

    match action.as_str() {
        "retry" => {
            let uploader = state.uploader()?;
            let mut item = UploadItem::new(&record.id, ItemKind::Upload, &path);
            item.description = record.description;
            item.tags = record.tags;
            item.priority = upload_priority(record.file_type);
            let outcome = uploader.retry(item);
            if !outcome.is_queued() {
                return Err(ApiError::bad_request(format!("Upload {} not queued: {:?}", id, outcome)));
            }
        }
        "remove" | "delete" => {
            if path.exists() && !state.manager.files().safe_delete(&path, false) {
                return Err(ApiError::bad_request(format!("Upload {} is in use", id)));
            }
            db::delete_upload(&conn, &id)?;
            log::info!("Upload {} removed", id);
        }
        other => return Err(ApiError::bad_request(format!("Unknown action: {}", other))),
    }
    Ok(Json(json!({ "success": true, "id": id, "action": action })))
}

/// GET /api/uploads
pub async fn list_uploads(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let conn = get_connection(state.manager.pool())?;
    let uploads = db::list_uploads(&conn, LIST_LIMIT)?;
    Ok(Json(json!({ "uploads": uploads })))
}
