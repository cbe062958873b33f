//! SQLite persistence for downloads, uploads, engine statistics and settings.

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Result, Row};
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;

use crate::core::error::AppResult;
use crate::core::platform::{FileType, Platform};
use crate::download::types::{DownloadRecord, DownloadStatus};
use crate::storage::migrations;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Initializes a pool with up to 10 connections (WAL mode, 30s busy timeout)
/// and brings the schema up to date.
///
/// # Example
///
/// ```no_run
/// use pdmcore::storage::create_pool;
///
/// let pool = create_pool(std::path::Path::new("data/pdm.sqlite"))?;
/// # Ok::<(), pdmcore::AppError>(())
/// ```
pub fn create_pool(database_path: &Path) -> AppResult<DbPool> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
    });
    let pool = Pool::builder().max_size(10).build(manager)?;

    let mut conn = pool.get()?;
    migrations::run_migrations(&mut conn)?;
    log::info!("Database ready at {}", database_path.display());

    Ok(pool)
}

/// Get a connection from the pool
pub fn get_connection(pool: &DbPool) -> std::result::Result<DbConnection, r2d2::Error> {
    pool.get()
}

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_ts(idx: usize, raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_ts(idx, r)).transpose()
}

fn parse_enum<T: FromStr>(idx: usize, raw: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

const DOWNLOAD_COLUMNS: &str = "id, url, filename, filepath, file_type, status, progress, speed, eta, size, downloaded, \
     description, tags, platform, engine, quality, extract_audio, created_at, started_at, finished_at, \
     error_message, retry_count, max_retries, telegram_file_id, telegram_file_unique_id, telegram_message_id, share_link, \
     telegram_error";

fn download_from_row(row: &Row<'_>) -> Result<DownloadRecord> {
    let file_type: String = row.get(4)?;
    let status: String = row.get(5)?;
    let platform: Option<String> = row.get(13)?;
    Ok(DownloadRecord {
        id: row.get(0)?,
        url: row.get(1)?,
        filename: row.get(2)?,
        filepath: row.get(3)?,
        file_type: parse_enum(4, &file_type)?,
        status: parse_enum(5, &status)?,
        progress: row.get(6)?,
        speed: row.get(7)?,
        eta: row.get::<_, Option<i64>>(8)?.map(|v| v.max(0) as u64),
        size: row.get::<_, i64>(9)?.max(0) as u64,
        downloaded: row.get::<_, i64>(10)?.max(0) as u64,
        description: row.get(11)?,
        tags: row.get(12)?,
        platform: platform.as_deref().map(|p| parse_enum::<Platform>(13, p)).transpose()?,
        engine: row.get(14)?,
        quality: row.get(15)?,
        extract_audio: row.get(16)?,
        created_at: parse_ts(17, row.get(17)?)?,
        started_at: parse_opt_ts(18, row.get(18)?)?,
        finished_at: parse_opt_ts(19, row.get(19)?)?,
        error_message: row.get(20)?,
        retry_count: row.get(21)?,
        max_retries: row.get(22)?,
        telegram_file_id: row.get(23)?,
        telegram_file_unique_id: row.get(24)?,
        telegram_message_id: row.get(25)?,
        share_link: row.get(26)?,
        telegram_error: row.get(27)?,
    })
}

/// Insert or fully replace a download record.
pub fn save_download(conn: &DbConnection, record: &DownloadRecord) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO downloads ({}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28)",
            DOWNLOAD_COLUMNS
        ),
        params![
            record.id,
            record.url,
            record.filename,
            record.filepath,
            record.file_type.as_ref(),
            record.status.as_ref(),
            record.progress,
            record.speed,
            record.eta.map(|v| v as i64),
            record.size as i64,
            record.downloaded as i64,
            record.description,
            record.tags,
            record.platform.map(|p| p.to_string()),
            record.engine,
            record.quality,
            record.extract_audio,
            ts(&record.created_at),
            record.started_at.as_ref().map(ts),
            record.finished_at.as_ref().map(ts),
            record.error_message,
            record.retry_count,
            record.max_retries,
            record.telegram_file_id,
            record.telegram_file_unique_id,
            record.telegram_message_id,
            record.share_link,
            record.telegram_error,
        ],
    )?;
    Ok(())
}

pub fn get_download(conn: &DbConnection, id: &str) -> Result<Option<DownloadRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM downloads WHERE id = ?1", DOWNLOAD_COLUMNS),
        [id],
        download_from_row,
    )
    .optional()
}

/// Downloads newest first, optionally filtered by status.
pub fn list_downloads(conn: &DbConnection, status: Option<DownloadStatus>, limit: usize) -> Result<Vec<DownloadRecord>> {
    let limit = limit as i64;
    let records = match status {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM downloads WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2",
                DOWNLOAD_COLUMNS
            ))?;
            let rows = stmt.query_map(params![status.as_ref(), limit], download_from_row)?;
            rows.collect::<Result<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM downloads ORDER BY created_at DESC LIMIT ?1",
                DOWNLOAD_COLUMNS
            ))?;
            let rows = stmt.query_map([limit], download_from_row)?;
            rows.collect::<Result<Vec<_>>>()?
        }
    };
    Ok(records)
}

/// Returns true when a row was removed.
pub fn delete_download(conn: &DbConnection, id: &str) -> Result<bool> {
    Ok(conn.execute("DELETE FROM downloads WHERE id = ?1", [id])? > 0)
}

/// Telegram identifiers returned by a successful channel upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelegramInfo {
    pub file_id: String,
    pub file_unique_id: String,
    pub message_id: i64,
    pub share_link: Option<String>,
}

pub fn set_download_telegram_info(conn: &DbConnection, id: &str, info: &TelegramInfo) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE downloads SET telegram_file_id = ?1, telegram_file_unique_id = ?2, telegram_message_id = ?3, share_link = ?4,
         telegram_error = NULL WHERE id = ?5",
        params![info.file_id, info.file_unique_id, info.message_id, info.share_link, id],
    )?;
    Ok(changed > 0)
}

/// Record why the channel upload of a downloaded file failed.
pub fn set_download_telegram_error(conn: &DbConnection, id: &str, error: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE downloads SET telegram_error = ?1 WHERE id = ?2",
        params![error, id],
    )?;
    Ok(changed > 0)
}

/// A file uploaded through the web API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRecord {
    pub id: String,
    pub filename: String,
    pub filepath: String,
    pub file_type: FileType,
    pub size: u64,
    pub description: String,
    pub tags: String,
    /// `uploaded`, `queued`, `sent` or `failed`
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub telegram_file_id: Option<String>,
    pub telegram_file_unique_id: Option<String>,
    pub telegram_message_id: Option<i64>,
    pub share_link: Option<String>,
    pub error_message: Option<String>,
}

const UPLOAD_COLUMNS: &str = "id, filename, filepath, file_type, size, description, tags, status, created_at, \
     telegram_file_id, telegram_file_unique_id, telegram_message_id, share_link, error_message";

fn upload_from_row(row: &Row<'_>) -> Result<UploadRecord> {
    let file_type: String = row.get(3)?;
    Ok(UploadRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        filepath: row.get(2)?,
        file_type: parse_enum(3, &file_type)?,
        size: row.get::<_, i64>(4)?.max(0) as u64,
        description: row.get(5)?,
        tags: row.get(6)?,
        status: row.get(7)?,
        created_at: parse_ts(8, row.get(8)?)?,
        telegram_file_id: row.get(9)?,
        telegram_file_unique_id: row.get(10)?,
        telegram_message_id: row.get(11)?,
        share_link: row.get(12)?,
        error_message: row.get(13)?,
    })
}

pub fn save_upload(conn: &DbConnection, upload: &UploadRecord) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO uploads ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            UPLOAD_COLUMNS
        ),
        params![
            upload.id,
            upload.filename,
            upload.filepath,
            upload.file_type.as_ref(),
            upload.size as i64,
            upload.description,
            upload.tags,
            upload.status,
            ts(&upload.created_at),
            upload.telegram_file_id,
            upload.telegram_file_unique_id,
            upload.telegram_message_id,
            upload.share_link,
            upload.error_message,
        ],
    )?;
    Ok(())
}

pub fn get_upload(conn: &DbConnection, id: &str) -> Result<Option<UploadRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM uploads WHERE id = ?1", UPLOAD_COLUMNS),
        [id],
        upload_from_row,
    )
    .optional()
}

pub fn list_uploads(conn: &DbConnection, limit: usize) -> Result<Vec<UploadRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM uploads ORDER BY created_at DESC LIMIT ?1",
        UPLOAD_COLUMNS
    ))?;
    let rows = stmt.query_map([limit as i64], upload_from_row)?;
    rows.collect()
}

pub fn delete_upload(conn: &DbConnection, id: &str) -> Result<bool> {
    Ok(conn.execute("DELETE FROM uploads WHERE id = ?1", [id])? > 0)
}

pub fn set_upload_status(conn: &DbConnection, id: &str, status: &str, error: Option<&str>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE uploads SET status = ?1, error_message = ?2 WHERE id = ?3",
        params![status, error, id],
    )?;
    Ok(changed > 0)
}

pub fn set_upload_telegram_info(conn: &DbConnection, id: &str, info: &TelegramInfo) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE uploads SET status = 'sent', error_message = NULL, telegram_file_id = ?1, telegram_file_unique_id = ?2,
         telegram_message_id = ?3, share_link = ?4 WHERE id = ?5",
        params![info.file_id, info.file_unique_id, info.message_id, info.share_link, id],
    )?;
    Ok(changed > 0)
}

/// Record Telegram identifiers on whichever table holds `id`.
pub fn set_telegram_info(conn: &DbConnection, id: &str, info: &TelegramInfo) -> Result<bool> {
    if set_download_telegram_info(conn, id, info)? {
        return Ok(true);
    }
    set_upload_telegram_info(conn, id, info)
}

/// One engine attempt.
#[derive(Debug, Clone, Default)]
pub struct EngineAttempt {
    pub engine: String,
    pub download_id: Option<String>,
    pub success: bool,
    pub duration_secs: f64,
    pub bytes: u64,
    pub error_category: Option<String>,
    pub error_message: Option<String>,
}

pub fn save_engine_stats(conn: &DbConnection, attempt: &EngineAttempt) -> Result<()> {
    conn.execute(
        "INSERT INTO engine_stats (engine, download_id, success, duration_secs, bytes, error_category, error_message, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            attempt.engine,
            attempt.download_id,
            attempt.success,
            attempt.duration_secs,
            attempt.bytes as i64,
            attempt.error_category,
            attempt.error_message,
            ts(&Utc::now()),
        ],
    )?;
    Ok(())
}

/// Aggregated attempts per engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnginePerformance {
    pub engine: String,
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub avg_duration_secs: f64,
    pub total_bytes: u64,
}

/// Engines ordered by success rate, then attempts.
pub fn engine_performance(conn: &DbConnection) -> Result<Vec<EnginePerformance>> {
    let mut stmt = conn.prepare(
        "SELECT engine, COUNT(*), SUM(success), AVG(CASE WHEN success = 1 THEN duration_secs END), SUM(bytes)
         FROM engine_stats GROUP BY engine",
    )?;
    let rows = stmt.query_map([], |row| {
        let attempts: i64 = row.get(1)?;
        let successes: i64 = row.get::<_, Option<i64>>(2)?.unwrap_or(0);
        Ok(EnginePerformance {
            engine: row.get(0)?,
            attempts: attempts.max(0) as u64,
            successes: successes.max(0) as u64,
            success_rate: if attempts > 0 {
                successes as f64 / attempts as f64 * 100.0
            } else {
                0.0
            },
            avg_duration_secs: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            total_bytes: row.get::<_, Option<i64>>(4)?.unwrap_or(0).max(0) as u64,
        })
    })?;
    let mut perf = rows.collect::<Result<Vec<_>>>()?;
    perf.sort_by(|a, b| {
        b.success_rate
            .partial_cmp(&a.success_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.attempts.cmp(&a.attempts))
    });
    Ok(perf)
}

/// Whole-database counters for the stats endpoint and startup report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub total_downloads: u64,
    pub completed_downloads: u64,
    pub failed_downloads: u64,
    pub active_downloads: u64,
    pub total_uploads: u64,
    pub downloaded_bytes: u64,
    pub telegram_uploads: u64,
}

fn count(conn: &DbConnection, sql: &str) -> Result<u64> {
    let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(value.max(0) as u64)
}

pub fn get_stats(conn: &DbConnection) -> Result<DatabaseStats> {
    Ok(DatabaseStats {
        total_downloads: count(conn, "SELECT COUNT(*) FROM downloads")?,
        completed_downloads: count(conn, "SELECT COUNT(*) FROM downloads WHERE status = 'completed'")?,
        failed_downloads: count(conn, "SELECT COUNT(*) FROM downloads WHERE status = 'error'")?,
        active_downloads: count(
            conn,
            "SELECT COUNT(*) FROM downloads WHERE status IN ('initializing', 'downloading')",
        )?,
        total_uploads: count(conn, "SELECT COUNT(*) FROM uploads")?,
        downloaded_bytes: count(
            conn,
            "SELECT COALESCE(SUM(size), 0) FROM downloads WHERE status = 'completed'",
        )?,
        telegram_uploads: count(
            conn,
            "SELECT (SELECT COUNT(*) FROM downloads WHERE telegram_file_id IS NOT NULL)
                  + (SELECT COUNT(*) FROM uploads WHERE telegram_file_id IS NOT NULL)",
        )?,
    })
}

/// A download or upload, for the activity feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    /// `download` or `upload`
    pub kind: String,
    pub id: String,
    pub filename: String,
    pub status: String,
    pub created_at: String,
}

pub fn recent_activity(conn: &DbConnection, limit: usize) -> Result<Vec<ActivityEntry>> {
    let mut stmt = conn.prepare(
        "SELECT 'download', id, filename, status, created_at FROM downloads
         UNION ALL
         SELECT 'upload', id, filename, status, created_at FROM uploads
         ORDER BY 5 DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        Ok(ActivityEntry {
            kind: row.get(0)?,
            id: row.get(1)?,
            filename: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    rows.collect()
}

pub fn get_setting(conn: &DbConnection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
        .optional()
}

pub fn set_setting(conn: &DbConnection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, ts(&Utc::now())],
    )?;
    Ok(())
}

pub fn all_settings(conn: &DbConnection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// Wipe downloads, uploads and engine statistics. Settings are kept.
pub fn clear_all(conn: &DbConnection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
         DELETE FROM downloads;
         DELETE FROM uploads;
         DELETE FROM engine_stats;
         COMMIT;",
    )?;
    log::warn!("Database cleared");
    Ok(())
}
