//! SQLite persistence against a scratch database file.
//!
//! Run with: cargo test -p pdmcore --test db

use chrono::{Duration, Utc};
use pdmcore::core::platform::{FileType, Platform};
use pdmcore::download::{DownloadRecord, DownloadStatus};
use pdmcore::storage::db::{self, EngineAttempt, TelegramInfo, UploadRecord};
use pdmcore::{create_pool, get_connection, DbPool};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn pool() -> (TempDir, DbPool) {
    let tmp = TempDir::new().unwrap();
    let pool = create_pool(&tmp.path().join("pdm.sqlite")).unwrap();
    (tmp, pool)
}

fn download(id: &str, status: DownloadStatus, minutes_ago: i64) -> DownloadRecord {
    let mut record = DownloadRecord::new(
        id.to_string(),
        format!("https://example.com/{}.zip", id),
        format!("{}.zip", id),
        format!("/data/downloads/{}.zip", id),
    );
    record.status = status;
    record.created_at = Utc::now() - Duration::minutes(minutes_ago);
    record
}

fn upload(id: &str, minutes_ago: i64) -> UploadRecord {
    UploadRecord {
        id: id.to_string(),
        filename: format!("{}.jpg", id),
        filepath: format!("/data/uploads/{}.jpg", id),
        file_type: FileType::Image,
        size: 2048,
        description: "holiday".to_string(),
        tags: "beach".to_string(),
        status: "uploaded".to_string(),
        created_at: Utc::now() - Duration::minutes(minutes_ago),
        telegram_file_id: None,
        telegram_file_unique_id: None,
        telegram_message_id: None,
        share_link: None,
        error_message: None,
    }
}

#[test]
fn download_round_trip_keeps_every_field() {
    let (_tmp, pool) = pool();
    let conn = get_connection(&pool).unwrap();

    let mut record = download("a1", DownloadStatus::Completed, 0);
    record.platform = Some(Platform::YouTube);
    record.engine = Some("yt-dlp".to_string());
    record.size = 10_000;
    record.downloaded = 10_000;
    record.progress = 100.0;
    record.eta = Some(3);
    record.started_at = Some(Utc::now());
    record.error_message = Some("first engine failed".to_string());
    record.retry_count = 2;
    db::save_download(&conn, &record).unwrap();

    let loaded = db::get_download(&conn, "a1").unwrap().unwrap();
    assert_eq!(loaded.platform, Some(Platform::YouTube));
    assert_eq!(loaded.status, DownloadStatus::Completed);
    assert_eq!(loaded.engine.as_deref(), Some("yt-dlp"));
    assert_eq!(loaded.size, 10_000);
    assert_eq!(loaded.eta, Some(3));
    assert_eq!(loaded.retry_count, 2);
    assert_eq!(loaded.file_type, FileType::Archive);
    assert_eq!(loaded.created_at.timestamp(), record.created_at.timestamp());

    record.status = DownloadStatus::Error;
    db::save_download(&conn, &record).unwrap();
    assert_eq!(db::get_download(&conn, "a1").unwrap().unwrap().status, DownloadStatus::Error);
    assert!(db::get_download(&conn, "missing").unwrap().is_none());
}

#[test]
fn list_downloads_filters_and_orders_newest_first() {
    let (_tmp, pool) = pool();
    let conn = get_connection(&pool).unwrap();
    db::save_download(&conn, &download("old", DownloadStatus::Completed, 30)).unwrap();
    db::save_download(&conn, &download("new", DownloadStatus::Completed, 1)).unwrap();
    db::save_download(&conn, &download("busy", DownloadStatus::Downloading, 5)).unwrap();

    let all: Vec<String> = db::list_downloads(&conn, None, 10)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(all, vec!["new", "busy", "old"]);

    let completed = db::list_downloads(&conn, Some(DownloadStatus::Completed), 1).unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, "new");

    assert!(db::delete_download(&conn, "old").unwrap());
    assert!(!db::delete_download(&conn, "old").unwrap());
}

#[test]
fn telegram_info_lands_on_the_right_table() {
    let (_tmp, pool) = pool();
    let conn = get_connection(&pool).unwrap();
    db::save_download(&conn, &download("d1", DownloadStatus::Completed, 0)).unwrap();
    db::save_upload(&conn, &upload("u1", 0)).unwrap();

    let info = TelegramInfo {
        file_id: "FILE".to_string(),
        file_unique_id: "UNIQ".to_string(),
        message_id: 42,
        share_link: Some("https://t.me/c/123/42".to_string()),
    };
    assert!(db::set_telegram_info(&conn, "d1", &info).unwrap());
    assert!(db::set_telegram_info(&conn, "u1", &info).unwrap());
    assert!(!db::set_telegram_info(&conn, "nope", &info).unwrap());

    let d = db::get_download(&conn, "d1").unwrap().unwrap();
    assert_eq!(d.telegram_message_id, Some(42));
    let u = db::get_upload(&conn, "u1").unwrap().unwrap();
    assert_eq!(u.status, "sent");
    assert_eq!(u.share_link.as_deref(), Some("https://t.me/c/123/42"));

    let stats = db::get_stats(&conn).unwrap();
    assert_eq!(stats.telegram_uploads, 2);
}

#[test]
fn download_upload_failure_is_kept_until_a_later_success() {
    let (_tmp, pool) = pool();
    let conn = get_connection(&pool).unwrap();
    db::save_download(&conn, &download("d1", DownloadStatus::Completed, 0)).unwrap();

    assert!(db::set_download_telegram_error(&conn, "d1", "chat not found").unwrap());
    assert!(!db::set_download_telegram_error(&conn, "nope", "chat not found").unwrap());
    let d = db::get_download(&conn, "d1").unwrap().unwrap();
    assert_eq!(d.telegram_error.as_deref(), Some("chat not found"));
    assert_eq!(d.status, DownloadStatus::Completed);

    let info = TelegramInfo {
        file_id: "FILE".to_string(),
        file_unique_id: "UNIQ".to_string(),
        message_id: 7,
        share_link: None,
    };
    db::set_download_telegram_info(&conn, "d1", &info).unwrap();
    let d = db::get_download(&conn, "d1").unwrap().unwrap();
    assert_eq!(d.telegram_error, None);
    assert_eq!(d.telegram_message_id, Some(7));
}

#[test]
fn upload_status_and_listing() {
    let (_tmp, pool) = pool();
    let conn = get_connection(&pool).unwrap();
    db::save_upload(&conn, &upload("u1", 10)).unwrap();
    db::save_upload(&conn, &upload("u2", 1)).unwrap();

    assert!(db::set_upload_status(&conn, "u1", "failed", Some("too large")).unwrap());
    let u1 = db::get_upload(&conn, "u1").unwrap().unwrap();
    assert_eq!(u1.status, "failed");
    assert_eq!(u1.error_message.as_deref(), Some("too large"));

    let ids: Vec<String> = db::list_uploads(&conn, 10).unwrap().into_iter().map(|u| u.id).collect();
    assert_eq!(ids, vec!["u2", "u1"]);
    assert!(db::delete_upload(&conn, "u2").unwrap());
    assert_eq!(db::list_uploads(&conn, 10).unwrap().len(), 1);
}

#[test]
fn engine_performance_aggregates_attempts() {
    let (_tmp, pool) = pool();
    let conn = get_connection(&pool).unwrap();
    let attempt = |engine: &str, success: bool, secs: f64, bytes: u64| EngineAttempt {
        engine: engine.to_string(),
        download_id: Some("d1".to_string()),
        success,
        duration_secs: secs,
        bytes,
        error_category: (!success).then(|| "http".to_string()),
        error_message: None,
    };
    db::save_engine_stats(&conn, &attempt("aria2", false, 1.0, 0)).unwrap();
    db::save_engine_stats(&conn, &attempt("http", true, 2.0, 100)).unwrap();
    db::save_engine_stats(&conn, &attempt("http", true, 4.0, 300)).unwrap();
    db::save_engine_stats(&conn, &attempt("aria2", true, 3.0, 50)).unwrap();

    let perf = db::engine_performance(&conn).unwrap();
    assert_eq!(perf.len(), 2);
    assert_eq!(perf[0].engine, "http");
    assert_eq!(perf[0].attempts, 2);
    assert_eq!(perf[0].success_rate, 100.0);
    assert_eq!(perf[0].avg_duration_secs, 3.0);
    assert_eq!(perf[0].total_bytes, 400);
    assert_eq!(perf[1].engine, "aria2");
    assert_eq!(perf[1].success_rate, 50.0);
}

#[test]
fn stats_activity_and_clear() {
    let (_tmp, pool) = pool();
    let conn = get_connection(&pool).unwrap();
    let mut done = download("done", DownloadStatus::Completed, 3);
    done.size = 500;
    db::save_download(&conn, &done).unwrap();
    db::save_download(&conn, &download("bad", DownloadStatus::Error, 2)).unwrap();
    db::save_download(&conn, &download("run", DownloadStatus::Downloading, 4)).unwrap();
    db::save_upload(&conn, &upload("up", 1)).unwrap();
    db::set_setting(&conn, "theme", "dark").unwrap();

    let stats = db::get_stats(&conn).unwrap();
    assert_eq!(stats.total_downloads, 3);
    assert_eq!(stats.completed_downloads, 1);
    assert_eq!(stats.failed_downloads, 1);
    assert_eq!(stats.active_downloads, 1);
    assert_eq!(stats.total_uploads, 1);
    assert_eq!(stats.downloaded_bytes, 500);

    let activity = db::recent_activity(&conn, 2).unwrap();
    assert_eq!(activity.len(), 2);
    assert_eq!((activity[0].kind.as_str(), activity[0].id.as_str()), ("upload", "up"));
    assert_eq!(activity[1].id, "bad");

    db::clear_all(&conn).unwrap();
    assert_eq!(db::get_stats(&conn).unwrap().total_downloads, 0);
    assert_eq!(db::get_setting(&conn, "theme").unwrap().as_deref(), Some("dark"));
}

#[test]
fn settings_upsert() {
    let (_tmp, pool) = pool();
    let conn = get_connection(&pool).unwrap();
    assert!(db::get_setting(&conn, "max_workers").unwrap().is_none());
    db::set_setting(&conn, "max_workers", "5").unwrap();
    db::set_setting(&conn, "max_workers", "8").unwrap();
    db::set_setting(&conn, "auto_upload", "true").unwrap();
    assert_eq!(
        db::all_settings(&conn).unwrap(),
        vec![
            ("auto_upload".to_string(), "true".to_string()),
            ("max_workers".to_string(), "8".to_string()),
        ]
    );
}
