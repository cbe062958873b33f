//! Download records and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::core::config;
use crate::core::platform::{FileType, Platform};

/// Lifecycle of a download.
///
/// `initializing` → `downloading` → `completed` | `error`, with `paused`
/// reachable from any active state and `cancelled` removing the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Initializing,
    Downloading,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl DownloadStatus {
    /// Counts against the worker limit.
    pub fn is_active(self) -> bool {
        matches!(self, DownloadStatus::Initializing | DownloadStatus::Downloading)
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Error | DownloadStatus::Cancelled
        )
    }
}

/// One download, as kept in memory and persisted to the `downloads` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: String,
    pub url: String,
    pub filename: String,
    pub filepath: String,
    pub file_type: FileType,
    pub status: DownloadStatus,
    /// 0..=100
    pub progress: f64,
    /// Bytes per second
    pub speed: f64,
    /// Seconds remaining, when the total size is known
    pub eta: Option<u64>,
    pub size: u64,
    pub downloaded: u64,
    pub description: String,
    pub tags: String,
    pub platform: Option<Platform>,
    pub engine: Option<String>,
    pub quality: String,
    pub extract_audio: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub telegram_file_id: Option<String>,
    pub telegram_file_unique_id: Option<String>,
    pub telegram_message_id: Option<i64>,
    pub share_link: Option<String>,
    /// Last failed channel upload of this file
    pub telegram_error: Option<String>,
}

impl DownloadRecord {
    pub fn new(id: String, url: String, filename: String, filepath: String) -> Self {
        let file_type = crate::core::platform::detect_file_type(&filename);
        Self {
            id,
            url,
            filename,
            filepath,
            file_type,
            status: DownloadStatus::Initializing,
            progress: 0.0,
            speed: 0.0,
            eta: None,
            size: 0,
            downloaded: 0,
            description: String::new(),
            tags: String::new(),
            platform: None,
            engine: None,
            quality: "best".to_string(),
            extract_audio: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: config::download::MAX_RETRIES,
            telegram_file_id: None,
            telegram_file_unique_id: None,
            telegram_message_id: None,
            share_link: None,
            telegram_error: None,
        }
    }

    /// Update the stored path and derived name/type after an engine picked the real file.
    pub fn set_filepath(&mut self, path: &std::path::Path) {
        self.filepath = path.to_string_lossy().into_owned();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            self.filename = name.to_string();
            self.file_type = crate::core::platform::detect_file_type(name);
        }
    }
}

/// Caller supplied options for a new download.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    pub description: String,
    pub tags: String,
    /// yt-dlp format selector; platform default when unset
    pub quality: Option<String>,
    /// Extract mp3 audio; platform default when unset
    pub extract_audio: Option<bool>,
    /// Desired file name; derived from the URL when unset
    pub filename: Option<String>,
}

/// Aggregate numbers over the in-memory downloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DownloadStats {
    pub total: usize,
    pub downloading: usize,
    pub completed: usize,
    pub paused: usize,
    pub failed: usize,
    pub total_speed: f64,
    pub active_workers: usize,
    pub max_workers: usize,
}
