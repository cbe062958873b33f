//! File manager: locks, safe deletion, analysis, thumbnails and cleanup.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};
use tokio::process::Command;

use crate::core::config;
use crate::core::disk::{get_disk_space, DiskSpaceInfo};
use crate::core::error::{AppError, AppResult};
use crate::core::platform::{detect_file_type, extension_of, FileType};
use crate::core::process::{run_with_timeout, FFMPEG_TIMEOUT, FFPROBE_TIMEOUT};

/// Directories the file manager works in.
#[derive(Debug, Clone)]
pub struct FileDirs {
    pub downloads: PathBuf,
    pub uploads: PathBuf,
    pub temp: PathBuf,
}

impl FileDirs {
    pub fn from_config() -> Self {
        Self {
            downloads: config::DOWNLOADS_DIR.clone(),
            uploads: config::UPLOADS_DIR.clone(),
            temp: config::TEMP_DIR.clone(),
        }
    }
}

/// Media details reported by ffprobe.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaInfo {
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub bitrate: Option<u64>,
    pub format_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileAnalysis {
    pub filepath: String,
    pub filename: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub extension: Option<String>,
    pub file_type: FileType,
    pub sha256: String,
    pub media: Option<MediaInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirInfo {
    pub path: String,
    pub size: u64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub downloads: DirInfo,
    pub uploads: DirInfo,
    pub temp: DirInfo,
    pub locked_files: usize,
    pub disk: Option<DiskSpaceInfo>,
}

/// A file listed for the web API.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub file_type: FileType,
    /// `downloads` or `uploads`
    pub location: String,
}

/// Thread-safe file manager shared by the download manager, uploader and API.
pub struct FileManager {
    dirs: FileDirs,
    lock_ttl: Duration,
    locks: Mutex<HashMap<PathBuf, Instant>>,
}

fn modified_utc(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

impl FileManager {
    pub fn new(dirs: FileDirs) -> Self {
        Self::with_lock_ttl(dirs, config::cleanup::lock_ttl())
    }

    pub fn with_lock_ttl(dirs: FileDirs, lock_ttl: Duration) -> Self {
        Self {
            dirs,
            lock_ttl,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dirs(&self) -> &FileDirs {
        &self.dirs
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<PathBuf, Instant>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Protect a file from deletion while it is being processed.
    pub fn lock(&self, path: &Path) {
        self.locks().insert(path.to_path_buf(), Instant::now());
        log::debug!("Locked file: {}", path.display());
    }

    pub fn unlock(&self, path: &Path) {
        if self.locks().remove(path).is_some() {
            log::debug!("Unlocked file: {}", path.display());
        }
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.locks().contains_key(path)
    }

    pub fn locked_count(&self) -> usize {
        self.locks().len()
    }

    /// Delete a file unless it is locked. `force` ignores the lock.
    ///
    /// Returns true when a file was removed.
    pub fn safe_delete(&self, path: &Path, force: bool) -> bool {
        if !force && self.is_locked(path) {
            log::warn!("File is locked, cannot delete: {}", path.display());
            return false;
        }
        if !path.exists() {
            self.unlock(path);
            return false;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {
                self.unlock(path);
                log::info!("Deleted file: {}", path.display());
                true
            }
            Err(e) => {
                log::error!("Failed to delete file {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Drop locks older than the TTL. Returns how many were removed.
    pub fn cleanup_expired_locks(&self) -> usize {
        let ttl = self.lock_ttl;
        let mut locks = self.locks();
        let before = locks.len();
        locks.retain(|_, locked_at| locked_at.elapsed() < ttl);
        let removed = before - locks.len();
        if removed > 0 {
            log::info!("Cleaned up {} expired file locks", removed);
        }
        removed
    }

    /// Remove unlocked temp files older than `max_age`. Returns how many were removed.
    pub fn cleanup_temp_files(&self, max_age: Duration) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.dirs.temp) else {
            return 0;
        };
        let now = SystemTime::now();
        let mut cleaned = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() || self.is_locked(&path) {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age >= max_age && std::fs::remove_file(&path).is_ok() {
                cleaned += 1;
            }
        }
        log::info!("Cleaned up {} temporary files", cleaned);
        cleaned
    }

    /// Full analysis: metadata, SHA-256 and ffprobe details for media.
    pub async fn analyze_file(&self, path: &Path) -> AppResult<FileAnalysis> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| AppError::NotFound(format!("File not found: {}", path.display())))?;

        self.lock(path);
        let result = self.analyze_locked(path, &meta).await;
        self.unlock(path);
        result
    }

    async fn analyze_locked(&self, path: &Path, meta: &std::fs::Metadata) -> AppResult<FileAnalysis> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_type = detect_file_type(&filename);

        let hash_path = path.to_path_buf();
        let sha256 = tokio::task::spawn_blocking(move || file_sha256(&hash_path))
            .await
            .map_err(|e| AppError::Validation(format!("Hash task failed: {}", e)))??;

        let media = if file_type.is_media() {
            probe_media(path).await
        } else {
            None
        };

        Ok(FileAnalysis {
            filepath: path.to_string_lossy().into_owned(),
            extension: extension_of(&filename),
            filename,
            size: meta.len(),
            modified: modified_utc(meta),
            file_type,
            sha256,
            media,
        })
    }

    /// Render a 320x240 JPEG thumbnail into the temp dir for images and videos.
    pub async fn generate_thumbnail(&self, path: &Path) -> Option<PathBuf> {
        let file_type = detect_file_type(&path.to_string_lossy());
        let scale = "scale=320:240:force_original_aspect_ratio=decrease";
        let filter = match file_type {
            FileType::Video => format!("thumbnail,{}", scale),
            FileType::Image => scale.to_string(),
            _ => return None,
        };

        let stem = path.file_stem()?.to_string_lossy().into_owned();
        if std::fs::create_dir_all(&self.dirs.temp).is_err() {
            return None;
        }
        let thumb = self.dirs.temp.join(format!("{}_thumb.jpg", stem));

        self.lock(path);
        let mut cmd = Command::new(&*config::FFMPEG_BIN);
        cmd.arg("-i")
            .arg(path)
            .args(["-vf", &filter, "-frames:v", "1", "-y"])
            .arg(&thumb);
        let output = run_with_timeout(&mut cmd, FFMPEG_TIMEOUT).await;
        self.unlock(path);

        match output {
            Ok(out) if out.status.success() && thumb.exists() => Some(thumb),
            Ok(out) => {
                log::error!(
                    "ffmpeg thumbnail generation failed: {}",
                    String::from_utf8_lossy(&out.stderr).lines().last().unwrap_or_default()
                );
                None
            }
            Err(e) => {
                log::error!("Thumbnail generation failed: {}", e);
                None
            }
        }
    }

    fn dir_info(dir: &Path) -> DirInfo {
        DirInfo {
            path: dir.to_string_lossy().into_owned(),
            size: directory_size(dir),
            count: std::fs::read_dir(dir)
                .map(|entries| entries.flatten().filter(|e| e.path().is_file()).count())
                .unwrap_or(0),
        }
    }

    pub fn storage_info(&self) -> StorageInfo {
        StorageInfo {
            downloads: Self::dir_info(&self.dirs.downloads),
            uploads: Self::dir_info(&self.dirs.uploads),
            temp: Self::dir_info(&self.dirs.temp),
            locked_files: self.locked_count(),
            disk: get_disk_space(&self.dirs.downloads).ok(),
        }
    }

    fn list_dir(dir: &Path, location: &str) -> Vec<FileEntry> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                Some(FileEntry {
                    file_type: detect_file_type(&name),
                    path: entry.path().to_string_lossy().into_owned(),
                    size: meta.len(),
                    modified: modified_utc(&meta),
                    location: location.to_string(),
                    name,
                })
            })
            .collect()
    }

    /// Downloaded and uploaded files, newest first.
    pub fn list_files(&self) -> Vec<FileEntry> {
        let mut files = Self::list_dir(&self.dirs.downloads, "downloads");
        files.extend(Self::list_dir(&self.dirs.uploads, "uploads"));
        files.sort_by(|a, b| b.modified.cmp(&a.modified));
        files
    }
}

/// Total size of all files below `dir`. Unreadable entries are skipped.
pub fn directory_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.metadata() {
            Ok(meta) if meta.is_dir() => directory_size(&entry.path()),
            Ok(meta) => meta.len(),
            Err(_) => 0,
        })
        .sum()
}

/// Hex SHA-256 of a file, read in 64 KiB chunks.
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

async fn probe_media(path: &Path) -> Option<MediaInfo> {
    let mut cmd = Command::new(&*config::FFPROBE_BIN);
    cmd.args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path);
    let output = run_with_timeout(&mut cmd, FFPROBE_TIMEOUT).await.ok()?;
    if !output.status.success() {
        return None;
    }
    parse_ffprobe_json(&String::from_utf8_lossy(&output.stdout))
}

/// Extract the interesting bits of `ffprobe -print_format json` output.
pub fn parse_ffprobe_json(raw: &str) -> Option<MediaInfo> {
    let json: serde_json::Value = serde_json::from_str(raw).ok()?;
    let format = json.get("format");
    let streams = json.get("streams").and_then(|s| s.as_array()).cloned().unwrap_or_default();

    let stream_of = |kind: &str| {
        streams
            .iter()
            .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some(kind))
            .cloned()
    };
    let video = stream_of("video");
    let audio = stream_of("audio");

    let as_f64 = |v: Option<&serde_json::Value>| v.and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok());

    Some(MediaInfo {
        duration_secs: as_f64(format.and_then(|f| f.get("duration"))),
        width: video
            .as_ref()
            .and_then(|v| v.get("width"))
            .and_then(|w| w.as_u64())
            .map(|w| w as u32),
        height: video
            .as_ref()
            .and_then(|v| v.get("height"))
            .and_then(|h| h.as_u64())
            .map(|h| h as u32),
        video_codec: video
            .as_ref()
            .and_then(|v| v.get("codec_name"))
            .and_then(|c| c.as_str())
            .map(String::from),
        audio_codec: audio
            .as_ref()
            .and_then(|a| a.get("codec_name"))
            .and_then(|c| c.as_str())
            .map(String::from),
        bitrate: as_f64(format.and_then(|f| f.get("bit_rate"))).map(|b| b as u64),
        format_name: format
            .and_then(|f| f.get("format_name"))
            .and_then(|n| n.as_str())
            .map(String::from),
    })
}
