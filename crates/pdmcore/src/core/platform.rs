//! Platform and file type detection

use serde::{Deserialize, Serialize};
use std::path::Path;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use url::Url;

/// Default yt-dlp format selector: best single file under 4 GB.
pub const DEFAULT_FORMAT_SELECTOR: &str = "best[filesize<4G]/best";

/// Streaming platforms handled by yt-dlp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    Instagram,
    Twitter,
    TikTok,
    Facebook,
    SoundCloud,
    Vimeo,
    Reddit,
    Pinterest,
    Twitch,
    Dailymotion,
}

impl Platform {
    pub fn domains(self) -> &'static [&'static str] {
        match self {
            Platform::YouTube => &["youtube.com", "youtu.be", "music.youtube.com"],
            Platform::Instagram => &["instagram.com", "instagr.am"],
            Platform::Twitter => &["twitter.com", "x.com", "t.co"],
            Platform::TikTok => &["tiktok.com"],
            Platform::Facebook => &["facebook.com", "fb.watch", "fb.com"],
            Platform::SoundCloud => &["soundcloud.com"],
            Platform::Vimeo => &["vimeo.com"],
            Platform::Reddit => &["reddit.com", "redd.it"],
            Platform::Pinterest => &["pinterest.com", "pin.it"],
            Platform::Twitch => &["twitch.tv"],
            Platform::Dailymotion => &["dailymotion.com", "dai.ly"],
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Platform::YouTube => "🔴",
            Platform::Instagram => "📷",
            Platform::Twitter => "🐦",
            Platform::TikTok => "🎬",
            Platform::Facebook => "📘",
            Platform::SoundCloud => "🎧",
            Platform::Vimeo => "🎞",
            Platform::Reddit => "👽",
            Platform::Pinterest => "📌",
            Platform::Twitch => "🟣",
            Platform::Dailymotion => "📺",
        }
    }

    /// yt-dlp `--format` selector for this platform.
    pub fn format_selector(self) -> &'static str {
        match self {
            Platform::Instagram | Platform::TikTok | Platform::Twitter => "best",
            _ => DEFAULT_FORMAT_SELECTOR,
        }
    }

    /// Whether downloads from this platform default to audio extraction.
    pub fn extracts_audio(self) -> bool {
        matches!(self, Platform::SoundCloud)
    }

    fn matches_host(self, host: &str) -> bool {
        self.domains()
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
    }
}

/// Detect the streaming platform a URL belongs to.
///
/// Matches the host exactly or as a subdomain, so `m.youtube.com` is YouTube
/// but `notyoutube.com` is not.
pub fn detect_platform(url: &str) -> Option<Platform> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Platform::iter().find(|p| p.matches_host(&host))
}

/// Broad file categories used for upload method and thumbnail decisions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Video,
    Audio,
    Image,
    Document,
    Archive,
    #[default]
    Other,
}

impl FileType {
    pub fn emoji(self) -> &'static str {
        match self {
            FileType::Video => "🎬",
            FileType::Audio => "🎵",
            FileType::Image => "🖼",
            FileType::Document => "📄",
            FileType::Archive => "📦",
            FileType::Other => "📁",
        }
    }

    pub fn is_media(self) -> bool {
        matches!(self, FileType::Video | FileType::Audio)
    }
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "webm", "flv", "m4v", "wmv", "3gp", "ts"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a", "opus", "wma"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "svg", "tiff"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt", "xls", "xlsx", "ppt", "pptx", "epub", "md"];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"];

/// Executable and installer extensions that are never accepted as uploads.
pub const BLOCKED_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "scr", "pif", "vbs", "js", "jar", "com", "app", "deb", "rpm",
];

/// Characters never allowed in a user supplied filename.
const UNSAFE_FILENAME_PATTERNS: &[&str] = &["..", "/", "\\", "<", ">", "|", ":", "*", "?", "\""];

/// Lowercased extension of a file name, without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Classify a file by its extension.
pub fn detect_file_type(name: &str) -> FileType {
    let Some(ext) = extension_of(name) else {
        return FileType::Other;
    };
    let ext = ext.as_str();
    if VIDEO_EXTENSIONS.contains(&ext) {
        FileType::Video
    } else if AUDIO_EXTENSIONS.contains(&ext) {
        FileType::Audio
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        FileType::Image
    } else if DOCUMENT_EXTENSIONS.contains(&ext) {
        FileType::Document
    } else if ARCHIVE_EXTENSIONS.contains(&ext) {
        FileType::Archive
    } else {
        FileType::Other
    }
}

pub fn is_blocked_extension(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| BLOCKED_EXTENSIONS.contains(&ext.as_str()))
}

/// True when the name has no traversal sequence, separator or reserved character.
pub fn is_safe_filename(name: &str) -> bool {
    !name.trim().is_empty() && !UNSAFE_FILENAME_PATTERNS.iter().any(|p| name.contains(p))
}
