//! Pluggable download engines.
//!
//! Every engine implements [`DownloadEngine`]. The [`EngineManager`] probes
//! which engines are usable on this host and hands out the ones that accept
//! a URL, highest priority first.
//!
//! Built-in engines:
//! - `yt-dlp`: streaming platforms (YouTube, TikTok, SoundCloud, ...)
//! - `aria2`: segmented direct downloads via aria2c
//! - `http`: direct downloads over reqwest with Range resume
//! - `wget` / `curl`: last-resort direct downloads

pub mod aria2;
pub mod curl;
pub mod http;
pub mod wget;
pub mod ytdlp;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::config::engines::EngineSettings;
use crate::core::error::AppError;
use crate::core::platform::{detect_platform, Platform};
use crate::core::process::{run_streaming, StreamOutcome};
use crate::download::error::DownloadError;

/// Progress reported by an engine while it runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineProgress {
    /// 0..=100
    pub percent: f64,
    /// Bytes per second
    pub speed: Option<f64>,
    pub downloaded: Option<u64>,
    pub total: Option<u64>,
}

pub type ProgressSender = mpsc::UnboundedSender<EngineProgress>;

/// What to download and where.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub url: String,
    /// Requested output path. yt-dlp may change the extension.
    pub filepath: PathBuf,
    pub platform: Option<Platform>,
    /// yt-dlp format selector
    pub quality: String,
    pub extract_audio: bool,
    pub cancel: CancellationToken,
}

impl EngineRequest {
    pub fn new(url: &str, filepath: PathBuf) -> Self {
        let platform = detect_platform(url);
        Self {
            url: url.to_string(),
            filepath,
            platform,
            quality: platform.map_or(crate::core::platform::DEFAULT_FORMAT_SELECTOR, Platform::format_selector).to_string(),
            extract_audio: platform.is_some_and(Platform::extracts_audio),
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of a successful engine run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    /// Where the file actually ended up
    pub filepath: PathBuf,
    pub size: u64,
}

/// A download backend.
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Short name used in logs, statistics and the API ("yt-dlp", "http", ...)
    fn name(&self) -> &str;

    fn settings(&self) -> &EngineSettings;

    /// Whether the engine can run on this host (binary present, etc.)
    async fn is_available(&self) -> bool;

    /// Whether the engine accepts this URL.
    fn can_handle(&self, _url: &str) -> bool {
        true
    }

    /// Download `request.url` to `request.filepath`, reporting progress.
    ///
    /// Must return [`DownloadError::Cancelled`] once `request.cancel` fires.
    async fn download(&self, request: &EngineRequest, progress: ProgressSender) -> Result<EngineOutput, DownloadError>;
}

/// Direct-download engines leave streaming platforms to yt-dlp.
pub fn is_direct_url(url: &str) -> bool {
    detect_platform(url).is_none()
}

/// Build the engine named in `settings`, if it is a known one.
pub fn build_engine(settings: EngineSettings) -> Option<Arc<dyn DownloadEngine>> {
    let engine: Arc<dyn DownloadEngine> = match settings.name.as_str() {
        "yt-dlp" => Arc::new(ytdlp::YtDlpEngine::new(settings)),
        "aria2" => Arc::new(aria2::Aria2Engine::new(settings)),
        "http" => Arc::new(http::HttpEngine::new(settings)),
        "wget" => Arc::new(wget::WgetEngine::new(settings)),
        "curl" => Arc::new(curl::CurlEngine::new(settings)),
        other => {
            log::warn!("Unknown download engine '{}' in configuration, skipping", other);
            return None;
        }
    };
    Some(engine)
}

/// Run an external tool, feeding parsed progress into `progress`.
///
/// Exit code 0 is success; everything else maps to a [`DownloadError`].
pub(crate) async fn run_tool<P>(
    tool: &str,
    cmd: Command,
    timeout: Duration,
    cancel: &CancellationToken,
    progress: &ProgressSender,
    parse: P,
) -> Result<(), DownloadError>
where
    P: Fn(&str) -> Option<EngineProgress>,
{
    let result = run_streaming(cmd, timeout, cancel, |line| {
        if let Some(update) = parse(line) {
            let _ = progress.send(update);
        }
    })
    .await
    .map_err(|e| match e {
        AppError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            DownloadError::ToolMissing(format!("{} is not installed", tool))
        }
        AppError::Io(io) => DownloadError::ToolMissing(format!("failed to start {}: {}", tool, io)),
        other => DownloadError::Other(other.to_string()),
    })?;

    match result.outcome {
        StreamOutcome::Exited(status) if status.success() => Ok(()),
        StreamOutcome::Exited(status) => {
            let code = status.code().map_or_else(|| "signal".to_string(), |c| c.to_string());
            let hint = result.error_hint().unwrap_or_default();
            Err(DownloadError::Process(format!("{} failed (code {}): {}", tool, code, hint)))
        }
        StreamOutcome::TimedOut => Err(DownloadError::Timeout(format!(
            "{} timed out after {}s",
            tool,
            timeout.as_secs()
        ))),
        StreamOutcome::Cancelled => Err(DownloadError::Cancelled),
    }
}

/// Check that an engine really produced a non-empty file.
pub(crate) async fn finish_file(path: &Path) -> Result<EngineOutput, DownloadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(EngineOutput {
            filepath: path.to_path_buf(),
            size: meta.len(),
        }),
        Ok(_) => Err(DownloadError::FileNotFound(format!("{} is empty", path.display()))),
        Err(_) => Err(DownloadError::FileNotFound(format!("{} was not created", path.display()))),
    }
}

/// Parse sizes like `10.00MiB`, `~1.5GiB`, `512K`, `2.3MB` or `900B` into bytes.
pub fn parse_size(raw: &str) -> Option<u64> {
    let raw = raw.trim().trim_start_matches('~').trim_end_matches("/s");
    let split = raw.find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))?;
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.replace(',', "").parse().ok()?;
    let multiplier: f64 = match unit {
        "B" => 1.0,
        "K" | "k" | "KB" | "kB" | "KiB" => 1024.0,
        "M" | "MB" | "MiB" => 1024.0 * 1024.0,
        "G" | "GB" | "GiB" => 1024.0 * 1024.0 * 1024.0,
        "T" | "TB" | "TiB" => 1024.0_f64.powi(4),
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

/// Parse a speed like `500.00KiB/s` or `1.2M` into bytes per second.
pub fn parse_speed(raw: &str) -> Option<f64> {
    parse_size(raw).map(|b| b as f64)
}

/// First `NN.N%` in the line, clamped to 0..=100.
pub fn find_percent(line: &str) -> Option<f64> {
    for (idx, _) in line.match_indices('%') {
        let head = &line[..idx];
        let start = head
            .rfind(|c: char| !(c.is_ascii_digit() || c == '.'))
            .map_or(0, |i| i + 1);
        if let Ok(value) = head[start..].parse::<f64>() {
            return Some(value.clamp(0.0, 100.0));
        }
    }
    None
}

/// Available engines, sorted by priority.
#[derive(Clone, Default)]
pub struct EngineManager {
    engines: Vec<Arc<dyn DownloadEngine>>,
}

impl EngineManager {
    /// Build every enabled engine and keep the ones that are available here.
    pub async fn detect(settings: &[EngineSettings]) -> Self {
        let mut engines = Vec::new();
        for setting in settings.iter().filter(|s| s.enabled) {
            let Some(engine) = build_engine(setting.clone()) else {
                continue;
            };
            if engine.is_available().await {
                log::info!("Engine {} available (priority {})", engine.name(), setting.priority);
                engines.push(engine);
            } else {
                log::warn!("Engine {} not available", engine.name());
            }
        }
        Self::with_engines(engines)
    }

    /// Use the given engines as-is, without probing.
    pub fn with_engines(mut engines: Vec<Arc<dyn DownloadEngine>>) -> Self {
        engines.sort_by_key(|e| e.settings().priority);
        Self { engines }
    }

    pub fn best_engine(&self, url: &str) -> Option<Arc<dyn DownloadEngine>> {
        self.engines.iter().find(|e| e.can_handle(url)).cloned()
    }

    pub fn compatible_engines(&self, url: &str) -> Vec<Arc<dyn DownloadEngine>> {
        self.engines.iter().filter(|e| e.can_handle(url)).cloned().collect()
    }

    pub fn available_names(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl std::fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineManager")
            .field("engines", &self.available_names())
            .finish()
    }
}
