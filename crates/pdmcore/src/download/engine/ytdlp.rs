//! yt-dlp engine for streaming platforms.
//!
//! yt-dlp writes into a per-download staging directory next to the target
//! file. After a successful run the largest produced file is moved to
//! `<dir>/<stem>.<real ext>` and the staging directory is removed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::{find_percent, finish_file, parse_size, parse_speed, run_tool, DownloadEngine, EngineOutput, EngineProgress, EngineRequest, ProgressSender};
use crate::core::config;
use crate::core::config::engines::EngineSettings;
use crate::core::platform::detect_platform;
use crate::core::process::probe_version;
use crate::download::error::DownloadError;
use crate::download::naming::unique_filepath;

pub struct YtDlpEngine {
    settings: EngineSettings,
    bin: String,
}

impl YtDlpEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_binary(settings, config::YTDL_BIN.as_str())
    }

    pub fn with_binary(settings: EngineSettings, bin: &str) -> Self {
        Self {
            settings,
            bin: bin.to_string(),
        }
    }

    fn build_args(&self, request: &EngineRequest, output_template: &Path) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--newline".to_string(),
            "--no-warnings".to_string(),
            "--format".to_string(),
            request.quality.clone(),
            "--output".to_string(),
            output_template.to_string_lossy().into_owned(),
            "--retries".to_string(),
            self.settings.max_retries.to_string(),
            "--socket-timeout".to_string(),
            self.settings.timeout.as_secs().to_string(),
        ];
        if request.extract_audio {
            args.extend(["--extract-audio", "--audio-format", "mp3", "--audio-quality", "0"].map(String::from));
        }
        if *config::download::ALLOW_INSECURE_TLS {
            args.push("--no-check-certificate".to_string());
        }
        args.push(request.url.clone());
        args
    }
}

/// Staging directory for one download: `<dir>/.<stem>.yt-dlp`.
pub fn staging_dir(target: &Path) -> PathBuf {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    dir.join(format!(".{}.yt-dlp", stem))
}

/// Largest finished file in `dir`, ignoring yt-dlp's partial files.
pub fn pick_largest(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            !(name.ends_with(".part") || name.ends_with(".ytdl") || name.contains(".part-Frag"))
        })
        .filter_map(|entry| entry.metadata().ok().map(|m| (m.len(), entry.path())))
        .max_by_key(|(len, _)| *len)
        .map(|(_, path)| path)
}

/// Parse a yt-dlp progress line.
///
/// Example: `[download]  45.2% of ~10.00MiB at 500.00KiB/s ETA 00:10`
pub fn parse_progress(line: &str) -> Option<EngineProgress> {
    if !line.contains("[download]") {
        return None;
    }
    let percent = find_percent(line)?;

    let parts: Vec<&str> = line.split_whitespace().collect();
    let mut total = None;
    let mut speed = None;
    for (i, part) in parts.iter().enumerate() {
        match *part {
            "of" => {
                let next = parts.get(i + 1).copied();
                let value = if next == Some("~") { parts.get(i + 2).copied() } else { next };
                total = value.and_then(parse_size);
            }
            "at" => speed = parts.get(i + 1).and_then(|s| parse_speed(s)),
            _ => {}
        }
    }

    Some(EngineProgress {
        percent,
        speed,
        downloaded: total.map(|t| (t as f64 * percent / 100.0) as u64),
        total,
    })
}

#[async_trait]
impl DownloadEngine for YtDlpEngine {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn is_available(&self) -> bool {
        probe_version(&self.bin, "--version", config::download::probe_timeout())
            .await
            .is_some()
    }

    fn can_handle(&self, url: &str) -> bool {
        detect_platform(url).is_some()
    }

    async fn download(&self, request: &EngineRequest, progress: ProgressSender) -> Result<EngineOutput, DownloadError> {
        let staging = staging_dir(&request.filepath);
        tokio::fs::create_dir_all(&staging).await?;

        let args = self.build_args(request, &staging.join("%(title).150B.%(ext)s"));
        log::info!("yt-dlp {} -> {}", request.url, staging.display());

        let mut cmd = Command::new(&self.bin);
        cmd.args(&args);
        let run = run_tool(
            "yt-dlp",
            cmd,
            config::download::process_timeout(),
            &request.cancel,
            &progress,
            parse_progress,
        )
        .await;

        if let Err(e) = run {
            // Paused downloads keep the staging dir so yt-dlp can resume.
            if !e.is_cancelled() {
                let _ = tokio::fs::remove_dir_all(&staging).await;
            }
            return Err(e);
        }

        let Some(produced) = pick_largest(&staging) else {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(DownloadError::FileNotFound("yt-dlp finished but produced no file".into()));
        };

        let dir = request.filepath.parent().unwrap_or_else(|| Path::new("."));
        let stem = request
            .filepath
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        let name = match produced.extension() {
            Some(ext) => format!("{}.{}", stem, ext.to_string_lossy()),
            None => stem,
        };
        let target = if dir.join(&name) == request.filepath {
            request.filepath.clone()
        } else {
            unique_filepath(dir, &name)
        };

        tokio::fs::rename(&produced, &target).await?;
        let _ = tokio::fs::remove_dir_all(&staging).await;
        finish_file(&target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_progress_full_line() {
        let p = parse_progress("[download]  45.0% of 10.00MiB at 512.00KiB/s ETA 00:10").unwrap();
        assert_eq!(p.percent, 45.0);
        assert_eq!(p.total, Some(10 * 1024 * 1024));
        assert_eq!(p.speed, Some(512.0 * 1024.0));
        assert_eq!(p.downloaded, Some(4_718_592));
    }

    #[test]
    fn test_parse_progress_estimated_size() {
        let p = parse_progress("[download]   3.1% of ~ 1.00GiB at  2.00MiB/s ETA 08:12").unwrap();
        assert_eq!(p.total, Some(1024 * 1024 * 1024));
        assert_eq!(p.speed, Some(2.0 * 1024.0 * 1024.0));
    }

    #[test]
    fn test_parse_progress_ignores_other_lines() {
        assert!(parse_progress("[download] Destination: clip.webm").is_none());
        assert!(parse_progress("[youtube] abc: Downloading webpage").is_none());
    }

    #[test]
    fn test_staging_dir_is_hidden_sibling() {
        let dir = staging_dir(Path::new("/data/downloads/youtube_ab12.mp4"));
        assert_eq!(dir, PathBuf::from("/data/downloads/.youtube_ab12.yt-dlp"));
    }

    #[test]
    fn test_pick_largest_skips_partials() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("clip.webm"), vec![0u8; 100]).unwrap();
        fs::write(tmp.path().join("clip.jpg"), vec![0u8; 10]).unwrap();
        fs::write(tmp.path().join("other.webm.part"), vec![0u8; 1000]).unwrap();
        assert_eq!(pick_largest(tmp.path()), Some(tmp.path().join("clip.webm")));
    }

    #[test]
    fn test_args_include_audio_extraction() {
        let engine = YtDlpEngine::with_binary(EngineSettings::new("yt-dlp", 1, 60), "yt-dlp");
        let request = EngineRequest::new("https://soundcloud.com/a/b", PathBuf::from("/tmp/sc.mp4"));
        let args = engine.build_args(&request, Path::new("/tmp/.sc.yt-dlp/%(title)s.%(ext)s"));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"--extract-audio".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://soundcloud.com/a/b"));
    }
}
