//! aria2c engine: segmented direct downloads.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use super::{find_percent, finish_file, is_direct_url, parse_size, parse_speed, run_tool, DownloadEngine, EngineOutput, EngineProgress, EngineRequest, ProgressSender};
use crate::core::config;
use crate::core::config::engines::EngineSettings;
use crate::core::process::probe_version;
use crate::download::error::DownloadError;

const BIN: &str = "aria2c";

pub struct Aria2Engine {
    settings: EngineSettings,
}

impl Aria2Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    fn build_args(&self, request: &EngineRequest) -> Vec<String> {
        let dir = request.filepath.parent().unwrap_or_else(|| Path::new("."));
        let out = request
            .filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut args = vec![
            format!("--dir={}", dir.display()),
            format!("--out={}", out),
            "--max-connection-per-server=16".to_string(),
            "--split=16".to_string(),
            "--min-split-size=1M".to_string(),
            "--continue=true".to_string(),
            "--allow-overwrite=true".to_string(),
            "--auto-file-renaming=false".to_string(),
            format!("--max-tries={}", self.settings.max_retries),
            "--retry-wait=3".to_string(),
            format!("--timeout={}", self.settings.timeout.as_secs()),
            "--summary-interval=1".to_string(),
            "--console-log-level=warn".to_string(),
            format!("--user-agent={}", config::download::USER_AGENT),
        ];
        if *config::download::ALLOW_INSECURE_TLS {
            args.push("--check-certificate=false".to_string());
        }
        args.push(request.url.clone());
        args
    }
}

/// Parse an aria2c summary line.
///
/// Example: `[#2089b0 1.0MiB/10MiB(10%) CN:16 DL:2.3MiB ETA:4s]`
pub fn parse_progress(line: &str) -> Option<EngineProgress> {
    if !line.contains("[#") {
        return None;
    }
    let percent = find_percent(line)?;
    let mut progress = EngineProgress {
        percent,
        ..EngineProgress::default()
    };

    for part in line.trim_matches(|c| c == '[' || c == ']').split_whitespace() {
        if let Some(speed) = part.strip_prefix("DL:") {
            progress.speed = parse_speed(speed);
        } else if let Some((done, rest)) = part.split_once('/') {
            let total = rest.split('(').next().unwrap_or_default();
            progress.downloaded = parse_size(done);
            progress.total = parse_size(total);
        }
    }
    Some(progress)
}

#[async_trait]
impl DownloadEngine for Aria2Engine {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    async fn is_available(&self) -> bool {
        probe_version(BIN, "--version", config::download::probe_timeout())
            .await
            .is_some()
    }

    fn can_handle(&self, url: &str) -> bool {
        is_direct_url(url)
    }

    async fn download(&self, request: &EngineRequest, progress: ProgressSender) -> Result<EngineOutput, DownloadError> {
        let mut cmd = Command::new(BIN);
        cmd.args(self.build_args(request));
        run_tool(
            "aria2c",
            cmd,
            config::download::process_timeout(),
            &request.cancel,
            &progress,
            parse_progress,
        )
        .await?;
        finish_file(&request.filepath).await
    }
}
