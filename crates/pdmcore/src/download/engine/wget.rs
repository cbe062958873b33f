//! wget engine.

use async_trait::async_trait;
use tokio::process::Command;

use super::{find_percent, finish_file, is_direct_url, parse_speed, run_tool, DownloadEngine, EngineOutput, EngineProgress, EngineRequest, ProgressSender};
use crate::core::config;
use crate::core::config::engines::EngineSettings;
use crate::core::process::probe_version;
use crate::download::error::DownloadError;

const BIN: &str = "wget";

pub struct WgetEngine {
    settings: EngineSettings,
}

impl WgetEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    fn build_args(&self, request: &EngineRequest) -> Vec<String> {
        let mut args = vec![
            "--continue".to_string(),
            format!("--tries={}", self.settings.max_retries),
            format!("--timeout={}", self.settings.timeout.as_secs()),
            format!("--user-agent={}", config::download::USER_AGENT),
            "--progress=bar:force".to_string(),
            "-O".to_string(),
            request.filepath.to_string_lossy().into_owned(),
        ];
        if *config::download::ALLOW_INSECURE_TLS {
            args.push("--no-check-certificate".to_string());
        }
        args.push(request.url.clone());
        args
    }
}

/// Parse a wget progress bar line.
///
/// Example: `file.zip   45%[=======>        ]   4.50M  1.23MB/s    eta 4s`
pub fn parse_progress(line: &str) -> Option<EngineProgress> {
    if !(line.contains('[') && line.contains(']')) {
        return None;
    }
    let percent = find_percent(line)?;
    let speed = line
        .split_whitespace()
        .find(|part| part.ends_with("/s"))
        .and_then(parse_speed);
    Some(EngineProgress {
        percent,
        speed,
        ..EngineProgress::default()
    })
}

#[async_trait]
impl DownloadEngine for WgetEngine {
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
            BIN,
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
