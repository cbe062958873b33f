//! curl engine.

use async_trait::async_trait;
use tokio::process::Command;

use super::{find_percent, finish_file, is_direct_url, run_tool, DownloadEngine, EngineOutput, EngineProgress, EngineRequest, ProgressSender};
use crate::core::config;
use crate::core::config::engines::EngineSettings;
use crate::core::process::probe_version;
use crate::download::error::DownloadError;

const BIN: &str = "curl";

pub struct CurlEngine {
    settings: EngineSettings,
}

impl CurlEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    fn build_args(&self, request: &EngineRequest) -> Vec<String> {
        let mut args = vec![
            "--location".to_string(),
            "--fail".to_string(),
            "--continue-at".to_string(),
            "-".to_string(),
            "--max-time".to_string(),
            self.settings.timeout.as_secs().to_string(),
            "--retry".to_string(),
            self.settings.max_retries.to_string(),
            "--retry-delay".to_string(),
            "3".to_string(),
            "--user-agent".to_string(),
            config::download::USER_AGENT.to_string(),
            "--output".to_string(),
            request.filepath.to_string_lossy().into_owned(),
            "--progress-bar".to_string(),
        ];
        if *config::download::ALLOW_INSECURE_TLS {
            args.push("--insecure".to_string());
        }
        args.push(request.url.clone());
        args
    }
}

/// Parse a `--progress-bar` line such as `######          45.2%`.
pub fn parse_progress(line: &str) -> Option<EngineProgress> {
    let line = line.trim();
    if !line.ends_with('%') {
        return None;
    }
    Some(EngineProgress {
        percent: find_percent(line)?,
        ..EngineProgress::default()
    })
}

#[async_trait]
impl DownloadEngine for CurlEngine {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_progress_bar() {
        assert_eq!(parse_progress("########                 12.5%").map(|p| p.percent), Some(12.5));
        assert_eq!(parse_progress("                          0.0%").map(|p| p.percent), Some(0.0));
        assert!(parse_progress("curl: (22) The requested URL returned error: 404").is_none());
    }

    #[test]
    fn test_args_resume_and_retry() {
        let engine = CurlEngine::new(EngineSettings::new("curl", 5, 3600));
        let request = EngineRequest::new("https://example.com/a.zip", PathBuf::from("/tmp/a.zip"));
        let args = engine.build_args(&request);
        assert!(args.windows(2).any(|w| w[0] == "--continue-at" && w[1] == "-"));
        assert!(args.windows(2).any(|w| w[0] == "--max-time" && w[1] == "3600"));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/a.zip"));
    }
}
