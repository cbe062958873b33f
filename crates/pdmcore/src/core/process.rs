//! Process execution utilities with timeout support
//!
//! Provides helpers for running external tools (yt-dlp, aria2c, wget, curl,
//! ffmpeg, ffprobe) with configurable timeouts so a hung process never blocks
//! a download worker.

use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::AppError;

/// Default timeout for ffmpeg operations (2 minutes)
pub const FFMPEG_TIMEOUT: Duration = Duration::from_secs(120);

/// Default timeout for ffprobe metadata queries (30 seconds)
pub const FFPROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Run an async Command with a timeout.
///
/// Returns the process Output on success, or an AppError on timeout/IO failure.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, AppError> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(AppError::Io(e)),
        Err(_) => Err(AppError::Download(format!(
            "Process timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Run `<bin> <flag>` and return the first line of output when it exits 0.
pub async fn probe_version(bin: &str, flag: &str, timeout: Duration) -> Option<String> {
    let mut cmd = Command::new(bin);
    cmd.arg(flag).stdin(Stdio::null());
    let output = run_with_timeout(&mut cmd, timeout).await.ok()?;
    if !output.status.success() {
        return None;
    }
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    Some(text.lines().next().unwrap_or_default().trim().to_string())
}

/// How a streamed process ended.
#[derive(Debug)]
pub enum StreamOutcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Last lines of output kept for error messages.
const TAIL_LINES: usize = 20;

/// Result of [`run_streaming`]: outcome plus the tail of combined output.
#[derive(Debug)]
pub struct StreamResult {
    pub outcome: StreamOutcome,
    pub tail: Vec<String>,
}

impl StreamResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, StreamOutcome::Exited(status) if status.success())
    }

    /// Most recent non-empty line that mentions an error, or the last line.
    pub fn error_hint(&self) -> Option<String> {
        self.tail
            .iter()
            .rev()
            .find(|l| l.to_lowercase().contains("error"))
            .or_else(|| self.tail.last())
            .cloned()
    }
}

async fn pump_lines<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
                    pending.clear();
                }
            } else {
                pending.push(byte);
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}

/// Run a command, feeding every output line to `on_line`.
///
/// stdout and stderr are merged and split on both `\r` and `\n`, which is how
/// yt-dlp, aria2c, wget and curl redraw their progress. The child is killed
/// when the timeout elapses or `cancel` fires.
pub async fn run_streaming<F>(
    mut cmd: Command,
    timeout: Duration,
    cancel: &CancellationToken,
    mut on_line: F,
) -> Result<StreamResult, AppError>
where
    F: FnMut(&str),
{
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_lines(stderr, tx.clone()));
    }
    drop(tx);

    let mut tail: Vec<String> = Vec::with_capacity(TAIL_LINES);
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut lines_open = true;

    let outcome = loop {
        tokio::select! {
            line = rx.recv(), if lines_open => match line {
                Some(line) => {
                    on_line(&line);
                    if tail.len() == TAIL_LINES {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
                None => lines_open = false,
            },
            status = child.wait(), if !lines_open => {
                break StreamOutcome::Exited(status?);
            }
            _ = &mut deadline => {
                let _ = child.kill().await;
                break StreamOutcome::TimedOut;
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                break StreamOutcome::Cancelled;
            }
        }
    };

    Ok(StreamResult { outcome, tail })
}
