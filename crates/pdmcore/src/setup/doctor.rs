//! Startup checks: external tools, data directories and the database.

use console::style;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::core::config;
use crate::core::process::probe_version;
use crate::storage::db::{self, DatabaseStats};
use crate::storage::{get_connection, DbPool};

/// Binaries the engines and the file manager use, with their version flag.
pub const TOOLS: &[(&str, &str)] = &[
    ("yt-dlp", "--version"),
    ("aria2c", "--version"),
    ("wget", "--version"),
    ("curl", "--version"),
    ("ffmpeg", "-version"),
    ("ffprobe", "-version"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub path: Option<String>,
    pub version: Option<String>,
}

impl ToolStatus {
    pub fn available(&self) -> bool {
        self.version.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirStatus {
    pub path: String,
    pub exists: bool,
    pub writable: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DoctorReport {
    pub tools: Vec<ToolStatus>,
    pub directories: Vec<DirStatus>,
    /// `Err` holds the connection or query failure
    pub database: Option<Result<DatabaseStats, String>>,
}

impl DoctorReport {
    pub fn missing_tools(&self) -> Vec<&str> {
        self.tools
            .iter()
            .filter(|t| !t.available())
            .map(|t| t.name.as_str())
            .collect()
    }

    pub fn healthy(&self) -> bool {
        self.directories.iter().all(|d| d.exists && d.writable)
            && !matches!(self.database, Some(Err(_)))
    }
}

/// Probe one tool: PATH lookup plus the first line of its version output.
pub async fn check_tool(name: &str, version_flag: &str) -> ToolStatus {
    let path = which::which(name).ok().map(|p| p.to_string_lossy().into_owned());
    let version = match &path {
        Some(_) => probe_version(name, version_flag, config::download::probe_timeout()).await,
        None => None,
    };
    ToolStatus {
        name: name.to_string(),
        path,
        version,
    }
}

pub fn check_dir(path: &Path) -> DirStatus {
    let exists = path.is_dir();
    let writable = exists
        && std::fs::metadata(path)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false);
    DirStatus {
        path: path.display().to_string(),
        exists,
        writable,
    }
}

pub fn check_database(pool: &DbPool) -> Result<DatabaseStats, String> {
    let conn = get_connection(pool).map_err(|e| e.to_string())?;
    db::get_stats(&conn).map_err(|e| e.to_string())
}

/// Run every check. The database section is skipped without a pool.
pub async fn run_doctor(pool: Option<&DbPool>) -> DoctorReport {
    let mut tools = Vec::with_capacity(TOOLS.len());
    for (name, flag) in TOOLS {
        tools.push(check_tool(name, flag).await);
    }
    let directories = config::data_directories().into_iter().map(check_dir).collect();
    DoctorReport {
        tools,
        directories,
        database: pool.map(check_database),
    }
}

fn mark(ok: bool) -> String {
    if ok {
        style("✓").green().to_string()
    } else {
        style("✗").red().to_string()
    }
}

/// Human readable report.
pub fn render_report<W: Write>(report: &DoctorReport, out: &mut W) -> std::io::Result<()> {
    writeln!(out, "{}", style("Tools").bold())?;
    for tool in &report.tools {
        let detail = match (&tool.version, &tool.path) {
            (Some(version), _) => version.clone(),
            (None, Some(path)) => format!("found at {} but not runnable", path),
            (None, None) => "not installed".to_string(),
        };
        writeln!(out, "  {} {:<8} {}", mark(tool.available()), tool.name, detail)?;
    }

    writeln!(out, "{}", style("Directories").bold())?;
    for dir in &report.directories {
        let detail = match (dir.exists, dir.writable) {
            (true, true) => "ok",
            (true, false) => "read-only",
            _ => "missing",
        };
        writeln!(out, "  {} {} ({})", mark(dir.exists && dir.writable), dir.path, detail)?;
    }

    if let Some(database) = &report.database {
        writeln!(out, "{}", style("Database").bold())?;
        match database {
            Ok(stats) => writeln!(
                out,
                "  {} {} downloads ({} completed, {} failed), {} uploads",
                mark(true),
                stats.total_downloads,
                stats.completed_downloads,
                stats.failed_downloads,
                stats.total_uploads
            )?,
            Err(e) => writeln!(out, "  {} {}", mark(false), e)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_tool() {
        let status = check_tool("definitely-not-installed-tool-xyz", "--version").await;
        assert!(status.path.is_none());
        assert!(!status.available());
    }

    #[test]
    fn test_check_dir() {
        let tmp = TempDir::new().unwrap();
        let ok = check_dir(tmp.path());
        assert!(ok.exists && ok.writable);
        let missing = check_dir(&tmp.path().join("nope"));
        assert!(!missing.exists);
    }

    #[test]
    fn test_render_report() {
        let report = DoctorReport {
            tools: vec![
                ToolStatus {
                    name: "curl".into(),
                    path: Some("/usr/bin/curl".into()),
                    version: Some("curl 8.5.0".into()),
                },
                ToolStatus {
                    name: "aria2c".into(),
                    path: None,
                    version: None,
                },
            ],
            directories: vec![],
            database: Some(Err("unable to open database file".into())),
        };
        let mut out = Vec::new();
        render_report(&report, &mut out).unwrap();
        let text = console::strip_ansi_codes(&String::from_utf8(out).unwrap()).into_owned();
        assert!(text.contains("curl 8.5.0"));
        assert!(text.contains("aria2c   not installed"));
        assert!(text.contains("unable to open database file"));
        assert_eq!(report.missing_tools(), vec!["aria2c"]);
        assert!(!report.healthy());
    }
}
