//! Post-install verification checks.
//!
//! Each check is independent and prints one status line. Failures are
//! reported, never aggregated into an exit code.

use console::style;
use std::io::Write;

use crate::setup::host::{CommandSpec, Host};

/// What a check probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckKind {
    /// Binary on PATH whose version flag exits 0
    Binary { name: String, version_flag: String },
    /// Module importable by `python3`
    PythonModule { module: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub label: String,
    pub kind: CheckKind,
}

impl Check {
    pub fn binary(name: &str) -> Self {
        // ffmpeg and ffprobe take a single-dash flag
        let version_flag = if name.starts_with("ff") { "-version" } else { "--version" };
        Self {
            label: name.to_string(),
            kind: CheckKind::Binary {
                name: name.to_string(),
                version_flag: version_flag.to_string(),
            },
        }
    }

    pub fn python_module(module: &str) -> Self {
        Self {
            label: format!("python: {}", module),
            kind: CheckKind::PythonModule {
                module: module.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub label: String,
    pub passed: bool,
}

pub const CHECK_BINARIES: &[&str] = &["aria2c", "wget", "curl", "ffmpeg", "yt-dlp"];
pub const CHECK_PYTHON_MODULES: &[&str] = &["flask", "requests", "telegram", "yt_dlp", "PIL"];

/// The fixed verification list: binaries first, then Python modules.
pub fn default_checks() -> Vec<Check> {
    CHECK_BINARIES
        .iter()
        .map(|b| Check::binary(b))
        .chain(CHECK_PYTHON_MODULES.iter().map(|m| Check::python_module(m)))
        .collect()
}

fn command_succeeds(host: &dyn Host, cmd: &CommandSpec) -> bool {
    host.run(cmd).map(|o| o.success).unwrap_or(false)
}

/// Run one check against the host.
pub fn run_check(host: &dyn Host, check: &Check) -> CheckResult {
    let passed = match &check.kind {
        CheckKind::Binary { name, version_flag } => {
            host.has_binary(name) && command_succeeds(host, &CommandSpec::probe(name, [version_flag.as_str()]))
        }
        CheckKind::PythonModule { module } => {
            host.has_binary("python3")
                && command_succeeds(
                    host,
                    &CommandSpec::probe("python3", ["-c".to_string(), format!("import {}", module)]),
                )
        }
    };
    CheckResult {
        label: check.label.clone(),
        passed,
    }
}

/// One coloured line: green ✓ or red ✗ followed by the label.
pub fn render_status_line(result: &CheckResult) -> String {
    if result.passed {
        format!("{} {}", style("✓").green(), result.label)
    } else {
        format!("{} {}", style("✗").red(), result.label)
    }
}

/// Run every check, printing a status line as each finishes.
pub fn run_checks<W: Write>(host: &dyn Host, checks: &[Check], out: &mut W) -> std::io::Result<Vec<CheckResult>> {
    let mut results = Vec::with_capacity(checks.len());
    for check in checks {
        let result = run_check(host, check);
        writeln!(out, "{}", render_status_line(&result))?;
        results.push(result);
    }
    Ok(results)
}
