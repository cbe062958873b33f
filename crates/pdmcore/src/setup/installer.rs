//! The linear setup flow.

use console::style;
use std::io::Write;
use std::path::PathBuf;

use crate::core::config;
use crate::setup::host::{CommandSpec, Host};
use crate::setup::os::{detect_os_family, OsFamily};
use crate::setup::package_manager::{needs_sudo, select_package_manager, PackageManager};
use crate::setup::verify::{default_checks, run_checks, CheckResult};
use crate::setup::SetupError;

#[derive(Debug, Clone)]
pub struct SetupOptions {
    pub requirements: PathBuf,
    pub skip_python: bool,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            requirements: config::REQUIREMENTS_FILE.clone(),
            skip_python: false,
        }
    }
}

/// What happened during a setup run.
#[derive(Debug, Clone)]
pub struct SetupReport {
    pub os: OsFamily,
    pub package_manager: Option<PackageManager>,
    pub commands: Vec<CommandSpec>,
    pub warnings: Vec<String>,
    pub checks: Vec<CheckResult>,
}

impl SetupReport {
    pub fn failed_checks(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }
}

const BANNER: &str = r"
╔══════════════════════════════════════════════╗
║   Professional Download Manager - Setup      ║
╚══════════════════════════════════════════════╝";

struct Flow<'a, W: Write> {
    host: &'a dyn Host,
    out: &'a mut W,
    commands: Vec<CommandSpec>,
    warnings: Vec<String>,
}

impl<W: Write> Flow<'_, W> {
    fn step(&mut self, text: &str) -> std::io::Result<()> {
        writeln!(self.out, "{} {}", style("==>").cyan().bold(), text)
    }

    fn warn(&mut self, text: String) -> std::io::Result<()> {
        writeln!(self.out, "{} {}", style("⚠").yellow(), text)?;
        self.warnings.push(text);
        Ok(())
    }

    /// Run a mutating command. Failures become warnings.
    fn run(&mut self, cmd: CommandSpec) -> std::io::Result<bool> {
        writeln!(self.out, "   $ {}", cmd)?;
        let result = self.host.run(&cmd);
        self.commands.push(cmd.clone());
        match result {
            Ok(output) if output.success => Ok(true),
            Ok(_) => {
                self.warn(format!("Command failed: {}", cmd))?;
                Ok(false)
            }
            Err(e) => {
                self.warn(format!("Could not start {}: {}", cmd.program, e))?;
                Ok(false)
            }
        }
    }
}

/// Run the setup flow against `host`, writing progress to `out`.
///
/// Only missing Homebrew on macOS returns `Err`; every other failure is a
/// warning and the flow continues through verification.
pub fn run_setup<W: Write>(host: &dyn Host, options: &SetupOptions, out: &mut W) -> Result<SetupReport, SetupError> {
    writeln!(out, "{}", style(BANNER).bold())?;

    let mut flow = Flow {
        host,
        out,
        commands: Vec::new(),
        warnings: Vec::new(),
    };

    let ostype = host.ostype();
    let os = detect_os_family(&ostype);
    flow.step(&format!("Detected OS: {} (OSTYPE={})", os, ostype))?;

    let package_manager = match select_package_manager(&os, host) {
        Ok(pm) => pm,
        Err(e) => {
            writeln!(flow.out, "{} {}", style("✗").red().bold(), e)?;
            return Err(e);
        }
    };

    match package_manager {
        Some(pm) => {
            flow.step(&format!("Installing system packages with {}", pm))?;
            let sudo = needs_sudo(host);
            for cmd in pm.install_commands(sudo) {
                flow.run(cmd)?;
            }
        }
        None => {
            flow.warn(format!(
                "No supported package manager found for {}. Install aria2, wget, curl and ffmpeg manually",
                os
            ))?;
        }
    }

    if options.skip_python {
        flow.step("Skipping Python packages")?;
    } else {
        install_python_packages(&mut flow, options)?;
    }

    flow.step("Verifying installation")?;
    let checks = run_checks(host, &default_checks(), flow.out)?;

    let report = SetupReport {
        os,
        package_manager,
        commands: flow.commands,
        warnings: flow.warnings,
        checks,
    };

    writeln!(
        out,
        "\nSetup finished: {} warning(s), {}/{} checks passed",
        report.warnings.len(),
        report.checks.len() - report.failed_checks(),
        report.checks.len()
    )?;

    Ok(report)
}

fn install_python_packages<W: Write>(flow: &mut Flow<'_, W>, options: &SetupOptions) -> std::io::Result<()> {
    let requirements = options.requirements.to_string_lossy().into_owned();
    if !flow.host.file_exists(&options.requirements) {
        return flow.warn(format!("Requirements file not found: {}", requirements));
    }

    flow.step(&format!("Installing Python packages from {}", requirements))?;
    let cmd = if flow.host.has_binary("pip3") {
        CommandSpec::new("pip3", ["install", "-r", requirements.as_str()])
    } else if flow.host.has_binary("python3") {
        CommandSpec::new("python3", ["-m", "pip", "install", "-r", requirements.as_str()])
    } else {
        return flow.warn("Neither pip3 nor python3 found; skipping Python packages".to_string());
    };
    flow.run(cmd)?;
    Ok(())
}
