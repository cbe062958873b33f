//! Setup flow across the OS × tool-availability matrix with a scripted host.
//!
//! Run with: cargo test -p pdmcore --test setup_matrix

use pdmcore::setup::{
    run_setup, CommandSpec, DryRunHost, Host, HostOutput, OsFamily, PackageManager, SetupError, SetupOptions,
};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

struct MockHost {
    ostype: String,
    binaries: HashSet<String>,
    root: bool,
    files: HashSet<PathBuf>,
    /// Programs whose mutating commands exit non-zero
    failing: HashSet<String>,
    ran: RefCell<Vec<String>>,
}

impl MockHost {
    fn new(ostype: &str, binaries: &[&str]) -> Self {
        Self {
            ostype: ostype.to_string(),
            binaries: binaries.iter().map(|b| b.to_string()).collect(),
            root: false,
            files: HashSet::new(),
            failing: HashSet::new(),
            ran: RefCell::new(Vec::new()),
        }
    }

    fn with_file(mut self, path: &str) -> Self {
        self.files.insert(PathBuf::from(path));
        self
    }

    fn root(mut self) -> Self {
        self.root = true;
        self
    }

    fn failing(mut self, program: &str) -> Self {
        self.failing.insert(program.to_string());
        self
    }

    fn ran(&self) -> Vec<String> {
        self.ran.borrow().clone()
    }
}

impl Host for MockHost {
    fn has_binary(&self, name: &str) -> bool {
        self.binaries.contains(name)
    }

    fn run(&self, cmd: &CommandSpec) -> io::Result<HostOutput> {
        if cmd.probe {
            // version / import probes pass for installed binaries only
            let ok = self.binaries.contains(&cmd.program) && cmd.program != "python3";
            return Ok(if ok { HostOutput::ok() } else { HostOutput::failed("") });
        }
        self.ran.borrow_mut().push(cmd.to_string());
        let program = if cmd.program == "sudo" {
            cmd.args.first().cloned().unwrap_or_default()
        } else {
            cmd.program.clone()
        };
        Ok(if self.failing.contains(&program) {
            HostOutput::failed("boom")
        } else {
            HostOutput::ok()
        })
    }

    fn is_root(&self) -> bool {
        self.root
    }

    fn ostype(&self) -> String {
        self.ostype.clone()
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.files.contains(path)
    }
}

fn options() -> SetupOptions {
    SetupOptions {
        requirements: PathBuf::from("requirements.txt"),
        skip_python: false,
    }
}

fn run(host: &dyn Host) -> (Result<pdmcore::setup::SetupReport, SetupError>, String) {
    let mut out = Vec::new();
    let result = run_setup(host, &options(), &mut out);
    let text = console::strip_ansi_codes(&String::from_utf8_lossy(&out)).into_owned();
    (result, text)
}

#[test]
fn macos_without_brew_is_fatal() {
    let host = MockHost::new("darwin23", &["curl"]);
    let (result, text) = run(&host);
    let err = result.unwrap_err();
    assert!(matches!(err, SetupError::HomebrewMissing));
    assert_eq!(err.exit_code(), 1);
    assert!(text.contains("Homebrew is required"));
    assert!(host.ran().is_empty());
}

#[test]
fn macos_with_brew_never_uses_sudo() {
    let host = MockHost::new("darwin23", &["brew", "sudo", "pip3"]).with_file("requirements.txt");
    let (result, _) = run(&host);
    let report = result.unwrap();
    assert_eq!(report.os, OsFamily::MacOs);
    assert_eq!(report.package_manager, Some(PackageManager::Brew));
    assert_eq!(
        host.ran(),
        vec![
            "brew install aria2 wget curl ffmpeg".to_string(),
            "pip3 install -r requirements.txt".to_string(),
        ]
    );
}

#[test]
fn linux_prefers_apt_and_uses_sudo_when_not_root() {
    let host = MockHost::new("linux-gnu", &["apt-get", "yum", "sudo", "pip3"]).with_file("requirements.txt");
    let (result, _) = run(&host);
    let report = result.unwrap();
    assert_eq!(report.package_manager, Some(PackageManager::AptGet));
    assert_eq!(
        host.ran(),
        vec![
            "sudo apt-get update".to_string(),
            "sudo apt-get install -y aria2 wget curl ffmpeg python3-pip".to_string(),
            "pip3 install -r requirements.txt".to_string(),
        ]
    );
}

#[test]
fn linuxbrew_wins_on_linux_without_sudo() {
    let host = MockHost::new("linux-gnu", &["brew", "apt-get", "sudo", "pip3"]).with_file("requirements.txt");
    let (result, _) = run(&host);
    assert_eq!(result.unwrap().package_manager, Some(PackageManager::Brew));
    assert_eq!(
        host.ran(),
        vec![
            "brew install aria2 wget curl ffmpeg".to_string(),
            "pip3 install -r requirements.txt".to_string(),
        ]
    );
}

#[test]
fn linux_as_root_skips_sudo_and_falls_back_to_dnf() {
    let host = MockHost::new("linux-gnu", &["dnf", "sudo", "python3"])
        .root()
        .with_file("requirements.txt");
    let (result, _) = run(&host);
    assert_eq!(result.unwrap().package_manager, Some(PackageManager::Dnf));
    assert_eq!(
        host.ran(),
        vec![
            "dnf install -y aria2 wget curl ffmpeg python3-pip".to_string(),
            "python3 -m pip install -r requirements.txt".to_string(),
        ]
    );
}

#[test]
fn yum_is_chosen_over_dnf() {
    let host = MockHost::new("linux-gnu", &["yum", "dnf"]).root();
    let (result, _) = run(&host);
    assert_eq!(result.unwrap().package_manager, Some(PackageManager::Yum));
}

#[test]
fn linux_without_package_manager_warns_and_continues() {
    let host = MockHost::new("linux-gnu", &["curl"]);
    let (result, text) = run(&host);
    let report = result.unwrap();
    assert_eq!(report.package_manager, None);
    assert!(report.warnings.iter().any(|w| w.contains("No supported package manager")));
    assert!(report.warnings.iter().any(|w| w.contains("Requirements file not found")));
    // warnings are printed, not logged
    for warning in &report.warnings {
        assert!(text.contains(&format!("⚠ {}", warning)), "missing from output: {}", warning);
    }
    assert!(text.contains("Verifying installation"));
    assert_eq!(report.checks.len(), 10);
}

#[test]
fn other_os_has_no_package_manager() {
    let host = MockHost::new("freebsd13.2", &["pkg"]);
    let (result, _) = run(&host);
    let report = result.unwrap();
    assert_eq!(report.os, OsFamily::Other("freebsd13.2".to_string()));
    assert_eq!(report.package_manager, None);
}

#[test]
fn failing_install_is_a_warning_not_an_error() {
    let host = MockHost::new("linux-gnu", &["apt-get", "pip3"])
        .root()
        .with_file("requirements.txt")
        .failing("apt-get")
        .failing("pip3");
    let (result, text) = run(&host);
    let report = result.unwrap();
    assert_eq!(report.warnings.len(), 3);
    assert!(text.contains("Command failed: apt-get update"));
    // verification still ran
    assert_eq!(report.checks.len(), 10);
}

#[test]
fn verification_failures_do_not_fail_setup() {
    let host = MockHost::new("linux-gnu", &["apt-get", "curl", "wget"]).root();
    let (result, text) = run(&host);
    let report = result.unwrap();
    let passed: Vec<&str> = report
        .checks
        .iter()
        .filter(|c| c.passed)
        .map(|c| c.label.as_str())
        .collect();
    assert_eq!(passed, vec!["wget", "curl"]);
    assert_eq!(report.failed_checks(), 8);
    assert!(text.contains("✓ curl"));
    assert!(text.contains("✗ yt-dlp"));
}

#[test]
fn skip_python_runs_no_pip() {
    let host = MockHost::new("linux-gnu", &["apt-get", "pip3"]).root().with_file("requirements.txt");
    let mut out = Vec::new();
    let opts = SetupOptions {
        skip_python: true,
        ..options()
    };
    run_setup(&host, &opts, &mut out).unwrap();
    assert!(host.ran().iter().all(|cmd| !cmd.starts_with("pip3")));
}

#[test]
fn dry_run_prints_but_does_not_execute() {
    let inner = MockHost::new("linux-gnu", &["apt-get", "sudo", "pip3"]).with_file("requirements.txt");
    let host = DryRunHost::new(inner);
    let mut out = Vec::new();
    let report = run_setup(&host, &options(), &mut out).unwrap();
    let text = console::strip_ansi_codes(&String::from_utf8_lossy(&out)).into_owned();

    assert_eq!(host.recorded().len(), 3);
    assert_eq!(report.commands, host.recorded());
    assert!(text.contains("$ sudo apt-get update"));
    assert!(text.contains("$ pip3 install -r requirements.txt"));
}
