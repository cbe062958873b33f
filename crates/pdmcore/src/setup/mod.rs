//! Host setup: install the external tools and Python packages the download
//! manager relies on, then verify them.
//!
//! The flow is straight-line and synchronous. Every probe and command goes
//! through [`Host`] so each OS and tool-availability branch can be exercised
//! without touching the real machine.

pub mod doctor;
pub mod host;
pub mod installer;
pub mod os;
pub mod package_manager;
pub mod verify;

pub use doctor::{render_report, run_doctor, DoctorReport};
pub use host::{CommandSpec, DryRunHost, Host, HostOutput, SystemHost};
pub use installer::{run_setup, SetupOptions, SetupReport};
pub use os::{detect_os_family, OsFamily};
pub use package_manager::{select_package_manager, PackageManager};
pub use verify::{default_checks, run_checks, Check, CheckResult};

use thiserror::Error;

/// Fatal setup failures.
///
/// Everything else the installer runs into is a warning.
#[derive(Error, Debug)]
pub enum SetupError {
    /// macOS without Homebrew: nothing can be installed
    #[error("Homebrew is required on macOS. Install it from https://brew.sh and re-run setup")]
    HomebrewMissing,

    /// Writing the report to the terminal failed
    #[error("Failed to write setup output: {0}")]
    Output(#[from] std::io::Error),
}

impl SetupError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
