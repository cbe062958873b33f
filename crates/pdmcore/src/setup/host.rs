//! Host abstraction for setup: binary probing, command execution, privileges.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::setup::os::current_ostype;

/// A command line to run on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Read-only probe (version check, import check). Output is captured and
    /// the command runs even in dry-run mode.
    pub probe: bool,
}

impl CommandSpec {
    /// A command that changes the host (install, update).
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            probe: false,
        }
    }

    /// A read-only probe.
    pub fn probe<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            probe: true,
            ..Self::new(program, args)
        }
    }

    /// Same command run through `sudo`.
    #[must_use]
    pub fn with_sudo(self) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
            probe: self.probe,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Outcome of a host command.
#[derive(Debug, Clone, Default)]
pub struct HostOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl HostOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(stderr: &str) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// Everything setup needs to know about, or do to, the machine.
pub trait Host {
    /// Is an executable with this name on `PATH`?
    fn has_binary(&self, name: &str) -> bool;

    /// Run a command. `Err` means it could not be started at all.
    fn run(&self, cmd: &CommandSpec) -> io::Result<HostOutput>;

    /// Is the current process running as root?
    fn is_root(&self) -> bool;

    /// The `OSTYPE` string for this host.
    fn ostype(&self) -> String {
        current_ostype()
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// The real machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl Host for SystemHost {
    fn has_binary(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }

    fn run(&self, cmd: &CommandSpec) -> io::Result<HostOutput> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).stdin(Stdio::null());

        if cmd.probe {
            let output = command.output()?;
            return Ok(HostOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        // Installs stream straight to the terminal
        let status = command.stdout(Stdio::inherit()).stderr(Stdio::inherit()).status()?;
        Ok(HostOutput {
            success: status.success(),
            ..Default::default()
        })
    }

    fn is_root(&self) -> bool {
        Command::new("id")
            .arg("-u")
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "0")
            .unwrap_or(false)
    }
}

/// Wraps a host, recording mutating commands instead of running them.
///
/// Probes still reach the inner host.
pub struct DryRunHost<H: Host> {
    inner: H,
    recorded: RefCell<Vec<CommandSpec>>,
}

impl<H: Host> DryRunHost<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            recorded: RefCell::new(Vec::new()),
        }
    }

    /// Commands that would have been executed, in order.
    pub fn recorded(&self) -> Vec<CommandSpec> {
        self.recorded.borrow().clone()
    }
}

impl<H: Host> Host for DryRunHost<H> {
    fn has_binary(&self, name: &str) -> bool {
        self.inner.has_binary(name)
    }

    fn run(&self, cmd: &CommandSpec) -> io::Result<HostOutput> {
        if cmd.probe {
            return self.inner.run(cmd);
        }
        self.recorded.borrow_mut().push(cmd.clone());
        Ok(HostOutput::ok())
    }

    fn is_root(&self) -> bool {
        self.inner.is_root()
    }

    fn ostype(&self) -> String {
        self.inner.ostype()
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.inner.file_exists(path)
    }
}
