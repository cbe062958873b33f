//! System package manager selection and install command lines.

use strum::Display;

use crate::setup::host::{CommandSpec, Host};
use crate::setup::os::OsFamily;
use crate::setup::SetupError;

/// Package managers setup knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PackageManager {
    #[strum(serialize = "brew")]
    Brew,
    #[strum(serialize = "apt-get")]
    AptGet,
    #[strum(serialize = "yum")]
    Yum,
    #[strum(serialize = "dnf")]
    Dnf,
}

/// Linux managers in preference order. `brew` here is Linuxbrew.
pub const LINUX_PROBE_ORDER: [PackageManager; 4] = [
    PackageManager::Brew,
    PackageManager::AptGet,
    PackageManager::Yum,
    PackageManager::Dnf,
];

/// Packages installed on every platform.
const BASE_PACKAGES: &[&str] = &["aria2", "wget", "curl", "ffmpeg"];

impl PackageManager {
    /// Executable probed on `PATH`.
    pub fn binary(self) -> &'static str {
        match self {
            PackageManager::Brew => "brew",
            PackageManager::AptGet => "apt-get",
            PackageManager::Yum => "yum",
            PackageManager::Dnf => "dnf",
        }
    }

    /// System packages this manager installs.
    pub fn packages(self) -> Vec<&'static str> {
        let mut packages = BASE_PACKAGES.to_vec();
        if self != PackageManager::Brew {
            packages.push("python3-pip");
        }
        packages
    }

    /// Full command sequence, `sudo`-prefixed for non-brew managers when asked.
    ///
    /// `apt-get` refreshes its index first.
    pub fn install_commands(self, use_sudo: bool) -> Vec<CommandSpec> {
        let mut commands = Vec::new();
        if self == PackageManager::AptGet {
            commands.push(CommandSpec::new(self.binary(), ["update"]));
        }

        let mut args = vec!["install".to_string()];
        if self != PackageManager::Brew {
            args.push("-y".to_string());
        }
        args.extend(self.packages().into_iter().map(String::from));
        commands.push(CommandSpec::new(self.binary(), args));

        if use_sudo && self != PackageManager::Brew {
            commands.into_iter().map(CommandSpec::with_sudo).collect()
        } else {
            commands
        }
    }
}

/// Whether install commands need a `sudo` prefix on this host.
pub fn needs_sudo(host: &dyn Host) -> bool {
    !host.is_root() && host.has_binary("sudo")
}

/// Pick the package manager for this OS.
///
/// Missing Homebrew on macOS is fatal. On Linux the first of `brew`,
/// `apt-get`, `yum`, `dnf` found wins, and finding none is `Ok(None)`. Other systems
/// have no supported manager.
pub fn select_package_manager(os: &OsFamily, host: &dyn Host) -> Result<Option<PackageManager>, SetupError> {
    match os {
        OsFamily::MacOs => {
            if host.has_binary(PackageManager::Brew.binary()) {
                Ok(Some(PackageManager::Brew))
            } else {
                Err(SetupError::HomebrewMissing)
            }
        }
        OsFamily::Linux => Ok(LINUX_PROBE_ORDER
            .into_iter()
            .find(|pm| host.has_binary(pm.binary()))),
        OsFamily::Other(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::host::HostOutput;
    use std::io;

    struct Bins(&'static [&'static str]);

    impl Host for Bins {
        fn has_binary(&self, name: &str) -> bool {
            self.0.contains(&name)
        }

        fn run(&self, _cmd: &CommandSpec) -> io::Result<HostOutput> {
            Ok(HostOutput::ok())
        }

        fn is_root(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_linux_prefers_apt_over_yum_and_dnf() {
        let host = Bins(&["dnf", "yum", "apt-get"]);
        assert_eq!(
            select_package_manager(&OsFamily::Linux, &host).unwrap(),
            Some(PackageManager::AptGet)
        );
        let host = Bins(&["dnf", "yum"]);
        assert_eq!(
            select_package_manager(&OsFamily::Linux, &host).unwrap(),
            Some(PackageManager::Yum)
        );
        let host = Bins(&["dnf"]);
        assert_eq!(
            select_package_manager(&OsFamily::Linux, &host).unwrap(),
            Some(PackageManager::Dnf)
        );
    }

    #[test]
    fn test_linuxbrew_is_preferred_on_linux() {
        let host = Bins(&["apt-get", "brew"]);
        assert_eq!(
            select_package_manager(&OsFamily::Linux, &host).unwrap(),
            Some(PackageManager::Brew)
        );
    }

    #[test]
    fn test_linux_without_manager_is_not_fatal() {
        let host = Bins(&["curl", "sudo"]);
        assert_eq!(select_package_manager(&OsFamily::Linux, &host).unwrap(), None);
    }

    #[test]
    fn test_macos_requires_brew() {
        let host = Bins(&["apt-get"]);
        assert!(matches!(
            select_package_manager(&OsFamily::MacOs, &host),
            Err(SetupError::HomebrewMissing)
        ));
        let host = Bins(&["brew"]);
        assert_eq!(
            select_package_manager(&OsFamily::MacOs, &host).unwrap(),
            Some(PackageManager::Brew)
        );
    }

    #[test]
    fn test_other_os_has_no_manager() {
        let host = Bins(&["apt-get", "brew"]);
        assert_eq!(
            select_package_manager(&OsFamily::Other("msys".into()), &host).unwrap(),
            None
        );
    }

    #[test]
    fn test_apt_updates_first_and_uses_sudo() {
        let cmds = PackageManager::AptGet.install_commands(true);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].to_string(), "sudo apt-get update");
        assert_eq!(
            cmds[1].to_string(),
            "sudo apt-get install -y aria2 wget curl ffmpeg python3-pip"
        );
    }

    #[test]
    fn test_brew_never_uses_sudo() {
        let cmds = PackageManager::Brew.install_commands(true);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].to_string(), "brew install aria2 wget curl ffmpeg");
    }

    #[test]
    fn test_dnf_without_sudo() {
        let cmds = PackageManager::Dnf.install_commands(false);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].to_string(), "dnf install -y aria2 wget curl ffmpeg python3-pip");
    }

    #[test]
    fn test_needs_sudo() {
        assert!(needs_sudo(&Bins(&["sudo"])));
        assert!(!needs_sudo(&Bins(&[])));
    }
}
