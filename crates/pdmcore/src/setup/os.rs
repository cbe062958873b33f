//! OS family detection from the `OSTYPE` string.

use std::fmt;

/// Operating system families setup distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsFamily {
    MacOs,
    Linux,
    /// Anything else, carrying the raw `OSTYPE` value
    Other(String),
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::MacOs => write!(f, "macOS"),
            OsFamily::Linux => write!(f, "Linux"),
            OsFamily::Other(raw) if raw.is_empty() => write!(f, "unknown"),
            OsFamily::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// Classify an `OSTYPE` value.
///
/// `darwin*` is macOS, `linux-gnu*` (and bare `linux`) is Linux.
pub fn detect_os_family(ostype: &str) -> OsFamily {
    let value = ostype.trim().to_lowercase();
    if value.starts_with("darwin") {
        OsFamily::MacOs
    } else if value.starts_with("linux-gnu") || value == "linux" {
        OsFamily::Linux
    } else {
        OsFamily::Other(ostype.trim().to_string())
    }
}

/// `OSTYPE` equivalent for the compile target.
pub fn ostype_for_target(target_os: &str) -> String {
    match target_os {
        "macos" => "darwin".to_string(),
        "linux" => "linux-gnu".to_string(),
        other => other.to_string(),
    }
}

/// `OSTYPE` from the environment, falling back to the compile target.
///
/// Shells rarely export `OSTYPE`, so the fallback is the common path.
pub fn current_ostype() -> String {
    std::env::var("OSTYPE")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| ostype_for_target(std::env::consts::OS))
}
