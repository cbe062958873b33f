//! Disk space queries used by storage info and the startup report.

use crate::core::error::AppError;
use std::path::Path;

/// Warning threshold for disk space (1 GB)
pub const WARNING_DISK_SPACE_BYTES: u64 = 1024 * 1024 * 1024;

/// Result of disk space check
#[derive(Debug, Clone, serde::Serialize)]
pub struct DiskSpaceInfo {
    /// Available space in bytes
    pub available_bytes: u64,
    /// Total space in bytes
    pub total_bytes: u64,
    /// Used percentage (0-100)
    pub used_percent: f64,
    /// Path that was checked
    pub path: String,
}

impl DiskSpaceInfo {
    /// Returns available space in GB
    pub fn available_gb(&self) -> f64 {
        self.available_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    /// Check if space is low (warning level)
    pub fn is_warning(&self) -> bool {
        self.available_bytes < WARNING_DISK_SPACE_BYTES
    }
}

/// Parse the data line of `df -k` output.
fn parse_df_output(stdout: &str, path: &str) -> Result<DiskSpaceInfo, AppError> {
    let line = stdout
        .lines()
        .nth(1)
        .ok_or_else(|| AppError::Validation("Unexpected df output format".to_string()))?;

    // Filesystem 1K-blocks Used Available Use% Mounted
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(AppError::Validation("Unexpected df output format".to_string()));
    }

    let total_kb: u64 = parts[1]
        .parse()
        .map_err(|_| AppError::Validation("Failed to parse total blocks".to_string()))?;
    let available_kb: u64 = parts[3]
        .parse()
        .map_err(|_| AppError::Validation("Failed to parse available blocks".to_string()))?;

    let total_bytes = total_kb * 1024;
    let available_bytes = available_kb * 1024;
    let used_bytes = total_bytes.saturating_sub(available_bytes);
    let used_percent = if total_bytes > 0 {
        (used_bytes as f64 / total_bytes as f64) * 100.0
    } else {
        0.0
    };

    Ok(DiskSpaceInfo {
        available_bytes,
        total_bytes,
        used_percent,
        path: path.to_string(),
    })
}

/// Get disk space information for a path using the df command
///
/// Works on Linux and macOS. Non-existent paths fall back to their parent.
pub fn get_disk_space(path: &Path) -> Result<DiskSpaceInfo, AppError> {
    let check_path = if path.exists() {
        path.to_string_lossy().into_owned()
    } else {
        path.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string())
    };

    let output = std::process::Command::new("df").args(["-k", &check_path]).output()?;

    if !output.status.success() {
        return Err(AppError::Validation(format!(
            "df command failed for {}: {}",
            check_path,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    parse_df_output(&String::from_utf8_lossy(&output.stdout), &check_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_df_output() {
        let out = "Filesystem 1K-blocks Used Available Use% Mounted on\n/dev/sda1 1000 250 750 25% /\n";
        let info = parse_df_output(out, "/").unwrap();
        assert_eq!(info.total_bytes, 1000 * 1024);
        assert_eq!(info.available_bytes, 750 * 1024);
        assert!((info.used_percent - 25.0).abs() < 0.01);
        assert!(info.is_warning());
    }

    #[test]
    fn test_parse_df_output_rejects_garbage() {
        assert!(parse_df_output("only header\n", "/").is_err());
        assert!(parse_df_output("h\nfs x y\n", "/").is_err());
    }
}
