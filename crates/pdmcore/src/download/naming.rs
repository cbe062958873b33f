//! Download ids, file names and collision-free paths.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

use crate::core::utils::escape_filename;

/// 16 hex chars of SHA-256 over the URL and the current time in nanoseconds.
pub fn generate_download_id(url: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(nanos.to_string().as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// `filename=` value of a Content-Disposition header, unquoted.
///
/// `filename*=UTF-8''…` is preferred when present.
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    for part in header.split(';').map(str::trim) {
        if let Some(value) = part.strip_prefix("filename*=") {
            let encoded = value.rsplit("''").next().unwrap_or(value);
            if let Ok(decoded) = urlencoding::decode(encoded.trim_matches(['"', '\''])) {
                return Some(decoded.into_owned());
            }
        } else if let Some(value) = part.strip_prefix("filename=") {
            plain = Some(value.trim_matches(['"', '\'']).to_string());
        }
    }
    plain
}

/// Last path segment of the URL, percent-decoded.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?.to_string();
    if segment.is_empty() {
        return None;
    }
    urlencoding::decode(&segment).ok().map(|s| s.into_owned())
}

fn fallback_filename() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("download_{}.bin", secs)
}

/// Pick a file name for a download.
///
/// Content-Disposition wins, then the URL path. Either must contain a dot
/// to count; otherwise `download_<unix>.bin`. The result is escaped for the
/// filesystem.
pub fn extract_filename(url: &str, content_disposition: Option<&str>) -> String {
    let candidate = content_disposition
        .and_then(filename_from_content_disposition)
        .filter(|name| name.contains('.'))
        .or_else(|| filename_from_url(url).filter(|name| name.contains('.')))
        .unwrap_or_else(fallback_filename);
    escape_filename(&candidate)
}

/// `dir/filename`, or `dir/stem_1.ext`, `dir/stem_2.ext`… while taken.
pub fn unique_filepath(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{}_{}{}", stem, counter, suffix));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
