//! Upload profiles and Bot API method selection.

use pdmcore::core::FileType;
use serde::Serialize;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Largest file sent through sendVideo / sendAudio.
pub const MEDIA_METHOD_LIMIT: u64 = 50 * MIB;
/// Largest file sent through sendPhoto.
pub const PHOTO_METHOD_LIMIT: u64 = 10 * MIB;

/// Size class with its own send timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadProfile {
    pub name: &'static str,
    pub max_size: u64,
    #[serde(skip)]
    pub timeout: Duration,
}

/// Ordered from the smallest size class up.
pub const PROFILES: [UploadProfile; 4] = [
    UploadProfile {
        name: "regular_small",
        max_size: 20 * MIB,
        timeout: Duration::from_secs(120),
    },
    UploadProfile {
        name: "regular_large",
        max_size: 50 * MIB,
        timeout: Duration::from_secs(180),
    },
    UploadProfile {
        name: "premium_large",
        max_size: 2 * GIB,
        timeout: Duration::from_secs(240),
    },
    UploadProfile {
        name: "premium_ultra",
        max_size: 4 * GIB,
        timeout: Duration::from_secs(300),
    },
];

/// Smallest profile the file fits in; the largest one otherwise.
pub fn select_profile(size: u64) -> UploadProfile {
    PROFILES
        .iter()
        .find(|p| size <= p.max_size)
        .copied()
        .unwrap_or(PROFILES[PROFILES.len() - 1])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMethod {
    Video,
    Audio,
    Photo,
    Document,
}

/// Media methods for small media, a document for everything else.
pub fn select_method(file_type: FileType, size: u64) -> UploadMethod {
    match file_type {
        FileType::Video if size < MEDIA_METHOD_LIMIT => UploadMethod::Video,
        FileType::Audio if size < MEDIA_METHOD_LIMIT => UploadMethod::Audio,
        FileType::Image if size < PHOTO_METHOD_LIMIT => UploadMethod::Photo,
        _ => UploadMethod::Document,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_profile() {
        assert_eq!(select_profile(0).name, "regular_small");
        assert_eq!(select_profile(20 * MIB).name, "regular_small");
        assert_eq!(select_profile(20 * MIB + 1).name, "regular_large");
        assert_eq!(select_profile(GIB).name, "premium_large");
        assert_eq!(select_profile(3 * GIB).name, "premium_ultra");
        let huge = select_profile(10 * GIB);
        assert_eq!(huge.name, "premium_ultra");
        assert_eq!(huge.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_select_method() {
        assert_eq!(select_method(FileType::Video, 10 * MIB), UploadMethod::Video);
        assert_eq!(select_method(FileType::Video, 50 * MIB), UploadMethod::Document);
        assert_eq!(select_method(FileType::Audio, MIB), UploadMethod::Audio);
        assert_eq!(select_method(FileType::Image, 9 * MIB), UploadMethod::Photo);
        assert_eq!(select_method(FileType::Image, 11 * MIB), UploadMethod::Document);
        assert_eq!(select_method(FileType::Archive, 1), UploadMethod::Document);
    }
}
