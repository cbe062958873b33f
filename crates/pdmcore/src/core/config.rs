use once_cell::sync::Lazy;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Read an environment variable, treating empty values as unset.
fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an environment variable, falling back to `default` when unset or malformed.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_non_empty(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Expand `~` and turn the result into a path.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

fn dir_from_env(key: &str, default: PathBuf) -> PathBuf {
    env_non_empty(key).map(|v| expand_path(&v)).unwrap_or(default)
}

/// Root data directory
/// Read from PDM_DATA_DIR environment variable
/// Default: ./data
pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| dir_from_env("PDM_DATA_DIR", PathBuf::from("data")));

/// Finished downloads land here
/// Read from DOWNLOADS_DIR environment variable
pub static DOWNLOADS_DIR: Lazy<PathBuf> = Lazy::new(|| dir_from_env("DOWNLOADS_DIR", DATA_DIR.join("downloads")));

/// Files uploaded through the web API
/// Read from UPLOADS_DIR environment variable
pub static UPLOADS_DIR: Lazy<PathBuf> = Lazy::new(|| dir_from_env("UPLOADS_DIR", DATA_DIR.join("uploads")));

/// Scratch space (thumbnails, partial files)
/// Read from TEMP_DIR environment variable
pub static TEMP_DIR: Lazy<PathBuf> = Lazy::new(|| dir_from_env("TEMP_DIR", DATA_DIR.join("temp")));

/// Log files directory
/// Read from LOGS_DIR environment variable
pub static LOGS_DIR: Lazy<PathBuf> = Lazy::new(|| dir_from_env("LOGS_DIR", DATA_DIR.join("logs")));

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: <data>/pdm.sqlite
pub static DATABASE_PATH: Lazy<PathBuf> = Lazy::new(|| dir_from_env("DATABASE_PATH", DATA_DIR.join("pdm.sqlite")));

/// Web login user name
/// Read from LOGIN_USERNAME environment variable
pub static LOGIN_USERNAME: Lazy<String> =
    Lazy::new(|| env_non_empty("LOGIN_USERNAME").unwrap_or_else(|| "admin".to_string()));

/// Web login password
/// Read from LOGIN_PASSWORD environment variable
/// Default is only suitable for local use; startup warns when it is unchanged.
pub static LOGIN_PASSWORD: Lazy<String> =
    Lazy::new(|| env_non_empty("LOGIN_PASSWORD").unwrap_or_else(|| DEFAULT_LOGIN_PASSWORD.to_string()));

pub const DEFAULT_LOGIN_PASSWORD: &str = "admin";

/// Python requirements consumed by `pdm setup`
/// Read from REQUIREMENTS_FILE environment variable
pub static REQUIREMENTS_FILE: Lazy<PathBuf> =
    Lazy::new(|| dir_from_env("REQUIREMENTS_FILE", PathBuf::from("requirements.txt")));

/// Cached yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env_non_empty("YTDL_BIN").unwrap_or_else(|| "yt-dlp".to_string()));

/// ffmpeg binary, read from FFMPEG_BIN
pub static FFMPEG_BIN: Lazy<String> =
    Lazy::new(|| env_non_empty("FFMPEG_BIN").unwrap_or_else(|| "ffmpeg".to_string()));

/// ffprobe binary, read from FFPROBE_BIN
pub static FFPROBE_BIN: Lazy<String> =
    Lazy::new(|| env_non_empty("FFPROBE_BIN").unwrap_or_else(|| "ffprobe".to_string()));

/// All directories the application writes to, in creation order.
pub fn data_directories() -> Vec<&'static Path> {
    vec![
        DATA_DIR.as_path(),
        DOWNLOADS_DIR.as_path(),
        UPLOADS_DIR.as_path(),
        TEMP_DIR.as_path(),
        LOGS_DIR.as_path(),
    ]
}

/// Create every data directory that does not exist yet.
pub fn ensure_directories() -> std::io::Result<()> {
    for dir in data_directories() {
        std::fs::create_dir_all(dir)?;
    }
    if let Some(parent) = DATABASE_PATH.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Web server configuration
pub mod server {
    use super::{env_non_empty, env_parse};
    use once_cell::sync::Lazy;

    /// Bind host, read from SERVER_HOST
    pub static HOST: Lazy<String> = Lazy::new(|| env_non_empty("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()));

    /// Bind port, read from SERVER_PORT
    /// Default: 5000
    pub static PORT: Lazy<u16> = Lazy::new(|| env_parse("SERVER_PORT", 5000));

    /// Maximum number of downloads running at once, read from MAX_WORKERS
    pub static MAX_WORKERS: Lazy<usize> = Lazy::new(|| env_parse("MAX_WORKERS", 5usize).max(1));

    /// Session lifetime in seconds, read from SESSION_TIMEOUT
    /// Default: 24 hours
    pub static SESSION_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| env_parse("SESSION_TIMEOUT", 86_400));

    /// Debug mode, read from DEBUG
    pub static DEBUG: Lazy<bool> = Lazy::new(|| env_parse("DEBUG", false));

    /// Maximum accepted multipart body (bytes), read from MAX_UPLOAD_BYTES
    /// Default: 4 GiB
    pub static MAX_UPLOAD_BYTES: Lazy<usize> = Lazy::new(|| env_parse("MAX_UPLOAD_BYTES", 4usize * 1024 * 1024 * 1024));

    pub fn bind_addr() -> String {
        format!("{}:{}", *HOST, *PORT)
    }
}

/// Telegram channel upload configuration
pub mod telegram {
    use super::{env_non_empty, env_parse};
    use once_cell::sync::Lazy;

    /// Token shipped in sample configs; treated as "not configured".
    pub const PLACEHOLDER_TOKEN: &str = "YOUR_BOT_TOKEN_HERE";

    /// Bot token
    /// Read from TELEGRAM_BOT_TOKEN or BOT_TOKEN environment variable
    pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
        env_non_empty("TELEGRAM_BOT_TOKEN")
            .or_else(|| env_non_empty("BOT_TOKEN"))
            .unwrap_or_default()
    });

    /// Target channel: numeric id (-100…) or @username
    /// Read from TELEGRAM_CHANNEL_ID
    pub static CHANNEL_ID: Lazy<Option<String>> = Lazy::new(|| env_non_empty("TELEGRAM_CHANNEL_ID"));

    /// Remove the local file after a successful upload
    /// Read from TELEGRAM_DELETE_AFTER_UPLOAD, default true
    pub static DELETE_AFTER_UPLOAD: Lazy<bool> = Lazy::new(|| env_parse("TELEGRAM_DELETE_AFTER_UPLOAD", true));

    /// Automatically queue finished downloads for upload
    /// Read from TELEGRAM_AUTO_UPLOAD, default true
    pub static AUTO_UPLOAD: Lazy<bool> = Lazy::new(|| env_parse("TELEGRAM_AUTO_UPLOAD", true));

    /// Custom Bot API server (local telegram-bot-api lifts the 50 MB limit)
    /// Read from TELEGRAM_API_URL
    pub static API_URL: Lazy<Option<String>> = Lazy::new(|| env_non_empty("TELEGRAM_API_URL"));

    pub fn token_is_usable(token: &str) -> bool {
        let token = token.trim();
        !token.is_empty() && token != PLACEHOLDER_TOKEN
    }

    /// True when both the token and the channel are set.
    pub fn is_configured() -> bool {
        token_is_usable(&BOT_TOKEN) && CHANNEL_ID.is_some()
    }
}

/// Download engine configuration
pub mod engines {
    use super::{env_non_empty, env_parse};
    use std::time::Duration;

    /// Settings for one download engine.
    ///
    /// Lower `priority` values are tried first.
    #[derive(Debug, Clone, PartialEq)]
    pub struct EngineSettings {
        pub name: String,
        pub enabled: bool,
        pub priority: u8,
        pub max_retries: u32,
        pub timeout: Duration,
        pub chunk_size: usize,
    }

    impl EngineSettings {
        pub fn new(name: &str, priority: u8, timeout_secs: u64) -> Self {
            Self {
                name: name.to_string(),
                enabled: true,
                priority,
                max_retries: 3,
                timeout: Duration::from_secs(timeout_secs),
                chunk_size: 1024 * 1024,
            }
        }

        /// Apply ENGINE_<NAME>_ENABLED / _PRIORITY / _RETRIES / _TIMEOUT overrides.
        fn with_env_overrides(mut self) -> Self {
            let prefix = format!("ENGINE_{}", env_key(&self.name));
            self.enabled = env_parse(&format!("{prefix}_ENABLED"), self.enabled);
            self.priority = env_parse(&format!("{prefix}_PRIORITY"), self.priority);
            self.max_retries = env_parse(&format!("{prefix}_RETRIES"), self.max_retries);
            if let Some(secs) = env_non_empty(&format!("{prefix}_TIMEOUT")).and_then(|v| v.parse::<u64>().ok()) {
                self.timeout = Duration::from_secs(secs);
            }
            self
        }
    }

    fn env_key(name: &str) -> String {
        name.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }

    /// Built-in defaults, highest priority first.
    pub fn defaults() -> Vec<EngineSettings> {
        vec![
            EngineSettings::new("yt-dlp", 1, 3600),
            EngineSettings::new("aria2", 2, 60),
            EngineSettings::new("http", 3, 30),
            EngineSettings::new("wget", 4, 60),
            EngineSettings::new("curl", 5, 3600),
        ]
    }

    /// Defaults with environment overrides applied, sorted by priority.
    pub fn load() -> Vec<EngineSettings> {
        let mut settings: Vec<EngineSettings> = defaults().into_iter().map(EngineSettings::with_env_overrides).collect();
        settings.sort_by_key(|s| s.priority);
        settings
    }

    /// Engine names in the order they should be tried.
    pub fn names_by_priority(settings: &[EngineSettings]) -> Vec<String> {
        let mut sorted: Vec<&EngineSettings> = settings.iter().filter(|s| s.enabled).collect();
        sorted.sort_by_key(|s| s.priority);
        sorted.into_iter().map(|s| s.name.clone()).collect()
    }
}

/// Download manager configuration
pub mod download {
    use super::{env_parse, Duration};
    use once_cell::sync::Lazy;

    /// Attempts recorded per download before it is considered exhausted
    pub const MAX_RETRIES: u32 = 3;

    /// Progress is logged every N percent
    pub const PROGRESS_LOG_STEP: f64 = 10.0;

    /// Minimum interval between progress updates from the HTTP engine
    pub const PROGRESS_INTERVAL_MS: u64 = 1000;

    /// Wall-clock limit for a single external tool run (6 hours)
    pub const PROCESS_TIMEOUT_SECS: u64 = 6 * 3600;

    /// Timeout for `--version` style probes
    pub const PROBE_TIMEOUT_SECS: u64 = 5;

    pub const USER_AGENT: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    /// Skip TLS certificate verification for direct downloads
    /// Read from ALLOW_INSECURE_TLS, default false
    pub static ALLOW_INSECURE_TLS: Lazy<bool> = Lazy::new(|| env_parse("ALLOW_INSECURE_TLS", false));

    pub fn progress_interval() -> Duration {
        Duration::from_millis(PROGRESS_INTERVAL_MS)
    }

    pub fn process_timeout() -> Duration {
        Duration::from_secs(PROCESS_TIMEOUT_SECS)
    }

    pub fn probe_timeout() -> Duration {
        Duration::from_secs(PROBE_TIMEOUT_SECS)
    }
}

/// Maintenance configuration
pub mod cleanup {
    use super::Duration;

    /// Expired file locks are swept every 5 minutes
    pub const LOCK_SWEEP_INTERVAL_SECS: u64 = 300;

    /// Temp files are swept every hour
    pub const TEMP_SWEEP_INTERVAL_SECS: u64 = 3600;

    /// Temp files older than this are removed
    pub const TEMP_MAX_AGE_HOURS: u64 = 1;

    /// A file lock expires after this long
    pub const LOCK_TTL_SECS: u64 = 3600;

    pub fn lock_sweep_interval() -> Duration {
        Duration::from_secs(LOCK_SWEEP_INTERVAL_SECS)
    }

    pub fn temp_sweep_interval() -> Duration {
        Duration::from_secs(TEMP_SWEEP_INTERVAL_SECS)
    }

    pub fn temp_max_age() -> Duration {
        Duration::from_secs(TEMP_MAX_AGE_HOURS * 3600)
    }

    pub fn lock_ttl() -> Duration {
        Duration::from_secs(LOCK_TTL_SECS)
    }
}

/// Validation configuration
pub mod validation {
    /// Maximum URL length (RFC 7230 recommends 8000, but we use 2048 for safety)
    pub const MAX_URL_LENGTH: usize = 2048;

    /// URL schemes accepted for downloads
    pub const ALLOWED_SCHEMES: &[&str] = &["http", "https", "ftp"];
}
