use std::fmt;

/// Structured error type for a single engine attempt.
///
/// The download manager records `subcategory()` in engine statistics and
/// moves on to the next engine on any variant except `Cancelled`.
#[derive(Debug)]
pub enum DownloadError {
    /// Engine binary missing or failed to start
    ToolMissing(String),
    /// Engine does not accept this URL
    Unsupported(String),
    /// External tool exited with an error
    Process(String),
    /// HTTP status or transport failure
    Http(String),
    /// Attempt exceeded its time limit
    Timeout(String),
    /// Expected output file not found after the engine finished
    FileNotFound(String),
    /// Local filesystem failure
    Io(String),
    /// Stopped by pause or cancel
    Cancelled,
    /// Catch-all for uncategorized errors
    Other(String),
}

const CANCELLED_MESSAGE: &str = "Download cancelled";

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for DownloadError {}

impl DownloadError {
    /// Returns subcategory for engine statistics
    pub fn subcategory(&self) -> &'static str {
        match self {
            DownloadError::ToolMissing(_) => "tool_missing",
            DownloadError::Unsupported(_) => "unsupported",
            DownloadError::Process(_) => "process",
            DownloadError::Http(_) => "http",
            DownloadError::Timeout(_) => "timeout",
            DownloadError::FileNotFound(_) => "file_not_found",
            DownloadError::Io(_) => "io",
            DownloadError::Cancelled => "cancelled",
            DownloadError::Other(_) => "other",
        }
    }

    /// Returns the inner message
    pub fn message(&self) -> &str {
        match self {
            DownloadError::ToolMissing(msg)
            | DownloadError::Unsupported(msg)
            | DownloadError::Process(msg)
            | DownloadError::Http(msg)
            | DownloadError::Timeout(msg)
            | DownloadError::FileNotFound(msg)
            | DownloadError::Io(msg)
            | DownloadError::Other(msg) => msg,
            DownloadError::Cancelled => CANCELLED_MESSAGE,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        DownloadError::Io(e.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DownloadError::Timeout(e.to_string())
        } else {
            DownloadError::Http(e.to_string())
        }
    }
}

/// Plain strings become `DownloadError::Other`
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        DownloadError::Other(s)
    }
}

impl From<&str> for DownloadError {
    fn from(s: &str) -> Self {
        DownloadError::Other(s.to_string())
    }
}
