//! Downloads: engines, naming, records and the manager that ties them together.

pub mod engine;
pub mod error;
pub mod manager;
pub mod naming;
pub mod types;

pub use engine::{DownloadEngine, EngineManager, EngineOutput, EngineProgress, EngineRequest};
pub use error::DownloadError;
pub use manager::{DownloadListener, DownloadManager, ManagerSettings};
pub use types::{DownloadOptions, DownloadRecord, DownloadStats, DownloadStatus};
