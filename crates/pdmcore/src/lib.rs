//! PDM core - host setup, multi-engine downloads and storage for the
//! Professional Download Manager.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, platform detection, process and retry helpers
//! - `setup`: host setup (OS detection, package manager, installer, verification, doctor)
//! - `download`: download engines, naming and the download manager
//! - `storage`: SQLite persistence and the file manager
//!
//! Telegram upload and the web API live in the `pdm` binary crate.

pub mod core;
pub mod download;
pub mod setup;
pub mod storage;

// Re-export commonly used types for convenience
pub use crate::core::{config, AppError, AppResult};
pub use download::{DownloadListener, DownloadManager, EngineManager};
pub use storage::{create_pool, get_connection, DbConnection, DbPool, FileManager};
