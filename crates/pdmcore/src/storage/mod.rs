//! Persistence: SQLite database and the on-disk file manager

pub mod db;
pub mod files;
pub mod migrations;

pub use db::{create_pool, get_connection, DbConnection, DbPool};
pub use files::{FileDirs, FileManager};
