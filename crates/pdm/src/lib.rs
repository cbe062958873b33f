//! PDM - the `pdm` binary's application layer.
//!
//! # Module Structure
//!
//! - `app`: startup, background maintenance and shutdown
//! - `cli`: command line arguments
//! - `server`: axum web API with Basic auth
//! - `settings`: user-editable settings stored in the database
//! - `telegram`: upload queue and the channel upload worker

pub mod app;
pub mod cli;
pub mod server;
pub mod settings;
pub mod telegram;

pub use server::{router, AppState, Credentials};
pub use telegram::TelegramUploader;
