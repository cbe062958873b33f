//! Logging initialization
//!
//! Console output plus one file per concern:
//! - `main.log`: everything at Info and above
//! - `errors.log`: errors only
//! - `downloader.log`, `database.log`, `telegram.log`: filtered by module target

use anyhow::Result;
use simplelog::*;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Component log files and the module target each one accepts.
const COMPONENT_LOGS: &[(&str, &str)] = &[
    ("downloader.log", "pdmcore::download"),
    ("database.log", "pdmcore::storage"),
    ("telegram.log", "pdm::telegram"),
];

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open log file {}: {}", path.display(), e))
}

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_dir` - Directory receiving the log files (created if missing)
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to create a file or a logger was already set
pub fn init_logger(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log directory {}: {}", log_dir.display(), e))?;

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), open_append(&log_dir.join("main.log"))?),
        WriteLogger::new(
            LevelFilter::Error,
            Config::default(),
            open_append(&log_dir.join("errors.log"))?,
        ),
    ];

    for (file_name, target) in COMPONENT_LOGS {
        let config = ConfigBuilder::new().add_filter_allow_str(target).build();
        loggers.push(WriteLogger::new(
            LevelFilter::Debug,
            config,
            open_append(&log_dir.join(file_name))?,
        ));
    }

    CombinedLogger::init(loggers).map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Names of every file `init_logger` writes, for log export.
pub fn log_file_names() -> Vec<&'static str> {
    let mut names = vec!["main.log", "errors.log"];
    names.extend(COMPONENT_LOGS.iter().map(|(name, _)| *name));
    names
}

/// Log a framed section header
pub fn log_section(title: &str) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("{}", title);
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
