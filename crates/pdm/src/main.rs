use anyhow::Result;
use dotenvy::dotenv;

use pdm::app;
use pdm::cli::{Cli, Commands};
use pdmcore::core::{config, init_logger};
use pdmcore::download::DownloadOptions;
use pdmcore::setup::{run_setup, DryRunHost, SetupOptions, SystemHost};

/// Main entry point for the download manager
///
/// Parses CLI arguments and dispatches to the subcommand; no subcommand means `run`.
///
/// # Errors
/// Returns an error if initialization fails (logging, database, web server).
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present
    let _ = dotenv();

    // Setup writes its own report to stdout and needs no data directories
    if let Some(Commands::Setup {
        dry_run,
        requirements,
        skip_python,
    }) = cli.command
    {
        let mut options = SetupOptions {
            skip_python,
            ..SetupOptions::default()
        };
        if let Some(path) = requirements {
            options.requirements = path;
        }
        let result = if dry_run {
            run_setup(&DryRunHost::new(SystemHost), &options, &mut std::io::stdout())
        } else {
            run_setup(&SystemHost, &options, &mut std::io::stdout())
        };
        if let Err(e) = result {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
        return Ok(());
    }

    init_logger(&config::LOGS_DIR)?;

    match cli.command {
        Some(Commands::Doctor) => {
            if !app::doctor().await? {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Commands::Download {
            url,
            quality,
            audio,
            filename,
        }) => {
            let options = DownloadOptions {
                quality,
                extract_audio: audio.then_some(true),
                filename,
                ..DownloadOptions::default()
            };
            app::download_once(&url, options).await
        }
        Some(Commands::Cleanup) => app::cleanup_once(),
        Some(Commands::Run) | Some(Commands::Setup { .. }) | None => app::run().await,
    }
}
