use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pdm")]
#[command(author, version, about = "Professional Download Manager: multi-engine downloads, web API and Telegram channel upload", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the web API, download manager and Telegram uploader (default)
    Run,

    /// Install system dependencies and verify the toolchain
    Setup {
        /// Print the commands instead of running them
        #[arg(long)]
        dry_run: bool,

        /// Python requirements file
        #[arg(short, long)]
        requirements: Option<PathBuf>,

        /// Skip installing Python requirements
        #[arg(long)]
        skip_python: bool,
    },

    /// Check tools, directories and the database
    Doctor,

    /// Download one URL in the foreground
    Download {
        url: String,

        /// yt-dlp format selector
        #[arg(short, long)]
        quality: Option<String>,

        /// Extract mp3 audio
        #[arg(short, long)]
        audio: bool,

        /// Output file name
        #[arg(short, long)]
        filename: Option<String>,
    },

    /// Run maintenance once: expired locks and old temp files
    Cleanup,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
