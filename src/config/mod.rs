mod stow_config;
mod logging_config;
pub mod config;

use std::path::PathBuf;

use clap::Parser;

pub use config::{Config, ConfigError};
pub use logging_config::LoggingConfig;
pub use stow_config::StowConfig;

/// Command line of the `stowrs` binary
#[derive(Debug, Parser)]
#[command(name = "stowrs", version, about = "Upload DICOM files to a STOW-RS service")]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override the STOW-RS endpoint from the configuration
    #[arg(long)]
    pub url: Option<String>,

    /// DICOM Part 10 files to upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}
