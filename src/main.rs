use anyhow::Context;
use clap::Parser;
use stowrs::config::{Cli, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(url) = cli.url {
        config.stow.url = url;
        config.validate()?;
    }
    stowrs::logging::init(&config.logging).context("initializing logging")?;

    tracing::info!("Uploading {} file(s) to {}", cli.files.len(), config.stow.url);
    let state = stowrs::run(&config, &cli.files).await?;
    println!("{}", state);

    if state.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("store did not complete successfully: {}", state.status())
    }
}
