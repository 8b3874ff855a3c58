mod cli;
mod commands;
mod logging;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use crate::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_path = logging::init()?;
    info!("log report available: {}", log_path.display());

    let outcome = commands::run(cli.command);
    if let Err(err) = &outcome {
        error!("{err:#}");
    }
    info!("log report available: {}", log_path.display());
    outcome
}
