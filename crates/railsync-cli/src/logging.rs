use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

/// Install the global subscriber: INFO and up on stderr for the operator,
/// DEBUG and up in a per-process file that CI can archive. Returns the log
/// file path so the entry point can announce it at start and exit.
pub fn init() -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("railsync-{}.log", std::process::id()));
    let file = File::create(&path)
        .with_context(|| format!("cannot create log file {}", path.display()))?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::INFO);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(path)
}
