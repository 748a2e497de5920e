//! Logging setup for the snapcache binary.
//!
//! `RUST_LOG` overrides the level picked by `--verbose`.

use crate::Result;
use std::fs::OpenOptions;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("snapcache=debug")
        } else {
            EnvFilter::new("snapcache=info")
        }
    })
}

pub fn init_logging(verbose: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

pub fn init_file_logging(log_file: &Path, verbose: bool) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}
