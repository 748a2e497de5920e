//! `info` command: storage and engine status.

use crate::BackupEngine;
use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct InfoArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(engine: &BackupEngine, args: InfoArgs) -> Result<()> {
    let status = engine.status()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("==== snapcache ====");
    println!("Running version: {}", status.version);
    println!("State: {}", status.state);
    println!("Compression: {}", status.compression);
    println!("Backups: {}", status.archive_count);
    println!("Backups used storage: {} MB", status.backup_bytes / (1024 * 1024));
    println!(
        "Cache: {} files, {} MB",
        status.cached_files,
        status.cache_bytes / (1024 * 1024)
    );

    Ok(())
}
