//! `load` command: restore a backup.

use crate::BackupEngine;
use anyhow::{bail, Result};
use clap::Args;

#[derive(Args)]
pub struct LoadArgs {
    /// Backup file name inside the backup directory
    pub file: String,
}

pub async fn run(engine: &BackupEngine, args: LoadArgs) -> Result<()> {
    let archive = engine.archive_path(&args.file);
    if !archive.is_file() {
        bail!("Backup file not found: {}", args.file);
    }

    println!("Loading backup {}...", args.file);
    let report = engine.restore_snapshot(&archive).await?;

    println!("Backup loaded successfully!");
    println!("  From archive: {}", report.from_archive);
    println!("  From cache: {}", report.from_cache);
    if !report.failed.is_empty() {
        println!("  Failed: {}", report.failed.join(", "));
    }

    Ok(())
}
