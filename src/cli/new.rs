//! `new` command: create a backup.

use crate::BackupEngine;
use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct NewArgs {
    /// Backup name; a timestamped name is generated when omitted
    pub name: Option<String>,
}

pub async fn run(engine: &BackupEngine, args: NewArgs) -> Result<()> {
    println!("Creating backup (expect some small overload)...");

    let report = engine
        .create_snapshot(args.name.as_deref().unwrap_or(""))
        .await?;

    println!("Backup complete: {}", report.archive.display());
    println!("  Files archived: {}", report.files);
    println!(
        "  Cached files referenced: {} ({} updated)",
        report.references.len(),
        report.cache_copies
    );
    if !report.skipped.is_empty() {
        println!("  Skipped (unreadable): {}", report.skipped.len());
    }
    for pruned in &report.pruned {
        println!("  Removed old backup: {}", pruned.display());
    }

    Ok(())
}
