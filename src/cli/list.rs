//! `list` command: show available backups.

use crate::BackupEngine;
use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct ListArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(engine: &BackupEngine, args: ListArgs) -> Result<()> {
    let snapshots = engine.list_snapshots()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    println!("==== Available backups ====");
    if snapshots.is_empty() {
        println!("It seems like you don't have any backups!");
        return Ok(());
    }

    for snapshot in &snapshots {
        let created = snapshot
            .modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "Name: {}, Size: {}mb, Created at: {}",
            snapshot.name,
            snapshot.size / (1024 * 1024),
            created
        );
    }

    Ok(())
}
