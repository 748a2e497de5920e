//! `watch` command: run automatic backups in the foreground.

use crate::scheduler;
use crate::BackupEngine;
use anyhow::{bail, Result};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args)]
pub struct WatchArgs {
    /// Also re-hash cached files every hour
    #[arg(long)]
    pub refresh_cache: bool,
}

pub async fn run(engine: BackupEngine, args: WatchArgs) -> Result<()> {
    let interval = engine.config().backup_interval()?;
    let engine = Arc::new(engine);

    let Some(scheduler) = scheduler::spawn_periodic(Arc::clone(&engine), interval) else {
        bail!("Automatic backups are disabled (robot.enabled is false)");
    };
    println!("Backing up every {:?}, press Ctrl-C to stop", scheduler.interval());

    let refresher = args.refresh_cache.then(|| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60 * 60));
            loop {
                ticker.tick().await;
                match engine.refresh_cache().await {
                    Ok(copied) => tracing::debug!("Cache refresh updated {} files", copied),
                    Err(e) => tracing::warn!("Cache refresh failed: {}", e),
                }
            }
        })
    });

    tokio::signal::ctrl_c().await?;

    scheduler.shutdown();
    if let Some(handle) = refresher {
        handle.abort();
    }
    Ok(())
}
