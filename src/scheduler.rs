//! Automatic backup scheduling.
//!
//! Parses the `robot.every` interval and drives periodic snapshots on a tokio
//! timer. Deciding *whether* to schedule is left to the caller (`robot.enabled`).

use crate::backup::BackupEngine;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Parse an interval of the form `<N><unit>` where unit is one of `s`, `m`, `h`, `d`.
///
/// Digits and unit letters are separated the lenient way server operators
/// expect: every digit forms the amount, everything else forms the unit, and
/// an unknown unit means days.
pub fn parse_interval(value: &str) -> Result<Duration> {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    let unit: String = value
        .chars()
        .filter(|c| !c.is_ascii_digit())
        .collect::<String>()
        .trim()
        .to_ascii_lowercase();

    let amount: u64 = digits.parse().map_err(|_| Error::InvalidInterval {
        value: value.to_string(),
    })?;
    if amount == 0 {
        return Err(Error::InvalidInterval {
            value: value.to_string(),
        });
    }

    let multiplier = match unit.as_str() {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => 60 * 60 * 24,
    };

    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::InvalidInterval {
            value: value.to_string(),
        })
}

/// Handle to a running periodic backup task
#[derive(Debug)]
pub struct Scheduler {
    interval: Duration,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn a task creating an automatically named snapshot every `interval`.
    ///
    /// The first snapshot happens one full interval after spawning. Failed
    /// runs, including ones rejected because another operation is active,
    /// are logged and the schedule carries on.
    pub fn spawn(engine: Arc<BackupEngine>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match engine.create_snapshot("").await {
                    Ok(report) => info!("Scheduled backup created: {}", report.archive.display()),
                    Err(Error::Busy) => warn!("Skipping scheduled backup, another operation is running"),
                    Err(e) => warn!("Scheduled backup failed: {}", e),
                }
            }
        });

        info!("Automatic backups scheduled every {:?}", interval);
        Self { interval, handle }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the timer so no further runs are started. A backup already in
    /// progress finishes on its worker thread and releases the engine itself.
    pub fn shutdown(self) {
        self.handle.abort();
        info!("Automatic backups stopped");
    }
}

/// Start automatic backups when `robot.enabled` is set.
///
/// Returns `None` when automatic backups are disabled.
pub fn spawn_periodic(engine: Arc<BackupEngine>, interval: Duration) -> Option<Scheduler> {
    if !engine.config().robot.enabled {
        info!("Automatic backups are disabled");
        return None;
    }
    Some(Scheduler::spawn(engine, interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EnginePaths};
    use crate::host::LoggingHost;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn engine(tmp: &TempDir, enabled: bool) -> Arc<BackupEngine> {
        let root = tmp.path().join("server");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("server.properties"), b"motd=hello").unwrap();

        let mut config = Config::default();
        config.compression_method = crate::CompressionMethod::Zip;
        config.robot.enabled = enabled;
        let paths = EnginePaths::new(&root, root.join("plugins/Backup"));
        Arc::new(BackupEngine::new(config, paths, Arc::new(LoggingHost)).unwrap())
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_interval("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_interval("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_interval("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_interval("2H").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_unknown_unit_means_days() {
        assert_eq!(parse_interval("3w").unwrap(), Duration::from_secs(3 * 86_400));
        assert_eq!(parse_interval("1").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_invalid_intervals() {
        assert!(matches!(parse_interval("h"), Err(Error::InvalidInterval { .. })));
        assert!(matches!(parse_interval(""), Err(Error::InvalidInterval { .. })));
        assert!(matches!(parse_interval("0m"), Err(Error::InvalidInterval { .. })));
    }

    #[tokio::test]
    async fn test_disabled_robot_does_not_schedule() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, false);
        assert!(spawn_periodic(engine, Duration::from_millis(10)).is_none());
    }

    #[tokio::test]
    async fn test_periodic_backups_run() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, true);

        let scheduler = spawn_periodic(Arc::clone(&engine), Duration::from_millis(100)).unwrap();
        assert_eq!(scheduler.interval(), Duration::from_millis(100));
        assert!(engine.list_snapshots().unwrap().is_empty());

        time::sleep(Duration::from_millis(600)).await;
        scheduler.shutdown();

        assert!(!engine.list_snapshots().unwrap().is_empty());
    }
}
