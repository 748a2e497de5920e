//! Backup engine: composes enumeration, caching, archiving and retention into
//! `create_snapshot`, and extraction plus cache reconciliation into
//! `restore_snapshot`.
//!
//! Only one operation runs at a time. A second request while one is in flight
//! fails fast with [`Error::Busy`].

mod create;
mod restore;

pub use create::SnapshotReport;
pub use restore::RestoreReport;

use crate::cache::ContentCache;
use crate::config::{CompressionMethod, Config, EnginePaths};
use crate::host::Host;
use crate::{retention, Error, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, span, warn, Level};
use walkdir::WalkDir;

/// Stage the engine is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Quiescing,
    Enumerating,
    Caching,
    Archiving,
    Pruning,
    Extracting,
    Reconciling,
    SignalingRestart,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Quiescing => "quiescing",
            EngineState::Enumerating => "enumerating",
            EngineState::Caching => "caching",
            EngineState::Archiving => "archiving",
            EngineState::Pruning => "pruning",
            EngineState::Extracting => "extracting",
            EngineState::Reconciling => "reconciling",
            EngineState::SignalingRestart => "signaling restart",
        };
        f.write_str(name)
    }
}

/// An archive present in the backup directory
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
}

/// Storage and activity summary
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub state: EngineState,
    pub compression: CompressionMethod,
    pub archive_count: usize,
    /// Bytes used by everything in the backup directory
    pub backup_bytes: u64,
    pub cached_files: usize,
    pub cache_bytes: u64,
}

/// State shared with the blocking worker threads
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) paths: EnginePaths,
    pub(crate) cache: ContentCache,
    state: Mutex<EngineState>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        debug!("Engine state -> {}", state);
        *self.lock_state() = state;
    }
}

/// Holds the single operation slot; releases it back to `Idle` on drop
struct OperationGuard {
    shared: Arc<Shared>,
}

impl OperationGuard {
    fn acquire(shared: &Arc<Shared>, first: EngineState) -> Result<Self> {
        let mut state = shared.lock_state();
        if *state != EngineState::Idle {
            return Err(Error::Busy);
        }
        *state = first;
        drop(state);

        Ok(Self {
            shared: Arc::clone(shared),
        })
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.shared.set_state(EngineState::Idle);
    }
}

pub struct BackupEngine {
    shared: Arc<Shared>,
    host: Arc<dyn Host>,
}

impl BackupEngine {
    /// Create an engine. The configuration is validated once here and never re-read.
    pub fn new(config: Config, paths: EnginePaths, host: Arc<dyn Host>) -> Result<Self> {
        config.validate()?;
        let paths = paths.resolve()?;
        let cache = ContentCache::open(&paths.cache_dir)?;

        info!(
            "Backup engine ready: root {}, backups in {}",
            paths.root.display(),
            paths.backup_dir.display()
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                paths,
                cache,
                state: Mutex::new(EngineState::Idle),
            }),
            host,
        })
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn paths(&self) -> &EnginePaths {
        &self.shared.paths
    }

    pub fn cache(&self) -> &ContentCache {
        &self.shared.cache
    }

    pub fn state(&self) -> EngineState {
        *self.shared.lock_state()
    }

    /// Create a snapshot named `name`, or `backup_<yyyyMMdd_HHmmss>` when blank.
    ///
    /// The host is quiesced on the calling task before any file is read; the
    /// rest of the pipeline runs on a blocking worker thread. The worker owns
    /// the operation slot and resumes the host itself, so dropping the returned
    /// future does not release the engine while files are still being written.
    pub async fn create_snapshot(&self, name: &str) -> Result<SnapshotReport> {
        let span = span!(Level::INFO, "create_snapshot", name = %name);
        let guard = OperationGuard::acquire(&self.shared, EngineState::Quiescing)?;

        self.host.quiesce();

        let shared = Arc::clone(&self.shared);
        let host = Arc::clone(&self.host);
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            let result = create::run(&shared, &name, Local::now());
            host.resume();
            drop(guard);

            match &result {
                Ok(report) => info!("Created backup at {}", report.archive.display()),
                Err(e) => warn!("Error creating backup: {}", e),
            }
            result
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))?
    }

    /// Restore the working tree from `archive_path` and ask the host to restart.
    pub async fn restore_snapshot<P: AsRef<Path>>(&self, archive_path: P) -> Result<RestoreReport> {
        let archive_path = archive_path.as_ref().to_path_buf();
        if !archive_path.is_file() {
            return Err(Error::NotFound { path: archive_path });
        }

        let span = span!(Level::INFO, "restore_snapshot", archive = %archive_path.display());
        let guard = OperationGuard::acquire(&self.shared, EngineState::Extracting)?;

        let shared = Arc::clone(&self.shared);
        let host = Arc::clone(&self.host);
        tokio::task::spawn_blocking(move || -> Result<RestoreReport> {
            let _enter = span.enter();
            let report = restore::run(&shared, &archive_path)?;

            shared.set_state(EngineState::SignalingRestart);
            let kick = &shared.config.kick;
            if kick.enabled {
                host.disconnect_sessions(&kick.message);
            }
            host.request_restart();
            drop(guard);

            info!(
                "Restored {} files from archive and {} from cache",
                report.from_archive, report.from_cache
            );
            Ok(report)
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))?
    }

    /// Re-hash every cacheable file and refresh changed cache entries.
    ///
    /// Returns the number of files copied into the cache.
    pub async fn refresh_cache(&self) -> Result<usize> {
        let guard = OperationGuard::acquire(&self.shared, EngineState::Caching)?;
        let shared = Arc::clone(&self.shared);

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let mut copied = 0;
            for filename in shared.config.cacheable_files() {
                let source = shared.paths.root.join(&filename);
                if !source.is_file() {
                    continue;
                }
                match shared.cache.update(&filename, &source) {
                    Ok(update) if update.copied => copied += 1,
                    Ok(_) => {}
                    Err(e) => warn!("Failed to update cache for {}: {}", filename, e),
                }
            }
            copied
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))
    }

    /// Archives in the backup directory, newest name first
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        let archives = retention::list_archives(&self.shared.paths.backup_dir)?;

        Ok(archives
            .into_iter()
            .map(|path| {
                let metadata = fs::metadata(&path).ok();
                SnapshotInfo {
                    name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    size: metadata.as_ref().map(|m| m.len()).unwrap_or(0),
                    modified: metadata
                        .and_then(|m| m.modified().ok())
                        .map(DateTime::<Local>::from),
                    path,
                }
            })
            .collect())
    }

    /// Resolve an archive file name against the backup directory
    pub fn archive_path(&self, file_name: &str) -> PathBuf {
        self.shared.paths.backup_dir.join(file_name)
    }

    pub fn status(&self) -> Result<EngineStatus> {
        let archive_count = retention::list_archives(&self.shared.paths.backup_dir)?.len();

        Ok(EngineStatus {
            version: crate::VERSION,
            state: self.state(),
            compression: self.shared.config.compression_method,
            archive_count,
            backup_bytes: dir_size(&self.shared.paths.backup_dir),
            cached_files: self.shared.cache.entries().len(),
            cache_bytes: self.shared.cache.size(),
        })
    }
}

/// Archive file name for a snapshot request
pub fn archive_file_name(name: &str, method: CompressionMethod, now: DateTime<Local>) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(format!(
            "backup_{}.{}",
            now.format("%Y%m%d_%H%M%S"),
            method.extension()
        ));
    }

    if name.contains(|c| c == '/' || c == '\\') || name == "." || name == ".." {
        return Err(Error::InvalidName {
            name: name.to_string(),
        });
    }

    if crate::archive::is_archive_name(name) {
        Ok(name.to_string())
    } else {
        Ok(format!("{}.{}", name, method.extension()))
    }
}

fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LoggingHost;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn engine(tmp: &TempDir) -> BackupEngine {
        let root = tmp.path().join("server");
        fs::create_dir_all(&root).unwrap();
        let paths = EnginePaths::new(&root, root.join("plugins/Backup"));
        BackupEngine::new(Config::default(), paths, Arc::new(LoggingHost)).unwrap()
    }

    #[test]
    fn test_archive_file_name() {
        let now = Local.with_ymd_and_hms(2025, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(
            archive_file_name("", CompressionMethod::SevenZip, now).unwrap(),
            "backup_20250307_090501.7z"
        );
        assert_eq!(
            archive_file_name("  ", CompressionMethod::Zip, now).unwrap(),
            "backup_20250307_090501.zip"
        );
        assert_eq!(
            archive_file_name("before-update", CompressionMethod::Zip, now).unwrap(),
            "before-update.zip"
        );
        assert_eq!(
            archive_file_name("manual.7z", CompressionMethod::Zip, now).unwrap(),
            "manual.7z"
        );
        assert!(matches!(
            archive_file_name("../escape", CompressionMethod::Zip, now),
            Err(Error::InvalidName { .. })
        ));
    }

    #[test]
    fn test_operation_slot_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);

        let guard = OperationGuard::acquire(&engine.shared, EngineState::Quiescing).unwrap();
        assert_eq!(engine.state(), EngineState::Quiescing);
        assert!(matches!(
            OperationGuard::acquire(&engine.shared, EngineState::Extracting),
            Err(Error::Busy)
        ));

        drop(guard);
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(OperationGuard::acquire(&engine.shared, EngineState::Extracting).is_ok());
    }

    #[tokio::test]
    async fn test_busy_engine_rejects_requests() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        let _held = OperationGuard::acquire(&engine.shared, EngineState::Archiving).unwrap();

        assert!(matches!(engine.create_snapshot("x").await, Err(Error::Busy)));
        assert!(matches!(engine.refresh_cache().await, Err(Error::Busy)));

        let archive = tmp.path().join("a.zip");
        fs::write(&archive, b"PK").unwrap();
        assert!(matches!(engine.restore_snapshot(&archive).await, Err(Error::Busy)));
    }

    #[tokio::test]
    async fn test_restore_missing_archive() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        let result = engine.restore_snapshot(tmp.path().join("nope.zip")).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_status_and_listing() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        fs::write(engine.archive_path("backup_20250101_000000.zip"), b"12345").unwrap();
        fs::write(engine.archive_path("backup_20250102_000000.7z"), b"123").unwrap();

        let listed = engine.list_snapshots().unwrap();
        let names: Vec<&str> = listed.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["backup_20250102_000000.7z", "backup_20250101_000000.zip"]);
        assert_eq!(listed[1].size, 5);
        assert!(listed[0].modified.is_some());

        let status = engine.status().unwrap();
        assert_eq!(status.archive_count, 2);
        assert_eq!(status.backup_bytes, 8);
        assert_eq!(status.state, EngineState::Idle);
    }

    /// Host whose `resume` blocks until the test opens the gate
    struct GatedHost {
        calls: Mutex<Vec<&'static str>>,
        gate: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl Host for GatedHost {
        fn quiesce(&self) {
            self.calls.lock().unwrap().push("quiesce");
        }

        fn resume(&self) {
            self.calls.lock().unwrap().push("resume");
            let _ = self.gate.lock().unwrap().recv();
        }

        fn disconnect_sessions(&self, _message: &str) {}

        fn request_restart(&self) {}
    }

    #[tokio::test]
    async fn test_dropped_snapshot_keeps_slot_until_work_ends() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("server");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("server.properties"), b"motd=hello").unwrap();

        let (open_gate, gate) = std::sync::mpsc::channel();
        let host = Arc::new(GatedHost {
            calls: Mutex::new(Vec::new()),
            gate: Mutex::new(gate),
        });
        let mut config = Config::default();
        config.compression_method = CompressionMethod::Zip;
        let paths = EnginePaths::new(&root, root.join("plugins/Backup"));
        let engine = BackupEngine::new(config, paths, host.clone()).unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), engine.create_snapshot("first")).await;
        assert!(abandoned.is_err());

        // the worker is parked in `resume`, still holding the slot
        assert_ne!(engine.state(), EngineState::Idle);
        assert!(matches!(engine.create_snapshot("second").await, Err(Error::Busy)));

        open_gate.send(()).unwrap();
        for _ in 0..200 {
            if engine.state() == EngineState::Idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(*host.calls.lock().unwrap(), vec!["quiesce", "resume"]);
        assert!(engine.archive_path("first.zip").is_file());
        assert!(!engine.archive_path("second.zip").exists());
    }
}
