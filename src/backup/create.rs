use super::{archive_file_name, EngineState, Shared};
use crate::archive::{backend_for, ArchiveEntry, ProvenanceRecord};
use crate::exclude::{normalize, ExclusionSet};
use crate::retention;
use crate::scanner::TreeScanner;
use crate::Result;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a successful snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    pub archive: PathBuf,
    /// Regular files stored in the archive body
    pub files: usize,
    /// Reference entries written for cached files
    pub references: Vec<String>,
    /// Cached files whose content changed and was copied into the cache
    pub cache_copies: usize,
    /// Files that could not be read and were left out
    pub skipped: Vec<String>,
    pub pruned: Vec<PathBuf>,
}

pub(super) fn run(shared: &Shared, name: &str, now: DateTime<Local>) -> Result<SnapshotReport> {
    let config = &shared.config;
    let paths = &shared.paths;

    shared.set_state(EngineState::Enumerating);
    let file_name = archive_file_name(name, config.compression_method, now)?;
    fs::create_dir_all(&paths.backup_dir)?;

    let exclusions = exclusion_set(shared);
    let scan = TreeScanner::new(&paths.root, &exclusions)
        .with_cacheable(config.cacheable_files())
        .skip_dir(&paths.cache_dir)
        .skip_dir(&paths.backup_dir)
        .scan()?;
    info!(
        "Found {} files to archive, {} cacheable",
        scan.body.len(),
        scan.cacheable.len()
    );

    shared.set_state(EngineState::Caching);
    let mut body = scan.body;
    let mut references = Vec::new();
    let mut cache_copies = 0;
    for candidate in scan.cacheable {
        match shared.cache.update(&candidate.filename, &candidate.path) {
            Ok(update) => {
                if update.copied {
                    cache_copies += 1;
                }
                references.push(ProvenanceRecord::new(candidate.filename, update.entry.hash));
            }
            Err(e) => {
                // Keep the file in the snapshot even though it could not be cached.
                warn!("Failed to cache {}, archiving it instead: {}", candidate.filename, e);
                body.push(ArchiveEntry {
                    source: candidate.path,
                    name: candidate.filename,
                });
            }
        }
    }

    shared.set_state(EngineState::Archiving);
    let backend = backend_for(config.compression_method);
    let archive = paths.backup_dir.join(&file_name);
    let partial = partial_path(&archive);

    let summary = match backend.write(&partial, &body, &references) {
        Ok(summary) => summary,
        Err(e) => {
            discard(&partial);
            return Err(e);
        }
    };
    if let Err(e) = fs::rename(&partial, &archive) {
        discard(&partial);
        return Err(e.into());
    }
    debug!("Archive {} complete", archive.display());

    shared.set_state(EngineState::Pruning);
    let pruned = match retention::prune(&paths.backup_dir, config.robot.max) {
        Ok(report) => report.deleted,
        Err(e) => {
            warn!("Failed to prune old backups: {}", e);
            Vec::new()
        }
    };

    Ok(SnapshotReport {
        archive,
        files: summary.files,
        references: references.into_iter().map(|r| r.filename).collect(),
        cache_copies,
        skipped: summary.skipped,
        pruned,
    })
}

/// Configured patterns plus the engine's own directories when they live inside the tree
fn exclusion_set(shared: &Shared) -> ExclusionSet {
    let paths = &shared.paths;
    let mut patterns = shared.config.optimizations.exclude.clone();

    for dir in [&paths.cache_dir, &paths.backup_dir] {
        if let Ok(relative) = dir.strip_prefix(&paths.root) {
            let relative = normalize(relative);
            if !relative.is_empty() {
                patterns.push(format!("{}/*", relative));
            }
        }
    }

    ExclusionSet::compile(patterns)
}

fn partial_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn discard(partial: &Path) {
    if let Err(e) = fs::remove_file(partial) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial archive {}: {}", partial.display(), e);
        }
    }
}
