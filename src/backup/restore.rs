use super::{EngineState, Shared};
use crate::archive::{detect_backend, safe_join, ExtractedSet, ProvenanceRecord};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of reconciling an extracted archive into the working tree
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    pub archive: PathBuf,
    /// Files copied from the extracted archive body
    pub from_archive: usize,
    /// Files placed from the content cache
    pub from_cache: usize,
    /// Files that could not be placed, by root-relative name
    pub failed: Vec<String>,
}

pub(super) fn run(shared: &Shared, archive: &Path) -> Result<RestoreReport> {
    let backend = detect_backend(archive)?;
    let staging = tempfile::Builder::new().prefix("backup_restore").tempdir()?;
    debug!("Extracting {} into {}", archive.display(), staging.path().display());

    let extracted = backend.extract(archive, staging.path())?;
    info!(
        "Extracted {} files and {} references",
        extracted.files.len(),
        extracted.references.len()
    );

    shared.set_state(EngineState::Reconciling);
    let mut report = RestoreReport {
        archive: archive.to_path_buf(),
        ..Default::default()
    };
    let mut handled: HashSet<&str> = HashSet::new();

    for record in &extracted.references {
        handled.insert(record.filename.as_str());
        match place_cached(shared, record, &extracted, staging.path()) {
            Ok(Source::Cache) => report.from_cache += 1,
            Ok(Source::Archive) => report.from_archive += 1,
            Err(e) => {
                warn!("Failed to restore {}: {}", record.filename, e);
                report.failed.push(record.filename.clone());
            }
        }
    }

    for name in &extracted.files {
        if handled.contains(name.as_str()) {
            continue;
        }
        match copy_into_tree(shared, &staging.path().join(name), name) {
            Ok(()) => report.from_archive += 1,
            Err(e) => {
                warn!("Failed to restore {}: {}", name, e);
                report.failed.push(name.clone());
            }
        }
    }

    if let Err(e) = staging.close() {
        warn!("Failed to remove staging directory: {}", e);
    }
    Ok(report)
}

enum Source {
    Cache,
    Archive,
}

/// Place a cache-managed file. The cached copy is used when it matches the
/// recorded hash; otherwise an archived body wins, and a mismatched cached
/// copy is the last resort.
fn place_cached(
    shared: &Shared,
    record: &ProvenanceRecord,
    extracted: &ExtractedSet,
    staging: &Path,
) -> Result<Source> {
    let target = target_path(shared, &record.filename)?;
    let cached = shared.cache.entry(&record.filename);

    if let Some(entry) = &cached {
        if entry.hash == record.hash {
            shared.cache.restore_to(&record.filename, &target)?;
            return Ok(Source::Cache);
        }
    }

    if extracted.files.iter().any(|f| f == &record.filename) {
        debug!("Cached copy of {} does not match, using archived body", record.filename);
        copy_into_tree(shared, &staging.join(&record.filename), &record.filename)?;
        return Ok(Source::Archive);
    }

    match cached {
        Some(entry) => {
            warn!(
                "Cached {} is {} but the archive recorded {}, restoring it anyway",
                record.filename,
                entry.hash.short(),
                record.hash.short()
            );
            shared.cache.restore_to(&record.filename, &target)?;
            Ok(Source::Cache)
        }
        None => Err(Error::CacheMiss {
            filename: record.filename.clone(),
        }),
    }
}

fn copy_into_tree(shared: &Shared, source: &Path, name: &str) -> Result<()> {
    let target = target_path(shared, name)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, &target)?;
    Ok(())
}

fn target_path(shared: &Shared, name: &str) -> Result<PathBuf> {
    safe_join(&shared.paths.root, name).ok_or_else(|| Error::InvalidName {
        name: name.to_string(),
    })
}
