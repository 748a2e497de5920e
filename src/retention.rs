//! Retention of snapshot archives.
//!
//! Archives are ordered by file name alone. Generated names use a fixed-width
//! `backup_yyyyMMdd_HHmmss` timestamp, so descending lexicographic order is
//! newest first. Custom names take part in the same ordering.

use crate::archive::is_archive_name;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome of a prune pass
#[derive(Debug, Default)]
pub struct PruneReport {
    pub kept: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, std::io::Error)>,
}

/// List archives in `backup_dir`, sorted by name descending
pub fn list_archives<P: AsRef<Path>>(backup_dir: P) -> Result<Vec<PathBuf>> {
    let backup_dir = backup_dir.as_ref();
    if !backup_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut archives: Vec<PathBuf> = fs::read_dir(backup_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(is_archive_name)
                .unwrap_or(false)
        })
        .collect();

    archives.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(archives)
}

/// Keep the `max_count` greatest-named archives and delete the rest.
///
/// Deletion failures are collected per file and do not stop the pass.
pub fn prune<P: AsRef<Path>>(backup_dir: P, max_count: usize) -> Result<PruneReport> {
    prune_with(backup_dir, max_count, |path| fs::remove_file(path))
}

/// [`prune`] with a custom deletion step
pub fn prune_with<P, F>(backup_dir: P, max_count: usize, mut remove: F) -> Result<PruneReport>
where
    P: AsRef<Path>,
    F: FnMut(&Path) -> std::io::Result<()>,
{
    let mut archives = list_archives(backup_dir)?;
    let mut report = PruneReport::default();

    if archives.len() > max_count {
        for path in archives.split_off(max_count) {
            match remove(&path) {
                Ok(()) => {
                    info!("Removed old backup {}", path.display());
                    report.deleted.push(path);
                }
                Err(e) => {
                    warn!("Failed to remove old backup {}: {}", path.display(), e);
                    report.failed.push((path, e));
                }
            }
        }
    }

    report.kept = archives;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_keeps_greatest_names() {
        let tmp = TempDir::new().unwrap();
        for stamp in ["20250101_000000", "20250102_000000", "20250103_000000", "20250104_000000", "20250105_000000"] {
            fs::write(tmp.path().join(format!("backup_{}.zip", stamp)), b"x").unwrap();
        }
        fs::write(tmp.path().join("notes.txt"), b"keep me").unwrap();
        fs::write(tmp.path().join("backup_20250106_000000.7z.part"), b"in progress").unwrap();

        let report = prune(tmp.path(), 3).unwrap();
        assert_eq!(
            names(&report.kept),
            vec![
                "backup_20250105_000000.zip",
                "backup_20250104_000000.zip",
                "backup_20250103_000000.zip"
            ]
        );
        assert_eq!(report.deleted.len(), 2);
        assert!(report.failed.is_empty());
        assert!(!tmp.path().join("backup_20250101_000000.zip").exists());
        assert!(tmp.path().join("notes.txt").exists());
        assert!(tmp.path().join("backup_20250106_000000.7z.part").exists());
    }

    #[test]
    fn test_fewer_than_max() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("backup_20250101_000000.7z"), b"x").unwrap();

        let report = prune(tmp.path(), 5).unwrap();
        assert_eq!(report.kept.len(), 1);
        assert!(report.deleted.is_empty());
    }

    #[test]
    fn test_custom_names_count_toward_retention() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("backup_20250101_000000.zip"), b"x").unwrap();
        fs::write(tmp.path().join("backup_20250102_000000.zip"), b"x").unwrap();
        fs::write(tmp.path().join("Before-update.zip"), b"x").unwrap();

        // uppercase sorts below "backup_", so the manual archive goes first
        let report = prune(tmp.path(), 2).unwrap();
        assert_eq!(names(&report.deleted), vec!["Before-update.zip"]);
        assert!(tmp.path().join("backup_20250101_000000.zip").exists());
    }

    #[test]
    fn test_failed_deletion_does_not_stop_pass() {
        let tmp = TempDir::new().unwrap();
        for day in 1..=4 {
            fs::write(tmp.path().join(format!("backup_2025010{}_000000.zip", day)), b"x").unwrap();
        }

        let report = prune_with(tmp.path(), 1, |path| {
            if path.ends_with("backup_20250102_000000.zip") {
                Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"))
            } else {
                fs::remove_file(path)
            }
        })
        .unwrap();

        assert_eq!(names(&report.kept), vec!["backup_20250104_000000.zip"]);
        assert_eq!(
            names(&report.deleted),
            vec!["backup_20250103_000000.zip", "backup_20250101_000000.zip"]
        );
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].0.ends_with("backup_20250102_000000.zip"));
        assert!(tmp.path().join("backup_20250102_000000.zip").exists());
    }

    #[test]
    fn test_missing_dir() {
        assert!(list_archives("/no/such/backups").unwrap().is_empty());
    }
}
