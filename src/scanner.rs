//! Working tree enumeration.
//!
//! Walks the live tree once and splits it into files destined for the archive
//! body and files that go through the content cache instead.

use crate::archive::ArchiveEntry;
use crate::exclude::{normalize, ExclusionSet};
use crate::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A cacheable file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheCandidate {
    pub filename: String,
    pub path: PathBuf,
}

/// Result of a single tree walk
#[derive(Debug, Default)]
pub struct TreeScan {
    pub body: Vec<ArchiveEntry>,
    pub cacheable: Vec<CacheCandidate>,
    pub excluded: usize,
    /// Entries that could not be read during the walk
    pub errors: usize,
}

pub struct TreeScanner<'a> {
    root: PathBuf,
    exclusions: &'a ExclusionSet,
    cacheable: HashSet<String>,
    skip_dirs: Vec<PathBuf>,
}

impl<'a> TreeScanner<'a> {
    pub fn new<P: AsRef<Path>>(root: P, exclusions: &'a ExclusionSet) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            exclusions,
            cacheable: HashSet::new(),
            skip_dirs: Vec::new(),
        }
    }

    /// Root-relative names routed to the cache rather than the archive body
    pub fn with_cacheable<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cacheable.extend(names.into_iter().map(Into::into));
        self
    }

    /// Directories not descended into at all
    pub fn skip_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.skip_dirs.push(dir.as_ref().to_path_buf());
        self
    }

    pub fn scan(&self) -> Result<TreeScan> {
        if !self.root.is_dir() {
            return Err(Error::NotFound {
                path: self.root.clone(),
            });
        }

        let mut scan = TreeScan::default();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.skip_dirs.iter().any(|dir| e.path() == dir));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping entry due to error: {}", e);
                    scan.errors += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let name = normalize(relative);

            if self.cacheable.contains(&name) {
                scan.cacheable.push(CacheCandidate {
                    filename: name,
                    path: entry.path().to_path_buf(),
                });
            } else if self.exclusions.is_excluded(&name) {
                debug!("Excluding file: {}", name);
                scan.excluded += 1;
            } else {
                scan.body.push(ArchiveEntry {
                    source: entry.path().to_path_buf(),
                    name,
                });
            }
        }

        debug!(
            "Scanned {}: {} body files, {} cacheable, {} excluded",
            self.root.display(),
            scan.body.len(),
            scan.cacheable.len(),
            scan.excluded
        );
        Ok(scan)
    }
}
