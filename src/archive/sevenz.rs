//! 7z container with LZMA2 compression at a configurable preset.

use super::{open_source, ArchiveBackend, ArchiveEntry, ArchiveSummary, ExtractSink, ExtractedSet, ProvenanceRecord};
use crate::{Error, Result};
use sevenz_rust::lzma::LZMA2Options;
use sevenz_rust::{Password, SevenZArchiveEntry, SevenZReader, SevenZWriter};
use std::io::{BufReader, Cursor};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SevenZBackend {
    /// LZMA2 preset, 0 (fastest) to 9 (smallest)
    level: u32,
}

impl SevenZBackend {
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl ArchiveBackend for SevenZBackend {
    fn extension(&self) -> &'static str {
        "7z"
    }

    fn write(
        &self,
        archive_path: &Path,
        entries: &[ArchiveEntry],
        references: &[ProvenanceRecord],
    ) -> Result<ArchiveSummary> {
        let write_err = |reason: String| Error::ArchiveWrite {
            path: archive_path.to_path_buf(),
            reason,
        };

        let mut writer = SevenZWriter::create(archive_path).map_err(|e| write_err(e.to_string()))?;
        writer.set_content_methods(vec![LZMA2Options::with_preset(self.level).into()]);
        let mut summary = ArchiveSummary::default();

        for entry in entries {
            let Some((source, len)) = open_source(entry) else {
                summary.skipped.push(entry.name.clone());
                continue;
            };

            let archive_entry = SevenZArchiveEntry::from_path(&entry.source, entry.name.clone());
            writer
                .push_archive_entry(archive_entry, Some(BufReader::new(source)))
                .map_err(|e| write_err(format!("{}: {}", entry.name, e)))?;

            summary.files += 1;
            summary.bytes_in += len;
        }

        for record in references {
            let mut archive_entry = SevenZArchiveEntry::new();
            archive_entry.name = record.entry_name();
            archive_entry.has_stream = true;
            archive_entry.is_directory = false;
            writer
                .push_archive_entry(archive_entry, Some(Cursor::new(record.body().into_bytes())))
                .map_err(|e| write_err(e.to_string()))?;
            summary.references += 1;
        }

        let file = writer.finish().map_err(|e| write_err(e.to_string()))?;
        file.sync_all().map_err(|e| write_err(e.to_string()))?;

        debug!(
            "Wrote 7z {} at level {} ({} files, {} references)",
            archive_path.display(),
            self.level,
            summary.files,
            summary.references
        );
        Ok(summary)
    }

    fn extract(&self, archive_path: &Path, target_dir: &Path) -> Result<ExtractedSet> {
        let read_err = |reason: String| Error::ArchiveRead {
            path: archive_path.to_path_buf(),
            reason,
        };

        let mut reader =
            SevenZReader::open(archive_path, Password::empty()).map_err(|e| read_err(e.to_string()))?;
        let mut sink = ExtractSink::new(target_dir);
        let mut failure = None;

        reader
            .for_each_entries(|entry, data| {
                if entry.is_directory() {
                    return Ok(true);
                }
                match sink.accept(entry.name(), data) {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        failure = Some(format!("{}: {}", entry.name(), e));
                        Ok(false)
                    }
                }
            })
            .map_err(|e| read_err(e.to_string()))?;

        if let Some(reason) = failure {
            return Err(read_err(reason));
        }
        Ok(sink.finish())
    }
}
