//! Zip container: entries are streamed one by one with deflate storage.

use super::{open_source, ArchiveBackend, ArchiveEntry, ArchiveSummary, ExtractSink, ExtractedSet, ProvenanceRecord};
use crate::{Error, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;
use ::zip::write::SimpleFileOptions;
use ::zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, Clone, Default)]
pub struct ZipBackend;

impl ZipBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveBackend for ZipBackend {
    fn extension(&self) -> &'static str {
        "zip"
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

        let file = File::create(archive_path).map_err(|e| write_err(e.to_string()))?;
        let mut zip = ZipWriter::new(BufWriter::new(file));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut summary = ArchiveSummary::default();

        for entry in entries {
            let Some((source, len)) = open_source(entry) else {
                summary.skipped.push(entry.name.clone());
                continue;
            };

            zip.start_file(entry.name.as_str(), options.large_file(len > u32::MAX as u64))
                .map_err(|e| write_err(format!("{}: {}", entry.name, e)))?;
            let copied = io::copy(&mut BufReader::new(source), &mut zip)
                .map_err(|e| write_err(format!("{}: {}", entry.name, e)))?;

            summary.files += 1;
            summary.bytes_in += copied;
        }

        for record in references {
            zip.start_file(record.entry_name().as_str(), options)
                .map_err(|e| write_err(e.to_string()))?;
            zip.write_all(record.body().as_bytes())
                .map_err(|e| write_err(e.to_string()))?;
            summary.references += 1;
        }

        let mut out = zip.finish().map_err(|e| write_err(e.to_string()))?;
        out.flush().map_err(|e| write_err(e.to_string()))?;
        out.get_ref()
            .sync_all()
            .map_err(|e| write_err(e.to_string()))?;

        debug!(
            "Wrote zip {} ({} files, {} references)",
            archive_path.display(),
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

        let file = File::open(archive_path).map_err(|e| read_err(e.to_string()))?;
        let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| read_err(e.to_string()))?;
        let mut sink = ExtractSink::new(target_dir);

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(|e| read_err(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            sink.accept(&name, &mut entry)
                .map_err(|e| read_err(format!("{}: {}", name, e)))?;
        }

        Ok(sink.finish())
    }
}
