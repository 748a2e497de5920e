//! Archive containers for snapshots.
//!
//! An archive holds the working-tree files that were not cached, stored under
//! their root-relative paths, plus one `<filename>.reference` entry per cached
//! file. Both container formats produce the same logical content; only the
//! on-disk encoding differs.

mod sevenz;
mod zipfile;

pub use sevenz::SevenZBackend;
pub use zipfile::ZipBackend;

use crate::cache::ContentHash;
use crate::config::CompressionMethod;
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Suffix marking provenance entries inside an archive
pub const REFERENCE_SUFFIX: &str = ".reference";

/// Extensions recognised as snapshot archives
pub const ARCHIVE_EXTENSIONS: [&str; 2] = ["zip", "7z"];

/// Default LZMA2 preset for the 7z container
pub const DEFAULT_SEVENZ_LEVEL: u32 = 6;

/// Links a cached filename to the hash of the copy used at restore time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceRecord {
    pub filename: String,
    pub hash: ContentHash,
}

impl ProvenanceRecord {
    pub fn new(filename: impl Into<String>, hash: ContentHash) -> Self {
        Self {
            filename: filename.into(),
            hash,
        }
    }

    /// Name of the archive entry carrying this record
    pub fn entry_name(&self) -> String {
        format!("{}{}", self.filename, REFERENCE_SUFFIX)
    }

    /// Entry body: `hash:<base64>` then `original:<filename>`
    pub fn body(&self) -> String {
        format!("hash:{}\noriginal:{}", self.hash.encode(), self.filename)
    }

    /// Parse a reference entry. The `original:` line wins over the entry name.
    pub fn parse(entry_name: &str, body: &str) -> Option<Self> {
        let mut hash = None;
        let mut original = None;
        for line in body.lines() {
            if let Some(value) = line.strip_prefix("hash:") {
                hash = ContentHash::decode(value);
            } else if let Some(value) = line.strip_prefix("original:") {
                original = Some(value.trim().to_string());
            }
        }

        let filename = original
            .filter(|name| !name.is_empty())
            .or_else(|| entry_name.strip_suffix(REFERENCE_SUFFIX).map(str::to_string))?;
        Some(Self {
            filename,
            hash: hash?,
        })
    }
}

/// A file to store in the archive body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Location on disk
    pub source: PathBuf,
    /// Root-relative, forward-slash separated entry name
    pub name: String,
}

/// What a backend wrote
#[derive(Debug, Clone, Default)]
pub struct ArchiveSummary {
    pub files: usize,
    pub references: usize,
    /// Entries that vanished or became unreadable before they could be stored
    pub skipped: Vec<String>,
    pub bytes_in: u64,
}

/// Result of extracting an archive into a staging directory
#[derive(Debug, Clone, Default)]
pub struct ExtractedSet {
    /// Relative names of regular entries written to the target directory
    pub files: Vec<String>,
    pub references: Vec<ProvenanceRecord>,
}

impl ExtractedSet {
    pub fn reference(&self, filename: &str) -> Option<&ProvenanceRecord> {
        self.references.iter().find(|r| r.filename == filename)
    }
}

/// A snapshot container format
pub trait ArchiveBackend: Send + Sync + std::fmt::Debug {
    /// File extension, without the dot
    fn extension(&self) -> &'static str;

    /// Write `entries` followed by `references` into a new archive at `archive_path`
    fn write(
        &self,
        archive_path: &Path,
        entries: &[ArchiveEntry],
        references: &[ProvenanceRecord],
    ) -> Result<ArchiveSummary>;

    /// Extract regular entries into `target_dir` and collect reference entries
    fn extract(&self, archive_path: &Path, target_dir: &Path) -> Result<ExtractedSet>;
}

/// Backend used to write new archives for the configured method
pub fn backend_for(method: CompressionMethod) -> Box<dyn ArchiveBackend> {
    match method {
        CompressionMethod::Zip => Box::new(ZipBackend::new()),
        CompressionMethod::SevenZip => Box::new(SevenZBackend::new(DEFAULT_SEVENZ_LEVEL)),
    }
}

/// Pick the backend able to read an existing archive, by its magic bytes
pub fn detect_backend(archive_path: &Path) -> Result<Box<dyn ArchiveBackend>> {
    let read_err = |reason: String| Error::ArchiveRead {
        path: archive_path.to_path_buf(),
        reason,
    };

    let mut magic = [0u8; 6];
    let mut file = File::open(archive_path).map_err(|e| read_err(e.to_string()))?;
    let read = file.read(&mut magic).map_err(|e| read_err(e.to_string()))?;
    let magic = &magic[..read];

    if magic.starts_with(b"PK") {
        Ok(Box::new(ZipBackend::new()))
    } else if magic.starts_with(&[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C]) {
        Ok(Box::new(SevenZBackend::new(DEFAULT_SEVENZ_LEVEL)))
    } else {
        Err(read_err("unrecognised archive format".to_string()))
    }
}

/// Whether a file name carries a recognised archive extension
pub fn is_archive_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| ARCHIVE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Shared extraction logic: routes every entry either into the staging
/// directory or into the collected provenance records.
pub(crate) struct ExtractSink<'a> {
    target_dir: &'a Path,
    extracted: ExtractedSet,
}

impl<'a> ExtractSink<'a> {
    pub(crate) fn new(target_dir: &'a Path) -> Self {
        Self {
            target_dir,
            extracted: ExtractedSet::default(),
        }
    }

    pub(crate) fn accept(&mut self, name: &str, reader: &mut dyn Read) -> io::Result<()> {
        let name = name.replace('\\', "/");

        if name.ends_with(REFERENCE_SUFFIX) {
            let mut body = String::new();
            reader.read_to_string(&mut body)?;
            match ProvenanceRecord::parse(&name, &body) {
                Some(record) => {
                    debug!("Found reference for {}", record.filename);
                    self.extracted.references.push(record);
                }
                None => warn!("Ignoring malformed reference entry {}", name),
            }
            return Ok(());
        }

        let Some(target) = safe_join(self.target_dir, &name) else {
            warn!("Skipping archive entry with unsafe path: {}", name);
            return Ok(());
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(reader, &mut out)?;
        self.extracted.files.push(name);
        Ok(())
    }

    pub(crate) fn finish(self) -> ExtractedSet {
        self.extracted
    }
}

/// Join an entry name onto `base`, rejecting absolute paths and `..`
pub(crate) fn safe_join(base: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name.trim_start_matches("./"));
    let mut joined = base.to_path_buf();
    let mut any = false;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                any = true;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    any.then_some(joined)
}

/// Open an entry's source file, logging and returning `None` if it is gone
pub(crate) fn open_source(entry: &ArchiveEntry) -> Option<(File, u64)> {
    match File::open(&entry.source).and_then(|f| f.metadata().map(|m| (f, m.len()))) {
        Ok(opened) => Some(opened),
        Err(e) => {
            warn!("Skipping {}: {}", entry.name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample(root: &Path) -> Vec<ArchiveEntry> {
        let files = [
            ("server.properties", b"motd=hi".as_slice()),
            ("world/region/r.0.0.mca", b"region bytes".as_slice()),
            ("plugins/empty.txt", b"".as_slice()),
        ];
        files
            .iter()
            .map(|(name, data)| {
                let source = root.join(name);
                fs::create_dir_all(source.parent().unwrap()).unwrap();
                fs::write(&source, data).unwrap();
                ArchiveEntry {
                    source,
                    name: name.to_string(),
                }
            })
            .collect()
    }

    fn records() -> Vec<ProvenanceRecord> {
        vec![
            ProvenanceRecord::new("paper.jar", ContentHash::from_data(b"jar")),
            ProvenanceRecord::new("world.dat", ContentHash::from_data(b"world")),
        ]
    }

    fn roundtrip(backend: &dyn ArchiveBackend) -> (TempDir, ExtractedSet) {
        let tmp = TempDir::new().unwrap();
        let entries = sample(&tmp.path().join("src"));
        let archive = tmp.path().join(format!("t.{}", backend.extension()));

        let summary = backend.write(&archive, &entries, &records()).unwrap();
        assert_eq!(summary.files, 3);
        assert_eq!(summary.references, 2);

        let reader = detect_backend(&archive).unwrap();
        assert_eq!(reader.extension(), backend.extension());

        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let extracted = reader.extract(&archive, &out).unwrap();
        (tmp, extracted)
    }

    fn check(tmp: &TempDir, extracted: &ExtractedSet) {
        let out = tmp.path().join("out");
        let mut files = extracted.files.clone();
        files.sort();
        assert_eq!(
            files,
            vec!["plugins/empty.txt", "server.properties", "world/region/r.0.0.mca"]
        );
        assert_eq!(fs::read(out.join("world/region/r.0.0.mca")).unwrap(), b"region bytes");
        assert_eq!(fs::read(out.join("plugins/empty.txt")).unwrap(), b"");
        assert!(!out.join("paper.jar.reference").exists());
        assert_eq!(extracted.references, records());
    }

    #[test]
    fn test_zip_backend() {
        let (tmp, extracted) = roundtrip(&ZipBackend::new());
        check(&tmp, &extracted);
    }

    #[test]
    fn test_sevenz_backend() {
        let (tmp, extracted) = roundtrip(&SevenZBackend::new(DEFAULT_SEVENZ_LEVEL));
        check(&tmp, &extracted);
    }

    #[test]
    fn test_vanished_source_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let mut entries = sample(&tmp.path().join("src"));
        entries.push(ArchiveEntry {
            source: tmp.path().join("src/gone.log"),
            name: "gone.log".to_string(),
        });

        let archive = tmp.path().join("t.zip");
        let summary = ZipBackend::new().write(&archive, &entries, &[]).unwrap();
        assert_eq!(summary.files, 3);
        assert_eq!(summary.skipped, vec!["gone.log".to_string()]);
    }

    #[test]
    fn test_reference_body_format() {
        let record = ProvenanceRecord::new("paper.jar", ContentHash::from_data(b"jar"));
        assert_eq!(record.entry_name(), "paper.jar.reference");
        assert_eq!(
            record.body(),
            format!("hash:{}\noriginal:paper.jar", ContentHash::from_data(b"jar").encode())
        );
        assert_eq!(
            ProvenanceRecord::parse(&record.entry_name(), &record.body()),
            Some(record)
        );
    }

    #[test]
    fn test_reference_parse_fallbacks() {
        let hash = ContentHash::from_data(b"x");
        let parsed = ProvenanceRecord::parse("world.dat.reference", &format!("hash:{}", hash)).unwrap();
        assert_eq!(parsed.filename, "world.dat");
        assert_eq!(ProvenanceRecord::parse("world.dat.reference", "original:world.dat"), None);
    }

    #[test]
    fn test_safe_join() {
        let base = Path::new("/stage");
        assert_eq!(safe_join(base, "a/b.txt"), Some(PathBuf::from("/stage/a/b.txt")));
        assert_eq!(safe_join(base, "../etc/passwd"), None);
        assert_eq!(safe_join(base, "/etc/passwd"), None);
        assert_eq!(safe_join(base, ""), None);
    }

    #[test]
    fn test_detect_rejects_garbage() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("junk.zip");
        fs::write(&path, b"not an archive").unwrap();
        assert!(matches!(detect_backend(&path), Err(Error::ArchiveRead { .. })));
    }

    #[test]
    fn test_archive_names() {
        assert!(is_archive_name("backup_20250101_000000.zip"));
        assert!(is_archive_name("manual.7z"));
        assert!(!is_archive_name("backup.zip.part"));
        assert!(!is_archive_name("notes.txt"));
    }
}
