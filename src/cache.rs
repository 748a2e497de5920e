//! Content cache for large, rarely-changing files.
//!
//! Each cached file lives in the cache directory under its root-relative name,
//! next to a `<name>.hash` sidecar holding the base64 SHA-256 of the content.
//! A file is only copied again when its live hash differs from the recorded one.

use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Suffix of the sidecar file storing a cached file's hash
pub const HASH_SUFFIX: &str = ".hash";

/// SHA-256 digest of a file's content.
///
/// Compared as raw bytes; the base64 text form is only used at rest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn from_data(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Decode the base64 text form
    pub fn decode(text: &str) -> Option<Self> {
        let bytes = STANDARD.decode(text.trim()).ok()?;
        let digest: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(digest))
    }

    /// Standard base64 text form, as written to sidecars and reference entries
    pub fn encode(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short hex prefix for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

/// Hash a file's full content with SHA-256, streaming it from disk
pub fn hash_file<P: AsRef<Path>>(path: P) -> Result<ContentHash> {
    let path = path.as_ref();
    let hash_err = |source: io::Error| Error::Hash {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(hash_err)?;
    let mut reader = HashingReader::new(file);
    io::copy(&mut reader, &mut io::sink()).map_err(hash_err)?;
    Ok(reader.finish())
}

/// Reader adapter hashing every byte that passes through it
struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> ContentHash {
        ContentHash(self.hasher.finalize().into())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        Ok(read)
    }
}

/// A file held in the cache store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Root-relative name, forward-slash separated
    pub filename: String,
    pub hash: ContentHash,
    pub cached_path: PathBuf,
}

/// Outcome of [`ContentCache::update`]
#[derive(Debug, Clone)]
pub struct CacheUpdate {
    pub entry: CacheEntry,
    /// Whether the file was copied into the store
    pub copied: bool,
}

/// Cache store of whole files keyed by filename
#[derive(Debug)]
pub struct ContentCache {
    cache_dir: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ContentCache {
    /// Open the cache store, loading every entry whose sidecar and file are both present
    pub fn open<P: AsRef<Path>>(cache_dir: P) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        fs::create_dir_all(&cache_dir)?;

        let mut entries = HashMap::new();
        for entry in WalkDir::new(&cache_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let sidecar = entry.path();
            let Some(cached_path) = sidecar
                .to_str()
                .and_then(|s| s.strip_suffix(HASH_SUFFIX))
                .map(PathBuf::from)
            else {
                continue;
            };
            if !cached_path.is_file() {
                debug!("Ignoring orphaned hash sidecar {}", sidecar.display());
                continue;
            }

            let hash = match fs::read_to_string(sidecar).ok().and_then(|t| ContentHash::decode(&t)) {
                Some(hash) => hash,
                None => {
                    warn!("Unreadable hash sidecar {}, entry will be refreshed", sidecar.display());
                    continue;
                }
            };

            let Ok(relative) = cached_path.strip_prefix(&cache_dir) else {
                continue;
            };
            let filename = crate::exclude::normalize(relative);
            entries.insert(
                filename.clone(),
                CacheEntry {
                    filename,
                    hash,
                    cached_path,
                },
            );
        }

        debug!("Opened cache at {} with {} entries", cache_dir.display(), entries.len());
        Ok(Self {
            cache_dir,
            entries: Mutex::new(entries),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Bring the cached copy of `filename` up to date with `source`.
    ///
    /// Copies only when no entry exists or the recorded hash differs, so
    /// repeated calls with unchanged content perform no I/O beyond hashing.
    pub fn update<P: AsRef<Path>>(&self, filename: &str, source: P) -> Result<CacheUpdate> {
        let source = source.as_ref();

        // A new entry is hashed while it is copied, so only a known entry
        // costs an extra read.
        if let Some(existing) = self.entry(filename).filter(|e| e.cached_path.is_file()) {
            let live_hash = hash_file(source)?;
            if existing.hash == live_hash {
                debug!("Cache entry {} unchanged ({})", filename, live_hash.short());
                return Ok(CacheUpdate {
                    entry: existing,
                    copied: false,
                });
            }
        }

        let entry = self.store(filename, source)?;
        info!("Cached {} ({})", filename, entry.hash.short());
        self.lock().insert(filename.to_string(), entry.clone());

        Ok(CacheUpdate {
            entry,
            copied: true,
        })
    }

    /// Copy the cached file for `filename` to `target`, replacing whatever is there
    pub fn restore_to<P: AsRef<Path>>(&self, filename: &str, target: P) -> Result<CacheEntry> {
        let target = target.as_ref();
        let entry = self
            .entry(filename)
            .filter(|e| e.cached_path.is_file())
            .ok_or_else(|| Error::CacheMiss {
                filename: filename.to_string(),
            })?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&entry.cached_path, target)?;

        debug!("Restored {} from cache", filename);
        Ok(entry)
    }

    /// Read the cached bytes for `filename`
    pub fn read(&self, filename: &str) -> Result<Vec<u8>> {
        let entry = self.entry(filename).ok_or_else(|| Error::CacheMiss {
            filename: filename.to_string(),
        })?;
        fs::read(&entry.cached_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::CacheMiss {
                filename: filename.to_string(),
            },
            _ => e.into(),
        })
    }

    pub fn entry(&self, filename: &str) -> Option<CacheEntry> {
        self.lock().get(filename).cloned()
    }

    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));
        entries
    }

    /// Total bytes held by cached files
    pub fn size(&self) -> u64 {
        self.lock()
            .values()
            .filter_map(|e| fs::metadata(&e.cached_path).ok())
            .map(|m| m.len())
            .sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        // The map holds no invariants a panicking writer could break.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy `source` into the store and write its sidecar.
    ///
    /// The old sidecar is removed before the new content is renamed into place
    /// and the new sidecar is renamed in last, so a sidecar on disk always
    /// describes the file next to it.
    fn store(&self, filename: &str, source: &Path) -> Result<CacheEntry> {
        let cached_path = self.cache_dir.join(filename);
        let sidecar_path = sidecar_path(&cached_path);
        let parent = cached_path.parent().unwrap_or(&self.cache_dir).to_path_buf();
        fs::create_dir_all(&parent)?;

        let tmp_content = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let tmp_sidecar = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

        let result = (|| -> Result<CacheEntry> {
            // The hash covers exactly the bytes written to the copy, even if
            // the live file changes while it is read.
            let mut reader = HashingReader::new(File::open(source).map_err(|e| Error::Hash {
                path: source.to_path_buf(),
                source: e,
            })?);
            let mut out = io::BufWriter::new(File::create(&tmp_content)?);
            io::copy(&mut reader, &mut out)?;
            out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            let hash = reader.finish();
            fs::write(&tmp_sidecar, hash.encode())?;

            match fs::remove_file(&sidecar_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            fs::rename(&tmp_content, &cached_path)?;
            fs::rename(&tmp_sidecar, &sidecar_path)?;

            Ok(CacheEntry {
                filename: filename.to_string(),
                hash,
                cached_path: cached_path.clone(),
            })
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_content);
            let _ = fs::remove_file(&tmp_sidecar);
            self.lock().remove(filename);
        }
        result
    }
}

fn sidecar_path(cached_path: &Path) -> PathBuf {
    let mut name = cached_path.as_os_str().to_owned();
    name.push(HASH_SUFFIX);
    PathBuf::from(name)
}
