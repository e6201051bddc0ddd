//! Boundary cache collaborators.
//!
//! A cache maps `(book_id, chapter_id)` to the last complete
//! [`PageBoundarySet`] computed for that chapter. The entry carries its own
//! layout fingerprint; deciding whether it is still usable is the session's
//! job, not the cache's.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pagewise::{ConfigFingerprint, PageBoundarySet};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Narrow get/set/clear interface to a persistent store.
pub trait BoundaryCache {
    /// Load the entry for a chapter, if any.
    fn get(&self, book_id: &str, chapter_id: &str) -> Result<Option<PageBoundarySet>, CacheError>;

    /// Create or overwrite the entry for a chapter.
    fn set(
        &self,
        book_id: &str,
        chapter_id: &str,
        boundaries: &PageBoundarySet,
    ) -> Result<(), CacheError>;

    /// Remove the entry for a chapter. Removing a missing entry succeeds.
    fn clear(&self, book_id: &str, chapter_id: &str) -> Result<(), CacheError>;

    /// Remove every entry of a book.
    fn clear_book(&self, book_id: &str) -> Result<(), CacheError>;
}

impl<T: BoundaryCache + ?Sized> BoundaryCache for &T {
    fn get(&self, book_id: &str, chapter_id: &str) -> Result<Option<PageBoundarySet>, CacheError> {
        (**self).get(book_id, chapter_id)
    }

    fn set(
        &self,
        book_id: &str,
        chapter_id: &str,
        boundaries: &PageBoundarySet,
    ) -> Result<(), CacheError> {
        (**self).set(book_id, chapter_id, boundaries)
    }

    fn clear(&self, book_id: &str, chapter_id: &str) -> Result<(), CacheError> {
        (**self).clear(book_id, chapter_id)
    }

    fn clear_book(&self, book_id: &str) -> Result<(), CacheError> {
        (**self).clear_book(book_id)
    }
}

impl<T: BoundaryCache + ?Sized> BoundaryCache for Arc<T> {
    fn get(&self, book_id: &str, chapter_id: &str) -> Result<Option<PageBoundarySet>, CacheError> {
        (**self).get(book_id, chapter_id)
    }

    fn set(
        &self,
        book_id: &str,
        chapter_id: &str,
        boundaries: &PageBoundarySet,
    ) -> Result<(), CacheError> {
        (**self).set(book_id, chapter_id, boundaries)
    }

    fn clear(&self, book_id: &str, chapter_id: &str) -> Result<(), CacheError> {
        (**self).clear(book_id, chapter_id)
    }

    fn clear_book(&self, book_id: &str) -> Result<(), CacheError> {
        (**self).clear_book(book_id)
    }
}

type EntryKey = (String, String);

/// In-process cache.
#[derive(Debug, Default)]
pub struct MemoryBoundaryCache {
    entries: Mutex<HashMap<EntryKey, PageBoundarySet>>,
}

impl MemoryBoundaryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    /// Check if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<EntryKey, PageBoundarySet>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Unavailable("memory cache lock poisoned".to_string()))
    }
}

impl BoundaryCache for MemoryBoundaryCache {
    fn get(&self, book_id: &str, chapter_id: &str) -> Result<Option<PageBoundarySet>, CacheError> {
        let key = (book_id.to_string(), chapter_id.to_string());
        Ok(self.entries()?.get(&key).cloned())
    }

    fn set(
        &self,
        book_id: &str,
        chapter_id: &str,
        boundaries: &PageBoundarySet,
    ) -> Result<(), CacheError> {
        let key = (book_id.to_string(), chapter_id.to_string());
        self.entries()?.insert(key, boundaries.clone());
        Ok(())
    }

    fn clear(&self, book_id: &str, chapter_id: &str) -> Result<(), CacheError> {
        let key = (book_id.to_string(), chapter_id.to_string());
        self.entries()?.remove(&key);
        Ok(())
    }

    fn clear_book(&self, book_id: &str) -> Result<(), CacheError> {
        self.entries()?.retain(|(book, _), _| book != book_id);
        Ok(())
    }
}

const CACHE_SCHEMA_VERSION: u8 = 1;
const DEFAULT_MAX_CACHE_FILE_BYTES: usize = 1024 * 1024;
static CACHE_WRITE_NONCE: AtomicUsize = AtomicUsize::new(0);

/// File-backed boundary cache.
///
/// Paths are deterministic by book and chapter id:
/// `<root>/<book-digest>/<chapter-digest>.json`, where a digest is the
/// 64-bit FNV-1a hash of the id in hex. The file is a JSON envelope with a
/// schema version, the original ids (to reject digest collisions) and a
/// CRC32 of the boundary payload. Writes go to a temp file that is renamed
/// into place, so readers never see a half-written entry.
///
/// `max_file_bytes` is enforced on both reads and writes.
#[derive(Clone, Debug)]
pub struct FileBoundaryCache {
    root: PathBuf,
    max_file_bytes: usize,
}

impl FileBoundaryCache {
    /// Create a cache rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_bytes: DEFAULT_MAX_CACHE_FILE_BYTES,
        }
    }

    /// Set the maximum allowed cache file size in bytes.
    ///
    /// Values of `0` are treated as `1` to keep the cap explicit.
    pub fn with_max_file_bytes(mut self, max_file_bytes: usize) -> Self {
        self.max_file_bytes = max_file_bytes.max(1);
        self
    }

    /// Root directory for cache files.
    pub fn cache_root(&self) -> &Path {
        &self.root
    }

    /// Maximum allowed cache file size in bytes.
    pub fn max_file_bytes(&self) -> usize {
        self.max_file_bytes
    }

    /// Directory holding every entry of a book.
    pub fn book_dir(&self, book_id: &str) -> PathBuf {
        self.root.join(id_digest(book_id))
    }

    /// Deterministic path of a chapter entry.
    pub fn chapter_cache_path(&self, book_id: &str, chapter_id: &str) -> PathBuf {
        self.book_dir(book_id)
            .join(format!("{}.json", id_digest(chapter_id)))
    }

    fn read_payload(&self, path: &Path) -> Result<Option<Vec<u8>>, CacheError> {
        let len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let max_file_bytes = self.max_file_bytes as u64;
        if len > max_file_bytes {
            return Err(CacheError::TooLarge {
                actual: usize::try_from(len).unwrap_or(usize::MAX),
                limit: self.max_file_bytes,
            });
        }
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut reader = file.take(max_file_bytes.saturating_add(1));
        let mut payload = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
        reader.read_to_end(&mut payload)?;
        if payload.len() > self.max_file_bytes {
            return Err(CacheError::TooLarge {
                actual: payload.len(),
                limit: self.max_file_bytes,
            });
        }
        Ok(Some(payload))
    }
}

impl BoundaryCache for FileBoundaryCache {
    fn get(&self, book_id: &str, chapter_id: &str) -> Result<Option<PageBoundarySet>, CacheError> {
        let path = self.chapter_cache_path(book_id, chapter_id);
        let Some(payload) = self.read_payload(&path)? else {
            return Ok(None);
        };
        let envelope: PersistedBoundaryEnvelope = serde_json::from_slice(&payload)
            .map_err(|err| CacheError::Corrupt(err.to_string()))?;
        envelope.into_boundaries(book_id, chapter_id)
    }

    fn set(
        &self,
        book_id: &str,
        chapter_id: &str,
        boundaries: &PageBoundarySet,
    ) -> Result<(), CacheError> {
        let final_path = self.chapter_cache_path(book_id, chapter_id);
        let Some(parent) = final_path.parent() else {
            return Err(CacheError::Io(format!(
                "cache path {} has no parent",
                final_path.display()
            )));
        };
        fs::create_dir_all(parent)?;

        let nonce = CACHE_WRITE_NONCE.fetch_add(1, Ordering::Relaxed);
        let temp_path = parent.join(format!(
            "{}.json.tmp-{}-{}",
            id_digest(chapter_id),
            std::process::id(),
            nonce
        ));

        let envelope = PersistedBoundaryEnvelope::new(book_id, chapter_id, boundaries);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        let result = write_envelope(file, &envelope, self.max_file_bytes)
            .and_then(|()| fs::rename(&temp_path, &final_path).map_err(CacheError::from));
        if result.is_err() {
            remove_file_quiet(&temp_path);
            return result;
        }
        sync_directory(parent);
        Ok(())
    }

    fn clear(&self, book_id: &str, chapter_id: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.chapter_cache_path(book_id, chapter_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn clear_book(&self, book_id: &str) -> Result<(), CacheError> {
        match fs::remove_dir_all(self.book_dir(book_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn write_envelope(
    file: File,
    envelope: &PersistedBoundaryEnvelope,
    max_file_bytes: usize,
) -> Result<(), CacheError> {
    let mut writer = CappedWriter::new(BufWriter::new(file), max_file_bytes);
    if let Err(err) = serde_json::to_writer(&mut writer, envelope) {
        if writer.exceeded {
            return Err(CacheError::TooLarge {
                actual: writer.attempted,
                limit: max_file_bytes,
            });
        }
        return Err(CacheError::Serialize(err.to_string()));
    }
    writer.flush()?;
    let file = writer
        .into_inner()
        .into_inner()
        .map_err(|err| CacheError::Io(err.error().to_string()))?;
    file.sync_all()?;
    Ok(())
}

/// 64-bit FNV-1a digest of an id, as 16 lowercase hex chars.
fn id_digest(id: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in id.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    let mut out = String::with_capacity(16);
    for byte in hash.to_be_bytes() {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

fn remove_file_quiet(path: &Path) {
    let _ = fs::remove_file(path);
}

fn sync_directory(path: &Path) {
    if let Ok(dir) = File::open(path) {
        let _ = dir.sync_all();
    }
}

struct CappedWriter<W> {
    inner: W,
    max_bytes: usize,
    written: usize,
    attempted: usize,
    exceeded: bool,
}

impl<W> CappedWriter<W> {
    fn new(inner: W, max_bytes: usize) -> Self {
        Self {
            inner,
            max_bytes: max_bytes.max(1),
            written: 0,
            attempted: 0,
            exceeded: false,
        }
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CappedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let remaining = self.max_bytes.saturating_sub(self.written);
        if buf.len() > remaining {
            self.exceeded = true;
            self.attempted = self.written.saturating_add(buf.len());
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "cache file exceeds max_file_bytes",
            ));
        }
        self.inner.write_all(buf)?;
        self.written = self.written.saturating_add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PersistedBoundaryEnvelope {
    version: u8,
    book_id: String,
    chapter_id: String,
    checksum: u32,
    boundaries: PersistedBoundaries,
}

/// Plain-data form of a [`PageBoundarySet`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct PersistedBoundaries {
    start_indices: Vec<usize>,
    fingerprint: String,
}

impl PersistedBoundaries {
    fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for idx in &self.start_indices {
            hasher.update(&(*idx as u64).to_le_bytes());
        }
        hasher.update(self.fingerprint.as_bytes());
        hasher.finalize()
    }
}

impl PersistedBoundaryEnvelope {
    fn new(book_id: &str, chapter_id: &str, boundaries: &PageBoundarySet) -> Self {
        let boundaries = PersistedBoundaries {
            start_indices: boundaries.start_indices().to_vec(),
            fingerprint: boundaries.fingerprint().as_str().to_string(),
        };
        Self {
            version: CACHE_SCHEMA_VERSION,
            book_id: book_id.to_string(),
            chapter_id: chapter_id.to_string(),
            checksum: boundaries.checksum(),
            boundaries,
        }
    }

    fn into_boundaries(
        self,
        book_id: &str,
        chapter_id: &str,
    ) -> Result<Option<PageBoundarySet>, CacheError> {
        if self.version != CACHE_SCHEMA_VERSION {
            log::debug!(
                "ignoring cache entry with schema version {} (expected {})",
                self.version,
                CACHE_SCHEMA_VERSION
            );
            return Ok(None);
        }
        if self.book_id != book_id || self.chapter_id != chapter_id {
            return Ok(None);
        }
        if self.boundaries.checksum() != self.checksum {
            return Err(CacheError::Corrupt("checksum mismatch".to_string()));
        }
        let PersistedBoundaries {
            start_indices,
            fingerprint,
        } = self.boundaries;
        PageBoundarySet::new(start_indices, ConfigFingerprint::from_persisted(fingerprint))
            .map(Some)
            .map_err(|err| CacheError::Corrupt(err.to_string()))
    }
}
