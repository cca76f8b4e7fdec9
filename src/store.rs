//! Capability interfaces for the external collaborators the pipeline talks to.
//!
//! The pipeline only depends on the traits here; concrete clients (cloud SDKs, a key-value
//! service) live outside this crate. [`MemoryObjectStore`], [`MemoryRuleStore`] and
//! [`LocalObjectStore`] are provided for tests, local runs and embedding.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

/// Error reported by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object does not exist.
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// The requested byte range is not valid (`start > end`).
    #[error("invalid range {start}-{end} for {key}")]
    InvalidRange { key: String, start: u64, end: u64 },

    /// Transport or backend failure.
    #[error("{operation} failed: {message}")]
    Backend { operation: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Read/write access to an object store.
pub trait ObjectStore: Send + Sync {
    /// Fetch bytes `start..=end` of an object.
    ///
    /// Ranges past the end of the object are clipped: the returned buffer is shorter than
    /// requested (possibly empty) when the object ends inside (or before) the range.
    fn get_range(&self, bucket: &str, key: &str, start: u64, end: u64) -> Result<Vec<u8>, StoreError>;

    /// Fetch the whole object.
    fn get_full(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Create or replace an object.
    fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;
}

/// Key-value store holding routing and rule records as JSON documents.
pub trait RuleStore: Send + Sync {
    /// Fetch the record stored under `key`, or `None` if the key is unknown.
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;
}

/// One page of a topic listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicPage {
    /// Topic handles on this page (e.g. `arn:aws:sns:region:account:name`).
    pub topics: Vec<String>,
    /// Continuation token for the next page; `None` on the last page.
    pub next_token: Option<String>,
}

/// Paginated directory of notification topics.
pub trait TopicDirectory: Send + Sync {
    fn list_topics(&self, next_token: Option<&str>) -> Result<TopicPage, StoreError>;
}

fn clip_range(key: &str, len: usize, start: u64, end: u64) -> Result<std::ops::Range<usize>, StoreError> {
    if start > end {
        return Err(StoreError::InvalidRange {
            key: key.to_string(),
            start,
            end,
        });
    }
    let lo = usize::try_from(start).unwrap_or(usize::MAX).min(len);
    let hi = usize::try_from(end)
        .unwrap_or(usize::MAX)
        .saturating_add(1)
        .min(len);
    Ok(lo..hi)
}

/// Counters of calls made against a [`MemoryObjectStore`].
#[derive(Debug, Default)]
pub struct CallCounts {
    range_reads: AtomicUsize,
    full_reads: AtomicUsize,
    writes: AtomicUsize,
}

impl CallCounts {
    pub fn range_reads(&self) -> usize {
        self.range_reads.load(Ordering::SeqCst)
    }

    pub fn full_reads(&self) -> usize {
        self.full_reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.range_reads() + self.full_reads() + self.writes()
    }
}

/// In-memory [`ObjectStore`] keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    calls: CallCounts,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without counting it as a call.
    pub fn insert(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert((bucket.to_string(), key.to_string()), bytes.into());
        }
    }

    /// Read an object back without counting it as a call.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(&(bucket.to_string(), key.to_string())).cloned())
    }

    /// All `(bucket, key)` pairs currently stored, sorted.
    pub fn keys(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self
            .objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    fn read<T>(&self, bucket: &str, key: &str, f: impl FnOnce(&[u8]) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let objects = self.objects.lock().map_err(|_| StoreError::Backend {
            operation: "read".to_string(),
            message: "object map lock poisoned".to_string(),
        })?;
        let bytes = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        f(bytes)
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get_range(&self, bucket: &str, key: &str, start: u64, end: u64) -> Result<Vec<u8>, StoreError> {
        let _ = self.calls.range_reads.fetch_add(1, Ordering::SeqCst);
        self.read(bucket, key, |bytes| {
            let range = clip_range(key, bytes.len(), start, end)?;
            Ok(bytes[range].to_vec())
        })
    }

    fn get_full(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let _ = self.calls.full_reads.fetch_add(1, Ordering::SeqCst);
        self.read(bucket, key, |bytes| Ok(bytes.to_vec()))
    }

    fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let _ = self.calls.writes.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.lock().map_err(|_| StoreError::Backend {
            operation: "put".to_string(),
            message: "object map lock poisoned".to_string(),
        })?;
        objects.insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }
}

/// Filesystem-backed [`ObjectStore`]: each bucket is a directory under `root`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(bucket).join(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::Backend {
                operation: "resolve path".to_string(),
                message: format!("refusing non-normal object path {}", relative.display()),
            });
        }
        Ok(self.root.join(relative))
    }

    fn open(&self, bucket: &str, key: &str) -> Result<fs::File, StoreError> {
        let path = self.object_path(bucket, key)?;
        fs::File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => StoreError::Io(e),
        })
    }
}

impl ObjectStore for LocalObjectStore {
    fn get_range(&self, bucket: &str, key: &str, start: u64, end: u64) -> Result<Vec<u8>, StoreError> {
        if start > end {
            return Err(StoreError::InvalidRange {
                key: key.to_string(),
                start,
                end,
            });
        }
        let mut file = self.open(bucket, key)?;
        file.seek(SeekFrom::Start(start))?;
        let mut out = Vec::new();
        file.take(end - start + 1).read_to_end(&mut out)?;
        Ok(out)
    }

    fn get_full(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::new();
        self.open(bucket, key)?.read_to_end(&mut out)?;
        Ok(out)
    }

    fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }
}

/// In-memory [`RuleStore`].
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    records: HashMap<String, serde_json::Value>,
    reads: AtomicUsize,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a JSON object mapping keys to records.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let records: HashMap<String, serde_json::Value> = serde_json::from_str(json)?;
        Ok(Self {
            records,
            reads: AtomicUsize::new(0),
        })
    }

    pub fn insert(&mut self, key: impl Into<String>, record: serde_json::Value) {
        self.records.insert(key.into(), record);
    }

    /// Number of `get` calls served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl RuleStore for MemoryRuleStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let _ = self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.get(key).cloned())
    }
}

/// In-memory [`TopicDirectory`] serving fixed pages.
#[derive(Debug, Default)]
pub struct MemoryTopicDirectory {
    pages: Vec<Vec<String>>,
}

impl MemoryTopicDirectory {
    pub fn new(pages: Vec<Vec<String>>) -> Self {
        Self { pages }
    }
}

impl TopicDirectory for MemoryTopicDirectory {
    fn list_topics(&self, next_token: Option<&str>) -> Result<TopicPage, StoreError> {
        let page = match next_token {
            None => 0,
            Some(token) => token.parse::<usize>().map_err(|_| StoreError::Backend {
                operation: "list_topics".to_string(),
                message: format!("bad continuation token '{token}'"),
            })?,
        };
        let topics = self.pages.get(page).cloned().unwrap_or_default();
        let next_token = (page + 1 < self.pages.len()).then(|| (page + 1).to_string());
        Ok(TopicPage { topics, next_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_range_reads_are_inclusive_and_clipped() {
        let store = MemoryObjectStore::new();
        store.insert("b", "k", b"abcdef".to_vec());

        assert_eq!(store.get_range("b", "k", 0, 2).unwrap(), b"abc");
        assert_eq!(store.get_range("b", "k", 4, 100).unwrap(), b"ef");
        assert!(store.get_range("b", "k", 10, 20).unwrap().is_empty());
        assert_eq!(store.calls().range_reads(), 3);
    }

    #[test]
    fn missing_object_is_not_found() {
        let store = MemoryObjectStore::new();
        let err = store.get_full("b", "nope").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn local_store_round_trips_and_reads_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.put("bucket", "a/b/file.csv", b"0123456789".to_vec()).unwrap();

        assert_eq!(store.get_full("bucket", "a/b/file.csv").unwrap(), b"0123456789");
        assert_eq!(store.get_range("bucket", "a/b/file.csv", 2, 4).unwrap(), b"234");
        assert_eq!(store.get_range("bucket", "a/b/file.csv", 8, 50).unwrap(), b"89");
    }

    #[test]
    fn local_store_rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(store.get_full("bucket", "../escape").is_err());
    }
}
