//! Fingerprinted file content cache
//!
//! Every [`ContentCache::read`] re-fingerprints the file. A matching entry is
//! served from memory and counted as a hit; anything else re-reads the file,
//! replaces the entry in place and counts as a miss. When the stored bytes
//! exceed the configured ceiling, least-recently-accessed entries are evicted.
//!
//! Operations on the same path are serialised by a per-path lock; operations
//! on different paths only share the store lock, which is never held across
//! file I/O. Entries are replaced while the store lock is held, so no reader
//! sees a fingerprint paired with bytes it does not describe.

mod fingerprint;

pub use fingerprint::{Fingerprint, FingerprintPolicy};

use crate::metrics::{CacheEvent, MetricsRecorder};
use chrono::{DateTime, Utc};
use codai_utils::file::{decode_text, normalize_path, relative_to};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

/// Default ceiling on cached bytes (8 MiB)
pub const DEFAULT_MAX_BYTES: u64 = 8 * 1024 * 1024;

/// Attempts at reading a file that keeps changing underneath us
const MAX_READ_ATTEMPTS: usize = 3;

/// Whether a read was served from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadOutcome {
    Hit,
    Miss,
}

/// Result of [`ContentCache::read`]
#[derive(Debug, Clone)]
pub struct CacheRead {
    /// Cache key: the path relative to the cache root
    pub path: PathBuf,
    pub content: Arc<[u8]>,
    pub outcome: ReadOutcome,
}

impl CacheRead {
    pub fn is_hit(&self) -> bool {
        self.outcome == ReadOutcome::Hit
    }

    /// Content decoded as text
    pub fn text(&self) -> String {
        decode_text(&self.content)
    }
}

#[derive(Debug)]
struct CacheEntry {
    fingerprint: Fingerprint,
    content: Arc<[u8]>,
    last_access: DateTime<Utc>,
    /// Logical clock value of the last access; orders LRU eviction
    access_tick: u64,
    access_count: u64,
    /// When the current content was stored
    updated_at: DateTime<Utc>,
}

impl CacheEntry {
    fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Entry metadata without the content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntryInfo {
    pub path: PathBuf,
    pub size: u64,
    pub fingerprint: String,
    pub last_access: DateTime<Utc>,
    pub access_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// Cached files split around the last backend call
#[derive(Debug, Clone, Default)]
pub struct TurnSplit {
    /// Unchanged since the last call, oldest first
    pub existing: Vec<(PathBuf, Arc<[u8]>)>,
    /// Stored or refreshed after the last call, oldest first
    pub new_or_modified: Vec<(PathBuf, Arc<[u8]>)>,
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<PathBuf, CacheEntry>,
    total_bytes: u64,
    clock: u64,
    last_turn: Option<DateTime<Utc>>,
}

impl Store {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &Path) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size();
        Some(entry)
    }

    /// Drop least-recently-accessed entries until `total_bytes <= max_bytes`
    fn evict_to(&mut self, max_bytes: u64) -> Vec<PathBuf> {
        if self.total_bytes <= max_bytes {
            return Vec::new();
        }

        let mut by_age: Vec<(u64, PathBuf)> = self
            .entries
            .iter()
            .map(|(path, entry)| (entry.access_tick, path.clone()))
            .collect();
        by_age.sort_unstable();

        let mut evicted = Vec::new();
        for (_, path) in by_age {
            if self.total_bytes <= max_bytes {
                break;
            }
            self.remove(&path);
            evicted.push(path);
        }
        evicted
    }
}

/// One mutex per path currently in use
#[derive(Debug, Default)]
struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    fn with<T>(&self, key: &Path, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.to_path_buf()).or_default())
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        // Forget the lock once nobody else holds or waits on it; new users
        // must go through the map, so the count cannot grow behind our back
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }

        result
    }
}

/// Shared, thread-safe file content cache rooted at a project directory
#[derive(Debug)]
pub struct ContentCache {
    root: PathBuf,
    policy: FingerprintPolicy,
    max_bytes: u64,
    store: Mutex<Store>,
    path_locks: PathLocks,
    metrics: Arc<MetricsRecorder>,
}

impl ContentCache {
    /// Create an empty cache with the default fingerprint policy
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: normalize_path(&root.into()),
            policy: FingerprintPolicy::default(),
            max_bytes,
            store: Mutex::new(Store::default()),
            path_locks: PathLocks::default(),
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: FingerprintPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Report into an existing recorder instead of a private one
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub const fn policy(&self) -> FingerprintPolicy {
        self.policy
    }

    pub const fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cache key for `path`: relative to the root when inside it
    pub fn key_for(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            relative_to(path, &self.root)
        } else {
            normalize_path(path)
        }
    }

    fn absolute(&self, key: &Path) -> PathBuf {
        if key.is_absolute() {
            key.to_path_buf()
        } else {
            self.root.join(key)
        }
    }

    /// Read `path` through the cache.
    ///
    /// Fails with [`crate::Error::NotFound`] for a missing file and
    /// [`crate::Error::Read`] for any other I/O failure; the cache is not
    /// modified on failure.
    pub fn read(&self, path: &Path) -> crate::Result<CacheRead> {
        let key = self.key_for(path);
        let absolute = self.absolute(&key);
        let started = Instant::now();

        self.path_locks.with(&key, || {
            let (fingerprint, prefetched) = self.current_fingerprint(&absolute)?;

            if let Some(content) = self.lookup(&key, fingerprint) {
                self.metrics.record(CacheEvent::Hit, started.elapsed());
                debug!(path = %key.display(), "cache hit");
                return Ok(CacheRead {
                    path: key.clone(),
                    content,
                    outcome: ReadOutcome::Hit,
                });
            }

            let (fingerprint, content) = match prefetched {
                Some(bytes) => (fingerprint, Arc::<[u8]>::from(bytes)),
                None => {
                    let (fingerprint, bytes) = read_consistent(&absolute)?;
                    (fingerprint, Arc::<[u8]>::from(bytes))
                }
            };

            self.store_entry(&key, fingerprint, Arc::clone(&content));
            self.metrics.record(CacheEvent::Miss, started.elapsed());
            debug!(path = %key.display(), bytes = content.len(), "cache miss");

            Ok(CacheRead {
                path: key.clone(),
                content,
                outcome: ReadOutcome::Miss,
            })
        })
    }

    /// Fingerprint the file as it is now. Under [`FingerprintPolicy::ContentHash`]
    /// this reads the file, and the bytes are handed back for reuse.
    fn current_fingerprint(&self, absolute: &Path) -> crate::Result<(Fingerprint, Option<Vec<u8>>)> {
        match self.policy {
            FingerprintPolicy::SizeMtime => {
                let metadata =
                    std::fs::metadata(absolute).map_err(|err| read_error(absolute, err))?;
                if metadata.is_dir() {
                    return Err(crate::Error::Read {
                        path: absolute.to_path_buf(),
                        source: std::io::Error::other("is a directory"),
                    });
                }
                Ok((Fingerprint::from_metadata(&metadata), None))
            }
            FingerprintPolicy::ContentHash => {
                let bytes = std::fs::read(absolute).map_err(|err| read_error(absolute, err))?;
                Ok((Fingerprint::from_bytes(&bytes), Some(bytes)))
            }
        }
    }

    fn lookup(&self, key: &Path, fingerprint: Fingerprint) -> Option<Arc<[u8]>> {
        let mut store = self.store();
        let tick = store.tick();
        let entry = store.entries.get_mut(key)?;
        if entry.fingerprint != fingerprint {
            return None;
        }
        entry.access_tick = tick;
        entry.access_count += 1;
        entry.last_access = Utc::now();
        Some(Arc::clone(&entry.content))
    }

    fn store_entry(&self, key: &Path, fingerprint: Fingerprint, content: Arc<[u8]>) {
        let now = Utc::now();
        let mut store = self.store();
        let tick = store.tick();

        let previous = store.remove(key);
        let access_count = previous.map_or(0, |entry| entry.access_count) + 1;
        let size = content.len() as u64;
        store.entries.insert(
            key.to_path_buf(),
            CacheEntry {
                fingerprint,
                content,
                last_access: now,
                access_tick: tick,
                access_count,
                updated_at: now,
            },
        );
        store.total_bytes += size;

        if store.total_bytes > self.max_bytes {
            let evicted = store.evict_to(self.max_bytes);
            drop(store);
            self.record_evictions(&evicted);
        }
    }

    fn record_evictions(&self, evicted: &[PathBuf]) {
        for path in evicted {
            self.metrics
                .record(CacheEvent::Eviction, std::time::Duration::ZERO);
            debug!(path = %path.display(), "evicted");
        }
    }

    /// Drop the entry for `path`, if any. Returns whether one existed.
    pub fn invalidate(&self, path: &Path) -> bool {
        let key = self.key_for(path);
        self.path_locks.with(&key, || {
            let removed = self.store().remove(&key).is_some();
            if removed {
                debug!(path = %key.display(), "invalidated");
            }
            removed
        })
    }

    /// Evict least-recently-accessed entries until the ceiling holds.
    /// Returns the number of entries removed.
    pub fn evict(&self) -> usize {
        let evicted = self.store().evict_to(self.max_bytes);
        self.record_evictions(&evicted);
        evicted.len()
    }

    /// Remove every entry. Metrics are left alone.
    pub fn clear(&self) {
        let mut store = self.store();
        store.entries.clear();
        store.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.store().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.store().total_bytes
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.store().entries.contains_key(&self.key_for(path))
    }

    /// Cached paths in lexical order
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.store().entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Metadata for every entry, in lexical path order
    pub fn entries_snapshot(&self) -> Vec<CacheEntryInfo> {
        let store = self.store();
        let mut infos: Vec<CacheEntryInfo> = store
            .entries
            .iter()
            .map(|(path, entry)| CacheEntryInfo {
                path: path.clone(),
                size: entry.size(),
                fingerprint: entry.fingerprint.to_string(),
                last_access: entry.last_access,
                access_count: entry.access_count,
                updated_at: entry.updated_at,
            })
            .collect();
        drop(store);
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos
    }

    /// Record that the cached files were just sent to the backend
    pub fn mark_turn(&self) {
        self.store().last_turn = Some(Utc::now());
    }

    /// Split entries into those already sent before the last
    /// [`Self::mark_turn`] and those stored since. Before the first turn every
    /// entry counts as existing.
    pub fn split_by_turn(&self) -> TurnSplit {
        let store = self.store();
        let mut existing = Vec::new();
        let mut fresh = Vec::new();

        for (path, entry) in &store.entries {
            let item = (entry.updated_at, entry.access_tick, path.clone(), Arc::clone(&entry.content));
            match store.last_turn {
                Some(turn) if entry.updated_at > turn => fresh.push(item),
                _ => existing.push(item),
            }
        }
        drop(store);

        let ordered = |mut items: Vec<(DateTime<Utc>, u64, PathBuf, Arc<[u8]>)>| {
            items.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
            items
                .into_iter()
                .map(|(_, _, path, content)| (path, content))
                .collect()
        };

        TurnSplit {
            existing: ordered(existing),
            new_or_modified: ordered(fresh),
        }
    }
}

fn read_error(path: &Path, err: std::io::Error) -> crate::Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        crate::Error::NotFound(path.to_path_buf())
    } else {
        crate::Error::Read {
            path: path.to_path_buf(),
            source: err,
        }
    }
}

/// Read a file together with a size/mtime fingerprint that describes exactly
/// the bytes returned. Retries when the file changes during the read.
fn read_consistent(path: &Path) -> crate::Result<(Fingerprint, Vec<u8>)> {
    for _ in 0..MAX_READ_ATTEMPTS {
        let mut file = std::fs::File::open(path).map_err(|err| read_error(path, err))?;
        let before = file.metadata().map_err(|err| read_error(path, err))?;
        let mut bytes = Vec::with_capacity(usize::try_from(before.len()).unwrap_or(0));
        file.read_to_end(&mut bytes)
            .map_err(|err| read_error(path, err))?;
        let after = file.metadata().map_err(|err| read_error(path, err))?;

        let fingerprint = Fingerprint::from_metadata(&after);
        if fingerprint == Fingerprint::from_metadata(&before) && bytes.len() as u64 == after.len() {
            return Ok((fingerprint, bytes));
        }
        warn!(path = %path.display(), "file changed while reading, retrying");
    }

    Err(crate::Error::Read {
        path: path.to_path_buf(),
        source: std::io::Error::other("file kept changing while being read"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn set_mtime(path: &Path, time: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn cache_with(files: &[(&str, &str)], max_bytes: u64) -> (tempfile::TempDir, ContentCache) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        let cache = ContentCache::new(dir.path(), max_bytes);
        (dir, cache)
    }

    #[test]
    fn test_second_read_hits() {
        let (_dir, cache) = cache_with(&[("a.py", "print('a')")], DEFAULT_MAX_BYTES);

        let first = cache.read(Path::new("a.py")).unwrap();
        let second = cache.read(Path::new("a.py")).unwrap();

        assert_eq!(first.outcome, ReadOutcome::Miss);
        assert_eq!(second.outcome, ReadOutcome::Hit);
        assert_eq!(first.content, second.content);
        assert_eq!(second.text(), "print('a')");

        let metrics = cache.metrics().snapshot();
        assert_eq!((metrics.hits, metrics.misses), (1, 1));
    }

    #[test]
    fn test_absolute_and_relative_paths_share_a_key() {
        let (dir, cache) = cache_with(&[("a.py", "x")], DEFAULT_MAX_BYTES);
        cache.read(&dir.path().join("a.py")).unwrap();
        assert!(cache.read(Path::new("./a.py")).unwrap().is_hit());
        assert_eq!(cache.paths(), vec![PathBuf::from("a.py")]);
    }

    #[test]
    fn test_content_edit_is_a_miss() {
        let (dir, cache) = cache_with(&[("a.py", "old")], DEFAULT_MAX_BYTES);
        let path = dir.path().join("a.py");
        cache.read(&path).unwrap();

        fs::write(&path, "new content").unwrap();
        set_mtime(&path, SystemTime::now() + Duration::from_secs(5));

        let reread = cache.read(&path).unwrap();
        assert_eq!(reread.outcome, ReadOutcome::Miss);
        assert_eq!(&*reread.content, b"new content");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 11);
    }

    #[test]
    fn test_touch_only_under_each_policy() {
        for (policy, expected) in [
            (FingerprintPolicy::SizeMtime, ReadOutcome::Miss),
            (FingerprintPolicy::ContentHash, ReadOutcome::Hit),
        ] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("a.py");
            fs::write(&path, "same").unwrap();
            let cache = ContentCache::new(dir.path(), DEFAULT_MAX_BYTES).with_policy(policy);

            cache.read(&path).unwrap();
            set_mtime(&path, SystemTime::now() + Duration::from_secs(60));

            let reread = cache.read(&path).unwrap();
            assert_eq!(reread.outcome, expected, "{policy:?}");
            assert_eq!(&*reread.content, b"same");
        }
    }

    #[test]
    fn test_content_hash_detects_same_size_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, "aaaa").unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(3600);
        set_mtime(&path, mtime);
        let cache = ContentCache::new(dir.path(), DEFAULT_MAX_BYTES)
            .with_policy(FingerprintPolicy::ContentHash);
        cache.read(&path).unwrap();

        fs::write(&path, "bbbb").unwrap();
        set_mtime(&path, mtime);

        let reread = cache.read(&path).unwrap();
        assert_eq!(reread.outcome, ReadOutcome::Miss);
        assert_eq!(&*reread.content, b"bbbb");
    }

    #[test]
    fn test_invalidate_forces_miss() {
        let (_dir, cache) = cache_with(&[("a.py", "x")], DEFAULT_MAX_BYTES);
        cache.read(Path::new("a.py")).unwrap();

        assert!(cache.invalidate(Path::new("a.py")));
        assert!(!cache.invalidate(Path::new("a.py")));
        assert_eq!(cache.total_bytes(), 0);
        assert_eq!(
            cache.read(Path::new("a.py")).unwrap().outcome,
            ReadOutcome::Miss
        );
    }

    #[test]
    fn test_failed_read_leaves_cache_unchanged() {
        let (dir, cache) = cache_with(&[("a.py", "x")], DEFAULT_MAX_BYTES);
        cache.read(Path::new("a.py")).unwrap();
        fs::remove_file(dir.path().join("a.py")).unwrap();

        let err = cache.read(Path::new("a.py")).unwrap_err();
        assert!(matches!(err, crate::Error::NotFound(_)));
        assert!(cache.contains(Path::new("a.py")));

        fs::create_dir(dir.path().join("folder")).unwrap();
        let err = cache.read(Path::new("folder")).unwrap_err();
        assert!(matches!(err, crate::Error::Read { .. }));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.metrics().snapshot().misses, 1);
    }

    #[test]
    fn test_lru_eviction() {
        let (_dir, cache) = cache_with(
            &[("a", "aaaa"), ("b", "bbbb"), ("c", "cccc")],
            8,
        );
        cache.read(Path::new("a")).unwrap();
        cache.read(Path::new("b")).unwrap();
        // Touch `a` so `b` becomes the least recently used
        assert!(cache.read(Path::new("a")).unwrap().is_hit());
        cache.read(Path::new("c")).unwrap();

        assert_eq!(cache.paths(), vec![PathBuf::from("a"), PathBuf::from("c")]);
        assert_eq!(cache.total_bytes(), 8);
        assert_eq!(cache.metrics().snapshot().evictions, 1);
    }

    #[test]
    fn test_oversized_file_is_not_retained() {
        let (_dir, cache) = cache_with(&[("big", "0123456789")], 4);
        let read = cache.read(Path::new("big")).unwrap();
        assert_eq!(read.content.len(), 10);
        assert!(cache.is_empty());
        assert_eq!(cache.metrics().snapshot().evictions, 1);
    }

    #[test]
    fn test_explicit_evict_is_noop_under_ceiling() {
        let (_dir, cache) = cache_with(&[("a", "aa")], 10);
        cache.read(Path::new("a")).unwrap();
        assert_eq!(cache.evict(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_keeps_metrics() {
        let (_dir, cache) = cache_with(&[("a", "aa"), ("b", "b")], DEFAULT_MAX_BYTES);
        cache.read(Path::new("a")).unwrap();
        cache.read(Path::new("b")).unwrap();

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
        assert_eq!(cache.metrics().snapshot().misses, 2);
    }

    #[test]
    fn test_split_by_turn() {
        let (dir, cache) = cache_with(&[("a", "1"), ("b", "2")], DEFAULT_MAX_BYTES);
        cache.read(Path::new("a")).unwrap();

        let split = cache.split_by_turn();
        assert_eq!(split.existing.len(), 1);
        assert!(split.new_or_modified.is_empty());

        cache.mark_turn();
        std::thread::sleep(Duration::from_millis(5));
        cache.read(Path::new("b")).unwrap();
        fs::write(dir.path().join("a"), "11").unwrap();
        cache.read(Path::new("a")).unwrap();

        let split = cache.split_by_turn();
        assert!(split.existing.is_empty());
        let fresh: Vec<PathBuf> = split.new_or_modified.into_iter().map(|(p, _)| p).collect();
        assert_eq!(fresh, vec![PathBuf::from("b"), PathBuf::from("a")]);
    }

    #[test]
    fn test_entries_snapshot() {
        let (_dir, cache) = cache_with(&[("b", "bb"), ("a", "a")], DEFAULT_MAX_BYTES);
        cache.read(Path::new("b")).unwrap();
        cache.read(Path::new("a")).unwrap();
        cache.read(Path::new("a")).unwrap();

        let infos = cache.entries_snapshot();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].path, PathBuf::from("a"));
        assert_eq!(infos[0].access_count, 2);
        assert_eq!(infos[1].size, 2);
    }

    #[test]
    fn test_concurrent_reads_stay_consistent() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..8 {
            fs::write(dir.path().join(format!("f{i}.txt")), format!("file {i}")).unwrap();
        }
        let cache = Arc::new(ContentCache::new(dir.path(), DEFAULT_MAX_BYTES));

        std::thread::scope(|scope| {
            for t in 0..4 {
                let cache = Arc::clone(&cache);
                scope.spawn(move || {
                    for round in 0..20 {
                        let i = (t + round) % 8;
                        let read = cache.read(Path::new(&format!("f{i}.txt"))).unwrap();
                        assert_eq!(read.text(), format!("file {i}"));
                    }
                });
            }
        });

        let metrics = cache.metrics().snapshot();
        assert_eq!(metrics.reads(), 80);
        assert_eq!(metrics.misses, 8);
        assert_eq!(cache.len(), 8);
    }
}
