//! (size, mtime)-validated cache over parsed session data.
//!
//! Backing files are either rewritten atomically or appended in place; in
//! both cases the (size, mtime) pair changes, which makes it a cheap oracle
//! for "content changed" without hashing. Entries whose validators no longer
//! match are treated as misses and overwritten by the next `set`.
//!
//! Values are opaque and cloned on egress; callers deep-copy on ingress if
//! they intend to keep mutating what they inserted.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::SystemTime;

use lru::LruCache;
use parking_lot::Mutex;

/// Validator pair read from the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub mtime: SystemTime,
}

impl FileStamp {
    /// Stat `path`; `None` when the file is gone (callers treat that as a
    /// miss, never an error).
    pub fn probe(path: &Path) -> Option<FileStamp> {
        let meta = std::fs::metadata(path).ok()?;
        Some(FileStamp {
            size: meta.len(),
            mtime: meta.modified().ok()?,
        })
    }
}

struct Entry<T> {
    value: T,
    stamp: FileStamp,
}

/// Keyed cache bounded by entry count with least-recently-accessed eviction.
/// Thread-safe; the lock is never held across I/O.
pub struct FileCache<T> {
    entries: Mutex<LruCache<String, Entry<T>>>,
}

impl<T: Clone> FileCache<T> {
    pub fn new(capacity: usize) -> FileCache<T> {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        FileCache {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Hit iff a live entry exists and its stored stamp matches exactly.
    /// A hit refreshes the entry's access order.
    pub fn get(&self, key: &str, stamp: FileStamp) -> Option<T> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.stamp == stamp => Some(entry.value.clone()),
            _ => None,
        }
    }

    /// Install or replace an entry, evicting the least recently accessed
    /// entry when over capacity.
    pub fn set(&self, key: impl Into<String>, value: T, stamp: FileStamp) {
        let mut entries = self.entries.lock();
        entries.put(key.into(), Entry { value, stamp });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stamp(size: u64, secs: u64) -> FileStamp {
        FileStamp {
            size,
            mtime: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    #[test]
    fn hit_requires_exact_stamp_match() {
        let cache: FileCache<String> = FileCache::new(8);
        cache.set("k", "v".into(), stamp(10, 100));
        assert_eq!(cache.get("k", stamp(10, 100)), Some("v".into()));
        assert_eq!(cache.get("k", stamp(11, 100)), None);
        assert_eq!(cache.get("k", stamp(10, 101)), None);
    }

    #[test]
    fn set_replaces_stale_entries() {
        let cache: FileCache<i32> = FileCache::new(8);
        cache.set("k", 1, stamp(10, 100));
        cache.set("k", 2, stamp(20, 200));
        assert_eq!(cache.get("k", stamp(10, 100)), None);
        assert_eq!(cache.get("k", stamp(20, 200)), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn eviction_is_least_recently_accessed() {
        let cache: FileCache<i32> = FileCache::new(2);
        cache.set("a", 1, stamp(1, 1));
        cache.set("b", 2, stamp(2, 2));
        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get("a", stamp(1, 1)), Some(1));
        cache.set("c", 3, stamp(3, 3));
        assert_eq!(cache.get("b", stamp(2, 2)), None);
        assert_eq!(cache.get("a", stamp(1, 1)), Some(1));
        assert_eq!(cache.get("c", stamp(3, 3)), Some(3));
    }

    #[test]
    fn probe_missing_file_is_none() {
        assert!(FileStamp::probe(Path::new("/no/such/file")).is_none());
    }

    #[test]
    fn concurrent_get_set_does_not_poison() {
        use std::sync::Arc;
        let cache: Arc<FileCache<u64>> = Arc::new(FileCache::new(64));
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..200u64 {
                    let key = format!("k{}", (t * 7 + i) % 32);
                    cache.set(key.clone(), i, stamp(i, i));
                    let _ = cache.get(&key, stamp(i, i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 64);
    }
}
