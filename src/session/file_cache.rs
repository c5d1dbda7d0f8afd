//! Bounded file-read cache owned by one indexer session.
//!
//! Avoids re-reading unchanged files repeatedly within a session's lifetime.
//! The cache is scoped to the session instance and cleared at shutdown; it is
//! deliberately not process-wide shared state.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Hit/miss counters for the read cache.
#[derive(Debug, Clone, Default)]
pub struct FileCacheStats {
    pub hits: usize,
    pub misses: usize,
    pub size: usize,
}

/// LRU cache mapping source paths to their full contents.
pub struct FileReadCache {
    capacity: usize,
    contents: HashMap<PathBuf, Arc<String>>,
    order: VecDeque<PathBuf>,
    hits: usize,
    misses: usize,
}

impl FileReadCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            contents: HashMap::new(),
            order: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Read a file through the cache.
    ///
    /// Returns None when the file cannot be read; a read failure is not
    /// cached so a subsequent call retries the filesystem.
    pub fn read(&mut self, path: &Path) -> Option<Arc<String>> {
        if let Some(contents) = self.contents.get(path) {
            self.hits += 1;
            let contents = contents.clone();
            self.touch(path);
            return Some(contents);
        }
        self.misses += 1;
        let contents = Arc::new(std::fs::read_to_string(path).ok()?);
        self.insert(path.to_path_buf(), contents.clone());
        Some(contents)
    }

    /// Drop one path, e.g. after an external edit.
    pub fn invalidate(&mut self, path: &Path) {
        self.contents.remove(path);
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            self.order.remove(pos);
        }
    }

    /// Drop everything. Called at session shutdown.
    pub fn clear(&mut self) {
        self.contents.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn stats(&self) -> FileCacheStats {
        FileCacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.contents.len(),
        }
    }

    fn insert(&mut self, path: PathBuf, contents: Arc<String>) {
        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_back() {
                self.contents.remove(&evicted);
            }
        }
        self.order.push_front(path.clone());
        self.contents.insert(path, contents);
    }

    fn touch(&mut self, path: &Path) {
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            self.order.remove(pos);
            self.order.push_front(path.to_path_buf());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_caches_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.c", "int a;");
        let mut cache = FileReadCache::new(4);

        assert_eq!(cache.read(&path).unwrap().as_str(), "int a;");
        // Second read is served from memory even after the file changes.
        std::fs::write(&path, "int b;").unwrap();
        assert_eq!(cache.read(&path).unwrap().as_str(), "int a;");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_invalidate_forces_reread() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.c", "int a;");
        let mut cache = FileReadCache::new(4);

        cache.read(&path).unwrap();
        std::fs::write(&path, "int b;").unwrap();
        cache.invalidate(&path);
        assert_eq!(cache.read(&path).unwrap().as_str(), "int b;");
    }

    #[test]
    fn test_eviction_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(&dir, "a.c", "a");
        let b = write_file(&dir, "b.c", "b");
        let c = write_file(&dir, "c.c", "c");
        let mut cache = FileReadCache::new(2);

        cache.read(&a).unwrap();
        cache.read(&b).unwrap();
        cache.read(&a).unwrap(); // a is now most recent
        cache.read(&c).unwrap(); // evicts b

        assert_eq!(cache.len(), 2);
        std::fs::remove_file(&b).unwrap();
        assert!(cache.read(&b).is_none()); // b was evicted, filesystem miss
        assert!(cache.read(&a).is_some());
    }

    #[test]
    fn test_missing_file_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghost.c");
        let mut cache = FileReadCache::new(2);
        assert!(cache.read(&path).is_none());
        std::fs::write(&path, "int x;").unwrap();
        assert!(cache.read(&path).is_some());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.c", "a");
        let mut cache = FileReadCache::new(2);
        cache.read(&path).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
