//! Filesystem cache backend: one file per entry.
//!
//! Keys are sanitized (path separators stripped) before use as file names,
//! mirroring entries across processes sharing the same folder.

use std::fs;
use std::path::PathBuf;

use super::CacheStore;

pub struct FolderStore {
    dir: PathBuf,
}

impl FolderStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file(&self, ndx: &str) -> PathBuf {
        let safe: String = ndx
            .chars()
            .filter(|c| *c != '/' && *c != '\\')
            .collect();
        self.dir.join(safe)
    }
}

impl CacheStore for FolderStore {
    fn fetch(&self, ndx: &str) -> Option<Vec<u8>> {
        fs::read(self.file(ndx)).ok()
    }

    fn store(&self, ndx: &str, data: Vec<u8>) -> bool {
        fs::write(self.file(ndx), data).is_ok()
    }

    fn remove(&self, ndx: &str) -> bool {
        fs::remove_file(self.file(ndx)).is_ok()
    }

    fn keys(&self) -> Vec<String> {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().into_string().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;

    #[test]
    fn folder_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new();
        cache.load(&format!("folder={}", dir.path().display()), "seed");
        assert!(cache.set("k", &vec![1, 2, 3], 0));
        assert_eq!(cache.get::<Vec<i64>>("k"), Some(vec![1, 2, 3]));
        cache.reset(None);
        assert_eq!(cache.get::<Vec<i64>>("k"), None);
    }

    #[test]
    fn keys_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FolderStore::new(dir.path());
        assert!(store.store("a/../b", vec![1]));
        assert_eq!(store.fetch("a/../b"), Some(vec![1]));
        // the entry landed inside the cache dir, not outside it
        assert_eq!(store.keys().len(), 1);
    }
}
