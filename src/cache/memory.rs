//! In-process cache backend.

use dashmap::DashMap;

use super::CacheStore;

/// Entries live in a concurrent map; suited to a single server process and
/// to tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn fetch(&self, ndx: &str) -> Option<Vec<u8>> {
        self.entries.get(ndx).map(|e| e.value().clone())
    }

    fn store(&self, ndx: &str, data: Vec<u8>) -> bool {
        self.entries.insert(ndx.to_string(), data);
        true
    }

    fn remove(&self, ndx: &str) -> bool {
        self.entries.remove(ndx).is_some()
    }

    fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}
