//! Key-value cache abstraction.
//!
//! # Responsibilities
//! - One storage contract for every backend: get/set/exists/clear/reset
//! - TTL envelopes: entries carry their store time and lifetime; expiry is
//!   strict and expired entries read as misses
//! - DSN-based backend selection (`memory=`, `folder=path`)
//!
//! # Design Decisions
//! - A disabled cache (empty DSN) accepts every call as a cheap no-op, so
//!   callers never branch on availability
//! - `set` on an existing key keeps the original TTL
//! - Entries are serde_json envelopes; any serializable value round-trips

mod folder;
mod memory;

pub use folder::FolderStore;
pub use memory::MemoryStore;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Raw byte-level storage every backend provides.
pub trait CacheStore: Send + Sync {
    fn fetch(&self, ndx: &str) -> Option<Vec<u8>>;
    fn store(&self, ndx: &str, data: Vec<u8>) -> bool;
    fn remove(&self, ndx: &str) -> bool;
    fn keys(&self) -> Vec<String>;
}

/// Serialized cache entry: value, store timestamp, TTL in seconds
/// (0 = never expires).
#[derive(Serialize, Deserialize)]
struct Envelope {
    value: serde_json::Value,
    stored: f64,
    ttl: u64,
}

/// Seconds since the Unix epoch, sub-second precision.
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Short hash used to derive cache keys and lock names, 11 base-36 digits.
pub fn key_hash(input: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    let mut n = hasher.finish();
    let digits = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = [b'0'; 11];
    let mut i = 11;
    while n > 0 && i > 0 {
        i -= 1;
        out[i] = digits[(n % 36) as usize];
        n /= 36;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[derive(Default)]
struct CacheInner {
    dsn: String,
    prefix: String,
    backend: Option<Arc<dyn CacheStore>>,
}

/// Shared cache facade. Cloning yields another handle to the same backend,
/// so reconfiguring through one handle (e.g. a `CACHE` hive assignment) is
/// visible everywhere.
#[derive(Clone, Default)]
pub struct Cache {
    inner: Arc<RwLock<CacheInner>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a backend from a DSN string; returns the resolved DSN.
    ///
    /// `memory` keeps entries in-process; `folder=path` writes one file per
    /// entry. Any other non-empty DSN falls back to `folder=tmp/cache/`.
    /// An empty DSN disables the cache.
    pub fn load(&self, dsn: &str, seed: &str) -> String {
        let dsn = dsn.trim();
        let mut inner = self.inner.write();
        inner.prefix = seed.to_string();
        if dsn.is_empty() {
            inner.dsn = String::new();
            inner.backend = None;
            return String::new();
        }
        let resolved = if dsn == "memory" || dsn.starts_with("memory=") {
            inner.backend = Some(Arc::new(MemoryStore::new()));
            "memory".to_string()
        } else {
            let path = dsn
                .strip_prefix("folder=")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .unwrap_or("tmp/cache/")
                .to_string();
            if let Err(err) = std::fs::create_dir_all(&path) {
                tracing::warn!(path = %path, error = %err, "cache folder unavailable");
                inner.dsn = String::new();
                inner.backend = None;
                return String::new();
            }
            inner.backend = Some(Arc::new(FolderStore::new(&path)));
            format!("folder={path}")
        };
        inner.dsn = resolved.clone();
        resolved
    }

    /// Idempotent [`load`](Cache::load): a DSN matching the current backend
    /// leaves it untouched, so repeated `CACHE` assignments (one per
    /// request) never drop in-memory entries.
    pub fn ensure(&self, dsn: &str, seed: &str) -> String {
        {
            let inner = self.inner.read();
            if !dsn.is_empty()
                && inner.dsn == dsn.trim()
                && inner.prefix == seed
                && inner.backend.is_some()
            {
                return inner.dsn.clone();
            }
        }
        self.load(dsn, seed)
    }

    pub fn enabled(&self) -> bool {
        self.inner.read().backend.is_some()
    }

    pub fn dsn(&self) -> String {
        self.inner.read().dsn.clone()
    }

    fn ndx(&self, key: &str) -> String {
        let inner = self.inner.read();
        format!("{}.{}", inner.prefix, key)
    }

    fn backend(&self) -> Option<Arc<dyn CacheStore>> {
        self.inner.read().backend.clone()
    }

    /// Store timestamp and TTL of a live entry, or `None`.
    /// Expired entries are evicted on the way out.
    pub fn exists(&self, key: &str) -> Option<(f64, u64)> {
        let backend = self.backend()?;
        let ndx = self.ndx(key);
        let raw = backend.fetch(&ndx)?;
        let env: Envelope = serde_json::from_slice(&raw).ok()?;
        if env.ttl == 0 || env.stored + env.ttl as f64 > now() {
            Some((env.stored, env.ttl))
        } else {
            backend.remove(&ndx);
            None
        }
    }

    /// Retrieve and deserialize a live entry.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend()?;
        let ndx = self.ndx(key);
        let raw = backend.fetch(&ndx)?;
        let env: Envelope = serde_json::from_slice(&raw).ok()?;
        if env.ttl == 0 || env.stored + env.ttl as f64 > now() {
            serde_json::from_value(env.value).ok()
        } else {
            backend.remove(&ndx);
            None
        }
    }

    /// Serialize and store a value. Re-setting an existing live entry keeps
    /// its original TTL.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: u64) -> bool {
        let Some(backend) = self.backend() else {
            return true;
        };
        let ttl = self.exists(key).map(|(_, kept)| kept).unwrap_or(ttl);
        let env = Envelope {
            value: match serde_json::to_value(value) {
                Ok(v) => v,
                Err(_) => return false,
            },
            stored: now(),
            ttl,
        };
        match serde_json::to_vec(&env) {
            Ok(data) => backend.store(&self.ndx(key), data),
            Err(_) => false,
        }
    }

    pub fn clear(&self, key: &str) -> bool {
        match self.backend() {
            Some(backend) => backend.remove(&self.ndx(key)),
            None => false,
        }
    }

    /// Drop every entry under this cache's prefix, optionally restricted to
    /// keys ending with `suffix`.
    pub fn reset(&self, suffix: Option<&str>) -> bool {
        let Some(backend) = self.backend() else {
            return true;
        };
        let prefix = format!("{}.", self.inner.read().prefix);
        for key in backend.keys() {
            if key.starts_with(&prefix)
                && suffix.map(|s| key.ends_with(s)).unwrap_or(true)
            {
                backend.remove(&key);
            }
        }
        true
    }
}
