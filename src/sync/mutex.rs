//! File-based advisory mutex.
//!
//! Exclusive execution of a named critical section across process
//! boundaries: an exclusive-create lock file under the temp dir, stale
//! locks reclaimed once older than the execution budget. Cooperative
//! locking only; a crash between acquire and release leaves a stale file
//! the next acquirer reclaims after the timeout.

use rand::Rng;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::key_hash;

/// Run `f` while holding the named lock.
pub fn mutex<T>(
    temp: &str,
    seed: &str,
    id: &str,
    budget: Duration,
    f: impl FnOnce() -> T,
) -> io::Result<T> {
    fs::create_dir_all(temp)?;
    let lock = lock_path(temp, seed, id);
    let _handle = acquire(&lock, budget)?;
    let out = f();
    let _ = fs::remove_file(&lock);
    Ok(out)
}

fn lock_path(temp: &str, seed: &str, id: &str) -> PathBuf {
    Path::new(temp).join(format!("{seed}.{}.lock", key_hash(id)))
}

fn acquire(lock: &Path, budget: Duration) -> io::Result<fs::File> {
    loop {
        if let Ok(meta) = fs::metadata(lock) {
            let stale = meta
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .map(|age| age >= budget)
                .unwrap_or(false);
            if stale {
                let _ = fs::remove_file(lock);
            }
        }
        match OpenOptions::new().write(true).create_new(true).open(lock) {
            Ok(handle) => return Ok(handle),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let pause = rand::thread_rng().gen_range(0..100);
                std::thread::sleep(Duration::from_micros(pause));
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn sections_run_exclusively() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().to_str().unwrap().to_string();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::new();
        for _ in 0..4 {
            let temp = temp.clone();
            let inside = inside.clone();
            let peak = peak.clone();
            workers.push(std::thread::spawn(move || {
                mutex(&temp, "seed", "section", Duration::from_secs(30), || {
                    let current = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(current, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap();
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_locks_are_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().to_str().unwrap().to_string();
        // abandoned lock from a crashed owner
        let lock = lock_path(&temp, "seed", "section");
        fs::write(&lock, b"").unwrap();
        // zero budget: any existing lock counts as stale
        let out = mutex(&temp, "seed", "section", Duration::ZERO, || 42).unwrap();
        assert_eq!(out, 42);
        assert!(!lock.exists());
    }
}
