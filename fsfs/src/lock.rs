//! The locking layer (`spec.md` §4.2): a blocking, file-backed mutual
//! exclusion primitive composed with an in-process `Mutex` so that
//! multiple threads of the same process serialize before even contending
//! for the file lock.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs4::FileExt;

use crate::error::{CResult, Error};

/// A single on-disk lock file plus the in-process mutex guarding it.
pub struct FileLock {
    path: PathBuf,
    mutex: Mutex<()>,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileLock { path: path.into(), mutex: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires the lock (blocking on contention, as `spec.md` §5 requires
    /// — no internal timeout), runs `body`, and releases the lock on every
    /// exit path, including panics unwinding through `body`.
    pub fn with_lock<T>(&self, body: impl FnOnce() -> CResult<T>) -> CResult<T> {
        let _guard = match self.mutex.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // A missing lock file is recovered by creating it (spec.md §7).
        let file = OpenOptions::new().read(true).write(true).create(true).open(&self.path)?;

        file.lock_exclusive()
            .map_err(|e| Error::Locked(format!("could not lock {}: {e}", self.path.display())))?;
        log::debug!("acquired lock {}", self.path.display());

        let result = body();

        if let Err(e) = FileExt::unlock(&file) {
            log::warn!("failed to release lock {}: {e}", self.path.display());
        } else {
            log::debug!("released lock {}", self.path.display());
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn serializes_concurrent_bodies() {
        let dir = tempdir().unwrap();
        let lock = Arc::new(FileLock::new(dir.path().join("write-lock")));
        let counter = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                lock.with_lock(|| {
                    let before = counter.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(before, 0, "another thread ran concurrently");
                    std::thread::yield_now();
                    counter.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn creates_missing_lock_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("write-lock");
        assert!(!path.exists());
        let lock = FileLock::new(&path);
        lock.with_lock(|| Ok(())).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn releases_lock_even_if_body_errors() {
        let dir = tempdir().unwrap();
        let lock = FileLock::new(dir.path().join("write-lock"));
        let _ = lock.with_lock(|| Err::<(), _>(Error::Internal("boom".into())));
        // A second acquisition must still succeed.
        lock.with_lock(|| Ok(())).unwrap();
    }
}
