//! The two-layer scoped lock described in `spec.md` §4.C.
//!
//! Coordinating concurrent fetches safely requires two independent layers:
//! an OS-level advisory lock on the lock file (coordinates across processes
//! sharing the cache directory) and an in-process mutex keyed by the
//! canonicalized lock path (many OS file-lock implementations grant
//! re-entrant or per-open semantics that would not by themselves prevent two
//! threads in the *same* process from racing). The intra-process mutex is
//! acquired first and released last.

use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use fs4::fs_std::FileExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::CacheError;

/// Produces [`ScopedLock`]s for lock-file paths, keyed so that repeated
/// acquisitions of the same canonicalized path contend on the same
/// in-process mutex.
///
/// Cheap to clone; an `Arc<DashMap<..>>` internally, so all clones share the
/// same lock table. A [`crate::cache::CacheEngine`] holds exactly one
/// instance for its lifetime.
#[derive(Clone, Default)]
pub struct LockProvider {
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires an exclusive [`ScopedLock`] on `path`.
    ///
    /// Blocks (without spinning) until both layers are available. Callers
    /// must not hold other long-lived resources across this call: there is
    /// no timeout and no cancellation at this layer (`spec.md` §5).
    pub async fn acquire(&self, path: &Path) -> Result<ScopedLock, CacheError> {
        let key = canonical_lock_key(path);
        let entry = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        // Acquired first, released last: see module docs.
        let intra_process_guard = entry.lock_owned().await;

        let os_lock = OsFileLock::acquire_exclusive(path).await?;

        Ok(ScopedLock {
            os_lock,
            _intra_process_guard: intra_process_guard,
        })
    }
}

/// Resolves the identity used to key the in-process mutex table. Two paths
/// that refer to the same file (e.g. via symlinks) must map to the same
/// key; falls back to the path as given if it cannot yet be canonicalized
/// (the caller is expected to have already created the file).
fn canonical_lock_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// A resource-owning handle that holds one intra-process mutex permit and
/// one advisory OS file lock on a lock-file path. Dropping it releases both,
/// OS lock first, in reverse order of acquisition. There is no raw
/// lock/unlock API: scoping is enforced at the type level.
pub struct ScopedLock {
    // Field order determines drop order: `os_lock` drops (and thus unlocks)
    // before `_intra_process_guard` is released.
    os_lock: OsFileLock,
    _intra_process_guard: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for ScopedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedLock")
            .field("path", &self.os_lock.path)
            .finish()
    }
}

/// The OS-level half of a [`ScopedLock`]: an advisory whole-file lock,
/// acquired on a blocking thread and released on drop.
struct OsFileLock {
    file: Option<File>,
    path: PathBuf,
}

impl OsFileLock {
    async fn acquire_exclusive(path: &Path) -> Result<Self, CacheError> {
        let owned_path = path.to_path_buf();
        let acquire = {
            let owned_path = owned_path.clone();
            async move {
                tokio::task::spawn_blocking(move || {
                    let file = std::fs::OpenOptions::new()
                        .create(true)
                        .truncate(false)
                        .read(true)
                        .write(true)
                        .open(&owned_path)
                        .map_err(|source| CacheError::LockUnavailable {
                            path: owned_path.clone(),
                            source,
                        })?;

                    file.lock_exclusive()
                        .map_err(|source| CacheError::LockUnavailable {
                            path: owned_path.clone(),
                            source,
                        })?;

                    Ok(file)
                })
                .await
                .expect("lock acquisition task panicked")
            }
        };

        tokio::select! {
            file = acquire => Ok(OsFileLock { file: Some(file?), path: owned_path }),
            () = warn_on_contention(&path.to_path_buf()) => unreachable!("warn_on_contention never completes"),
        }
    }
}

async fn warn_on_contention(path: &Path) {
    let path = path.to_path_buf();
    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        tracing::warn!(
            "still waiting for file lock on '{}' after 30s",
            path.display()
        );
    }
}

impl Drop for OsFileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LockProvider;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn acquire_serializes_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("entry.lock");
        std::fs::write(&lock_path, b"").unwrap();

        let provider = LockProvider::new();
        let counter = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let provider = provider.clone();
            let lock_path = lock_path.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            tasks.push(tokio::spawn(async move {
                let _lock = provider.acquire(&lock_path).await.unwrap();
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_paths_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.lock");
        let b = dir.path().join("b.lock");
        std::fs::write(&a, b"").unwrap();
        std::fs::write(&b, b"").unwrap();

        let provider = LockProvider::new();
        let lock_a = provider.acquire(&a).await.unwrap();
        let lock_b = provider.acquire(&b).await.unwrap();
        drop(lock_a);
        drop(lock_b);
    }
}
