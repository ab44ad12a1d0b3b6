//! The background garbage-collection queue described in `spec.md` §4.F.
//!
//! A single task drains jobs in the order they were submitted. Submission
//! never blocks the caller and never fails the fetch that triggered it:
//! cleanup errors are logged and swallowed.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::resource_id::ResourceId;

struct CleanupJob {
    resource_id: ResourceId,
    keep_version: u64,
}

/// Handle for submitting version-eviction jobs to the background worker.
///
/// Cloning is cheap; all clones share the same underlying queue and worker
/// task.
#[derive(Clone)]
pub struct CleanupExecutor {
    sender: mpsc::UnboundedSender<CleanupJob>,
}

impl CleanupExecutor {
    /// Spawns the single worker task that will process cleanup jobs for the
    /// lifetime of the returned handle's clones.
    pub fn spawn(cache_root: PathBuf, lock_provider: crate::lock::LockProvider) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<CleanupJob>();

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                if let Err(err) =
                    run_cleanup(&cache_root, &lock_provider, &job.resource_id, job.keep_version)
                        .await
                {
                    tracing::warn!(
                        "cleanup of older versions for resource '{}' (keeping {}) failed: {err}",
                        job.resource_id,
                        job.keep_version
                    );
                }
            }
        });

        CleanupExecutor { sender }
    }

    /// Enqueues a cleanup job. Never blocks; a full queue cannot back-pressure
    /// a caller since the channel is unbounded, matching a fire-and-forget
    /// submission to a single-worker executor.
    pub fn submit(&self, resource_id: ResourceId, keep_version: u64) {
        // The receiver only disappears if the worker task panicked, which we
        // treat as unrecoverable for the process; dropping the job silently
        // is acceptable since cleanup is always best-effort.
        let _ = self.sender.send(CleanupJob {
            resource_id,
            keep_version,
        });
    }
}

/// Evicts data+download for every version of `resource_id` other than
/// `keep_version`, exactly as the background worker does. Exposed so that
/// [`crate::cache::CacheEngine::cleanup_older_versions`] can run (and await,
/// and propagate the `IOError` of) the same algorithm synchronously instead
/// of going through the fire-and-forget queue, matching the operation
/// contract in `spec.md` §4.E/§6.
pub(crate) async fn run_cleanup(
    cache_root: &std::path::Path,
    lock_provider: &crate::lock::LockProvider,
    resource_id: &ResourceId,
    keep_version: u64,
) -> Result<(), crate::error::CacheError> {
    let resource_dir = cache_root.join(resource_id.as_str());

    let mut entries = match fs_err::tokio::read_dir(&resource_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(crate::error::CacheError::io(resource_dir, err)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| crate::error::CacheError::io(resource_dir.clone(), err))?
    {
        let file_name = entry.file_name();
        let Some(version_str) = file_name.to_str() else {
            continue;
        };
        let Ok(version) = version_str.parse::<u64>() else {
            continue;
        };
        // Only versions strictly older than the watermark are evicted (spec
        // §3 invariant 4): a cleanup job can arrive after a newer version has
        // already been published (e.g. FIFO jobs draining out of temporal
        // order), and must leave it untouched.
        if version >= keep_version {
            continue;
        }

        let version_dir = entry.path();
        let lock_path = version_dir.join("lock");

        // Never delete the lock file itself (spec §9): only `data` and
        // `download` are removed. A concurrent fetch holding this version's
        // lock naturally defers our removal until it releases.
        let _guard = lock_provider.acquire(&lock_path).await?;

        for name in ["data", "download"] {
            let path = version_dir.join(name);
            match fs_err::tokio::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(crate::error::CacheError::io(path, err)),
            }
        }

        tracing::debug!(
            "evicted version {version} of resource '{resource_id}', keeping {keep_version}"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::CleanupExecutor;
    use crate::lock::LockProvider;
    use crate::resource_id::ResourceId;
    use std::time::Duration;

    #[tokio::test]
    async fn evicts_older_versions_but_keeps_lock_files() {
        let dir = tempfile::tempdir().unwrap();
        let id = ResourceId::of("https://example.com/thing");
        let resource_dir = dir.path().join(id.as_str());

        for version in [1u64, 2, 3] {
            let version_dir = resource_dir.join(version.to_string());
            std::fs::create_dir_all(&version_dir).unwrap();
            std::fs::write(version_dir.join("data"), b"payload").unwrap();
            std::fs::write(version_dir.join("lock"), b"").unwrap();
        }

        let executor = CleanupExecutor::spawn(dir.path().to_path_buf(), LockProvider::new());
        executor.submit(id.clone(), 3);

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!resource_dir.join("1").join("data").exists());
        assert!(!resource_dir.join("2").join("data").exists());
        assert!(resource_dir.join("3").join("data").exists());
        assert!(resource_dir.join("1").join("lock").exists());
        assert!(resource_dir.join("2").join("lock").exists());
    }

    #[tokio::test]
    async fn does_not_touch_versions_at_or_above_the_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let id = ResourceId::of("https://example.com/newer-than-watermark");
        let resource_dir = dir.path().join(id.as_str());

        for version in [1u64, 2, 3] {
            let version_dir = resource_dir.join(version.to_string());
            std::fs::create_dir_all(&version_dir).unwrap();
            std::fs::write(version_dir.join("data"), b"payload").unwrap();
            std::fs::write(version_dir.join("lock"), b"").unwrap();
        }

        // A cleanup job arriving with a watermark older than data already on
        // disk (e.g. a FIFO job that drained out of temporal order) must
        // leave version 2 and 3 alone: only version 1 is `< keep_version`.
        let executor = CleanupExecutor::spawn(dir.path().to_path_buf(), LockProvider::new());
        executor.submit(id.clone(), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!resource_dir.join("1").join("data").exists());
        assert!(resource_dir.join("2").join("data").exists());
        assert!(resource_dir.join("3").join("data").exists());
    }
}
