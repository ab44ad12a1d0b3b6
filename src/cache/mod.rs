//! The fetch-and-publish orchestration described in `spec.md` §4.E.

mod cleanup;

pub use cleanup::CleanupExecutor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::error::CacheError;
use crate::fetcher::ResourceLoader;
use crate::lock::LockProvider;
use crate::paths::CacheEntryPaths;
use crate::resource_id::ResourceId;

/// Materializes remote resources onto local disk, safe under concurrent
/// same-process and cross-process use.
///
/// One `CacheEngine` owns one cache root directory and one resource loader
/// for its entire lifetime. Cloning is intentionally not provided: wrap in
/// an `Arc` if multiple owners need to share it (the internal state is
/// already cheaply cloneable and safe to use concurrently from many tasks).
pub struct CacheEngine {
    cache_root: PathBuf,
    loader: Arc<dyn ResourceLoader>,
    locks: LockProvider,
    cleanup: CleanupExecutor,
}

/// `true` iff `path` names an existing filesystem entry, `false` for
/// not-found, and an error for anything else (permissions, I/O failure).
async fn path_exists(path: &Path) -> Result<bool, CacheError> {
    match fs_err::tokio::metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(CacheError::io(path.to_path_buf(), err)),
    }
}

impl CacheEngine {
    /// Creates an engine rooted at `cache_directory`, which is created if it
    /// does not already exist.
    pub fn new(cache_directory: impl Into<PathBuf>, loader: Arc<dyn ResourceLoader>) -> Self {
        let cache_root = cache_directory.into();
        let locks = LockProvider::new();
        let cleanup = CleanupExecutor::spawn(cache_root.clone(), locks.clone());

        CacheEngine {
            cache_root,
            loader,
            locks,
            cleanup,
        }
    }

    /// Computes the [`ResourceId`] for `uri` without touching the cache or
    /// the network.
    pub fn resource_id(uri: &str) -> ResourceId {
        ResourceId::of(uri)
    }

    /// Ensures the current version of `uri` is present on disk at
    /// `target_path`, fetching it if necessary.
    ///
    /// Implements the six-step algorithm: probe for the current version,
    /// submit a best-effort cleanup of older versions, acquire the scoped
    /// lock for this `(resource, version)`, serve from cache if the data
    /// file already exists, otherwise download into the sibling `download`
    /// path and atomically rename it onto `data`, then copy to
    /// `target_path`.
    pub async fn get(&self, uri: &str, target_path: &Path) -> Result<(), CacheError> {
        let resource_id = Self::resource_id(uri);

        let probe = self
            .loader
            .probe(uri)
            .await
            .map_err(|source| CacheError::DownloadFailed {
                uri: uri.to_string(),
                source,
            })?;

        if !probe.exists {
            return Err(CacheError::ResourceNotFound {
                uri: uri.to_string(),
            });
        }
        let version = probe.version;

        // Fire-and-forget: older versions of this resource are no longer
        // needed once we know the current one. Submitted before the lock is
        // taken so it never delays this fetch.
        self.cleanup.submit(resource_id.clone(), version);

        let paths = CacheEntryPaths::new(&self.cache_root, &resource_id, version);
        fs_err::tokio::create_dir_all(paths.dir())
            .await
            .map_err(|err| CacheError::io(paths.dir().to_path_buf(), err))?;

        // Create the lock file up front: acquiring a lock requires the file
        // to already exist.
        if !path_exists(&paths.lock_path()).await? {
            fs_err::tokio::File::create(paths.lock_path())
                .await
                .map_err(|err| CacheError::io(paths.lock_path(), err))?;
        }

        let _guard = self.locks.acquire(&paths.lock_path()).await?;

        if !path_exists(&paths.data_path()).await? {
            self.download_and_publish(uri, &paths).await?;
        } else {
            tracing::debug!("cache hit for resource '{resource_id}' version {version}");
        }

        fs_err::tokio::copy(paths.data_path(), target_path)
            .await
            .map_err(|err| CacheError::io(target_path.to_path_buf(), err))?;

        Ok(())
    }

    /// Removes cached data for every version of `resource_id` other than
    /// `keep_version`, waiting for the eviction to complete and surfacing any
    /// `IOError`.
    ///
    /// This runs the same algorithm the background [`CleanupExecutor`] runs
    /// after a successful `get`, but synchronously: callers that want a
    /// deterministic point at which old versions are gone (administrative
    /// tooling, tests asserting eviction safety) should call this directly
    /// rather than relying on the fire-and-forget cleanup `get` schedules.
    pub async fn cleanup_older_versions(
        &self,
        resource_id: &ResourceId,
        keep_version: u64,
    ) -> Result<(), CacheError> {
        cleanup::run_cleanup(&self.cache_root, &self.locks, resource_id, keep_version).await
    }

    async fn download_and_publish(
        &self,
        uri: &str,
        paths: &CacheEntryPaths,
    ) -> Result<(), CacheError> {
        // A leftover download path here is evidence of a crash during a
        // previous attempt (spec §9): nobody else can be writing it, since
        // we hold the scoped lock.
        if path_exists(&paths.download_path()).await? {
            tracing::warn!(
                "removing stale download file at '{}', likely left by a crash",
                paths.download_path().display()
            );
            fs_err::tokio::remove_file(paths.download_path())
                .await
                .map_err(|err| CacheError::io(paths.download_path(), err))?;
        }

        let mut reader =
            self.loader
                .open(uri)
                .await
                .map_err(|source| CacheError::DownloadFailed {
                    uri: uri.to_string(),
                    source,
                })?;

        {
            let mut download_file = fs_err::tokio::File::create(paths.download_path())
                .await
                .map_err(|err| CacheError::io(paths.download_path(), err))?;

            let copy_result = tokio::io::copy(&mut reader, &mut download_file).await;

            if let Err(err) = copy_result {
                // Clean up the partial file ourselves rather than leaving it
                // for the next attempt to discover as "stale": we know right
                // now that it is garbage.
                let _ = fs_err::tokio::remove_file(paths.download_path()).await;
                return Err(CacheError::DownloadFailed {
                    uri: uri.to_string(),
                    source: crate::error::FetchError::Transport {
                        uri: uri.to_string(),
                        source: Box::new(err),
                    },
                });
            }

            download_file
                .flush()
                .await
                .map_err(|err| CacheError::io(paths.download_path(), err))?;
        }

        fs_err::tokio::rename(paths.download_path(), paths.data_path())
            .await
            .map_err(|err| CacheError::io(paths.data_path(), err))?;

        tracing::info!(
            "published new data for resource at '{}'",
            paths.data_path().display()
        );

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn data_file_path(&self, resource_id: &ResourceId, version: u64) -> PathBuf {
        CacheEntryPaths::new(&self.cache_root, resource_id, version).data_path()
    }

    #[cfg(test)]
    pub(crate) fn download_file_path(&self, resource_id: &ResourceId, version: u64) -> PathBuf {
        CacheEntryPaths::new(&self.cache_root, resource_id, version).download_path()
    }

    #[cfg(test)]
    pub(crate) fn lock_file_path(&self, resource_id: &ResourceId, version: u64) -> PathBuf {
        CacheEntryPaths::new(&self.cache_root, resource_id, version).lock_path()
    }
}
