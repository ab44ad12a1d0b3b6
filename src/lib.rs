//! A concurrency-safe, content-addressed cache for remote resources.
//!
//! Resources are identified by a hash of their URI and stored under
//! per-version directories so that multiple versions of the same resource
//! can coexist while an upgrade is in flight. Concurrent callers racing on
//! the same `(resource, version)` are serialized by a two-layer lock (an
//! intra-process mutex plus an OS-level advisory file lock), so only one of
//! them performs the actual download.

use std::path::PathBuf;

mod error;
mod fetcher;
mod lock;
mod paths;
mod resource_id;

pub mod cache;

pub use cache::CacheEngine;
pub use error::{CacheError, FetchError};
pub use fetcher::{Probe, ResourceLoader};
pub use resource_id::ResourceId;

/// Determines the default cache directory.
///
/// Checks the `FETCH_CACHE_DIR` environment variable first; if unset, falls
/// back to `dirs::cache_dir()/fetch-cache`.
pub fn default_cache_dir() -> anyhow::Result<PathBuf> {
    std::env::var("FETCH_CACHE_DIR")
        .map(PathBuf::from)
        .or_else(|_| {
            dirs::cache_dir()
                .ok_or_else(|| {
                    anyhow::anyhow!("could not determine cache directory for current platform")
                })
                .map(|mut p| {
                    p.push("fetch-cache");
                    p
                })
        })
}
