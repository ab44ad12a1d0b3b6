//! The resource-loader contract consumed by [`crate::cache::CacheEngine`].
//!
//! This module never ships a network implementation: the loader is an
//! external collaborator supplied by the caller, consumed only as
//! `Arc<dyn ResourceLoader>`.

use tokio::io::AsyncRead;

use crate::error::FetchError;

/// The result of checking a resource's current version without downloading
/// its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    /// `false` means the resource does not exist at this URI; `get` surfaces
    /// this as [`crate::error::CacheError::ResourceNotFound`].
    pub exists: bool,
    /// Monotonic version reported by the source (e.g. a last-modified
    /// timestamp). Meaningless when `exists` is `false`.
    pub version: u64,
}

/// Produces byte streams for resource URIs. Implementations are expected to
/// be cheap to probe and lazy to open: `open` should not buffer the whole
/// resource before returning the reader.
#[async_trait::async_trait]
pub trait ResourceLoader: Send + Sync {
    /// Checks whether `uri` currently exists and, if so, its version.
    async fn probe(&self, uri: &str) -> Result<Probe, FetchError>;

    /// Opens a byte stream for `uri`. Callers must have already confirmed
    /// existence via [`ResourceLoader::probe`].
    async fn open(&self, uri: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>, FetchError>;
}
