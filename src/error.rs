use std::path::PathBuf;

/// Errors that can be returned from a [`crate::fetcher::ResourceLoader`]
/// implementation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The byte stream ended abnormally, or the underlying transport failed.
    #[error("failed to fetch resource '{uri}'")]
    Transport {
        uri: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Errors returned from [`crate::cache::CacheEngine`] operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The resource loader reported that the URI does not exist.
    #[error("resource not found: '{uri}'")]
    ResourceNotFound { uri: String },

    /// The byte stream for a download ended abnormally. The download path
    /// has already been cleaned up by the time this error is returned.
    #[error("failed to download '{uri}'")]
    DownloadFailed {
        uri: String,
        #[source]
        source: FetchError,
    },

    /// The lock file for a cache entry could not be opened or locked.
    #[error("lock unavailable for '{}'", path.display())]
    LockUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other filesystem failure (rename, copy, mkdir, ...).
    #[error("I/O error at '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}
