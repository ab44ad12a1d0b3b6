use std::path::{Path, PathBuf};

use crate::resource_id::ResourceId;

/// The three sibling filesystem paths that make up a [`CacheEntry`] for a
/// specific `(ResourceId, Version)`.
///
/// All three live in the same directory so that publishing a download
/// (`rename(download -> data)`) is a same-filesystem, and therefore atomic,
/// operation.
#[derive(Debug, Clone)]
pub struct CacheEntryPaths {
    dir: PathBuf,
}

impl CacheEntryPaths {
    /// Computes the deterministic directory for `(resource_id, version)`
    /// under `cache_root`. Pure: does not touch the filesystem.
    pub fn new(cache_root: &Path, resource_id: &ResourceId, version: u64) -> Self {
        let dir = cache_root
            .join(resource_id.as_str())
            .join(version.to_string());
        CacheEntryPaths { dir }
    }

    /// The directory holding this entry's `data`, `download`, and `lock`
    /// files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Exists iff the cached bytes for this version are valid and complete.
    pub fn data_path(&self) -> PathBuf {
        self.dir.join("data")
    }

    /// Exists only while a fetch is in progress (or after a crash left it
    /// behind).
    pub fn download_path(&self) -> PathBuf {
        self.dir.join("download")
    }

    /// Anchors the OS-level lock for this entry. Outlives both the data and
    /// download paths.
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join("lock")
    }
}

#[cfg(test)]
mod tests {
    use super::CacheEntryPaths;
    use crate::resource_id::ResourceId;
    use std::path::Path;

    #[test]
    fn paths_are_siblings_under_resource_and_version() {
        let root = Path::new("/cache");
        let id = ResourceId::of("https://my-server.com/config.xml");
        let paths = CacheEntryPaths::new(root, &id, 1000);

        assert_eq!(paths.data_path().parent(), paths.download_path().parent());
        assert_eq!(paths.data_path().parent(), paths.lock_path().parent());
        assert_eq!(paths.dir(), root.join(id.as_str()).join("1000"));
        assert_eq!(paths.data_path().file_name().unwrap(), "data");
        assert_eq!(paths.download_path().file_name().unwrap(), "download");
        assert_eq!(paths.lock_path().file_name().unwrap(), "lock");
    }

    #[test]
    fn same_inputs_are_deterministic() {
        let root = Path::new("/cache");
        let id = ResourceId::of("https://my-server.com/config.xml");
        let a = CacheEntryPaths::new(root, &id, 1000);
        let b = CacheEntryPaths::new(root, &id, 1000);
        assert_eq!(a.data_path(), b.data_path());
    }
}
