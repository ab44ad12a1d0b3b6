use std::fmt::{self, Display, Formatter};

use sha2::{Digest, Sha256};

/// A stable, collision-resistant identifier for a cached resource, derived
/// from the resource's URI.
///
/// Two URIs are treated as the same cached resource iff they produce the
/// same [`ResourceId`]. The id is pure and independent of any cache
/// instance: computing it never touches the filesystem.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ResourceId(String);

impl ResourceId {
    /// Computes the id of a resource from its URI.
    ///
    /// The URI is hashed verbatim (as a byte string); callers that care
    /// about URI normalization (trailing slashes, query ordering, ...) are
    /// responsible for canonicalizing before calling this.
    pub fn of(uri: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(uri.as_bytes());
        ResourceId(hex::encode(hasher.finalize()))
    }

    /// Returns the hex-encoded digest, the same string used as the
    /// directory name under the cache root.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceId;

    #[test]
    fn same_uri_produces_same_id() {
        let a = ResourceId::of("https://my-server.com/config.xml");
        let b = ResourceId::of("https://my-server.com/config.xml");
        assert_eq!(a, b);
    }

    #[test]
    fn different_uris_produce_different_ids() {
        let a = ResourceId::of("https://my-server.com/config.xml");
        let b = ResourceId::of("https://my-server.com/other.xml");
        assert_ne!(a, b);
    }

    #[test]
    fn id_is_hex_encoded_sha256() {
        let id = ResourceId::of("https://my-server.com/config.xml");
        assert_eq!(id.as_str().len(), 64);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
