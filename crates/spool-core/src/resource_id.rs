use std::fmt;

use sha2::{Digest, Sha256};

/// Stable identity of a cached resource: the first 16 hex characters of the
/// SHA-256 over the origin URL bytes.
///
/// The id is a pure function of the URL *bytes* — no canonicalization is
/// applied, so URLs that differ in any byte map to different ids. The id is
/// also the file-name stem of the resource's data and meta files on disk.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(String);

impl ResourceId {
    /// Derive the id for an origin URL.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        let mut hex = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            use fmt::Write;
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Reconstruct an id from its string form (e.g. a file-name stem).
    ///
    /// Returns `None` unless the input is exactly 16 lowercase hex chars.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == 16 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
