//! Deterministic content identifier for cached items.
//!
//! A [`Fingerprint`] is the hex SHA-256 digest of `canonical_url ‖ "." ‖ etag`.
//! Two distinct `(url, etag)` pairs produce two distinct fingerprints with
//! overwhelming probability; a new `ETag` from the origin therefore always
//! buys a cold miss rather than serving stale bytes under an old name.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 fingerprint of an immutable cached item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint for a canonical URL and its upstream ETag.
    pub fn compute(canonical_url: &str, etag: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical_url.as_bytes());
        hasher.update(b".");
        hasher.update(etag.as_bytes());
        let digest = hasher.finalize();
        Fingerprint(hex_encode(&digest))
    }

    /// The fingerprint's filesystem-safe basename, usable directly under the
    /// node's data directory.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Fingerprint(s.to_owned()))
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Fingerprint(s.to_owned())
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Fingerprint(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_is_deterministic() {
        let a = Fingerprint::compute("http://origin/x", "v1");
        let b = Fingerprint::compute("http://origin/x", "v1");
        assert_eq!(a, b);
    }

    #[test]
    fn etag_change_changes_fingerprint() {
        let fp1 = Fingerprint::compute("http://origin/x", "v1");
        let fp2 = Fingerprint::compute("http://origin/x", "v2");
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn url_change_changes_fingerprint() {
        let fp1 = Fingerprint::compute("http://origin/x", "v1");
        let fp2 = Fingerprint::compute("http://origin/y", "v1");
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn is_hex_sha256_length() {
        let fp = Fingerprint::compute("http://origin/x", "v1");
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
