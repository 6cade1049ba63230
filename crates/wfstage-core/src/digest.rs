use std::path::PathBuf;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of arbitrary bytes.
pub fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Cache key for anything identified by a URL (RO-Crates, input files).
pub fn url_key(url: &str) -> String {
    digest_hex(url.as_bytes())
}

/// Two-level slot for a repository checkout: `hash(url)/hash(revision)`.
///
/// A missing revision hashes the empty string, so "no revision" and
/// `Some("")` share a slot.
pub fn repo_slot(url: &str, revision: Option<&str>) -> PathBuf {
    PathBuf::from(url_key(url)).join(digest_hex(revision.unwrap_or("").as_bytes()))
}
