//! Content addressing utilities.

use relay_core::artifact::ContentHash;
use sha2::{Digest, Sha256};

/// SHA-256 of the blob.
pub fn hash_content(data: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    ContentHash::from_hex(hex::encode(hasher.finalize()))
}

/// Relative storage path for a digest: `ab/cdef...`.
pub fn shard_path(digest: &ContentHash) -> String {
    let hex = digest.as_str();
    if hex.len() <= 2 {
        return hex.to_string();
    }
    format!("{}/{}", &hex[..2], &hex[2..])
}

/// Artifact names are single path-free tokens.
pub fn validate_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
