//! Content digests used to detect edits to applied migrations

use sha2::{Digest, Sha256};

/// Length of a hex encoded SHA-256 digest
pub const HASH_LENGTH: usize = 64;

/// SHA-256 of the migration text, lowercase hex
pub fn hash_content(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
