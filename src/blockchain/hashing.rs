use serde::Serialize;
use sha2::{Digest, Sha256};

/// Encodes a record as compact JSON with lexicographically sorted keys.
///
/// The record is first lifted into a `serde_json::Value`, whose object maps are
/// ordered, so the output does not depend on struct field declaration order.
/// Fields skipped during serialization (absent optionals) do not appear at all.
pub fn canonical_encode<T: Serialize>(record: &T) -> serde_json::Result<Vec<u8>> {
    let value = serde_json::to_value(record)?;
    serde_json::to_vec(&value)
}

/// SHA-256 of `bytes` as a lowercase hex string
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Checks that a hex digest starts with `difficulty` literal `'0'` characters
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}
