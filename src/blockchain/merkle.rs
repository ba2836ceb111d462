use sha2::{Digest, Sha256};

use super::hashing::canonical_encode;
use super::transaction::Transaction;

/// Root of an empty transaction sequence, i.e. SHA-256 of the empty byte string
pub const EMPTY_MERKLE_ROOT: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Computes the aggregate digest over a pending transaction sequence.
///
/// Each transaction is canonically encoded and the encodings are hashed as one
/// concatenated byte stream, in input order. This is a single flat digest, not
/// a binary tree, so reordering the transactions changes the root.
pub fn merkle_root(transactions: &[Transaction]) -> serde_json::Result<String> {
    let mut hasher = Sha256::new();

    for transaction in transactions {
        hasher.update(canonical_encode(transaction)?);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
