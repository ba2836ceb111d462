use chrono::Utc;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::merkle::EMPTY_MERKLE_ROOT;
use super::transaction::{Transaction, TransactionError};

/// Hash and previous hash carried by the genesis block
pub const GENESIS_HASH: &str = "0";

/// Timestamp layout used for block times, always UTC
pub const TIME_FORMAT: &str = "%d-%b-%Y (%H:%M:%S%.6f)";

/// Errors found while validating a block record at the persistence boundary
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Block {index}: n_tx is {declared} but {actual} transactions are present")]
    TransactionCountMismatch {
        index: u64,
        declared: usize,
        actual: usize,
    },

    #[error("Block {index}: {field} is not a hex digest: {value:?}")]
    InvalidDigest {
        index: u64,
        field: &'static str,
        value: String,
    },

    #[error("Block {index}: invalid transaction: {source}")]
    InvalidTransaction {
        index: u64,
        #[source]
        source: TransactionError,
    },
}

/// Current time in the block timestamp layout
pub fn timestamp_now() -> String {
    Utc::now().format(TIME_FORMAT).to_string()
}

/// The fields a miner hashes, minus the nonce.
///
/// The hasher state after absorbing `index || time || merkle_root ||
/// previous_hash` is kept, so each attempt only hashes the nonce digits.
#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub index: u64,
    pub time: String,
    pub merkle_root: String,
    pub previous_hash: String,
    prefix: Sha256,
}

impl BlockHeader {
    pub fn new(index: u64, time: String, merkle_root: String, previous_hash: String) -> Self {
        let mut prefix = Sha256::new();
        prefix.update(index.to_string().as_bytes());
        prefix.update(time.as_bytes());
        prefix.update(merkle_root.as_bytes());
        prefix.update(previous_hash.as_bytes());

        BlockHeader {
            index,
            time,
            merkle_root,
            previous_hash,
            prefix,
        }
    }

    /// SHA-256 hex of the header fields followed by the decimal nonce
    pub fn hash_with_nonce(&self, nonce: u64) -> String {
        let mut hasher = self.prefix.clone();
        hasher.update(nonce.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Represents a block in the blockchain, in its persisted record layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(deserialize_with = "u64_or_string")]
    pub index: u64,

    #[serde(rename = "ver")]
    pub version: u32,

    pub time: String,

    #[serde(deserialize_with = "u64_or_string")]
    pub nonce: u64,

    #[serde(rename = "tx")]
    pub transactions: Vec<Transaction>,

    pub n_tx: usize,

    #[serde(rename = "mrkl_root")]
    pub merkle_root: String,

    pub hash: String,

    pub previous_hash: String,

    /// Identifier of the miner whose commit sealed this block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relayed_by: Option<String>,
}

impl Block {
    /// The fixed first block of a chain
    pub fn genesis(version: u32) -> Self {
        Block {
            index: 0,
            version,
            time: timestamp_now(),
            nonce: 0,
            transactions: Vec::new(),
            n_tx: 0,
            merkle_root: EMPTY_MERKLE_ROOT.to_string(),
            hash: GENESIS_HASH.to_string(),
            previous_hash: GENESIS_HASH.to_string(),
            relayed_by: None,
        }
    }

    /// Assembles a mined block from its header and winning nonce
    pub fn sealed(
        header: &BlockHeader,
        version: u32,
        nonce: u64,
        transactions: Vec<Transaction>,
        hash: String,
        relayed_by: Option<String>,
    ) -> Self {
        Block {
            index: header.index,
            version,
            time: header.time.clone(),
            nonce,
            n_tx: transactions.len(),
            transactions,
            merkle_root: header.merkle_root.clone(),
            hash,
            previous_hash: header.previous_hash.clone(),
            relayed_by,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == GENESIS_HASH
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader::new(
            self.index,
            self.time.clone(),
            self.merkle_root.clone(),
            self.previous_hash.clone(),
        )
    }

    /// Recomputes the proof digest from this block's own fields
    pub fn calculate_hash(&self) -> String {
        self.header().hash_with_nonce(self.nonce)
    }

    /// Shape checks applied to records coming back from storage
    pub fn validate_record(&self) -> Result<(), BlockError> {
        if self.n_tx != self.transactions.len() {
            return Err(BlockError::TransactionCountMismatch {
                index: self.index,
                declared: self.n_tx,
                actual: self.transactions.len(),
            });
        }

        self.check_digest("mrkl_root", &self.merkle_root, false)?;
        self.check_digest("hash", &self.hash, true)?;
        self.check_digest("previous_hash", &self.previous_hash, true)?;

        for transaction in &self.transactions {
            transaction
                .validate()
                .map_err(|source| BlockError::InvalidTransaction {
                    index: self.index,
                    source,
                })?;
        }

        Ok(())
    }

    fn check_digest(
        &self,
        field: &'static str,
        value: &str,
        sentinel_allowed: bool,
    ) -> Result<(), BlockError> {
        let is_hex_digest =
            value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));

        if is_hex_digest || (sentinel_allowed && value == GENESIS_HASH) {
            Ok(())
        } else {
            Err(BlockError::InvalidDigest {
                index: self.index,
                field,
                value: value.to_string(),
            })
        }
    }
}

/// Accepts an integer either as a JSON number or a decimal string
fn u64_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(u64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(value) => Ok(value),
        NumberOrText::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Address;
    use crate::blockchain::hashing::sha256_hex;

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis(1);

        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.nonce, 0);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.n_tx, 0);
        assert_eq!(genesis.merkle_root, EMPTY_MERKLE_ROOT);
        assert_eq!(genesis.hash, GENESIS_HASH);
        assert_eq!(genesis.previous_hash, GENESIS_HASH);
        assert!(genesis.is_genesis());
        assert!(genesis.validate_record().is_ok());
    }

    #[test]
    fn test_header_hash_is_concatenation() {
        let header = BlockHeader::new(
            3,
            "01-Jan-2024 (00:00:00.000000)".to_string(),
            EMPTY_MERKLE_ROOT.to_string(),
            "abc".to_string(),
        );

        let expected = sha256_hex(
            format!("3{}{}abc42", "01-Jan-2024 (00:00:00.000000)", EMPTY_MERKLE_ROOT).as_bytes(),
        );
        assert_eq!(header.hash_with_nonce(42), expected);
        assert_eq!(header.hash_with_nonce(42), expected);
        assert_ne!(header.hash_with_nonce(43), expected);
    }

    #[test]
    fn test_sealed_block_matches_calculated_hash() {
        let header = BlockHeader::new(
            1,
            timestamp_now(),
            EMPTY_MERKLE_ROOT.to_string(),
            GENESIS_HASH.to_string(),
        );
        let hash = header.hash_with_nonce(7);

        let block = Block::sealed(&header, 1, 7, Vec::new(), hash.clone(), Some("m1".to_string()));

        assert_eq!(block.calculate_hash(), hash);
        assert_eq!(block.n_tx, 0);
        assert_eq!(block.relayed_by.as_deref(), Some("m1"));
    }

    #[test]
    fn test_persisted_field_names() {
        let block = Block::genesis(2);
        let json = serde_json::to_value(&block).unwrap();

        assert_eq!(json["ver"], 2);
        assert_eq!(json["mrkl_root"], EMPTY_MERKLE_ROOT);
        assert!(json["tx"].as_array().unwrap().is_empty());
        assert!(json.get("relayed_by").is_none());
    }

    #[test]
    fn test_string_encoded_integers_are_accepted() {
        let raw = format!(
            r#"{{"index":"4","ver":1,"time":"t","nonce":"123","tx":[],"n_tx":0,
                "mrkl_root":"{root}","hash":"{root}","previous_hash":"{root}","relayed_by":"3"}}"#,
            root = EMPTY_MERKLE_ROOT
        );

        let block: Block = serde_json::from_str(&raw).unwrap();
        assert_eq!(block.index, 4);
        assert_eq!(block.nonce, 123);
        assert_eq!(block.relayed_by.as_deref(), Some("3"));
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let raw = r#"{"index":1,"ver":1,"time":"t","nonce":0,"tx":[],"n_tx":0}"#;
        assert!(serde_json::from_str::<Block>(raw).is_err());
    }

    #[test]
    fn test_validate_record_count_mismatch() {
        let mut block = Block::genesis(1);
        block
            .transactions
            .push(Transaction::new(Address("a".to_string()), Address("b".to_string()), 1));

        assert!(matches!(
            block.validate_record(),
            Err(BlockError::TransactionCountMismatch { declared: 0, actual: 1, .. })
        ));
    }

    #[test]
    fn test_validate_record_bad_digest() {
        let mut block = Block::genesis(1);
        block.merkle_root = "xyz".to_string();

        assert!(matches!(
            block.validate_record(),
            Err(BlockError::InvalidDigest { field: "mrkl_root", .. })
        ));
    }
}
