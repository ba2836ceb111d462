use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use parking_lot::Mutex;
use sled::{Db, Tree};
use thiserror::Error;

use super::block::Block;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),
}

/// Persistence collaborator for committed blocks
pub trait BlockStore: Send + Sync {
    /// Every stored block, ascending by index
    fn load_blocks(&self) -> Result<Vec<Block>, StorageError>;

    /// Stores `block` under its index, replacing any previous record
    fn save_block(&self, block: &Block) -> Result<(), StorageError>;

    /// Makes previous writes durable
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Block store backed by a sled database.
///
/// Blocks are keyed by big-endian index so tree iteration is already in
/// chain order. Values are the JSON block record.
pub struct SledBlockStore {
    db: Db,
    blocks: Tree,
    metadata: Tree,
}

impl std::fmt::Debug for SledBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledBlockStore").finish()
    }
}

impl SledBlockStore {
    /// Opens (or creates) a sled database at `path`
    ///
    /// # Arguments
    /// * `path` - Directory holding the database
    ///
    /// # Returns
    /// * `Result<Self, StorageError>` - The opened store, or an error if the
    ///   database or its trees could not be opened
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;

        let blocks = db.open_tree("blocks")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            metadata,
        })
    }

    /// Gets a block by its index
    pub fn get_block(&self, index: u64) -> Result<Block, StorageError> {
        match self.blocks.get(index.to_be_bytes())? {
            Some(value) => serde_json::from_slice(&value)
                .map_err(|e| StorageError::DeserializationError(e.to_string())),
            None => Err(StorageError::NotFound(format!("Block {} not found", index))),
        }
    }

    /// Gets the latest block hash
    pub fn latest_block_hash(&self) -> Result<String, StorageError> {
        match self.metadata.get("latest_block_hash")? {
            Some(value) => Ok(String::from_utf8_lossy(&value).to_string()),
            None => Err(StorageError::NotFound(
                "Latest block hash not found".to_string(),
            )),
        }
    }

    /// Gets the current block height, `None` for an empty store
    pub fn block_height(&self) -> Result<Option<u64>, StorageError> {
        match self.metadata.get("block_height")? {
            Some(value) => bincode::deserialize(&value)
                .map(Some)
                .map_err(|e| StorageError::DeserializationError(e.to_string())),
            None => Ok(None),
        }
    }
}

impl BlockStore for SledBlockStore {
    fn load_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let mut blocks = Vec::new();

        for entry in self.blocks.iter() {
            let (key, value) = entry?;
            let block: Block = serde_json::from_slice(&value).map_err(|e| {
                StorageError::DeserializationError(format!(
                    "Failed to deserialize block under key {:?}: {}",
                    key.as_ref(),
                    e
                ))
            })?;
            blocks.push(block);
        }

        debug!("Read {} blocks from sled", blocks.len());
        Ok(blocks)
    }

    /// Saves a block and updates the latest hash and height metadata
    ///
    /// # Arguments
    /// * `block` - The block to save, keyed by its big-endian index
    ///
    /// # Returns
    /// * `Result<(), StorageError>` - Success or an error
    fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let value = serde_json::to_vec(block)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        self.blocks.insert(block.index.to_be_bytes().to_vec(), value)?;

        self.metadata
            .insert("latest_block_hash", block.hash.as_bytes())?;

        let height_bytes = bincode::serialize(&block.index)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.metadata.insert("block_height", height_bytes)?;

        Ok(())
    }

    /// Flushes all pending writes to disk
    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

/// In-process block store
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: Mutex<BTreeMap<u64, Block>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryBlockStore {
    fn load_blocks(&self) -> Result<Vec<Block>, StorageError> {
        Ok(self.blocks.lock().values().cloned().collect())
    }

    fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        self.blocks.lock().insert(block.index, block.clone());
        Ok(())
    }
}
