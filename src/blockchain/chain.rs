use log::{info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::block::{Block, BlockError};
use super::events::{ChainEvent, ChainObserver, LogObserver};
use super::hashing::meets_difficulty;
use super::merkle::merkle_root;
use super::storage::{BlockStore, StorageError};
use super::transaction::{Transaction, TransactionError};
use crate::config::{ChainVersion, ConfigError, VersionSource};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Invalid block: {0}")]
    InvalidBlock(#[from] BlockError),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("Encoding error: {0}")]
    EncodingError(#[from] serde_json::Error),

    #[error("Invalid chain version: {0}")]
    InvalidVersion(#[from] ConfigError),
}

/// Result of offering a mined block to the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The block was appended and the round signal set
    Committed,

    /// Another miner already committed this round
    AlreadyMined,

    /// The block hash does not satisfy the chain difficulty
    InvalidProof,

    /// The block does not extend the current chain tip, either by parent
    /// hash or by index
    StaleParent,

    /// The chain lock was not acquired within the timeout
    TimedOut,
}

impl CommitOutcome {
    pub fn is_committed(self) -> bool {
        self == CommitOutcome::Committed
    }
}

/// Per-round cancellation flag.
///
/// Once set it stays set; a new round needs a new signal.
#[derive(Debug, Default)]
pub struct RoundSignal {
    mined: AtomicBool,
}

impl RoundSignal {
    pub fn new() -> Self {
        RoundSignal::default()
    }

    pub fn is_set(&self) -> bool {
        self.mined.load(Ordering::Acquire)
    }

    fn set(&self) {
        self.mined.store(true, Ordering::Release);
    }
}

/// Represents the blockchain
pub struct Blockchain {
    /// The chain of blocks; never empty once constructed
    chain: Mutex<Vec<Block>>,

    /// Transactions waiting to be sealed into a block
    pending_transactions: Mutex<Vec<Transaction>>,

    version: ChainVersion,

    observer: Arc<dyn ChainObserver>,
}

impl fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blockchain")
            .field("length", &self.len())
            .field("version", &self.version)
            .finish()
    }
}

impl Blockchain {
    /// Creates a new blockchain holding only a genesis block
    ///
    /// # Arguments
    /// * `version` - The protocol version and difficulty blocks must meet
    ///
    /// # Returns
    /// * `Result<Self, BlockchainError>` - The new blockchain, or an error if
    ///   the difficulty can never be met
    pub fn new(version: ChainVersion) -> Result<Self, BlockchainError> {
        version.validate()?;

        Ok(Blockchain {
            chain: Mutex::new(vec![Block::genesis(version.version_id)]),
            pending_transactions: Mutex::new(Vec::new()),
            version,
            observer: Arc::new(LogObserver),
        })
    }

    /// Rebuilds a chain from previously persisted blocks, ascending by index.
    ///
    /// An empty sequence yields a fresh genesis-only chain.
    pub fn from_blocks(blocks: Vec<Block>, version: ChainVersion) -> Result<Self, BlockchainError> {
        if blocks.is_empty() {
            return Self::new(version);
        }

        version.validate()?;

        for (position, block) in blocks.iter().enumerate() {
            block.validate_record()?;

            if block.index != position as u64 {
                return Err(BlockchainError::InvalidChain(format!(
                    "Expected block index {} at position {}, found {}",
                    position, position, block.index
                )));
            }
        }

        Ok(Blockchain {
            chain: Mutex::new(blocks),
            pending_transactions: Mutex::new(Vec::new()),
            version,
            observer: Arc::new(LogObserver),
        })
    }

    /// Loads the chain from `store`, or creates and persists a genesis block
    /// when the store is empty
    ///
    /// # Arguments
    /// * `store` - The block store to load from and persist genesis into
    /// * `versions` - Source of the version and difficulty in force
    ///
    /// # Returns
    /// * `Result<Self, BlockchainError>` - The loaded or freshly created chain
    pub fn bootstrap<S, V>(store: &S, versions: &V) -> Result<Self, BlockchainError>
    where
        S: BlockStore + ?Sized,
        V: VersionSource + ?Sized,
    {
        let version = versions.current_version();
        let blocks = store.load_blocks()?;

        if blocks.is_empty() {
            info!("No existing blockchain found in storage, creating genesis block");
            let blockchain = Self::new(version)?;
            store.save_block(&blockchain.genesis_block())?;
            return Ok(blockchain);
        }

        info!("Loaded {} blocks from storage", blocks.len());
        Self::from_blocks(blocks, version)
    }

    /// Replaces the event observer (defaults to `LogObserver`)
    pub fn with_observer(mut self, observer: Arc<dyn ChainObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn observer(&self) -> &dyn ChainObserver {
        self.observer.as_ref()
    }

    pub fn version(&self) -> ChainVersion {
        self.version
    }

    pub fn difficulty(&self) -> usize {
        self.version.difficulty
    }

    pub fn len(&self) -> usize {
        self.chain.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.lock().is_empty()
    }

    /// Gets the most recently committed block
    pub fn last_block(&self) -> Block {
        self.chain
            .lock()
            .last()
            .cloned()
            .expect("chain always holds a genesis block")
    }

    pub fn genesis_block(&self) -> Block {
        self.chain
            .lock()
            .first()
            .cloned()
            .expect("chain always holds a genesis block")
    }

    /// Gets a snapshot of the entire chain
    pub fn blocks(&self) -> Vec<Block> {
        self.chain.lock().clone()
    }

    /// Offers a mined block for this round.
    ///
    /// The signal is read once without the lock; after that the check, proof
    /// validation, append and signal set all happen under the chain lock,
    /// which is waited on for at most `timeout`.
    ///
    /// # Arguments
    /// * `candidate` - The sealed block to append
    /// * `round` - The round's cancellation signal, set on success
    /// * `timeout` - How long to wait for the chain lock
    ///
    /// # Returns
    /// * `CommitOutcome` - `Committed` if the block was appended, otherwise
    ///   the reason it was refused
    pub fn try_commit(
        &self,
        candidate: Block,
        round: &RoundSignal,
        timeout: Duration,
    ) -> CommitOutcome {
        if round.is_set() {
            return CommitOutcome::AlreadyMined;
        }

        let mut chain = match self.chain.try_lock_for(timeout) {
            Some(chain) => chain,
            None => {
                warn!(
                    "Timed out after {:?} waiting to commit block {}",
                    timeout, candidate.index
                );
                return CommitOutcome::TimedOut;
            }
        };

        if round.is_set() {
            return CommitOutcome::AlreadyMined;
        }

        if !meets_difficulty(&candidate.hash, self.version.difficulty) {
            return CommitOutcome::InvalidProof;
        }

        match chain.last() {
            Some(tip)
                if tip.hash == candidate.previous_hash && tip.index + 1 == candidate.index => {}
            _ => return CommitOutcome::StaleParent,
        }

        chain.push(candidate);
        round.set();

        CommitOutcome::Committed
    }

    /// Checks that every block links to its predecessor's hash.
    ///
    /// Only linkage is checked; see `verify_proofs` for recomputing hashes.
    ///
    /// # Returns
    /// * `bool` - True if every link holds; the first broken link is reported
    ///   to the observer as `ValidationFailed`
    pub fn is_valid(&self) -> bool {
        let broken = {
            let chain = self.chain.lock();
            chain
                .windows(2)
                .find(|pair| pair[1].previous_hash != pair[0].hash)
                .map(|pair| ChainEvent::ValidationFailed {
                    index: pair[1].index,
                    expected: pair[0].hash.clone(),
                    found: pair[1].previous_hash.clone(),
                })
        };

        match broken {
            Some(event) => {
                self.observer.on_event(&event);
                false
            }
            None => true,
        }
    }

    /// Recomputes each non-genesis block's hash and merkle root and checks the
    /// hash against the chain difficulty
    pub fn verify_proofs(&self) -> bool {
        let chain = self.chain.lock();

        chain.iter().filter(|block| !block.is_genesis()).all(|block| {
            let root_matches = merkle_root(&block.transactions)
                .map(|root| root == block.merkle_root)
                .unwrap_or(false);

            root_matches
                && block.calculate_hash() == block.hash
                && meets_difficulty(&block.hash, self.version.difficulty)
        })
    }

    /// Adds a well-formed transaction to the pending pool
    pub fn add_transaction(&self, transaction: Transaction) -> Result<u64, BlockchainError> {
        transaction.validate()?;
        self.pending_transactions.lock().push(transaction);

        Ok(self.last_block().index + 1)
    }

    /// Gets all pending transactions
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pending_transactions.lock().clone()
    }

    /// Drops the leading pending transactions that were sealed into a block
    pub fn remove_sealed(&self, sealed: &[Transaction]) {
        let mut pending = self.pending_transactions.lock();
        let count = pending
            .iter()
            .zip(sealed)
            .take_while(|(waiting, included)| waiting == included)
            .count();
        pending.drain(..count);
    }

    #[cfg(test)]
    pub(crate) fn hold_lock(&self) -> parking_lot::MutexGuard<'_, Vec<Block>> {
        self.chain.lock()
    }
}
