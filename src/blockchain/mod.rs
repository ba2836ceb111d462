// Blockchain module
//
// This module contains the core blockchain implementation including:
// - Canonical encoding, hashing and the merkle root
// - Keys, wallets and signed UTXO transactions
// - Ledger, directory and block store collaborators
// - Chain state and the concurrent proof of work miner

pub mod block;
pub mod chain;
pub mod crypto;
pub mod directory;
pub mod events;
pub mod hashing;
pub mod ledger;
pub mod merkle;
pub mod miner;
pub mod storage;
pub mod transaction;
pub mod wallet;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError, CommitOutcome, RoundSignal};
pub use crypto::{Address, DigitalSignature, KeyPair};
pub use directory::{LookupError, MemoryDirectory, WalletDirectory};
pub use events::{ChainEvent, ChainObserver, LogObserver, NoopObserver};
pub use ledger::{MemoryLedger, UtxoLedger};
pub use merkle::merkle_root;
pub use miner::{Miner, MiningEngine, RoundReport};
pub use storage::{BlockStore, MemoryBlockStore, SledBlockStore};
pub use transaction::{Transaction, TransactionError, Utxo};
pub use wallet::{Wallet, WalletRecord};
