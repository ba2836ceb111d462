use log::{debug, info, warn};

use super::chain::CommitOutcome;

/// Notable things happening to the chain and its mining rounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    RoundStarted {
        index: u64,
        difficulty: usize,
        miners: usize,
    },

    ProofFound {
        miner: String,
        nonce: u64,
        hash: String,
    },

    CommitSucceeded {
        index: u64,
        hash: String,
        miner: String,
    },

    CommitRejected {
        miner: String,
        outcome: CommitOutcome,
    },

    /// A block whose `previous_hash` does not match its predecessor's hash
    ValidationFailed {
        index: u64,
        expected: String,
        found: String,
    },
}

/// Receives chain events. Called from mining threads.
pub trait ChainObserver: Send + Sync {
    fn on_event(&self, event: &ChainEvent);
}

/// Forwards every event to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl ChainObserver for LogObserver {
    fn on_event(&self, event: &ChainEvent) {
        match event {
            ChainEvent::RoundStarted {
                index,
                difficulty,
                miners,
            } => info!(
                "Mining block {} with {} miners at difficulty {}",
                index, miners, difficulty
            ),
            ChainEvent::ProofFound { miner, nonce, hash } => {
                debug!("Miner {} found nonce {} -> {}", miner, nonce, hash)
            }
            ChainEvent::CommitSucceeded { index, hash, miner } => {
                info!("Block {} committed by miner {}: {}", index, miner, hash)
            }
            ChainEvent::CommitRejected { miner, outcome } => match outcome {
                CommitOutcome::TimedOut => {
                    warn!("Miner {} timed out waiting for the chain lock", miner)
                }
                CommitOutcome::InvalidProof => warn!("Proof from miner {} is invalid", miner),
                _ => debug!("Commit from miner {} rejected: {:?}", miner, outcome),
            },
            ChainEvent::ValidationFailed {
                index,
                expected,
                found,
            } => warn!(
                "Chain linkage broken at block {}: expected previous hash {}, found {}",
                index, expected, found
            ),
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ChainObserver for NoopObserver {
    fn on_event(&self, _event: &ChainEvent) {}
}
