use log::{error, warn};
use rand::Rng;

use std::thread;
use std::time::Duration;

use super::block::{timestamp_now, Block, BlockHeader};
use super::chain::{Blockchain, BlockchainError, CommitOutcome, RoundSignal};
use super::events::ChainEvent;
use super::hashing::meets_difficulty;
use super::merkle::merkle_root;
use super::transaction::Transaction;

/// Largest nonce a worker will draw
pub const MAX_NONCE: u64 = i64::MAX as u64;

/// Shared state of one mining round.
///
/// Built once per round and lent to every worker; it carries the header all
/// workers hash against, the cancellation signal and the commit path.
pub struct Round<'a> {
    chain: &'a Blockchain,
    header: BlockHeader,
    transactions: Vec<Transaction>,
    signal: RoundSignal,
    commit_timeout: Duration,
}

impl<'a> Round<'a> {
    /// Prepares a round on top of the current chain tip.
    ///
    /// The merkle root is computed here, once, and shared by all workers.
    pub fn new(
        chain: &'a Blockchain,
        transactions: Vec<Transaction>,
        commit_timeout: Duration,
    ) -> Result<Self, BlockchainError> {
        let tip = chain.last_block();
        let header = BlockHeader::new(
            tip.index + 1,
            timestamp_now(),
            merkle_root(&transactions)?,
            tip.hash,
        );

        Ok(Round {
            chain,
            header,
            transactions,
            signal: RoundSignal::new(),
            commit_timeout,
        })
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn is_committed(&self) -> bool {
        self.signal.is_set()
    }

    /// Seals the block for `nonce` and offers it to the chain.
    ///
    /// Returns the committed block, or the reason it was not appended.
    pub fn commit(&self, miner: &Miner, nonce: u64, hash: String) -> Result<Block, CommitOutcome> {
        let block = Block::sealed(
            &self.header,
            self.chain.version().version_id,
            nonce,
            self.transactions.clone(),
            hash.clone(),
            Some(miner.id().to_string()),
        );

        let outcome = self
            .chain
            .try_commit(block.clone(), &self.signal, self.commit_timeout);

        let event = match outcome {
            CommitOutcome::Committed => ChainEvent::CommitSucceeded {
                index: self.header.index,
                hash,
                miner: miner.id().to_string(),
            },
            rejected => ChainEvent::CommitRejected {
                miner: miner.id().to_string(),
                outcome: rejected,
            },
        };
        self.chain.observer().on_event(&event);

        match outcome {
            CommitOutcome::Committed => Ok(block),
            rejected => Err(rejected),
        }
    }
}

/// What a single worker did during a round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// The block this worker committed, if it won the round
    pub block: Option<Block>,

    /// Hashes computed
    pub attempts: u64,
}

/// A mining identity; each one runs a worker thread per round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Miner {
    id: String,
}

impl Miner {
    pub fn new(id: impl Into<String>) -> Self {
        Miner { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Searches random nonces until this worker commits a block or the round
    /// is committed by someone else.
    ///
    /// The round signal is polled before every hash, so at most one extra
    /// hash is computed after the round ends.
    pub fn search(&self, round: &Round<'_>) -> WorkerReport {
        let mut rng = rand::thread_rng();
        let mut report = WorkerReport::default();

        while !round.is_committed() {
            let nonce = rng.gen_range(0..=MAX_NONCE);
            let hash = round.header().hash_with_nonce(nonce);
            report.attempts += 1;

            if !meets_difficulty(&hash, round.chain.difficulty()) {
                continue;
            }

            round.chain.observer().on_event(&ChainEvent::ProofFound {
                miner: self.id.clone(),
                nonce,
                hash: hash.clone(),
            });

            match round.commit(self, nonce, hash) {
                Ok(block) => {
                    report.block = Some(block);
                    break;
                }
                Err(CommitOutcome::InvalidProof) => continue,
                Err(_) => break,
            }
        }

        report
    }
}

/// Result of one mining round
#[derive(Debug, Clone, Default)]
pub struct RoundReport {
    /// The committed block, `None` when no worker managed to commit
    pub block: Option<Block>,

    /// Id of the winning miner
    pub winner: Option<String>,

    /// Hashes computed across all workers
    pub attempts: u64,
}

/// Runs mining rounds with a fixed set of miners
#[derive(Debug, Clone)]
pub struct MiningEngine {
    miners: Vec<Miner>,
    commit_timeout: Duration,
}

impl MiningEngine {
    pub fn new(miners: Vec<Miner>, commit_timeout: Duration) -> Self {
        MiningEngine {
            miners,
            commit_timeout,
        }
    }

    pub fn miners(&self) -> &[Miner] {
        &self.miners
    }

    /// Mines the chain's pending transactions into the next block.
    ///
    /// On success the sealed transactions leave the pending pool.
    pub fn mine_pending(&self, chain: &Blockchain) -> Result<RoundReport, BlockchainError> {
        let transactions = chain.pending_transactions();
        let report = self.mine_round(chain, transactions)?;

        if let Some(block) = &report.block {
            chain.remove_sealed(&block.transactions);
        }

        Ok(report)
    }

    /// Runs one round over `transactions`, one scoped thread per miner.
    ///
    /// At most one block is appended. Rounds in which every worker gives up
    /// (commit timeouts) return a report without a block.
    pub fn mine_round(
        &self,
        chain: &Blockchain,
        transactions: Vec<Transaction>,
    ) -> Result<RoundReport, BlockchainError> {
        let round = Round::new(chain, transactions, self.commit_timeout)?;

        chain.observer().on_event(&ChainEvent::RoundStarted {
            index: round.header().index,
            difficulty: chain.difficulty(),
            miners: self.miners.len(),
        });

        if self.miners.is_empty() {
            warn!("No miners configured, skipping round");
            return Ok(RoundReport::default());
        }

        let round = &round;
        let reports: Vec<(String, WorkerReport)> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .miners
                .iter()
                .map(|miner| (miner.id(), scope.spawn(move || miner.search(round))))
                .collect();

            handles
                .into_iter()
                .map(|(id, handle)| {
                    let report = handle.join().unwrap_or_else(|_| {
                        error!("Miner {} panicked during the round", id);
                        WorkerReport::default()
                    });
                    (id.to_string(), report)
                })
                .collect()
        });

        let mut summary = RoundReport::default();
        for (id, report) in reports {
            summary.attempts += report.attempts;
            if let Some(block) = report.block {
                summary.block = Some(block);
                summary.winner = Some(id);
            }
        }

        if summary.block.is_none() {
            warn!("Round for block {} ended without a commit", round.header().index);
        }

        Ok(summary)
    }
}
