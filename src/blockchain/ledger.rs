use dashmap::DashMap;
use log::debug;
use thiserror::Error;

use std::sync::Arc;

use super::crypto::Address;
use super::transaction::{Transaction, Utxo};

/// Errors reported by a ledger backend
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger backend error: {0}")]
    Backend(String),
}

/// UTXO bookkeeping collaborator.
///
/// There is no "mark spent" operation. Consumed inputs stay listed, and the
/// same UTXO can be selected again by a later transaction.
pub trait UtxoLedger: Send + Sync {
    /// Outputs recorded for `address`, in the order they were added
    fn utxo_list(&self, address: &Address) -> Result<Vec<Utxo>, LedgerError>;

    fn add_utxo(&self, amount: u64, address: &Address) -> Result<(), LedgerError>;
}

/// Records every output of `transaction` as a new UTXO
pub fn record_outputs<L: UtxoLedger + ?Sized>(
    ledger: &L,
    transaction: &Transaction,
) -> Result<(), LedgerError> {
    for output in transaction.outputs.iter().flatten() {
        ledger.add_utxo(output.amount, &output.recipient)?;
    }
    Ok(())
}

/// In-process ledger keyed by recipient address
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    utxos: Arc<DashMap<Address, Vec<Utxo>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of every UTXO addressed to `address`
    pub fn balance(&self, address: &Address) -> u64 {
        self.utxos
            .get(address)
            .map(|entry| entry.iter().map(|utxo| utxo.amount).sum())
            .unwrap_or(0)
    }
}

impl UtxoLedger for MemoryLedger {
    fn utxo_list(&self, address: &Address) -> Result<Vec<Utxo>, LedgerError> {
        Ok(self
            .utxos
            .get(address)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    fn add_utxo(&self, amount: u64, address: &Address) -> Result<(), LedgerError> {
        debug!("Recording UTXO of {} for {}", amount, address);
        self.utxos
            .entry(address.clone())
            .or_default()
            .push(Utxo::new(amount, address.clone()));
        Ok(())
    }
}
