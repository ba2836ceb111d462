use dashmap::DashMap;
use log::info;
use thiserror::Error;

use std::sync::Arc;

use super::crypto::{public_key_from_base64, Address};
use super::transaction::{verify_transaction_with, Transaction};
use super::wallet::WalletRecord;

/// Errors that can occur while looking up users and wallets
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("User does not exist under this username: {0}")]
    UserNotFound(String),

    #[error("Wallet does not exist under this address: {0}")]
    WalletNotFound(Address),

    #[error("No public key registered for address: {0}")]
    PublicKeyNotFound(Address),

    #[error("Directory backend error: {0}")]
    Backend(String),
}

/// User and wallet registry collaborator
pub trait WalletDirectory: Send + Sync {
    /// Stores the wallet, its public key and the owner's username mapping
    fn register(&self, record: &WalletRecord) -> Result<(), LookupError>;

    fn user_address(&self, username: &str) -> Result<Address, LookupError>;

    fn wallet(&self, address: &Address) -> Result<WalletRecord, LookupError>;

    /// Base64 public key registered for `address`
    fn public_key(&self, address: &Address) -> Result<String, LookupError>;

    /// Verifies `transaction` against the key registered for its sender.
    ///
    /// An unknown sender is an error; an undecodable key or a bad signature
    /// is `Ok(false)`.
    fn verify_transaction(&self, transaction: &Transaction) -> Result<bool, LookupError> {
        let encoded = self.public_key(&transaction.sender)?;

        Ok(match public_key_from_base64(&encoded) {
            Ok(public_key) => verify_transaction_with(transaction, &public_key),
            Err(_) => false,
        })
    }
}

/// In-process directory
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    users: Arc<DashMap<String, Address>>,
    wallets: Arc<DashMap<Address, WalletRecord>>,
    public_keys: Arc<DashMap<Address, String>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalletDirectory for MemoryDirectory {
    fn register(&self, record: &WalletRecord) -> Result<(), LookupError> {
        self.public_keys
            .insert(record.address.clone(), record.public_key.clone());
        self.wallets.insert(record.address.clone(), record.clone());
        self.users.insert(record.owner.clone(), record.address.clone());

        info!("Registered wallet {} for {}", record.address, record.owner);
        Ok(())
    }

    fn user_address(&self, username: &str) -> Result<Address, LookupError> {
        self.users
            .get(username)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LookupError::UserNotFound(username.to_string()))
    }

    fn wallet(&self, address: &Address) -> Result<WalletRecord, LookupError> {
        self.wallets
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LookupError::WalletNotFound(address.clone()))
    }

    fn public_key(&self, address: &Address) -> Result<String, LookupError> {
        self.public_keys
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LookupError::PublicKeyNotFound(address.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::wallet::Wallet;

    #[test]
    fn test_register_and_lookup() {
        let directory = MemoryDirectory::new();
        let wallet = Wallet::new("chris");
        directory.register(&wallet.to_record()).unwrap();

        let address = directory.user_address("chris").unwrap();
        assert_eq!(&address, wallet.address());

        let record = directory.wallet(&address).unwrap();
        assert_eq!(Wallet::from_record(&record).unwrap().address(), wallet.address());
    }

    #[test]
    fn test_missing_entries_are_distinct_errors() {
        let directory = MemoryDirectory::new();
        let address = Address("unknown".to_string());

        assert!(matches!(
            directory.user_address("ghost"),
            Err(LookupError::UserNotFound(name)) if name == "ghost"
        ));
        assert!(matches!(
            directory.wallet(&address),
            Err(LookupError::WalletNotFound(_))
        ));
        assert!(matches!(
            directory.public_key(&address),
            Err(LookupError::PublicKeyNotFound(_))
        ));
    }

    #[test]
    fn test_verify_through_directory() {
        let directory = MemoryDirectory::new();
        let wallet = Wallet::new("chris");
        directory.register(&wallet.to_record()).unwrap();

        let mut transaction =
            Transaction::new(wallet.address().clone(), Address("dan".to_string()), 500);
        transaction.signature = Some(wallet.sign_transaction(&transaction).unwrap());

        assert!(directory.verify_transaction(&transaction).unwrap());

        transaction.amount = 1;
        assert!(!directory.verify_transaction(&transaction).unwrap());
    }

    #[test]
    fn test_verify_unknown_sender_is_lookup_error() {
        let directory = MemoryDirectory::new();
        let wallet = Wallet::new("chris");

        let mut transaction =
            Transaction::new(wallet.address().clone(), Address("dan".to_string()), 500);
        transaction.signature = Some(wallet.sign_transaction(&transaction).unwrap());

        assert!(matches!(
            directory.verify_transaction(&transaction),
            Err(LookupError::PublicKeyNotFound(_))
        ));
    }
}
