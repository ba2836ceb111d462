use log::debug;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

use super::crypto::{
    public_key_from_base64, public_key_to_base64, Address, CryptoError, DigitalSignature, KeyPair,
};
use super::ledger::UtxoLedger;
use super::transaction::{verify_transaction_with, Transaction, TransactionError, Utxo};

/// Stored form of a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub owner: String,

    pub address: Address,

    /// Base64 of the raw 64-byte public key
    pub public_key: String,

    /// Hex of the 32-byte secret
    pub private_key: String,
}

/// A user's keypair and the address derived from it
#[derive(Debug, Clone)]
pub struct Wallet {
    owner: String,
    keys: KeyPair,
    address: Address,
}

impl Wallet {
    /// Creates a wallet with a freshly generated keypair
    pub fn new(owner: impl Into<String>) -> Self {
        let keys = KeyPair::generate();
        let address = keys.address();

        Wallet {
            owner: owner.into(),
            keys,
            address,
        }
    }

    /// Restores a wallet from its stored record.
    ///
    /// The stored public key and address must agree with the private key.
    pub fn from_record(record: &WalletRecord) -> Result<Self, CryptoError> {
        let keys = KeyPair::from_secret_hex(&record.private_key)?;

        let stored_key = public_key_from_base64(&record.public_key)?;
        if &stored_key != keys.public_key() {
            return Err(CryptoError::InvalidPublicKey(
                "Stored public key does not match private key".to_string(),
            ));
        }

        let address = keys.address();
        if address != record.address {
            return Err(CryptoError::InvalidAddress(format!(
                "Stored address {} does not match derived address {}",
                record.address, address
            )));
        }

        Ok(Wallet {
            owner: record.owner.clone(),
            keys,
            address,
        })
    }

    pub fn to_record(&self) -> WalletRecord {
        WalletRecord {
            owner: self.owner.clone(),
            address: self.address.clone(),
            public_key: public_key_to_base64(self.keys.public_key()),
            private_key: self.keys.secret_hex(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    /// Builds and signs a transfer of `amount` to `receiver`.
    ///
    /// UTXOs are taken greedily in ledger order until they cover `amount`.
    /// Any surplus is returned to this wallet as a second output.
    ///
    /// # Arguments
    /// * `ledger` - The UTXO ledger to select inputs from
    /// * `receiver` - The address receiving the transfer
    /// * `amount` - The amount to transfer
    ///
    /// # Returns
    /// * `Result<Transaction, TransactionError>` - The signed transaction, or
    ///   `InsufficientFunds` if the wallet's UTXOs do not cover `amount`
    pub fn create_transaction<L: UtxoLedger + ?Sized>(
        &self,
        ledger: &L,
        receiver: Address,
        amount: u64,
    ) -> Result<Transaction, TransactionError> {
        let mut transaction = Transaction::new(self.address.clone(), receiver, amount);
        transaction.validate()?;

        let mut inputs = Vec::new();
        let mut total: u64 = 0;

        for utxo in ledger.utxo_list(&self.address)? {
            if total >= amount {
                break;
            }
            total = total.saturating_add(utxo.amount);
            inputs.push(utxo);
        }

        if total < amount {
            return Err(TransactionError::InsufficientFunds {
                required: amount,
                available: total,
            });
        }

        let mut outputs = vec![Utxo::new(amount, transaction.receiver.clone())];
        if total > amount {
            outputs.push(Utxo::new(total - amount, self.address.clone()));
        }

        debug!(
            "{} spends {} inputs totalling {} to send {} to {}",
            self.address,
            inputs.len(),
            total,
            amount,
            transaction.receiver
        );

        transaction.inputs = Some(inputs);
        transaction.outputs = Some(outputs);
        transaction.signature = Some(self.sign_transaction(&transaction)?);

        Ok(transaction)
    }

    /// Signs the `{sender, receiver, amount}` subset of `transaction`
    pub fn sign_transaction(
        &self,
        transaction: &Transaction,
    ) -> Result<DigitalSignature, TransactionError> {
        transaction.validate()?;

        if transaction.sender != self.address {
            return Err(TransactionError::SenderMismatch {
                wallet: self.address.clone(),
                sender: transaction.sender.clone(),
            });
        }

        let message = transaction.signing_payload()?;
        Ok(self.keys.sign(&message))
    }

    /// Checks `transaction` against this wallet's public key
    pub fn verify_transaction(&self, transaction: &Transaction) -> bool {
        verify_transaction_with(transaction, self.keys.public_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::ledger::MemoryLedger;

    fn funded(amounts: &[u64]) -> (Wallet, MemoryLedger) {
        let wallet = Wallet::new("alice");
        let ledger = MemoryLedger::new();
        for amount in amounts {
            ledger.add_utxo(*amount, wallet.address()).unwrap();
        }
        (wallet, ledger)
    }

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::new("alice");

        assert_eq!(wallet.owner(), "alice");
        assert_eq!(wallet.address().0.len(), 64);
        assert_eq!(wallet.address(), &Address::from_public_key(wallet.public_key()));
    }

    #[test]
    fn test_record_round_trip() {
        let wallet = Wallet::new("alice");
        let record = wallet.to_record();

        let restored = Wallet::from_record(&record).unwrap();
        assert_eq!(restored.address(), wallet.address());
        assert_eq!(restored.owner(), "alice");
    }

    #[test]
    fn test_record_with_wrong_address_is_rejected() {
        let wallet = Wallet::new("alice");
        let mut record = wallet.to_record();
        record.address = Wallet::new("bob").address().clone();

        assert!(Wallet::from_record(&record).is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let wallet = Wallet::new("alice");
        let mut transaction =
            Transaction::new(wallet.address().clone(), Address("bob".to_string()), 300);

        transaction.signature = Some(wallet.sign_transaction(&transaction).unwrap());
        assert!(wallet.verify_transaction(&transaction));

        transaction.amount = 301;
        assert!(!wallet.verify_transaction(&transaction));
    }

    #[test]
    fn test_verify_ignores_outputs() {
        let (wallet, ledger) = funded(&[500]);
        let mut transaction = wallet
            .create_transaction(&ledger, Address("bob".to_string()), 300)
            .unwrap();

        transaction.outputs = Some(vec![Utxo::new(500, Address("mallory".to_string()))]);
        assert!(wallet.verify_transaction(&transaction));
    }

    #[test]
    fn test_sign_rejects_malformed() {
        let wallet = Wallet::new("alice");
        let transaction = Transaction::new(wallet.address().clone(), Address(String::new()), 5);

        assert!(matches!(
            wallet.sign_transaction(&transaction),
            Err(TransactionError::MalformedTransaction(_))
        ));
    }

    #[test]
    fn test_sign_rejects_foreign_sender() {
        let wallet = Wallet::new("alice");
        let transaction =
            Transaction::new(Address("someone".to_string()), Address("bob".to_string()), 5);

        assert!(matches!(
            wallet.sign_transaction(&transaction),
            Err(TransactionError::SenderMismatch { .. })
        ));
    }

    #[test]
    fn test_exact_amount_has_no_change() {
        let (wallet, ledger) = funded(&[200, 100, 400]);
        let bob = Address("bob".to_string());

        let transaction = wallet.create_transaction(&ledger, bob.clone(), 300).unwrap();

        assert_eq!(transaction.inputs.as_ref().unwrap().len(), 2);
        assert_eq!(transaction.outputs, Some(vec![Utxo::new(300, bob)]));
        assert!(transaction.change_output().is_none());
        assert!(wallet.verify_transaction(&transaction));
    }

    #[test]
    fn test_surplus_produces_one_change_output() {
        let (wallet, ledger) = funded(&[200, 250, 1000]);
        let bob = Address("bob".to_string());

        let transaction = wallet.create_transaction(&ledger, bob.clone(), 300).unwrap();

        let outputs = transaction.outputs.as_ref().unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0], Utxo::new(300, bob));
        assert_eq!(outputs[1], Utxo::new(150, wallet.address().clone()));
        assert_eq!(transaction.change_output().unwrap().amount, 150);
        assert_eq!(transaction.inputs.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_insufficient_funds() {
        let (wallet, ledger) = funded(&[10, 20]);

        let result = wallet.create_transaction(&ledger, Address("bob".to_string()), 31);
        assert!(matches!(
            result,
            Err(TransactionError::InsufficientFunds {
                required: 31,
                available: 30
            })
        ));
    }

    #[test]
    fn test_utxos_are_not_marked_spent() {
        let (wallet, ledger) = funded(&[100]);
        let bob = Address("bob".to_string());

        let first = wallet.create_transaction(&ledger, bob.clone(), 100).unwrap();
        let second = wallet.create_transaction(&ledger, bob, 100).unwrap();

        assert_eq!(first.inputs, second.inputs);
    }
}
