use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature};
use super::hashing::canonical_encode;
use super::ledger::LedgerError;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Wallet address {wallet} does not match sender {sender}")]
    SenderMismatch { wallet: Address, sender: Address },

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Ledger error: {0}")]
    LedgerError(#[from] LedgerError),

    #[error("Encoding error: {0}")]
    EncodingError(#[from] serde_json::Error),
}

/// An unspent transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub amount: u64,

    #[serde(rename = "rec_addr")]
    pub recipient: Address,
}

impl Utxo {
    pub fn new(amount: u64, recipient: Address) -> Self {
        Utxo { amount, recipient }
    }
}

/// A value transfer between two addresses.
///
/// Only `sender`, `receiver` and `amount` are covered by the signature;
/// `inputs` and `outputs` ride along unauthenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,

    pub receiver: Address,

    pub amount: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<Utxo>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<Utxo>>,

    #[serde(rename = "sig", default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<DigitalSignature>,
}

/// The signed subset of a transaction
#[derive(Serialize)]
struct SigningPayload<'a> {
    sender: &'a Address,
    receiver: &'a Address,
    amount: u64,
}

impl Transaction {
    /// Creates an unsigned transaction without inputs or outputs
    pub fn new(sender: Address, receiver: Address, amount: u64) -> Self {
        Transaction {
            sender,
            receiver,
            amount,
            inputs: None,
            outputs: None,
            signature: None,
        }
    }

    /// Checks that the required fields are present and well shaped
    pub fn validate(&self) -> Result<(), TransactionError> {
        if self.sender.is_empty() {
            return Err(TransactionError::MalformedTransaction(
                "sender is empty".to_string(),
            ));
        }

        if self.receiver.is_empty() {
            return Err(TransactionError::MalformedTransaction(
                "receiver is empty".to_string(),
            ));
        }

        if self.amount == 0 {
            return Err(TransactionError::MalformedTransaction(
                "amount must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Canonical bytes of `{amount, receiver, sender}`, the signed message
    pub fn signing_payload(&self) -> Result<Vec<u8>, TransactionError> {
        let payload = SigningPayload {
            sender: &self.sender,
            receiver: &self.receiver,
            amount: self.amount,
        };

        Ok(canonical_encode(&payload)?)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Change output paid back to the sender, if any
    pub fn change_output(&self) -> Option<&Utxo> {
        self.outputs
            .as_ref()?
            .iter()
            .skip(1)
            .find(|output| output.recipient == self.sender)
    }
}

/// Verifies `transaction` against the claimed sender's public key.
///
/// Returns `false` for every kind of mismatch: unsigned or malformed
/// transactions, a key that does not own `sender`, undecodable signatures and
/// signatures over different field values.
pub fn verify_transaction_with(transaction: &Transaction, public_key: &PublicKey) -> bool {
    let signature = match &transaction.signature {
        Some(signature) => signature,
        None => return false,
    };

    if transaction.validate().is_err() {
        return false;
    }

    if Address::from_public_key(public_key) != transaction.sender {
        return false;
    }

    let message = match transaction.signing_payload() {
        Ok(message) => message,
        Err(_) => return false,
    };

    verify_signature(&message, signature, public_key).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::KeyPair;

    #[test]
    fn test_new_transaction() {
        let transaction = Transaction::new(
            Address("alice".to_string()),
            Address("bob".to_string()),
            300,
        );

        assert_eq!(transaction.amount, 300);
        assert!(transaction.inputs.is_none());
        assert!(transaction.outputs.is_none());
        assert!(!transaction.is_signed());
        assert!(transaction.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let no_sender = Transaction::new(Address(String::new()), Address("bob".to_string()), 1);
        assert!(matches!(
            no_sender.validate(),
            Err(TransactionError::MalformedTransaction(_))
        ));

        let no_receiver = Transaction::new(Address("alice".to_string()), Address(" ".to_string()), 1);
        assert!(no_receiver.validate().is_err());

        let zero = Transaction::new(Address("alice".to_string()), Address("bob".to_string()), 0);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_signing_payload_excludes_inputs_and_outputs() {
        let mut transaction = Transaction::new(
            Address("alice".to_string()),
            Address("bob".to_string()),
            300,
        );
        let bare = transaction.signing_payload().unwrap();

        transaction.outputs = Some(vec![Utxo::new(300, Address("bob".to_string()))]);
        transaction.inputs = Some(vec![Utxo::new(500, Address("alice".to_string()))]);

        assert_eq!(transaction.signing_payload().unwrap(), bare);
        assert_eq!(bare, br#"{"amount":300,"receiver":"bob","sender":"alice"}"#.to_vec());
    }

    #[test]
    fn test_persisted_field_names() {
        let mut transaction = Transaction::new(
            Address("alice".to_string()),
            Address("bob".to_string()),
            3,
        );
        transaction.outputs = Some(vec![Utxo::new(3, Address("bob".to_string()))]);
        transaction.signature = Some(DigitalSignature("c2ln".to_string()));

        let json = serde_json::to_value(&transaction).unwrap();
        assert_eq!(json["sig"], "c2ln");
        assert_eq!(json["outputs"][0]["rec_addr"], "bob");
        assert!(json.get("inputs").is_none());
    }

    #[test]
    fn test_verify_with_foreign_key_fails() {
        let owner = KeyPair::generate();
        let stranger = KeyPair::generate();

        let mut transaction = Transaction::new(owner.address(), Address("bob".to_string()), 10);
        let message = transaction.signing_payload().unwrap();
        transaction.signature = Some(owner.sign(&message));

        assert!(verify_transaction_with(&transaction, owner.public_key()));
        assert!(!verify_transaction_with(&transaction, stranger.public_key()));
    }

    #[test]
    fn test_verify_unsigned_is_false() {
        let owner = KeyPair::generate();
        let transaction = Transaction::new(owner.address(), Address("bob".to_string()), 10);

        assert!(!verify_transaction_with(&transaction, owner.public_key()));
    }
}
