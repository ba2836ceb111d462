use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Shared secp256k1 context, built once for signing and verification.
static SECP256K1: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Length of a raw public key (uncompressed point without the 0x04 tag)
pub const RAW_PUBLIC_KEY_SIZE: usize = 64;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// A wallet address: hex SHA-256 digest of the raw public key bytes.
///
/// Receivers are not required to be derived addresses, so any string can be
/// wrapped directly; `FromStr` is the strict parser for derived addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// Derives the address owned by a public key
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = Sha256::digest(raw_public_key_bytes(public_key));
        Address(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidAddress(e.to_string()))?;

        if bytes.len() != 32 {
            return Err(CryptoError::InvalidAddress(format!(
                "Address must be 32 bytes, got {}",
                bytes.len()
            )));
        }

        Ok(Address(s.to_lowercase()))
    }
}

/// A compact ECDSA signature (`r || s`) stored as base64 text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(STANDARD.encode(signature.serialize_compact()))
    }

    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = STANDARD
            .decode(&self.0)
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        Signature::from_compact(&bytes).map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }
}

/// Raw 64-byte encoding of a public key (x || y)
pub fn raw_public_key_bytes(public_key: &PublicKey) -> [u8; RAW_PUBLIC_KEY_SIZE] {
    let uncompressed = public_key.serialize_uncompressed();
    let mut raw = [0u8; RAW_PUBLIC_KEY_SIZE];
    raw.copy_from_slice(&uncompressed[1..]);
    raw
}

/// Rebuilds a public key from its raw 64-byte encoding
pub fn public_key_from_raw(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    if bytes.len() != RAW_PUBLIC_KEY_SIZE {
        return Err(CryptoError::InvalidPublicKey(format!(
            "Public key must be {} bytes, got {}",
            RAW_PUBLIC_KEY_SIZE,
            bytes.len()
        )));
    }

    let mut uncompressed = [0u8; RAW_PUBLIC_KEY_SIZE + 1];
    uncompressed[0] = 0x04;
    uncompressed[1..].copy_from_slice(bytes);

    PublicKey::from_slice(&uncompressed).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

pub fn public_key_to_base64(public_key: &PublicKey) -> String {
    STANDARD.encode(raw_public_key_bytes(public_key))
}

pub fn public_key_from_base64(encoded: &str) -> Result<PublicKey, CryptoError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;
    public_key_from_raw(&bytes)
}

fn message_digest(message: &[u8]) -> Message {
    Message::from_digest(Sha256::digest(message).into())
}

/// A secp256k1 key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random key pair from the OS RNG
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(secret_key)
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Restores a key pair from a hex encoded 32-byte secret
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, CryptoError> {
        let bytes =
            hex::decode(secret_hex).map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;

        Ok(Self::from_secret_key(secret_key))
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }

    /// Signs the SHA-256 digest of `message`
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        let signature = SECP256K1.sign_ecdsa(&message_digest(message), &self.secret_key);
        DigitalSignature::from_signature(&signature)
    }
}

/// Verifies a signature against a message and public key.
///
/// Undecodable signatures are errors; a well-formed signature that does not
/// match yields `Ok(false)`.
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &PublicKey,
) -> Result<bool, CryptoError> {
    let signature = signature.to_signature()?;

    match SECP256K1.verify_ecdsa(&message_digest(message), &signature, public_key) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_and_verification() {
        let keys = KeyPair::generate();
        let message = b"Hello, world!";

        let signature = keys.sign(message);
        assert!(verify_signature(message, &signature, keys.public_key()).unwrap());

        let wrong_message = b"Wrong message";
        assert!(!verify_signature(wrong_message, &signature, keys.public_key()).unwrap());
    }

    #[test]
    fn test_signature_is_compact_base64() {
        let keys = KeyPair::generate();
        let signature = keys.sign(b"payload");

        let bytes = STANDARD.decode(&signature.0).unwrap();
        assert_eq!(bytes.len(), 64);
    }

    #[test]
    fn test_garbage_signature_is_error() {
        let keys = KeyPair::generate();
        let signature = DigitalSignature("not base64!".to_string());

        assert!(verify_signature(b"payload", &signature, keys.public_key()).is_err());
    }

    #[test]
    fn test_address_is_hash_of_raw_public_key() {
        let keys = KeyPair::generate();
        let raw = raw_public_key_bytes(keys.public_key());

        assert_eq!(keys.address().0, hex::encode(Sha256::digest(raw)));
        assert_eq!(keys.address().0.len(), 64);
        assert!(keys.address().0.parse::<Address>().is_ok());
    }

    #[test]
    fn test_public_key_base64_round_trip() {
        let keys = KeyPair::generate();
        let encoded = public_key_to_base64(keys.public_key());

        let decoded = public_key_from_base64(&encoded).unwrap();
        assert_eq!(&decoded, keys.public_key());
    }

    #[test]
    fn test_secret_hex_restores_same_address() {
        let keys = KeyPair::generate();
        let restored = KeyPair::from_secret_hex(&keys.secret_hex()).unwrap();

        assert_eq!(restored.address(), keys.address());
    }

    #[test]
    fn test_address_parse_rejects_short_input() {
        assert!("abcd".parse::<Address>().is_err());
        assert!("not hex".parse::<Address>().is_err());
    }
}
