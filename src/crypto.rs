//! Cryptographic primitives for Stockchain

use crate::error::ChainError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Secret key of the NATURE identity. It is public on purpose: NATURE is the
/// exogenous source of goods and anyone may issue stock in its name.
pub const NATURE_SECRET_KEY_HEX: &str =
    "6e61747572652d6b65792d73746f636b636861696e2d67656e657369732d3031";

/// The fixed NATURE key pair.
pub static NATURE: Lazy<KeyPair> = Lazy::new(|| {
    let bytes = hex::decode(NATURE_SECRET_KEY_HEX).unwrap_or_default();
    match KeyPair::from_secret_bytes(&bytes) {
        Ok(keypair) => keypair,
        Err(e) => panic!("NATURE secret key constant is invalid: {}", e),
    }
});

static NATURE_IDENTITY: Lazy<String> = Lazy::new(|| NATURE.identity());

/// Identity (hex-encoded compressed public key) of the NATURE participant.
pub fn nature_identity() -> &'static str {
    NATURE_IDENTITY.as_str()
}

pub fn is_nature(identity: &str) -> bool {
    identity == nature_identity()
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Result<Self, ChainError> {
        let secret_key = SecretKey::new(&mut OsRng);
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                ChainError::CryptoError(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                ChainError::CryptoError(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(secret_hex)
            .map_err(|e| ChainError::CryptoError(format!("Invalid secret key hex: {}", e)))?;
        Self::from_secret_bytes(&bytes)
    }

    /// The participant identity: hex of the compressed public key.
    pub fn identity(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public_key.serialize()
    }

    /// Signs the SHA-256 digest of `message`. ECDSA nonces follow RFC 6979,
    /// so equal keys and messages always produce equal signatures.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; COMPACT_SIGNATURE_SIZE], ChainError> {
        let digest = Sha256::digest(message);

        let message = Message::from_digest_slice(&digest)
            .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))?;

        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact())
    }
}

/// Verifies an ECDSA signature given the raw public key bytes, message, and signature bytes.
pub fn verify_signature(
    public_key_bytes: &[u8],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), ChainError> {
    if public_key_bytes.len() != PUBLIC_KEY_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Public key must be exactly {} bytes (compressed), got {}",
            PUBLIC_KEY_SIZE,
            public_key_bytes.len()
        )));
    }
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }

    let public_key = PublicKey::from_slice(public_key_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))?;

    let digest = Sha256::digest(message);

    let message = Message::from_digest_slice(&digest)
        .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))?;

    let signature = Signature::from_compact(signature_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| ChainError::CryptoError("Signature verification failed".to_string()))
}

/// Hex front-end to [`verify_signature`] for identities and signatures as they
/// travel on the wire.
pub fn verify_hex_signature(
    identity: &str,
    message: &[u8],
    signature_hex: &str,
) -> Result<(), ChainError> {
    let public_key = hex::decode(identity)
        .map_err(|e| ChainError::CryptoError(format!("Invalid identity hex: {}", e)))?;
    let signature = hex::decode(signature_hex)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature hex: {}", e)))?;
    verify_signature(&public_key, message, &signature)
}
