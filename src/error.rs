//! Error types for Stockchain

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Insufficient stock: {available} available, {requested} requested")]
    InsufficientStock { available: i128, requested: u64 },
    #[error("Invalid proof of work: {0}")]
    InvalidProof(String),
    #[error("Hash mismatch: {0}")]
    HashMismatch(String),
    #[error("Malformed peer payload: {0}")]
    MalformedPeerPayload(String),
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("No local identity configured")]
    NoLocalIdentity,
    #[error("Conflict resolution pending")]
    ResolutionPending,
    #[error("Stale mining candidate: {0}")]
    StaleCandidate(String),
    #[error("Mining round cancelled")]
    MiningCancelled,
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("Wallet error: {0}")]
    WalletError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ChainError {
    /// Soft errors are logged and absorbed; they never abort the enclosing operation.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            ChainError::PeerUnreachable(_) | ChainError::PersistenceFailure(_)
        )
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
