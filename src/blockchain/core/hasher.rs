//! Canonical hashing of blocks and proof-of-work inputs.
//!
//! Every field is fed to SHA-256 in a fixed order: integers as little-endian
//! `u64`, strings as a little-endian `u64` byte length followed by their UTF-8
//! bytes, sequences as a `u64` count followed by their items. Two nodes built
//! independently agree on every digest as long as they follow this layout.

use super::chain::Block;
use crate::transaction::Transaction;
use sha2::{Digest, Sha256};

fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn update_transaction(hasher: &mut Sha256, tx: &Transaction) {
    update_str(hasher, &tx.sender);
    update_str(hasher, &tx.recipient);
    update_str(hasher, &tx.signature);
    hasher.update(tx.amount.to_le_bytes());
    update_str(hasher, &tx.product_name);
    hasher.update(tx.price.to_le_bytes());
}

fn update_transactions(hasher: &mut Sha256, transactions: &[Transaction]) {
    hasher.update((transactions.len() as u64).to_le_bytes());
    for tx in transactions {
        update_transaction(hasher, tx);
    }
}

/// Lowercase hex SHA-256 of the block.
pub fn hash_block(block: &Block) -> String {
    let mut hasher = Sha256::new();
    hasher.update(block.index.to_le_bytes());
    update_str(&mut hasher, &block.previous_hash);
    update_transactions(&mut hasher, &block.transactions);
    hasher.update(block.proof.to_le_bytes());
    hasher.update(block.timestamp.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Lowercase hex SHA-256 over (transactions, last_hash, proof), the input of
/// the proof-of-work predicate.
pub fn proof_digest(transactions: &[Transaction], last_hash: &str, proof: u64) -> String {
    let mut hasher = Sha256::new();
    update_transactions(&mut hasher, transactions);
    update_str(&mut hasher, last_hash);
    hasher.update(proof.to_le_bytes());
    hex::encode(hasher.finalize())
}
