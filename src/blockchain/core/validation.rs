//! Stateless verification predicates shared by mining, ingestion and
//! conflict resolution.
//!
//! The `check_*` functions report why something is invalid; the boolean
//! predicates wrap them for callers that only need a verdict.

use super::chain::Block;
use super::hasher::{hash_block, proof_digest};
use crate::crypto::is_nature;
use crate::error::ChainError;
use crate::transaction::Transaction;

/// Number of leading `'0'` hex nibbles a proof digest must carry.
pub const PROOF_DIFFICULTY: usize = 2;

pub fn valid_proof(transactions: &[Transaction], last_hash: &str, proof: u64) -> bool {
    proof_digest(transactions, last_hash, proof)
        .bytes()
        .take(PROOF_DIFFICULTY)
        .all(|nibble| nibble == b'0')
}

pub fn verify_transaction_signature(tx: &Transaction) -> bool {
    tx.validate_signature().is_ok()
}

/// Signature first, then the sender's stock of the product. NATURE skips the
/// stock check.
pub fn check_transaction<F>(tx: &Transaction, balance_lookup: F) -> Result<(), ChainError>
where
    F: Fn(&str, &str) -> i128,
{
    tx.validate_signature()?;

    if is_nature(&tx.sender) {
        return Ok(());
    }

    let available = balance_lookup(&tx.sender, &tx.product_name);
    if available < tx.amount as i128 {
        return Err(ChainError::InsufficientStock {
            available,
            requested: tx.amount,
        });
    }
    Ok(())
}

pub fn verify_transaction<F>(tx: &Transaction, balance_lookup: F) -> bool
where
    F: Fn(&str, &str) -> i128,
{
    check_transaction(tx, balance_lookup).is_ok()
}

/// Checks linkage and proof of every block after the first.
pub fn check_chain(chain: &[Block]) -> Result<(), ChainError> {
    for (position, pair) in chain.windows(2).enumerate() {
        let (previous, block) = (&pair[0], &pair[1]);
        let expected = hash_block(previous);

        if block.previous_hash != expected {
            return Err(ChainError::HashMismatch(format!(
                "block at position {} links to {}, expected {}",
                position + 1,
                block.previous_hash,
                expected
            )));
        }

        if !valid_proof(&block.transactions, &expected, block.proof) {
            return Err(ChainError::InvalidProof(format!(
                "proof {} of block at position {} does not meet the difficulty target",
                block.proof,
                position + 1
            )));
        }
    }
    Ok(())
}

pub fn verify_chain(chain: &[Block]) -> bool {
    check_chain(chain).is_ok()
}
