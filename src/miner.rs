//! Proof-of-work search
//!
//! The search walks an unsigned counter upward from zero until
//! [`valid_proof`] accepts it. There is no upper bound and no timeout; the
//! cancellable variant lets a node abandon a round once a competing block
//! has made the candidate stale.

use crate::blockchain::valid_proof;
use crate::error::ChainError;
use crate::transaction::Transaction;
use std::sync::atomic::{AtomicBool, Ordering};

/// How many candidates are tried between two looks at the cancel flag.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

pub fn proof_of_work(transactions: &[Transaction], last_hash: &str) -> u64 {
    let mut proof = 0u64;
    while !valid_proof(transactions, last_hash, proof) {
        proof += 1;
    }
    proof
}

pub fn proof_of_work_cancellable(
    transactions: &[Transaction],
    last_hash: &str,
    cancel: &AtomicBool,
) -> Result<u64, ChainError> {
    let mut proof = 0u64;
    loop {
        if proof % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            return Err(ChainError::MiningCancelled);
        }
        if valid_proof(transactions, last_hash, proof) {
            return Ok(proof);
        }
        proof += 1;
    }
}
