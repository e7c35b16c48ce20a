use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

/// Proof stored in the genesis block.
pub const GENESIS_PROOF: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub previous_hash: String,
    pub transactions: Vec<Transaction>,
    pub proof: u64,
    pub timestamp: u64,
}

impl Block {
    /// Creates a block stamped with the current time.
    pub fn new(
        index: u64,
        previous_hash: String,
        transactions: Vec<Transaction>,
        proof: u64,
    ) -> Self {
        Block {
            index,
            previous_hash,
            transactions,
            proof,
            timestamp: now_secs(),
        }
    }

    /// The hard-coded first block shared by every node.
    pub fn genesis() -> Self {
        Block {
            index: 0,
            previous_hash: String::new(),
            transactions: Vec::new(),
            proof: GENESIS_PROOF,
            timestamp: 0,
        }
    }
}

pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
