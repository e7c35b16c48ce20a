//! Open-transaction pool
//!
//! Transactions admitted but not yet committed to a block. Insertion order is
//! kept because the proof of work hashes the pool exactly as it is ordered.

use crate::transaction::Transaction;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mempool {
    transactions: Vec<Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_transactions(transactions: Vec<Transaction>) -> Self {
        Mempool { transactions }
    }

    pub fn add_transaction(&mut self, tx: Transaction) {
        self.transactions.push(tx);
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter()
    }

    /// Owned copy of the pool in insertion order.
    pub fn get_all_transactions(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
    }

    /// Sum of amounts `participant` is sending of `product_name` in the pool.
    pub fn pending_sent(&self, participant: &str, product_name: &str) -> i128 {
        self.transactions
            .iter()
            .filter(|tx| tx.sender == participant && tx.product_name == product_name)
            .map(|tx| tx.amount as i128)
            .sum()
    }

    /// Removes every pool entry equivalent to `tx`. Returns how many were removed;
    /// zero is not an error.
    pub fn remove_equivalent(&mut self, tx: &Transaction) -> usize {
        let before = self.transactions.len();
        self.transactions.retain(|pooled| !pooled.is_equivalent(tx));
        before - self.transactions.len()
    }

    /// Removes transactions that were just mined. When the pool still starts
    /// with exactly the mined sequence only that prefix is dropped, so entries
    /// admitted while the proof was being searched survive.
    pub fn remove_mined(&mut self, mined: &[Transaction]) {
        if self.transactions.len() >= mined.len() && self.transactions[..mined.len()] == *mined {
            self.transactions.drain(..mined.len());
        } else {
            for tx in mined {
                self.remove_equivalent(tx);
            }
        }
    }
}
