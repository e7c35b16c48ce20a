//! Product stock accounting.
//!
//! A participant's stock of a product is what committed blocks delivered to
//! them, minus what committed blocks and the open pool took from them. Pool
//! receipts are ignored: unconfirmed incoming goods cannot be spent.

use super::chain::Block;
use crate::mempool::Mempool;

pub fn committed_received(chain: &[Block], participant: &str, product_name: &str) -> i128 {
    chain
        .iter()
        .flat_map(|block| block.transactions.iter())
        .filter(|tx| tx.recipient == participant && tx.product_name == product_name)
        .map(|tx| tx.amount as i128)
        .sum()
}

pub fn committed_sent(chain: &[Block], participant: &str, product_name: &str) -> i128 {
    chain
        .iter()
        .flat_map(|block| block.transactions.iter())
        .filter(|tx| tx.sender == participant && tx.product_name == product_name)
        .map(|tx| tx.amount as i128)
        .sum()
}

pub fn product_stock(
    chain: &[Block],
    pool: &Mempool,
    participant: &str,
    product_name: &str,
) -> i128 {
    committed_received(chain, participant, product_name)
        - committed_sent(chain, participant, product_name)
        - pool.pending_sent(participant, product_name)
}
