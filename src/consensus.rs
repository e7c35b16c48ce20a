use crate::blockchain::{check_chain, Block};
use crate::error::ChainError;
use tracing::{debug, info, warn};

/// Longest-valid-chain selection across peers.
pub struct Consensus;

impl Consensus {
    /// Scans peer chains in order and returns the winner if one beat `local`.
    ///
    /// A peer chain wins only if it is strictly longer than the current winner
    /// and fully valid; equal length never wins. Peers that could not be
    /// reached or returned garbage are skipped.
    pub fn select_canonical<I>(local: &[Block], candidates: I) -> Option<Vec<Block>>
    where
        I: IntoIterator<Item = (String, Result<Vec<Block>, ChainError>)>,
    {
        let mut winner: Option<Vec<Block>> = None;
        let mut winner_len = local.len();

        for (peer, fetched) in candidates {
            let chain = match fetched {
                Ok(chain) => chain,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "consensus.peer_skipped");
                    continue;
                }
            };

            if chain.len() <= winner_len {
                debug!(
                    peer = %peer,
                    len = chain.len(),
                    best = winner_len,
                    "consensus.peer_not_longer"
                );
                continue;
            }

            match check_chain(&chain) {
                Ok(()) => {
                    info!(peer = %peer, len = chain.len(), "consensus.new_winner");
                    winner_len = chain.len();
                    winner = Some(chain);
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "consensus.peer_chain_invalid");
                }
            }
        }

        winner
    }
}
