use super::chain::Block;
use super::hasher::hash_block;
use super::state::product_stock;
use super::validation::{check_transaction, valid_proof};
use crate::consensus::Consensus;
use crate::error::ChainError;
use crate::mempool::Mempool;
use crate::miner::proof_of_work;
use crate::persistence::{LedgerSnapshot, Persistence};
use crate::transaction::Transaction;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Work order for an off-lock proof search: the pool snapshot and the tip it
/// must extend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningCandidate {
    pub index: u64,
    pub previous_hash: String,
    pub transactions: Vec<Transaction>,
}

/// A node's chain, open-transaction pool and peer set.
///
/// Every mutating method validates before it touches state and persists after.
/// Callers must serialize access; the ledger itself holds no locks.
pub struct Ledger {
    chain: Vec<Block>,
    mempool: Mempool,
    peers: BTreeSet<String>,
    resolve_conflicts: bool,
    identity: Option<String>,
    node_id: String,
    persistence: Box<dyn Persistence>,
}

impl Ledger {
    /// Builds the ledger for `node_id`, resuming from the persisted snapshot
    /// when one is readable and starting at genesis otherwise.
    pub fn new(
        identity: Option<String>,
        node_id: impl Into<String>,
        persistence: Box<dyn Persistence>,
    ) -> Self {
        let node_id = node_id.into();
        let mut ledger = Ledger {
            chain: vec![Block::genesis()],
            mempool: Mempool::new(),
            peers: BTreeSet::new(),
            resolve_conflicts: false,
            identity,
            node_id,
            persistence,
        };
        ledger.load_data();
        ledger
    }

    fn load_data(&mut self) {
        match self.persistence.load_snapshot() {
            Ok(Some(snapshot)) if !snapshot.chain.is_empty() => {
                info!(
                    node_id = %self.node_id,
                    blocks = snapshot.chain.len(),
                    open_transactions = snapshot.open_transactions.len(),
                    peers = snapshot.peers.len(),
                    "ledger.snapshot_loaded"
                );
                self.chain = snapshot.chain;
                self.mempool = Mempool::from_transactions(snapshot.open_transactions);
                self.peers = snapshot.peers.into_iter().collect();
            }
            Ok(_) => {
                debug!(node_id = %self.node_id, "ledger.no_snapshot_starting_at_genesis");
            }
            Err(e) => {
                warn!(
                    node_id = %self.node_id,
                    error = %e,
                    "ledger.snapshot_unreadable_starting_at_genesis"
                );
            }
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            chain: self.chain.clone(),
            open_transactions: self.mempool.get_all_transactions(),
            peers: self.peers.iter().cloned().collect(),
        }
    }

    /// Persists the current state. Failures are logged and absorbed; memory
    /// stays authoritative for the running process.
    fn save_data(&self) {
        if let Err(e) = self.persistence.save_snapshot(&self.snapshot()) {
            warn!(node_id = %self.node_id, error = %e, "ledger.save_failed");
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn set_identity(&mut self, identity: Option<String>) {
        self.identity = identity;
    }

    pub fn get_chain(&self) -> Vec<Block> {
        self.chain.clone()
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    pub fn last_block(&self) -> &Block {
        // The chain always holds at least the genesis block.
        &self.chain[self.chain.len() - 1]
    }

    pub fn get_open_transactions(&self) -> Vec<Transaction> {
        self.mempool.get_all_transactions()
    }

    pub fn get_product_stock(&self, participant: &str, product_name: &str) -> i128 {
        product_stock(&self.chain, &self.mempool, participant, product_name)
    }

    pub fn resolve_conflicts(&self) -> bool {
        self.resolve_conflicts
    }

    /// Gates mining until [`Ledger::resolve`] runs.
    pub fn mark_resolution_needed(&mut self) {
        if !self.resolve_conflicts {
            info!(node_id = %self.node_id, "ledger.resolution_needed");
        }
        self.resolve_conflicts = true;
    }

    // ------------------------------------------------------------------
    // Transaction admission
    // ------------------------------------------------------------------

    pub fn add_transaction(
        &mut self,
        sender: &str,
        recipient: &str,
        signature: &str,
        amount: u64,
        product_name: &str,
        price: u64,
    ) -> Result<Transaction, ChainError> {
        if self.identity.is_none() {
            return Err(ChainError::NoLocalIdentity);
        }

        let tx = Transaction::new(sender, recipient, signature, amount, product_name, price);
        check_transaction(&tx, |participant, product| {
            self.get_product_stock(participant, product)
        })?;

        debug!(
            product = %tx.product_name,
            amount = tx.amount,
            pool = self.mempool.len() + 1,
            "ledger.transaction_admitted"
        );
        self.mempool.add_transaction(tx.clone());
        self.save_data();
        Ok(tx)
    }

    // ------------------------------------------------------------------
    // Mining
    // ------------------------------------------------------------------

    /// Snapshots the pool and re-checks every signature. Stock is not checked
    /// again; admission already enforced it. The live pool is never touched.
    pub fn prepare_mining(&self) -> Result<MiningCandidate, ChainError> {
        if self.resolve_conflicts {
            return Err(ChainError::ResolutionPending);
        }
        if self.identity.is_none() {
            return Err(ChainError::NoLocalIdentity);
        }

        let transactions = self.mempool.get_all_transactions();
        for tx in &transactions {
            tx.validate_signature()?;
        }

        Ok(MiningCandidate {
            index: self.chain.len() as u64,
            previous_hash: hash_block(self.last_block()),
            transactions,
        })
    }

    /// Appends the block for a candidate whose proof was found off-lock.
    /// Transactions admitted during the search stay in the pool.
    pub fn commit_mined(
        &mut self,
        candidate: MiningCandidate,
        proof: u64,
    ) -> Result<Block, ChainError> {
        if self.resolve_conflicts {
            return Err(ChainError::ResolutionPending);
        }

        let tip = hash_block(self.last_block());
        if tip != candidate.previous_hash || self.chain.len() as u64 != candidate.index {
            return Err(ChainError::StaleCandidate(format!(
                "candidate extends {} at index {}, tip is now {} at index {}",
                candidate.previous_hash,
                candidate.index,
                tip,
                self.chain.len()
            )));
        }

        if !valid_proof(&candidate.transactions, &candidate.previous_hash, proof) {
            return Err(ChainError::InvalidProof(format!(
                "proof {} does not solve candidate {}",
                proof, candidate.index
            )));
        }

        self.mempool.remove_mined(&candidate.transactions);
        let block = Block::new(
            candidate.index,
            candidate.previous_hash,
            candidate.transactions,
            proof,
        );
        self.chain.push(block.clone());
        self.save_data();

        info!(
            index = block.index,
            proof = block.proof,
            transactions = block.transactions.len(),
            "ledger.block_mined"
        );
        Ok(block)
    }

    /// Mines the whole pool into a new block, blocking until a proof is found.
    pub fn try_mine_block(&mut self) -> Result<Block, ChainError> {
        let candidate = self.prepare_mining()?;
        let proof = proof_of_work(&candidate.transactions, &candidate.previous_hash);

        let block = Block::new(
            candidate.index,
            candidate.previous_hash,
            candidate.transactions,
            proof,
        );
        self.chain.push(block.clone());
        self.mempool.clear();
        self.save_data();

        info!(
            index = block.index,
            proof = block.proof,
            transactions = block.transactions.len(),
            "ledger.block_mined"
        );
        Ok(block)
    }

    pub fn mine_block(&mut self) -> Option<Block> {
        match self.try_mine_block() {
            Ok(block) => Some(block),
            Err(e) => {
                warn!(error = %e, "ledger.mining_refused");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Block ingestion
    // ------------------------------------------------------------------

    /// Appends a peer's block if its proof holds and it extends our tip. The
    /// block index is not checked here; see `Node::receive_block`.
    pub fn try_add_block(&mut self, block: Block) -> Result<(), ChainError> {
        if !valid_proof(&block.transactions, &block.previous_hash, block.proof) {
            return Err(ChainError::InvalidProof(format!(
                "proof {} of incoming block {} does not meet the difficulty target",
                block.proof, block.index
            )));
        }

        let tip = hash_block(self.last_block());
        if tip != block.previous_hash {
            return Err(ChainError::HashMismatch(format!(
                "incoming block {} links to {}, local tip is {}",
                block.index, block.previous_hash, tip
            )));
        }

        for tx in &block.transactions {
            self.mempool.remove_equivalent(tx);
        }
        info!(
            index = block.index,
            transactions = block.transactions.len(),
            "ledger.block_ingested"
        );
        self.chain.push(block);
        self.save_data();
        Ok(())
    }

    pub fn add_block(&mut self, block: Block) -> bool {
        match self.try_add_block(block) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "ledger.block_rejected");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Conflict resolution
    // ------------------------------------------------------------------

    /// Adopts the longest valid chain among the peers. `fetch_chain` is asked
    /// once per known peer; its failures are skipped. Returns whether the local
    /// chain was replaced.
    pub fn resolve<F>(&mut self, mut fetch_chain: F) -> bool
    where
        F: FnMut(&str) -> Result<Vec<Block>, ChainError>,
    {
        let peers: Vec<String> = self.peers.iter().cloned().collect();
        let candidates = peers.into_iter().map(|peer| {
            let fetched = fetch_chain(&peer);
            (peer, fetched)
        });

        let replaced = match Consensus::select_canonical(&self.chain, candidates) {
            Some(winner) => {
                info!(old_len = self.chain.len(), new_len = winner.len(), "ledger.chain_replaced");
                self.chain = winner;
                self.mempool.clear();
                true
            }
            None => false,
        };

        self.resolve_conflicts = false;
        self.save_data();
        replaced
    }

    // ------------------------------------------------------------------
    // Peers
    // ------------------------------------------------------------------

    pub fn add_peer_node(&mut self, node: impl Into<String>) {
        self.peers.insert(node.into());
        self.save_data();
    }

    pub fn remove_peer_node(&mut self, node: &str) {
        self.peers.remove(node);
        self.save_data();
    }

    pub fn get_peer_nodes(&self) -> Vec<String> {
        self.peers.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::verify_chain;
    use crate::crypto::{nature_identity, KeyPair, NATURE};
    use crate::persistence::InMemoryPersistence;
    use crate::transaction::{sign_transaction, signed_transaction};

    fn ledger_for(keys: &KeyPair) -> Ledger {
        Ledger::new(Some(keys.identity()), "test", Box::new(InMemoryPersistence::new()))
    }

    fn admit(ledger: &mut Ledger, tx: &Transaction) -> Result<Transaction, ChainError> {
        ledger.add_transaction(
            &tx.sender,
            &tx.recipient,
            &tx.signature,
            tx.amount,
            &tx.product_name,
            tx.price,
        )
    }

    #[test]
    fn test_starts_at_genesis() {
        let keys = KeyPair::generate().unwrap();
        let ledger = ledger_for(&keys);
        assert_eq!(ledger.get_chain(), vec![Block::genesis()]);
        assert!(ledger.get_open_transactions().is_empty());
        assert!(ledger.get_peer_nodes().is_empty());
    }

    #[test]
    fn test_apple_scenario() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        let mut ledger = ledger_for(&a);

        let issue = signed_transaction(&NATURE, &a.identity(), 10, "apple", 0).unwrap();
        admit(&mut ledger, &issue).unwrap();
        assert_eq!(ledger.get_product_stock(&a.identity(), "apple"), 10);

        let block = ledger.mine_block().unwrap();
        assert_eq!(block.index, 1);
        assert!(ledger.get_open_transactions().is_empty());
        assert_eq!(ledger.get_product_stock(&a.identity(), "apple"), 10);

        let send_four = signed_transaction(&a, &b.identity(), 4, "apple", 0).unwrap();
        admit(&mut ledger, &send_four).unwrap();

        let send_ten = signed_transaction(&a, &b.identity(), 10, "apple", 0).unwrap();
        assert_eq!(
            admit(&mut ledger, &send_ten),
            Err(ChainError::InsufficientStock {
                available: 6,
                requested: 10
            })
        );

        ledger.mine_block().unwrap();
        assert_eq!(ledger.get_product_stock(&a.identity(), "apple"), 6);
        assert_eq!(ledger.get_product_stock(&b.identity(), "apple"), 4);
        assert!(verify_chain(&ledger.get_chain()));
    }

    #[test]
    fn test_admission_requires_identity() {
        let a = KeyPair::generate().unwrap();
        let mut ledger = Ledger::new(None, "anon", Box::new(InMemoryPersistence::new()));
        let issue = signed_transaction(&NATURE, &a.identity(), 1, "apple", 0).unwrap();
        assert_eq!(admit(&mut ledger, &issue), Err(ChainError::NoLocalIdentity));
        assert!(ledger.mine_block().is_none());
    }

    #[test]
    fn test_rejected_admission_leaves_pool_untouched() {
        let a = KeyPair::generate().unwrap();
        let mut ledger = ledger_for(&a);
        let mut forged = signed_transaction(&NATURE, &a.identity(), 5, "apple", 0).unwrap();
        forged.amount = 50;

        assert!(matches!(admit(&mut ledger, &forged), Err(ChainError::InvalidSignature(_))));
        assert!(ledger.get_open_transactions().is_empty());
    }

    #[test]
    fn test_mining_aborts_on_bad_pool_signature() {
        let a = KeyPair::generate().unwrap();
        let persistence = InMemoryPersistence::new();
        let good = signed_transaction(&NATURE, &a.identity(), 5, "apple", 0).unwrap();
        let mut bad = signed_transaction(&NATURE, &a.identity(), 6, "apple", 0).unwrap();
        bad.signature = good.signature.clone();

        // Smuggle the bad entry in through a snapshot, bypassing admission.
        persistence
            .save_snapshot(&LedgerSnapshot {
                chain: vec![Block::genesis()],
                open_transactions: vec![good, bad],
                peers: vec![],
            })
            .unwrap();
        let mut ledger = Ledger::new(Some(a.identity()), "test", Box::new(persistence));

        let before = ledger.get_open_transactions();
        assert!(ledger.mine_block().is_none());
        assert_eq!(ledger.get_open_transactions(), before);
        assert_eq!(ledger.chain_len(), 1);
    }

    #[test]
    fn test_mining_refused_while_resolution_pending() {
        let a = KeyPair::generate().unwrap();
        let mut ledger = ledger_for(&a);
        ledger.mark_resolution_needed();
        assert_eq!(ledger.try_mine_block(), Err(ChainError::ResolutionPending));

        assert!(!ledger.resolve(|_| Err(ChainError::PeerUnreachable("none".into()))));
        assert!(!ledger.resolve_conflicts());
        assert!(ledger.mine_block().is_some());
    }

    #[test]
    fn test_add_block_rejects_wrong_parent_even_with_valid_proof() {
        let a = KeyPair::generate().unwrap();
        let mut ledger = ledger_for(&a);

        let bogus_parent = "ab".repeat(32);
        let proof = proof_of_work(&[], &bogus_parent);
        let block = Block::new(1, bogus_parent, vec![], proof);
        assert!(valid_proof(&block.transactions, &block.previous_hash, block.proof));
        assert!(matches!(ledger.try_add_block(block), Err(ChainError::HashMismatch(_))));
        assert_eq!(ledger.chain_len(), 1);
    }

    #[test]
    fn test_add_block_rejects_bad_proof() {
        let a = KeyPair::generate().unwrap();
        let mut ledger = ledger_for(&a);
        let tip = hash_block(ledger.last_block());
        let good = proof_of_work(&[], &tip);
        let bad = (0..).find(|p| !valid_proof(&[], &tip, *p)).unwrap();
        assert_ne!(good, bad);

        assert!(!ledger.add_block(Block::new(1, tip, vec![], bad)));
    }

    #[test]
    fn test_add_block_prunes_equivalent_pool_entries() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        let mut ledger = ledger_for(&a);

        let issue = signed_transaction(&NATURE, &a.identity(), 3, "apple", 0).unwrap();
        let other = signed_transaction(&NATURE, &b.identity(), 1, "apple", 0).unwrap();
        admit(&mut ledger, &issue).unwrap();
        admit(&mut ledger, &other).unwrap();

        let tip = hash_block(ledger.last_block());
        let txs = vec![issue.clone()];
        let proof = proof_of_work(&txs, &tip);
        assert!(ledger.add_block(Block::new(1, tip, txs, proof)));
        assert_eq!(ledger.get_open_transactions(), vec![other]);
        assert_eq!(ledger.get_product_stock(&a.identity(), "apple"), 3);
    }

    #[test]
    fn test_commit_mined_keeps_late_admissions() {
        let a = KeyPair::generate().unwrap();
        let mut ledger = ledger_for(&a);

        let first = signed_transaction(&NATURE, &a.identity(), 3, "apple", 0).unwrap();
        admit(&mut ledger, &first).unwrap();
        let candidate = ledger.prepare_mining().unwrap();

        let late = signed_transaction(&NATURE, &a.identity(), 4, "pear", 0).unwrap();
        admit(&mut ledger, &late).unwrap();

        let proof = proof_of_work(&candidate.transactions, &candidate.previous_hash);
        let block = ledger.commit_mined(candidate, proof).unwrap();
        assert_eq!(block.transactions, vec![first]);
        assert_eq!(ledger.get_open_transactions(), vec![late]);
    }

    #[test]
    fn test_commit_mined_rejects_stale_candidate() {
        let a = KeyPair::generate().unwrap();
        let mut ledger = ledger_for(&a);
        let candidate = ledger.prepare_mining().unwrap();
        ledger.mine_block().unwrap();

        let proof = proof_of_work(&candidate.transactions, &candidate.previous_hash);
        assert!(matches!(
            ledger.commit_mined(candidate, proof),
            Err(ChainError::StaleCandidate(_))
        ));
        assert_eq!(ledger.chain_len(), 2);
    }

    #[test]
    fn test_resolve_adopts_longer_chain_and_clears_pool() {
        let a = KeyPair::generate().unwrap();
        let mut remote = ledger_for(&a);
        remote.mine_block().unwrap();
        remote.mine_block().unwrap();
        let remote_chain = remote.get_chain();

        let mut local = ledger_for(&a);
        local.add_peer_node("peer-1");
        local.add_peer_node("peer-2");
        let pending = signed_transaction(&NATURE, &a.identity(), 1, "apple", 0).unwrap();
        admit(&mut local, &pending).unwrap();
        local.mark_resolution_needed();

        let replaced = local.resolve(|peer| match peer {
            "peer-1" => Err(ChainError::PeerUnreachable(peer.to_string())),
            _ => Ok(remote_chain.clone()),
        });
        assert!(replaced);
        assert_eq!(local.get_chain(), remote_chain);
        assert!(local.get_open_transactions().is_empty());
        assert!(!local.resolve_conflicts());
    }

    #[test]
    fn test_resolve_keeps_chain_against_equal_length() {
        let a = KeyPair::generate().unwrap();
        let mut remote = ledger_for(&a);
        remote.mine_block().unwrap();

        let mut local = ledger_for(&a);
        local.mine_block().unwrap();
        let before = local.get_chain();
        local.add_peer_node("peer");

        assert!(!local.resolve(|_| Ok(remote.get_chain())));
        assert_eq!(local.get_chain(), before);
    }

    #[test]
    fn test_state_survives_restart() {
        let a = KeyPair::generate().unwrap();
        let persistence = InMemoryPersistence::new();
        let mut ledger = Ledger::new(Some(a.identity()), "n", Box::new(persistence.clone()));

        let issue = signed_transaction(&NATURE, &a.identity(), 10, "apple", 0).unwrap();
        admit(&mut ledger, &issue).unwrap();
        ledger.mine_block().unwrap();
        let pending =
            sign_transaction(&a, &a.identity(), nature_identity(), 2, "apple", 1).unwrap();
        ledger
            .add_transaction(&a.identity(), nature_identity(), &pending, 2, "apple", 1)
            .unwrap();
        ledger.add_peer_node("localhost:5001");

        assert_eq!(persistence.stored(), Some(ledger.snapshot()));
        let restarted = Ledger::new(Some(a.identity()), "n", Box::new(persistence));
        assert_eq!(restarted.snapshot(), ledger.snapshot());
    }
}
