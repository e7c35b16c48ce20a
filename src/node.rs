use crate::blockchain::{Block, Ledger};
use crate::config::{Config, StorageBackend};
use crate::crypto::nature_identity;
use crate::error::ChainError;
use crate::miner::proof_of_work_cancellable;
use crate::network::PeerBroadcaster;
use crate::persistence::{Database, FileSnapshotStore, InMemoryPersistence, Persistence};
use crate::transaction::Transaction;
use crate::wallet::Wallet;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// What happened to a block pushed by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIngest {
    /// Appended to the local chain.
    Accepted,
    /// Next in line but failed proof or linkage.
    Conflict,
    /// The peer is ahead of us; resolution has been scheduled.
    Behind,
    /// The peer is behind us.
    Stale,
}

/// A running node: the ledger behind a single lock, the peer fan-out, and the
/// local wallet.
///
/// Proof search and network I/O never hold the ledger lock.
pub struct Node {
    ledger: Arc<RwLock<Ledger>>,
    broadcaster: PeerBroadcaster,
    wallet: RwLock<Option<Wallet>>,
    wallet_path: Option<PathBuf>,
    mining_rounds: parking_lot::Mutex<Vec<Arc<AtomicBool>>>,
}

impl Node {
    pub fn new(
        ledger: Ledger,
        broadcaster: PeerBroadcaster,
        wallet: Option<Wallet>,
        wallet_path: Option<PathBuf>,
    ) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(ledger)),
            broadcaster,
            wallet: RwLock::new(wallet),
            wallet_path,
            mining_rounds: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Opens storage and the wallet named by `config`, then seeds the peer set
    /// with the bootstrap peers.
    pub fn init(config: &Config) -> Result<Self, ChainError> {
        let node_id = config.node_id();
        let data_dir = &config.node.data_dir;
        info!(
            node_id = %node_id,
            data_dir = ?data_dir,
            backend = ?config.storage.backend,
            "node.init"
        );

        if config.storage.backend != StorageBackend::Memory {
            fs::create_dir_all(data_dir).map_err(|e| {
                ChainError::ConfigError(format!("Failed to create data dir {:?}: {}", data_dir, e))
            })?;
        }

        let persistence: Box<dyn Persistence> = match config.storage.backend {
            StorageBackend::File => Box::new(FileSnapshotStore::new(data_dir, &node_id)),
            StorageBackend::Sqlite => {
                let path = data_dir.join(format!("blockchain-{}.db", node_id));
                match Database::open(&path.to_string_lossy()) {
                    Ok(db) => Box::new(db),
                    Err(e) => {
                        warn!(path = ?path, error = %e, "node.sqlite_unavailable_using_memory");
                        Box::new(InMemoryPersistence::new())
                    }
                }
            }
            StorageBackend::Memory => Box::new(InMemoryPersistence::new()),
        };

        let (wallet, wallet_path) = match config.storage.backend {
            StorageBackend::Memory => (None, None),
            _ => {
                let path = Wallet::path_for(data_dir, &node_id);
                let wallet = match Wallet::load_optional(&path) {
                    Ok(wallet) => wallet,
                    Err(e) => {
                        warn!(path = ?path, error = %e, "node.wallet_unreadable");
                        None
                    }
                };
                (wallet, Some(path))
            }
        };

        let identity = wallet.as_ref().map(|w| w.public_key.clone());
        let mut ledger = Ledger::new(identity, node_id, persistence);
        for peer in &config.network.bootstrap_peers {
            ledger.add_peer_node(peer.clone());
        }

        let broadcaster = PeerBroadcaster::http(config.network.connect_timeout_secs)?;
        Ok(Self::new(ledger, broadcaster, wallet, wallet_path))
    }

    pub fn ledger(&self) -> Arc<RwLock<Ledger>> {
        self.ledger.clone()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_chain(&self) -> Vec<Block> {
        self.ledger.read().await.get_chain()
    }

    pub async fn get_open_transactions(&self) -> Vec<Transaction> {
        self.ledger.read().await.get_open_transactions()
    }

    pub async fn get_product_stock(&self, participant: &str, product_name: &str) -> i128 {
        self.ledger.read().await.get_product_stock(participant, product_name)
    }

    pub async fn get_peer_nodes(&self) -> Vec<String> {
        self.ledger.read().await.get_peer_nodes()
    }

    pub async fn resolution_pending(&self) -> bool {
        self.ledger.read().await.resolve_conflicts()
    }

    pub async fn node_id(&self) -> String {
        self.ledger.read().await.node_id().to_string()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Admits a signed transaction. Locally originated ones are then pushed to
    /// every peer; ones received from a peer are not forwarded again.
    pub async fn add_transaction(
        &self,
        tx: Transaction,
        is_from_network: bool,
    ) -> Result<Transaction, ChainError> {
        let (admitted, peers) = {
            let mut ledger = self.ledger.write().await;
            let admitted = ledger.add_transaction(
                &tx.sender,
                &tx.recipient,
                &tx.signature,
                tx.amount,
                &tx.product_name,
                tx.price,
            )?;
            (admitted, ledger.get_peer_nodes())
        };

        if !is_from_network && !peers.is_empty() {
            self.broadcaster.broadcast_transaction(&peers, &admitted).await;
        }
        Ok(admitted)
    }

    /// Signs with the local wallet (or NATURE) and admits the transaction.
    pub async fn submit_transaction(
        &self,
        recipient: &str,
        amount: u64,
        product_name: &str,
        price: u64,
        is_nature: bool,
    ) -> Result<Transaction, ChainError> {
        let tx = {
            let wallet = self.wallet.read().await;
            let wallet = wallet.as_ref().ok_or(ChainError::NoLocalIdentity)?;
            let sender = if is_nature {
                nature_identity().to_string()
            } else {
                wallet.public_key.clone()
            };
            let signature =
                wallet.sign_transaction(&sender, recipient, amount, product_name, price)?;
            Transaction::new(sender, recipient, signature, amount, product_name, price)
        };
        self.add_transaction(tx, false).await
    }

    // ------------------------------------------------------------------
    // Mining
    // ------------------------------------------------------------------

    /// Mines the current pool. The proof search runs on the blocking pool
    /// without the ledger lock and is abandoned if a competing block lands
    /// first.
    pub async fn mine_block(&self) -> Result<Block, ChainError> {
        let candidate = self.ledger.read().await.prepare_mining()?;
        debug!(
            index = candidate.index,
            transactions = candidate.transactions.len(),
            "node.mining_round_started"
        );

        let cancel = Arc::new(AtomicBool::new(false));
        self.mining_rounds.lock().push(cancel.clone());

        let transactions = candidate.transactions.clone();
        let previous_hash = candidate.previous_hash.clone();
        let round = cancel.clone();
        let search = tokio::task::spawn_blocking(move || {
            proof_of_work_cancellable(&transactions, &previous_hash, &round)
        })
        .await;

        self.mining_rounds.lock().retain(|flag| !Arc::ptr_eq(flag, &cancel));
        let proof = search.map_err(|e| ChainError::IoError(format!("Mining task failed: {}", e)))??;

        let (block, peers) = {
            let mut ledger = self.ledger.write().await;
            let block = ledger.commit_mined(candidate, proof)?;
            (block, ledger.get_peer_nodes())
        };

        if !peers.is_empty() {
            let report = self.broadcaster.broadcast_block(&peers, &block).await;
            if report.conflict {
                self.ledger.write().await.mark_resolution_needed();
            }
        }
        Ok(block)
    }

    fn cancel_mining_rounds(&self) {
        let rounds = std::mem::take(&mut *self.mining_rounds.lock());
        if !rounds.is_empty() {
            info!(rounds = rounds.len(), "node.mining_rounds_cancelled");
        }
        for flag in rounds {
            flag.store(true, Ordering::Relaxed);
        }
    }

    // ------------------------------------------------------------------
    // Blocks from peers
    // ------------------------------------------------------------------

    pub async fn receive_block(&self, block: Block) -> BlockIngest {
        let outcome = {
            let mut ledger = self.ledger.write().await;
            // A tip at u64::MAX has no successor.
            let next_index = match ledger.last_block().index.checked_add(1) {
                Some(next) => next,
                None => {
                    debug!(tip = ledger.last_block().index, "node.tip_index_exhausted");
                    return BlockIngest::Stale;
                }
            };
            if block.index == next_index {
                if ledger.add_block(block) {
                    BlockIngest::Accepted
                } else {
                    BlockIngest::Conflict
                }
            } else if block.index > next_index {
                ledger.mark_resolution_needed();
                BlockIngest::Behind
            } else {
                BlockIngest::Stale
            }
        };

        if outcome == BlockIngest::Accepted {
            self.cancel_mining_rounds();
        }
        debug!(outcome = ?outcome, "node.block_received");
        outcome
    }

    /// Fetches every peer's chain and adopts the longest valid one.
    pub async fn resolve(&self) -> bool {
        let peers = self.get_peer_nodes().await;
        let mut fetched: HashMap<String, Result<Vec<Block>, ChainError>> =
            self.broadcaster.fetch_chains(&peers).await.into_iter().collect();

        let replaced = self.ledger.write().await.resolve(|peer| {
            fetched
                .remove(peer)
                .unwrap_or_else(|| {
                    Err(ChainError::PeerUnreachable(format!(
                        "{} was not polled",
                        peer
                    )))
                })
        });

        if replaced {
            self.cancel_mining_rounds();
        }
        replaced
    }

    // ------------------------------------------------------------------
    // Peers
    // ------------------------------------------------------------------

    pub async fn add_peer_node(&self, node: &str) {
        self.ledger.write().await.add_peer_node(node);
    }

    pub async fn remove_peer_node(&self, node: &str) {
        self.ledger.write().await.remove_peer_node(node);
    }

    // ------------------------------------------------------------------
    // Wallet
    // ------------------------------------------------------------------

    pub async fn wallet(&self) -> Option<Wallet> {
        self.wallet.read().await.clone()
    }

    /// Creates a fresh key pair, stores it and makes it the node's identity.
    pub async fn create_wallet(&self) -> Result<Wallet, ChainError> {
        let wallet = Wallet::new(None)?;
        if let Some(path) = &self.wallet_path {
            wallet.save(path)?;
        }
        self.install_wallet(wallet.clone()).await;
        Ok(wallet)
    }

    /// Reloads the stored wallet and makes it the node's identity.
    pub async fn load_wallet(&self) -> Result<Wallet, ChainError> {
        let path = self
            .wallet_path
            .as_ref()
            .ok_or_else(|| ChainError::WalletError("No wallet storage configured".to_string()))?;
        let wallet = Wallet::load(path)?;
        self.install_wallet(wallet.clone()).await;
        Ok(wallet)
    }

    async fn install_wallet(&self, wallet: Wallet) {
        self.ledger
            .write()
            .await
            .set_identity(Some(wallet.public_key.clone()));
        info!(identity = %wallet.public_key, "node.identity_installed");
        *self.wallet.write().await = Some(wallet);
    }
}
