//! Snapshot persistence for Stockchain
//!
//! A node persists one snapshot: its chain, its open transactions and its
//! peer set. Three backends share the [`Persistence`] trait: a JSON file per
//! node, a SQLite database, and an in-memory store for tests.

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::transaction::Transaction;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a node needs to resume where it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub chain: Vec<Block>,
    pub open_transactions: Vec<Transaction>,
    pub peers: Vec<String>,
}

/// Abstraction for persistence backends. `load_snapshot` returns `Ok(None)`
/// when nothing has been saved yet.
pub trait Persistence: Send + Sync {
    fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), ChainError>;
    fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>, ChainError>;
}

/// JSON document `blockchain-{node_id}.json` inside a data directory.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(data_dir: impl AsRef<Path>, node_id: &str) -> Self {
        Self {
            path: data_dir.as_ref().join(format!("blockchain-{}.json", node_id)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Persistence for FileSnapshotStore {
    fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), ChainError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ChainError::PersistenceFailure(format!("Failed to create {:?}: {}", parent, e))
                })?;
            }
        }

        let json = serde_json::to_vec_pretty(snapshot).map_err(|e| {
            ChainError::PersistenceFailure(format!("Failed to serialize snapshot: {}", e))
        })?;

        // Write beside the target and rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| {
            ChainError::PersistenceFailure(format!("Failed to write {:?}: {}", tmp, e))
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            ChainError::PersistenceFailure(format!("Failed to replace {:?}: {}", self.path, e))
        })?;
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>, ChainError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ChainError::PersistenceFailure(format!(
                    "Failed to read {:?}: {}",
                    self.path, e
                )))
            }
        };

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            ChainError::PersistenceFailure(format!("Failed to parse {:?}: {}", self.path, e))
        })
    }
}

pub struct Database {
    conn: std::sync::Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| {
                ChainError::PersistenceFailure(format!("Failed to open database: {}", e))
            })?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blocks (
                seq INTEGER PRIMARY KEY,
                idx INTEGER NOT NULL,
                previous_hash TEXT NOT NULL,
                proof INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                transactions TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS open_transactions (
                seq INTEGER PRIMARY KEY,
                tx_data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS peers (
                addr TEXT PRIMARY KEY
            );",
        )
        .map_err(|e| ChainError::PersistenceFailure(format!("Failed to create tables: {}", e)))?;

        Ok(Database {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::PersistenceFailure("Mutex poisoned".to_string()))
    }

    /// Replaces the stored snapshot inside one SQL transaction.
    pub fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), ChainError> {
        let conn_guard = self.lock()?;
        let tx = conn_guard.unchecked_transaction().map_err(|e| {
            ChainError::PersistenceFailure(format!("Failed to start transaction: {}", e))
        })?;

        tx.execute_batch("DELETE FROM blocks; DELETE FROM open_transactions; DELETE FROM peers;")
            .map_err(|e| ChainError::PersistenceFailure(format!("Failed to clear tables: {}", e)))?;

        // Rows are keyed by chain position; block indexes need not be unique or ordered.
        for (seq, block) in snapshot.chain.iter().enumerate() {
            let transactions_json = serde_json::to_string(&block.transactions).map_err(|e| {
                ChainError::PersistenceFailure(format!("Failed to serialize transactions: {}", e))
            })?;
            tx.execute(
                "INSERT INTO blocks (seq, idx, previous_hash, proof, timestamp, transactions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    seq as i64,
                    block.index as i64,
                    block.previous_hash,
                    block.proof as i64,
                    block.timestamp as i64,
                    transactions_json,
                ],
            )
            .map_err(|e| ChainError::PersistenceFailure(format!("Failed to save block: {}", e)))?;
        }

        for (seq, open_tx) in snapshot.open_transactions.iter().enumerate() {
            let tx_json = serde_json::to_string(open_tx).map_err(|e| {
                ChainError::PersistenceFailure(format!("Failed to serialize transaction: {}", e))
            })?;
            tx.execute(
                "INSERT INTO open_transactions (seq, tx_data) VALUES (?1, ?2)",
                params![seq as i64, tx_json],
            )
            .map_err(|e| {
                ChainError::PersistenceFailure(format!("Failed to save open transaction: {}", e))
            })?;
        }

        for peer in &snapshot.peers {
            tx.execute("INSERT OR IGNORE INTO peers (addr) VALUES (?1)", params![peer])
                .map_err(|e| {
                    ChainError::PersistenceFailure(format!("Failed to save peer: {}", e))
                })?;
        }

        tx.commit().map_err(|e| {
            ChainError::PersistenceFailure(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }

    pub fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>, ChainError> {
        let conn_guard = self.lock()?;

        let mut stmt = conn_guard
            .prepare(
                "SELECT idx, previous_hash, proof, timestamp, transactions
                 FROM blocks ORDER BY seq ASC",
            )
            .map_err(|e| {
                ChainError::PersistenceFailure(format!("Failed to prepare query: {}", e))
            })?;
        let rows = stmt
            .query_map([], |row| {
                let index: i64 = row.get(0)?;
                let previous_hash: String = row.get(1)?;
                let proof: i64 = row.get(2)?;
                let timestamp: i64 = row.get(3)?;
                let transactions_json: String = row.get(4)?;
                Ok((index, previous_hash, proof, timestamp, transactions_json))
            })
            .map_err(|e| ChainError::PersistenceFailure(format!("Failed to query blocks: {}", e)))?;

        let mut chain = Vec::new();
        for row in rows {
            let (index, previous_hash, proof, timestamp, transactions_json) = row
                .map_err(|e| {
                    ChainError::PersistenceFailure(format!("Failed to read block: {}", e))
                })?;
            let transactions: Vec<Transaction> = serde_json::from_str(&transactions_json)
                .map_err(|e| {
                    ChainError::PersistenceFailure(format!("Failed to decode transactions: {}", e))
                })?;
            chain.push(Block {
                index: index as u64,
                previous_hash,
                transactions,
                proof: proof as u64,
                timestamp: timestamp as u64,
            });
        }

        if chain.is_empty() {
            return Ok(None);
        }

        let mut stmt = conn_guard
            .prepare("SELECT tx_data FROM open_transactions ORDER BY seq ASC")
            .map_err(|e| {
                ChainError::PersistenceFailure(format!("Failed to prepare query: {}", e))
            })?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| {
                ChainError::PersistenceFailure(format!("Failed to query open transactions: {}", e))
            })?;
        let mut open_transactions = Vec::new();
        for row in rows {
            let tx_json = row.map_err(|e| {
                ChainError::PersistenceFailure(format!("Failed to read open transaction: {}", e))
            })?;
            open_transactions.push(serde_json::from_str(&tx_json).map_err(|e| {
                ChainError::PersistenceFailure(format!("Failed to decode open transaction: {}", e))
            })?);
        }

        let mut stmt = conn_guard
            .prepare("SELECT addr FROM peers ORDER BY addr ASC")
            .map_err(|e| {
                ChainError::PersistenceFailure(format!("Failed to prepare query: {}", e))
            })?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| ChainError::PersistenceFailure(format!("Failed to query peers: {}", e)))?;
        let mut peers = Vec::new();
        for row in rows {
            peers.push(row.map_err(|e| {
                ChainError::PersistenceFailure(format!("Failed to read peer: {}", e))
            })?);
        }

        Ok(Some(LedgerSnapshot {
            chain,
            open_transactions,
            peers,
        }))
    }
}

impl Persistence for Database {
    fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), ChainError> {
        Database::save_snapshot(self, snapshot)
    }

    fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>, ChainError> {
        Database::load_snapshot(self)
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
/// Clones share the same storage, so a test can keep a handle and inspect what
/// the ledger saved.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    snapshot: Arc<Mutex<Option<LedgerSnapshot>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(&self) -> Option<LedgerSnapshot> {
        self.snapshot.lock().clone()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), ChainError> {
        *self.snapshot.lock() = Some(snapshot.clone());
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>, ChainError> {
        Ok(self.snapshot.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> LedgerSnapshot {
        let tx = Transaction::new("nature", "alice", "sig", 10, "apple", 0);
        let block = Block {
            index: 1,
            previous_hash: crate::blockchain::hash_block(&Block::genesis()),
            transactions: vec![tx.clone()],
            proof: 17,
            timestamp: 1_700_000_000,
        };
        LedgerSnapshot {
            chain: vec![Block::genesis(), block],
            open_transactions: vec![
                Transaction::new("alice", "bob", "sig-2", 4, "apple", 0),
                Transaction::new("alice", "carol", "sig-3", 1, "apple", 2),
            ],
            peers: vec!["localhost:5001".to_string(), "localhost:5002".to_string()],
        }
    }

    #[test]
    fn test_database_round_trip() {
        let db = Database::open(":memory:").unwrap();
        assert_eq!(db.load_snapshot().unwrap(), None);

        let snapshot = sample_snapshot();
        db.save_snapshot(&snapshot).unwrap();
        assert_eq!(db.load_snapshot().unwrap(), Some(snapshot.clone()));

        // A second save replaces rather than appends.
        let mut shorter = snapshot;
        shorter.open_transactions.clear();
        shorter.peers.pop();
        db.save_snapshot(&shorter).unwrap();
        assert_eq!(db.load_snapshot().unwrap(), Some(shorter));
    }

    #[test]
    fn test_database_keeps_chain_order_with_irregular_indexes() {
        let genesis = Block::genesis();
        let mut chain = vec![genesis];
        for index in [5, 3, 3, u64::MAX] {
            let last_hash = crate::blockchain::hash_block(&chain[chain.len() - 1]);
            let proof = crate::miner::proof_of_work(&[], &last_hash);
            chain.push(Block::new(index, last_hash, vec![], proof));
        }
        assert!(crate::blockchain::verify_chain(&chain));

        let snapshot = LedgerSnapshot {
            chain,
            open_transactions: vec![],
            peers: vec![],
        };
        let db = Database::open(":memory:").unwrap();
        db.save_snapshot(&snapshot).unwrap();

        let loaded = db.load_snapshot().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert!(crate::blockchain::verify_chain(&loaded.chain));
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), "5000");
        assert_eq!(store.load_snapshot().unwrap(), None);

        let snapshot = sample_snapshot();
        store.save_snapshot(&snapshot).unwrap();
        assert!(store.path().ends_with("blockchain-5000.json"));
        assert_eq!(store.load_snapshot().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), "x");
        std::fs::write(store.path(), b"{ not json").unwrap();
        assert!(matches!(
            store.load_snapshot(),
            Err(ChainError::PersistenceFailure(_))
        ));
    }

    #[test]
    fn test_in_memory_clones_share_storage() {
        let store = InMemoryPersistence::new();
        let handle = store.clone();
        store.save_snapshot(&sample_snapshot()).unwrap();
        assert_eq!(handle.stored(), Some(sample_snapshot()));
    }
}
