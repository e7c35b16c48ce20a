//! Local wallet: the node's own key pair, persisted as JSON

use crate::crypto::{is_nature, KeyPair, NATURE};
use crate::error::ChainError;
use crate::transaction::sign_transaction;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub name: Option<String>,
    /// Hex-encoded compressed public key; this is the participant identity.
    pub public_key: String,
    pub secret_key_hex: String,
    pub created: String,
}

impl Wallet {
    pub fn new(name: Option<String>) -> Result<Self, ChainError> {
        Ok(Self::from_keypair(name, &KeyPair::generate()?))
    }

    pub fn from_keypair(name: Option<String>, keypair: &KeyPair) -> Self {
        Wallet {
            name,
            public_key: keypair.identity(),
            secret_key_hex: keypair.secret_hex(),
            created: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// `wallet-{node_id}.json` inside the data directory.
    pub fn path_for(data_dir: impl AsRef<Path>, node_id: &str) -> PathBuf {
        data_dir.as_ref().join(format!("wallet-{}.json", node_id))
    }

    pub fn keypair(&self) -> Result<KeyPair, ChainError> {
        let keypair = KeyPair::from_secret_hex(&self.secret_key_hex)
            .map_err(|e| ChainError::WalletError(format!("Corrupt secret key: {}", e)))?;
        if keypair.identity() != self.public_key {
            return Err(ChainError::WalletError(
                "Public key does not match the stored secret key".to_string(),
            ));
        }
        Ok(keypair)
    }

    /// Signs on behalf of `sender`, which must be this wallet or NATURE.
    pub fn sign_transaction(
        &self,
        sender: &str,
        recipient: &str,
        amount: u64,
        product_name: &str,
        price: u64,
    ) -> Result<String, ChainError> {
        if is_nature(sender) {
            return sign_transaction(&NATURE, sender, recipient, amount, product_name, price);
        }
        if sender != self.public_key {
            return Err(ChainError::WalletError(format!(
                "Wallet cannot sign for sender {}",
                sender
            )));
        }
        sign_transaction(&self.keypair()?, sender, recipient, amount, product_name, price)
    }

    pub fn save(&self, path: &Path) -> Result<(), ChainError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| {
            ChainError::WalletError(format!("Failed to write wallet {:?}: {}", path, e))
        })?;
        info!(path = ?path, "wallet.saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ChainError> {
        let text = fs::read_to_string(path).map_err(|e| {
            ChainError::WalletError(format!("Failed to read wallet {:?}: {}", path, e))
        })?;
        let wallet: Wallet = serde_json::from_str(&text)?;
        wallet.keypair()?;
        Ok(wallet)
    }

    /// Loads the wallet at `path` if one exists.
    pub fn load_optional(path: &Path) -> Result<Option<Self>, ChainError> {
        if path.exists() {
            Self::load(path).map(Some)
        } else {
            Ok(None)
        }
    }
}
