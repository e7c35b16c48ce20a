//! Peer fan-out over HTTP
//!
//! Peers are addressed by `host:port` (a scheme may be given explicitly).
//! Every delivery is best effort: a peer that cannot be reached is logged and
//! skipped, and never blocks the others.

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::transaction::Transaction;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a peer answered a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerReply {
    Accepted,
    /// The peer refused the block because its chain disagrees with ours.
    Conflict,
    Rejected(u16),
}

/// Body of `POST /broadcast-block`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEnvelope {
    pub block: Block,
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send_transaction(&self, peer: &str, tx: &Transaction) -> Result<PeerReply, ChainError>;
    async fn send_block(&self, peer: &str, block: &Block) -> Result<PeerReply, ChainError>;
    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, ChainError>;
}

pub fn peer_url(peer: &str, path: &str) -> String {
    if peer.starts_with("http://") || peer.starts_with("https://") {
        format!("{}{}", peer.trim_end_matches('/'), path)
    } else {
        format!("http://{}{}", peer, path)
    }
}

fn classify(status: StatusCode) -> PeerReply {
    if status.is_success() {
        PeerReply::Accepted
    } else if status == StatusCode::CONFLICT {
        PeerReply::Conflict
    } else {
        PeerReply::Rejected(status.as_u16())
    }
}

/// [`PeerTransport`] speaking the node's own HTTP routes.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(connect_timeout_secs: u64) -> Result<Self, ChainError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .build()
            .map_err(|e| ChainError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn post_json<T: Serialize + Sync>(
        &self,
        peer: &str,
        path: &str,
        body: &T,
    ) -> Result<PeerReply, ChainError> {
        let url = peer_url(peer, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ChainError::PeerUnreachable(format!("{}: {}", url, e)))?;
        Ok(classify(response.status()))
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn send_transaction(
        &self,
        peer: &str,
        tx: &Transaction,
    ) -> Result<PeerReply, ChainError> {
        self.post_json(peer, "/broadcast-transaction", tx).await
    }

    async fn send_block(&self, peer: &str, block: &Block) -> Result<PeerReply, ChainError> {
        let envelope = BlockEnvelope { block: block.clone() };
        self.post_json(peer, "/broadcast-block", &envelope).await
    }

    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, ChainError> {
        let url = peer_url(peer, "/chain");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::PeerUnreachable(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(ChainError::MalformedPeerPayload(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }

        response
            .json::<Vec<Block>>()
            .await
            .map_err(|e| ChainError::MalformedPeerPayload(format!("{}: {}", url, e)))
    }
}

/// Outcome of one fan-out round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub rejected: usize,
    pub unreachable: usize,
    /// At least one peer answered 409 to a block.
    pub conflict: bool,
}

impl BroadcastReport {
    fn record(&mut self, peer: &str, outcome: Result<PeerReply, ChainError>) {
        match outcome {
            Ok(PeerReply::Accepted) => self.delivered += 1,
            Ok(PeerReply::Conflict) => {
                debug!(peer = %peer, "network.peer_conflict");
                self.rejected += 1;
                self.conflict = true;
            }
            Ok(PeerReply::Rejected(status)) => {
                debug!(peer = %peer, status, "network.peer_rejected");
                self.rejected += 1;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "network.peer_unreachable");
                self.unreachable += 1;
            }
        }
    }
}

#[derive(Clone)]
pub struct PeerBroadcaster {
    transport: Arc<dyn PeerTransport>,
}

impl PeerBroadcaster {
    pub fn new(transport: Arc<dyn PeerTransport>) -> Self {
        Self { transport }
    }

    pub fn http(connect_timeout_secs: u64) -> Result<Self, ChainError> {
        Ok(Self::new(Arc::new(HttpTransport::new(connect_timeout_secs)?)))
    }

    pub async fn broadcast_transaction(
        &self,
        peers: &[String],
        tx: &Transaction,
    ) -> BroadcastReport {
        let sends = peers.iter().map(|peer| self.transport.send_transaction(peer, tx));
        let outcomes = join_all(sends).await;

        let mut report = BroadcastReport::default();
        for (peer, outcome) in peers.iter().zip(outcomes) {
            report.record(peer, outcome);
        }
        // A 409 on a transaction carries no chain information.
        report.conflict = false;
        debug!(peers = peers.len(), delivered = report.delivered, "network.transaction_broadcast");
        report
    }

    pub async fn broadcast_block(&self, peers: &[String], block: &Block) -> BroadcastReport {
        let sends = peers.iter().map(|peer| self.transport.send_block(peer, block));
        let outcomes = join_all(sends).await;

        let mut report = BroadcastReport::default();
        for (peer, outcome) in peers.iter().zip(outcomes) {
            report.record(peer, outcome);
        }
        info!(
            index = block.index,
            peers = peers.len(),
            delivered = report.delivered,
            conflict = report.conflict,
            "network.block_broadcast"
        );
        report
    }

    /// Fetches every peer's chain concurrently, keeping failures per peer.
    pub async fn fetch_chains(
        &self,
        peers: &[String],
    ) -> Vec<(String, Result<Vec<Block>, ChainError>)> {
        let fetches = peers.iter().map(|peer| self.transport.fetch_chain(peer));
        let results = join_all(fetches).await;
        peers.iter().cloned().zip(results).collect()
    }
}
