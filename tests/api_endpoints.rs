//! Integration tests for the Stockchain REST API
//!
//! These tests drive the router the way a wallet client and a peer node
//! would, checking status codes and JSON shapes.

use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::Arc;
use stockchain::api::build_api_router;
use stockchain::blockchain::{hash_block, Block, Ledger};
use stockchain::crypto::{nature_identity, KeyPair, NATURE};
use stockchain::miner::proof_of_work;
use stockchain::network::PeerBroadcaster;
use stockchain::node::Node;
use stockchain::persistence::InMemoryPersistence;
use stockchain::transaction::signed_transaction;
use stockchain::wallet::Wallet;
use tempfile::TempDir;

fn test_server(wallet: Option<Wallet>, dir: &TempDir) -> (TestServer, Arc<Node>) {
    let ledger = Ledger::new(
        wallet.as_ref().map(|w| w.public_key.clone()),
        "api",
        Box::new(InMemoryPersistence::new()),
    );
    let broadcaster = PeerBroadcaster::http(1).expect("Failed to build HTTP client");
    let wallet_path = Wallet::path_for(dir.path(), "api");
    let node = Arc::new(Node::new(ledger, broadcaster, wallet, Some(wallet_path)));
    let server =
        TestServer::new(build_api_router(node.clone())).expect("Failed to create test server");
    (server, node)
}

#[tokio::test]
async fn test_read_endpoints_on_fresh_node() {
    let dir = TempDir::new().unwrap();
    let (server, _) = test_server(None, &dir);

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["chain_length"], 1);
    assert_eq!(json["resolution_pending"], false);
    assert!(json["timestamp"].is_string());

    let response = server.get("/chain").await;
    assert_eq!(response.status_code(), 200);
    let chain: Vec<Block> = response.json();
    assert_eq!(chain, vec![Block::genesis()]);

    let response = server.get("/transactions").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json, json!([]));

    let response = server.get("/nodes").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["all_nodes"], json!([]));
}

#[tokio::test]
async fn test_transaction_and_mine_require_wallet() {
    let dir = TempDir::new().unwrap();
    let (server, _) = test_server(None, &dir);

    let response = server
        .post("/transaction")
        .json(&json!({"recipient": "bob", "amount": 1, "product_name": "apple", "is_nature": true}))
        .await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert!(json["error"].is_string());

    let response = server.post("/mine").await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_wallet_lifecycle() {
    let dir = TempDir::new().unwrap();
    let (server, node) = test_server(None, &dir);

    // Nothing stored yet.
    let response = server.get("/wallet").await;
    assert_eq!(response.status_code(), 500);

    let response = server.post("/wallet").await;
    assert_eq!(response.status_code(), 201);
    let created: Value = response.json();
    let public_key = created["public_key"].as_str().unwrap().to_string();
    assert!(created["private_key"].is_string());
    assert_eq!(node.wallet().await.unwrap().public_key, public_key);

    let response = server.get("/wallet").await;
    assert_eq!(response.status_code(), 201);
    let loaded: Value = response.json();
    assert_eq!(loaded["public_key"], public_key.as_str());
}

#[tokio::test]
async fn test_stock_flow_over_http() {
    let dir = TempDir::new().unwrap();
    let wallet = Wallet::new(Some("alice".to_string())).unwrap();
    let alice = wallet.public_key.clone();
    let bob = KeyPair::generate().unwrap().identity();
    let (server, _) = test_server(Some(wallet), &dir);

    let response = server
        .post("/transaction")
        .json(&json!({
            "recipient": alice,
            "amount": 10,
            "product_name": "apple",
            "is_nature": true
        }))
        .await;
    assert_eq!(response.status_code(), 201);
    let json: Value = response.json();
    assert_eq!(json["transaction"]["sender"], nature_identity());

    let response = server.post("/mine").await;
    assert_eq!(response.status_code(), 201);
    let json: Value = response.json();
    assert_eq!(json["block"]["index"], 1);

    let response = server
        .post("/transaction")
        .json(&json!({"recipient": bob, "amount": 4, "product_name": "apple", "price": 2}))
        .await;
    assert_eq!(response.status_code(), 201);

    let response = server
        .post("/transaction")
        .json(&json!({"recipient": bob, "amount": 10, "product_name": "apple"}))
        .await;
    assert_eq!(response.status_code(), 400);

    server.post("/mine").await;

    let response = server.get(&format!("/product_stock/{}/apple", alice)).await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["stock"], 6);

    let response = server.get(&format!("/product_stock/{}/apple", bob)).await;
    let json: Value = response.json();
    assert_eq!(json["stock"], 4);
}

#[tokio::test]
async fn test_broadcast_transaction_from_peer() {
    let dir = TempDir::new().unwrap();
    let (server, node) = test_server(Some(Wallet::new(None).unwrap()), &dir);
    let carol = KeyPair::generate().unwrap();

    let tx = signed_transaction(&NATURE, &carol.identity(), 5, "plum", 0).unwrap();
    let response = server.post("/broadcast-transaction").json(&tx).await;
    assert_eq!(response.status_code(), 201);
    assert_eq!(node.get_open_transactions().await, vec![tx.clone()]);

    let mut forged = tx;
    forged.amount = 500;
    let response = server.post("/broadcast-transaction").json(&forged).await;
    assert_eq!(response.status_code(), 400);

    let response = server
        .post("/broadcast-transaction")
        .json(&json!({"sender": "x"}))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_broadcast_block_status_codes() {
    let dir = TempDir::new().unwrap();
    let (server, node) = test_server(Some(Wallet::new(None).unwrap()), &dir);

    let genesis_hash = hash_block(&Block::genesis());
    let proof = proof_of_work(&[], &genesis_hash);
    let next = Block::new(1, genesis_hash, vec![], proof);

    // Next in line with a bad parent.
    let mut orphan = next.clone();
    orphan.previous_hash = "11".repeat(32);
    let response = server.post("/broadcast-block").json(&json!({"block": orphan})).await;
    assert_eq!(response.status_code(), 409);

    let response = server.post("/broadcast-block").json(&json!({"block": next})).await;
    assert_eq!(response.status_code(), 201);
    assert_eq!(node.get_chain().await.len(), 2);

    // Behind the local tip.
    let response = server.post("/broadcast-block").json(&json!({"block": next})).await;
    assert_eq!(response.status_code(), 409);

    // Far ahead: schedules resolution and blocks mining.
    let mut ahead = next.clone();
    ahead.index = 7;
    let response = server.post("/broadcast-block").json(&json!({"block": ahead})).await;
    assert_eq!(response.status_code(), 200);
    assert!(node.resolution_pending().await);

    let response = server.post("/mine").await;
    assert_eq!(response.status_code(), 409);

    let response = server.post("/resolve-conflicts").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["message"], "Local chain kept!");

    let response = server.post("/mine").await;
    assert_eq!(response.status_code(), 201);
}

#[tokio::test]
async fn test_peer_management() {
    let dir = TempDir::new().unwrap();
    let (server, _) = test_server(None, &dir);

    let response = server.post("/node").json(&json!({"node": "localhost:5001"})).await;
    assert_eq!(response.status_code(), 201);
    let json: Value = response.json();
    assert_eq!(json["all_nodes"], json!(["localhost:5001"]));

    let response = server.post("/node").json(&json!({})).await;
    assert_eq!(response.status_code(), 400);

    let response = server.delete("/node/localhost:5001").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["all_nodes"], json!([]));
}
