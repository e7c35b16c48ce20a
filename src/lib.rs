//! Stockchain - a proof-of-work ledger of product stock
//!
//! Participants hold quantities of named products. NATURE issues stock from
//! outside the system; everyone else can only pass on what they hold.
//!
//! # Architecture
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, hashing, verification, stock derivation and the
//!   [`blockchain::Ledger`]
//! - [`transaction`] - Transaction type and signing
//! - [`mempool`] - Open transaction pool
//!
//! ## Consensus & Mining
//! - [`miner`] - Proof-of-work search
//! - [`consensus`] - Longest-valid-chain selection
//!
//! ## Cryptography
//! - [`crypto`] - secp256k1 keys, signatures and the NATURE identity
//! - [`wallet`] - The node's own key pair
//!
//! ## State & Networking
//! - [`persistence`] - Snapshot stores (JSON file, SQLite, memory)
//! - [`network`] - Peer fan-out over HTTP
//! - [`node`] - Orchestration behind a single ledger lock
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod consensus;
pub mod miner;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;
pub mod wallet;

// ============================================================================
// State Management & Networking
// ============================================================================
pub mod network;
pub mod node;
pub mod persistence;

// ============================================================================
// Integration
// ============================================================================
#[cfg(feature = "api")]
pub mod api;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
