// Thin re-export module: implementation is in `blockchain/core.rs`, split into
// chain data, hashing, validation, stock accounting and the ledger itself.

pub mod core;
pub use core::*;
