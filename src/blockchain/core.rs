pub mod chain;
pub mod hasher;
pub mod ledger;
pub mod state;
pub mod validation;

pub use chain::*;
pub use hasher::*;
pub use ledger::*;
pub use state::*;
pub use validation::*;
