//! Game engine: the round state machine and the service that runs
//! transitions against the ledger and round store.

pub mod round;
pub mod service;

pub use service::{CashoutReceipt, GameRules, GameService, RevealOutcome, StartReceipt};
