//! End-to-end tests against the public crate API.

mod flaky_ledger;
mod game_flow;
mod persistence;
