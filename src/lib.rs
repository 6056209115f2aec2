//! MINES: fair-odds Mines wagering service.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod odds;
pub mod game;
pub mod storage;
pub mod api;
