//! Shared types for the MINES service.
//!
//! These types form the data model used across all modules: the round
//! record and its public view, account records, and the domain error.
//! The state-machine transitions on `Round` live in `game::round`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Board constants
// ---------------------------------------------------------------------------

/// Number of cells on the 5x5 board.
pub const BOARD_SIZE: usize = 25;

/// Inclusive bounds for the number of mines in a round.
pub const MIN_MINES: u8 = 1;
pub const MAX_MINES: u8 = 24;

/// House edge applied when no configuration overrides it (2% retention).
pub const DEFAULT_HOUSE_EDGE: f64 = 0.98;

pub type RoundId = Uuid;
pub type OwnerId = Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// State of a single board cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellState {
    Hidden,
    Safe,
    Mine,
}

impl fmt::Display for CellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellState::Hidden => write!(f, "hidden"),
            CellState::Safe => write!(f, "safe"),
            CellState::Mine => write!(f, "mine"),
        }
    }
}

/// Lifecycle status of a round. `WonOut` and `Lost` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Active,
    WonOut,
    Lost,
}

impl RoundStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RoundStatus::Active)
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Active => write!(f, "active"),
            RoundStatus::WonOut => write!(f, "won_out"),
            RoundStatus::Lost => write!(f, "lost"),
        }
    }
}

impl std::str::FromStr for RoundStatus {
    type Err = MinesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RoundStatus::Active),
            "won_out" => Ok(RoundStatus::WonOut),
            "lost" => Ok(RoundStatus::Lost),
            other => Err(MinesError::InvalidParameters(format!(
                "unknown round status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// One play-through from bet placement to terminal outcome.
///
/// `mine_positions` is server-side only. Clients see a `RoundView`,
/// which withholds the mines until the round is over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub owner_id: OwnerId,
    pub bet_amount: Decimal,
    pub mine_count: u8,
    pub cells: Vec<CellState>,
    pub mine_positions: BTreeSet<u8>,
    pub revealed_safe_count: u8,
    pub status: RoundStatus,
    /// Amount credited on cash-out; zero while active or lost.
    pub payout: Decimal,
    /// Set when the round is cashed out, cleared once the ledger credit
    /// is confirmed. A `won_out` round still pending is owed its payout.
    #[serde(default)]
    pub payout_pending: bool,
    /// Edge in force when the round was created.
    pub house_edge: f64,
    /// Current multiplier, locked at cash-out.
    pub multiplier: f64,
    /// Bumped on every persisted mutation (compare-and-swap key).
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] bet {} | {} mines | {} safe | {:.4}x | {}",
            self.id,
            self.bet_amount,
            self.mine_count,
            self.revealed_safe_count,
            self.multiplier,
            self.status,
        )
    }
}

/// Client-facing projection of a round. Field names follow the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundView {
    pub game_id: RoundId,
    pub bet_amount: Decimal,
    pub mine_count: u8,
    pub grid: Vec<CellState>,
    pub revealed_count: u8,
    pub status: RoundStatus,
    pub game_over: bool,
    pub multiplier: f64,
    pub win_amount: Decimal,
    pub payout_pending: bool,
    /// Only present once the round is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mines: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// A registered bettor and their balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: OwnerId,
    pub username: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Ledger journal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Debit,
    Credit,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Debit => write!(f, "debit"),
            EntryKind::Credit => write!(f, "credit"),
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = MinesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(EntryKind::Debit),
            "credit" => Ok(EntryKind::Credit),
            other => Err(MinesError::InvalidParameters(format!(
                "unknown ledger entry kind: {other}"
            ))),
        }
    }
}

/// One applied balance movement. The reference is unique per movement,
/// so replaying a debit or credit with the same reference is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub reference: String,
    pub owner_id: OwnerId,
    pub kind: EntryKind,
    /// Always positive; the direction is in `kind`.
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for MINES.
///
/// Every variant is a recoverable rejection reported to the caller;
/// none is fatal to the process.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MinesError {
    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid move: {0}")]
    InvalidMove(String),

    #[error("Nothing to cash out: reveal at least one cell first")]
    NothingToCashOut,

    /// Another writer committed first. Never leaves the game service.
    #[error("Revision conflict on round {round_id} (expected revision {expected})")]
    Conflict { round_id: RoundId, expected: u64 },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Username already exists: {0}")]
    UsernameTaken(String),

    #[error("Adapter failure ({adapter}): {message}")]
    AdapterFailure { adapter: String, message: String },
}

impl MinesError {
    /// Shorthand for a storage or ledger failure.
    pub fn adapter(adapter: &str, message: impl fmt::Display) -> Self {
        MinesError::AdapterFailure {
            adapter: adapter.to_string(),
            message: message.to_string(),
        }
    }

    /// Stable machine-readable name, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            MinesError::InsufficientFunds { .. } => "InsufficientFunds",
            MinesError::InvalidParameters(_) => "InvalidParameters",
            MinesError::NotFound(_) => "NotFound",
            MinesError::InvalidMove(_) => "InvalidMove",
            MinesError::NothingToCashOut => "NothingToCashOut",
            MinesError::Conflict { .. } => "Conflict",
            MinesError::Unauthorized(_) => "Unauthorized",
            MinesError::UsernameTaken(_) => "UsernameTaken",
            MinesError::AdapterFailure { .. } => "AdapterFailure",
        }
    }
}

/// Reject mine counts outside `[MIN_MINES, MAX_MINES]`.
pub fn validate_mine_count(mine_count: u8) -> Result<(), MinesError> {
    if (MIN_MINES..=MAX_MINES).contains(&mine_count) {
        Ok(())
    } else {
        Err(MinesError::InvalidParameters(format!(
            "mine count must be between {MIN_MINES} and {MAX_MINES}, got {mine_count}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
