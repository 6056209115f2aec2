//! Round state machine.
//!
//! `active → won_out` on cash-out, `active → lost` on a mine. Both are
//! terminal; every later reveal or cash-out is rejected. Transitions
//! mutate the round in place and never touch the ledger or the store.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::odds::{fair_multiplier, payout_for};
use crate::types::{
    validate_mine_count, CellState, MinesError, OwnerId, Round, RoundStatus, RoundView, BOARD_SIZE,
};

impl Round {
    /// Build a fresh active round with the given mine layout.
    pub fn new(
        owner_id: OwnerId,
        bet_amount: Decimal,
        mine_count: u8,
        mine_positions: BTreeSet<u8>,
        house_edge: f64,
    ) -> Result<Self, MinesError> {
        validate_mine_count(mine_count)?;
        if bet_amount <= Decimal::ZERO {
            return Err(MinesError::InvalidParameters(format!(
                "bet amount must be positive, got {bet_amount}"
            )));
        }
        if mine_positions.len() != mine_count as usize
            || mine_positions.iter().any(|&p| p as usize >= BOARD_SIZE)
        {
            return Err(MinesError::InvalidParameters(format!(
                "mine layout {mine_positions:?} does not match {mine_count} mines \
                 on {BOARD_SIZE} cells"
            )));
        }
        // Validates the edge as a side effect.
        let multiplier = fair_multiplier(0, mine_count as usize, BOARD_SIZE, house_edge)?;

        Ok(Round {
            id: Uuid::new_v4(),
            owner_id,
            bet_amount,
            mine_count,
            cells: vec![CellState::Hidden; BOARD_SIZE],
            mine_positions,
            revealed_safe_count: 0,
            status: RoundStatus::Active,
            payout: Decimal::ZERO,
            payout_pending: false,
            house_edge,
            multiplier,
            revision: 0,
            created_at: Utc::now(),
            finished_at: None,
        })
    }

    /// Reveal one cell. Returns what the cell turned out to be.
    pub fn reveal(&mut self, position: usize) -> Result<CellState, MinesError> {
        self.ensure_active()?;
        let cell = self.cells.get(position).copied().ok_or_else(|| {
            MinesError::InvalidMove(format!(
                "position {position} is outside the board (0..{BOARD_SIZE})"
            ))
        })?;
        if cell != CellState::Hidden {
            return Err(MinesError::InvalidMove(format!(
                "cell {position} is already revealed"
            )));
        }

        if self.mine_positions.contains(&(position as u8)) {
            self.cells[position] = CellState::Mine;
            self.status = RoundStatus::Lost;
            self.finished_at = Some(Utc::now());
            return Ok(CellState::Mine);
        }

        let revealed = self.revealed_safe_count as usize + 1;
        let multiplier = fair_multiplier(
            revealed,
            self.mine_count as usize,
            BOARD_SIZE,
            self.house_edge,
        )?;
        self.cells[position] = CellState::Safe;
        self.revealed_safe_count += 1;
        self.multiplier = multiplier;
        Ok(CellState::Safe)
    }

    /// Lock in the current multiplier. Returns the payout owed.
    pub fn cash_out(&mut self) -> Result<Decimal, MinesError> {
        self.ensure_active()?;
        if self.revealed_safe_count == 0 {
            return Err(MinesError::NothingToCashOut);
        }

        let multiplier = fair_multiplier(
            self.revealed_safe_count as usize,
            self.mine_count as usize,
            BOARD_SIZE,
            self.house_edge,
        )?;
        let payout = payout_for(self.bet_amount, multiplier)?;

        self.multiplier = multiplier;
        self.payout = payout;
        self.payout_pending = true;
        self.status = RoundStatus::WonOut;
        self.finished_at = Some(Utc::now());
        Ok(payout)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Cashed out, but the ledger credit is not yet confirmed.
    pub fn owes_payout(&self) -> bool {
        self.status == RoundStatus::WonOut && self.payout_pending
    }

    /// Record that the payout reached the ledger.
    pub fn mark_settled(&mut self) {
        self.payout_pending = false;
    }

    /// Ledger reference of the bet debit.
    pub fn bet_reference(&self) -> String {
        format!("bet:{}", self.id)
    }

    /// Ledger reference of the refund for a round that was never stored.
    pub fn refund_reference(&self) -> String {
        format!("refund:{}", self.id)
    }

    /// Ledger reference of the payout. Scoped to the revision that
    /// committed the cash-out, so a reopened round cashes out afresh.
    pub fn payout_reference(&self) -> String {
        format!("payout:{}:{}", self.id, self.revision)
    }

    /// Number of cells currently in the `safe` state.
    pub fn safe_cells(&self) -> usize {
        self.cells.iter().filter(|&&c| c == CellState::Safe).count()
    }

    /// Client projection. Mines stay hidden while the round is active.
    pub fn view(&self) -> RoundView {
        RoundView {
            game_id: self.id,
            bet_amount: self.bet_amount,
            mine_count: self.mine_count,
            grid: self.cells.clone(),
            revealed_count: self.revealed_safe_count,
            status: self.status,
            game_over: self.is_terminal(),
            multiplier: self.multiplier,
            win_amount: self.payout,
            payout_pending: self.payout_pending,
            mines: self
                .is_terminal()
                .then(|| self.mine_positions.iter().copied().collect()),
            created_at: self.created_at,
        }
    }

    fn ensure_active(&self) -> Result<(), MinesError> {
        if self.is_terminal() {
            return Err(MinesError::InvalidMove(format!(
                "round {} is already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
