//! Game service: runs round transitions against the ledger and store.
//!
//! Every transition reads the round, applies the state-machine method to
//! a copy, and persists it with a compare-and-swap on `revision`. Of two
//! concurrent transitions on one round, only one can commit; the other
//! re-reads the round and fails with `InvalidMove`.
//!
//! Money moves are kept consistent with the round record. Ledger calls
//! carry a per-movement reference, so retrying one never moves money twice.
//! - start: debit, then create (retried). A round that cannot be stored
//!   gets its bet refunded; the debit stays journaled under the bet
//!   reference if the refund fails too.
//! - cashout: commit `won_out` with the payout marked pending, then credit.
//!   A confirmed credit clears the mark. A failed credit reopens the round;
//!   if the store refuses that as well, the round keeps owing its payout
//!   and the next cashout settles it.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::odds::MinePlacer;
use crate::storage::{Ledger, RoundStore};
use crate::types::{
    validate_mine_count, CellState, MinesError, OwnerId, Round, RoundId, RoundView,
    DEFAULT_HOUSE_EDGE,
};

/// Attempts for a ledger credit before giving up.
const CREDIT_ATTEMPTS: usize = 3;

/// Attempts for a round write that fails on the adapter.
const PERSIST_ATTEMPTS: usize = 3;

/// Upper bound on the history page size.
pub const MAX_HISTORY: usize = 100;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Table rules applied to new rounds.
#[derive(Debug, Clone)]
pub struct GameRules {
    /// Fraction of the fair payout returned to the player (0.98 = 2% edge).
    pub house_edge: f64,
    pub min_bet: Decimal,
    pub max_bet: Option<Decimal>,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            house_edge: DEFAULT_HOUSE_EDGE,
            min_bet: dec!(0.01),
            max_bet: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StartReceipt {
    pub round: RoundView,
    /// Balance after the bet was debited.
    pub balance: Decimal,
}

#[derive(Debug, Clone)]
pub struct RevealOutcome {
    pub cell: CellState,
    pub position: usize,
    pub multiplier: f64,
    pub revealed_safe_count: u8,
    pub round: RoundView,
}

#[derive(Debug, Clone)]
pub struct CashoutReceipt {
    pub payout: Decimal,
    /// Balance after the payout was credited.
    pub balance: Decimal,
    pub round: RoundView,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct GameService {
    ledger: Arc<dyn Ledger>,
    rounds: Arc<dyn RoundStore>,
    placer: Arc<dyn MinePlacer>,
    rules: GameRules,
}

impl GameService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        rounds: Arc<dyn RoundStore>,
        placer: Arc<dyn MinePlacer>,
        rules: GameRules,
    ) -> Self {
        Self {
            ledger,
            rounds,
            placer,
            rules,
        }
    }

    /// Debit the bet and open a new round.
    pub async fn start(
        &self,
        owner: OwnerId,
        bet_amount: Decimal,
        mine_count: u8,
    ) -> Result<StartReceipt, MinesError> {
        self.validate_bet(bet_amount)?;
        validate_mine_count(mine_count)?;

        // Everything that can fail without side effects happens before the debit.
        let mines = self.placer.place(mine_count)?;
        let round = Round::new(owner, bet_amount, mine_count, mines, self.rules.house_edge)?;

        let balance = self
            .ledger
            .debit(owner, bet_amount, &round.bet_reference())
            .await?;

        if let Err(e) = self.create_with_retry(&round).await {
            error!(
                %owner,
                round_id = %round.id,
                error = %e,
                "Round persistence failed, refunding bet"
            );
            return match self
                .credit_with_retry(owner, bet_amount, &round.refund_reference())
                .await
            {
                Ok(_) => Err(e),
                Err(refund_err) => {
                    error!(
                        %owner,
                        amount = %bet_amount,
                        reference = %round.bet_reference(),
                        error = %refund_err,
                        "Refund failed; bet stays journaled without a round"
                    );
                    Err(refund_err)
                }
            };
        }

        info!(
            %owner,
            round_id = %round.id,
            bet = %bet_amount,
            mines = mine_count,
            balance = %balance,
            "Round started"
        );
        Ok(StartReceipt {
            round: round.view(),
            balance,
        })
    }

    /// Reveal one cell of an owned, active round.
    pub async fn reveal(
        &self,
        owner: OwnerId,
        round_id: RoundId,
        position: i64,
    ) -> Result<RevealOutcome, MinesError> {
        let position = usize::try_from(position).map_err(|_| {
            MinesError::InvalidMove(format!("position {position} is outside the board"))
        })?;

        let current = self.owned_round(owner, round_id).await?;
        let mut next = current.clone();
        let cell = next.reveal(position)?;
        self.commit(&current, &mut next).await?;

        match cell {
            CellState::Mine => info!(%owner, %round_id, position, "Mine hit, round lost"),
            _ => debug!(
                %owner,
                %round_id,
                position,
                revealed = next.revealed_safe_count,
                multiplier = next.multiplier,
                "Safe reveal"
            ),
        }

        Ok(RevealOutcome {
            cell,
            position,
            multiplier: next.multiplier,
            revealed_safe_count: next.revealed_safe_count,
            round: next.view(),
        })
    }

    /// Lock in the current multiplier and credit the payout.
    ///
    /// On a round that was cashed out but never credited, this retries
    /// the credit instead.
    pub async fn cashout(
        &self,
        owner: OwnerId,
        round_id: RoundId,
    ) -> Result<CashoutReceipt, MinesError> {
        let current = self.owned_round(owner, round_id).await?;
        if current.owes_payout() {
            warn!(%owner, %round_id, payout = %current.payout, "Settling a pending payout");
            let balance = self
                .credit_with_retry(owner, current.payout, &current.payout_reference())
                .await?;
            return Ok(self.settle(current, balance).await);
        }

        let mut next = current.clone();
        let payout = next.cash_out()?;
        self.commit(&current, &mut next).await?;

        match self
            .credit_with_retry(owner, payout, &next.payout_reference())
            .await
        {
            Ok(balance) => Ok(self.settle(next, balance).await),
            Err(e) => {
                error!(%owner, %round_id, error = %e, "Payout credit failed, reopening round");
                let mut restored = current;
                restored.revision = next.revision + 1;
                if let Err(restore_err) = self.update_with_retry(&restored, next.revision).await {
                    error!(
                        %owner,
                        %round_id,
                        payout = %payout,
                        error = %restore_err,
                        "Round could not be reopened; payout stays pending"
                    );
                }
                Err(e)
            }
        }
    }

    /// Current state of an owned round.
    pub async fn get_state(
        &self,
        owner: OwnerId,
        round_id: RoundId,
    ) -> Result<RoundView, MinesError> {
        Ok(self.owned_round(owner, round_id).await?.view())
    }

    /// The owner's most recent rounds, newest first.
    pub async fn history(
        &self,
        owner: OwnerId,
        limit: usize,
    ) -> Result<Vec<RoundView>, MinesError> {
        let limit = limit.clamp(1, MAX_HISTORY);
        let rounds = self.rounds.list_by_owner(owner, limit).await?;
        Ok(rounds.iter().map(Round::view).collect())
    }

    // -- internals -------------------------------------------------------

    fn validate_bet(&self, bet_amount: Decimal) -> Result<(), MinesError> {
        if bet_amount < self.rules.min_bet || bet_amount <= Decimal::ZERO {
            return Err(MinesError::InvalidParameters(format!(
                "bet must be at least {}, got {bet_amount}",
                self.rules.min_bet
            )));
        }
        if let Some(max) = self.rules.max_bet {
            if bet_amount > max {
                return Err(MinesError::InvalidParameters(format!(
                    "bet must be at most {max}, got {bet_amount}"
                )));
            }
        }
        Ok(())
    }

    /// Fetch a round, hiding other owners' rounds as not found.
    async fn owned_round(&self, owner: OwnerId, round_id: RoundId) -> Result<Round, MinesError> {
        let round = self.rounds.get(round_id).await?;
        if round.owner_id != owner {
            warn!(%owner, %round_id, "Access to another owner's round refused");
            return Err(MinesError::NotFound(format!("round {round_id}")));
        }
        Ok(round)
    }

    /// Persist `next` over `current`. A lost race becomes `InvalidMove`.
    async fn commit(&self, current: &Round, next: &mut Round) -> Result<(), MinesError> {
        next.revision = current.revision + 1;
        match self.rounds.update(next, current.revision).await {
            Err(MinesError::Conflict { round_id, .. }) => {
                let latest = self.rounds.get(round_id).await?;
                warn!(
                    %round_id,
                    status = %latest.status,
                    revision = latest.revision,
                    "Concurrent transition lost the race"
                );
                Err(MinesError::InvalidMove(format!(
                    "round {round_id} changed concurrently; it is now {} with {} safe reveals",
                    latest.status, latest.revealed_safe_count
                )))
            }
            other => other,
        }
    }

    /// Clear the pending mark of a credited round. A round that cannot be
    /// updated stays pending; settling it again replays the same ledger
    /// reference, which moves no money.
    async fn settle(&self, credited: Round, balance: Decimal) -> CashoutReceipt {
        let mut settled = credited.clone();
        settled.mark_settled();
        settled.revision = credited.revision + 1;

        let round = match self.update_with_retry(&settled, credited.revision).await {
            Ok(()) => settled,
            Err(e) => {
                warn!(
                    round_id = %credited.id,
                    error = %e,
                    "Payout credited but the round is still marked pending"
                );
                credited
            }
        };
        info!(
            owner = %round.owner_id,
            round_id = %round.id,
            payout = %round.payout,
            multiplier = round.multiplier,
            balance = %balance,
            "Round cashed out"
        );
        CashoutReceipt {
            payout: round.payout,
            balance,
            round: round.view(),
        }
    }

    async fn create_with_retry(&self, round: &Round) -> Result<(), MinesError> {
        let mut last_err = None;
        for attempt in 1..=PERSIST_ATTEMPTS {
            match self.rounds.create(round).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(round_id = %round.id, attempt, error = %e, "Round create failed");
                    last_err = Some(e);
                }
            }
        }
        // An attempt may have landed even though it reported failure.
        if matches!(self.rounds.get(round.id).await, Ok(ref stored) if stored == round) {
            return Ok(());
        }
        Err(last_err.unwrap_or_else(|| MinesError::adapter("rounds", "create not attempted")))
    }

    /// Compare-and-swap write, retried on adapter failures only.
    async fn update_with_retry(&self, round: &Round, expected: u64) -> Result<(), MinesError> {
        let mut last_err = None;
        for attempt in 1..=PERSIST_ATTEMPTS {
            match self.rounds.update(round, expected).await {
                Ok(()) => return Ok(()),
                Err(e @ MinesError::AdapterFailure { .. }) => {
                    warn!(round_id = %round.id, attempt, error = %e, "Round update failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| MinesError::adapter("rounds", "update not attempted")))
    }

    async fn credit_with_retry(
        &self,
        owner: OwnerId,
        amount: Decimal,
        reference: &str,
    ) -> Result<Decimal, MinesError> {
        let mut last_err = None;
        for attempt in 1..=CREDIT_ATTEMPTS {
            match self.ledger.credit(owner, amount, reference).await {
                Ok(balance) => return Ok(balance),
                Err(e) => {
                    warn!(
                        %owner,
                        amount = %amount,
                        reference,
                        attempt,
                        error = %e,
                        "Ledger credit failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MinesError::adapter("ledger", "credit not attempted")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
