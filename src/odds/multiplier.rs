//! Fair multiplier and payout computation.
//!
//! The multiplier is the reciprocal of the hypergeometric probability of
//! revealing `revealed_safe` cells in a row without hitting a mine,
//! scaled down by the house edge:
//!
//!   probability = Π_{i=0}^{k-1} (board - mines - i) / (board - i)
//!   multiplier  = house_edge / probability

use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;

use crate::types::{MinesError, BOARD_SIZE, DEFAULT_HOUSE_EDGE};

/// Decimal places kept on payouts. Extra precision is truncated.
pub const MONEY_SCALE: u32 = 8;

/// Probability of `revealed_safe` consecutive safe reveals.
pub fn safe_reveal_probability(
    revealed_safe: usize,
    mine_count: usize,
    board_size: usize,
) -> Result<f64, MinesError> {
    if mine_count > board_size {
        return Err(MinesError::InvalidParameters(format!(
            "{mine_count} mines do not fit on a board of {board_size}"
        )));
    }
    let safe_cells = board_size - mine_count;
    if revealed_safe > safe_cells {
        return Err(MinesError::InvalidParameters(format!(
            "cannot reveal {revealed_safe} safe cells when only {safe_cells} exist"
        )));
    }

    let probability = (0..revealed_safe).fold(1.0_f64, |p, i| {
        p * (safe_cells - i) as f64 / (board_size - i) as f64
    });
    Ok(probability)
}

/// Payout ratio after `revealed_safe` safe reveals, net of the house edge.
///
/// Equals `house_edge` at zero reveals and grows strictly with each
/// further safe reveal when at least one mine is on the board.
pub fn fair_multiplier(
    revealed_safe: usize,
    mine_count: usize,
    board_size: usize,
    house_edge: f64,
) -> Result<f64, MinesError> {
    if !(house_edge.is_finite() && house_edge > 0.0 && house_edge <= 1.0) {
        return Err(MinesError::InvalidParameters(format!(
            "house edge must be in (0, 1], got {house_edge}"
        )));
    }
    let probability = safe_reveal_probability(revealed_safe, mine_count, board_size)?;
    Ok(house_edge / probability)
}

/// `fair_multiplier` on the standard 25-cell board with the default edge.
pub fn standard_multiplier(revealed_safe: usize, mine_count: usize) -> Result<f64, MinesError> {
    fair_multiplier(revealed_safe, mine_count, BOARD_SIZE, DEFAULT_HOUSE_EDGE)
}

/// `bet × multiplier`, truncated to `MONEY_SCALE` places.
pub fn payout_for(bet_amount: Decimal, multiplier: f64) -> Result<Decimal, MinesError> {
    let factor = Decimal::from_f64(multiplier)
        .filter(|m| m.is_sign_positive() && !m.is_zero())
        .ok_or_else(|| {
            MinesError::InvalidParameters(format!(
                "multiplier {multiplier} is not a positive number"
            ))
        })?;
    let raw = bet_amount
        .checked_mul(factor)
        .ok_or_else(|| MinesError::InvalidParameters("payout overflows".to_string()))?;
    Ok(raw.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::ToZero))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_reveals_is_house_edge() {
        for mines in 1..=24 {
            let m = standard_multiplier(0, mines).unwrap();
            assert!((m - 0.98).abs() < 1e-12, "mines={mines} m={m}");
        }
    }

    #[test]
    fn test_strictly_increasing_in_reveals() {
        for mines in 1..=24usize {
            let mut prev = standard_multiplier(0, mines).unwrap();
            for k in 1..=(BOARD_SIZE - mines) {
                let next = standard_multiplier(k, mines).unwrap();
                assert!(next > prev, "mines={mines} k={k}: {next} <= {prev}");
                prev = next;
            }
        }
    }

    #[test]
    fn test_three_mines_two_reveals() {
        // 0.98 / ((22/25) * (21/24)) = 0.98 / 0.77
        let m = standard_multiplier(2, 3).unwrap();
        assert!((m - 0.98 / 0.77).abs() < 1e-12);
        assert!((m - 1.272_727_27).abs() < 1e-6);
    }

    #[test]
    fn test_single_mine_first_reveal() {
        // 0.98 / (24/25)
        let m = standard_multiplier(1, 1).unwrap();
        assert!((m - 1.020_833_333).abs() < 1e-6);
    }

    #[test]
    fn test_matches_remaining_over_safe_form() {
        // The alternative form: edge × Π (board - i) / (board - mines - i).
        for mines in 1..=24usize {
            for k in 0..=(BOARD_SIZE - mines) {
                let alt = (0..k).fold(DEFAULT_HOUSE_EDGE, |acc, i| {
                    acc * (BOARD_SIZE - i) as f64 / (BOARD_SIZE - mines - i) as f64
                });
                let canonical = standard_multiplier(k, mines).unwrap();
                assert!(
                    ((alt - canonical) / canonical).abs() < 1e-12,
                    "mines={mines} k={k} alt={alt} canonical={canonical}"
                );
            }
        }
    }

    #[test]
    fn test_probability_stays_positive_at_limit() {
        for mines in 1..=24usize {
            let p = safe_reveal_probability(BOARD_SIZE - mines, mines, BOARD_SIZE).unwrap();
            assert!(p > 0.0);
        }
        // 24 mines, 1 reveal: 1/25
        let m = standard_multiplier(1, 24).unwrap();
        assert!((m - 24.5).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_out_of_range_inputs() {
        assert!(safe_reveal_probability(23, 3, BOARD_SIZE).is_err());
        assert!(safe_reveal_probability(0, 26, BOARD_SIZE).is_err());
        assert!(fair_multiplier(1, 3, BOARD_SIZE, 0.0).is_err());
        assert!(fair_multiplier(1, 3, BOARD_SIZE, 1.5).is_err());
        assert!(fair_multiplier(1, 3, BOARD_SIZE, f64::NAN).is_err());
    }

    #[test]
    fn test_custom_board_and_edge() {
        // 9-cell board, 1 mine, 1 reveal, no edge: 9/8
        let m = fair_multiplier(1, 1, 9, 1.0).unwrap();
        assert!((m - 1.125).abs() < 1e-12);
    }

    #[test]
    fn test_payout_for_bet_of_ten() {
        let multiplier = standard_multiplier(2, 3).unwrap();
        let payout = payout_for(dec!(10), multiplier).unwrap();
        assert!(payout.scale() <= MONEY_SCALE);
        let as_f64 = payout.to_f64().unwrap();
        assert!((as_f64 - 10.0 * multiplier).abs() < 1e-7);
        // Truncation never pays more than the exact product.
        assert!(as_f64 <= 10.0 * multiplier + 1e-12);
    }

    #[test]
    fn test_payout_rejects_bad_multiplier() {
        assert!(payout_for(dec!(10), f64::INFINITY).is_err());
        assert!(payout_for(dec!(10), -1.0).is_err());
        assert!(payout_for(dec!(10), 0.0).is_err());
    }
}
