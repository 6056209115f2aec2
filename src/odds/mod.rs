//! Odds engine.
//!
//! Pure functions for mine placement and fair-multiplier computation,
//! plus the `MinePlacer` seam the game service draws placements through.

pub mod mines;
pub mod multiplier;

pub use mines::{generate_mines, FixedPlacer, MinePlacer, RandomPlacer};
pub use multiplier::{
    fair_multiplier, payout_for, safe_reveal_probability, standard_multiplier, MONEY_SCALE,
};
