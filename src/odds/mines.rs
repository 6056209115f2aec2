//! Unbiased mine placement.
//!
//! `generate_mines` runs a partial Fisher-Yates shuffle. Each swap index
//! comes from `Rng::gen_range`, which uses rejection sampling, so every
//! subset of the requested size is equally likely.

use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::BTreeSet;
use std::sync::Mutex;
use tracing::debug;

use crate::types::{validate_mine_count, MinesError, BOARD_SIZE};

/// Largest board whose positions fit in a `u8`.
const MAX_BOARD_SIZE: usize = u8::MAX as usize + 1;

/// Pick `mine_count` distinct positions from `0..board_size`.
pub fn generate_mines<R: Rng + ?Sized>(
    rng: &mut R,
    mine_count: usize,
    board_size: usize,
) -> Result<BTreeSet<u8>, MinesError> {
    if board_size > MAX_BOARD_SIZE {
        return Err(MinesError::InvalidParameters(format!(
            "board size {board_size} exceeds {MAX_BOARD_SIZE}"
        )));
    }
    if mine_count > board_size {
        return Err(MinesError::InvalidParameters(format!(
            "cannot place {mine_count} mines on a board of {board_size}"
        )));
    }

    let mut positions: Vec<u8> = (0..board_size).map(|p| p as u8).collect();
    for i in 0..mine_count {
        let j = rng.gen_range(i..board_size);
        positions.swap(i, j);
    }

    Ok(positions[..mine_count].iter().copied().collect())
}

// ---------------------------------------------------------------------------
// Placer seam
// ---------------------------------------------------------------------------

/// Source of mine layouts for new rounds.
pub trait MinePlacer: Send + Sync {
    /// Choose the mine positions for a fresh round on the standard board.
    fn place(&self, mine_count: u8) -> Result<BTreeSet<u8>, MinesError>;
}

/// Production placer: a ChaCha20 stream seeded from OS entropy.
pub struct RandomPlacer {
    rng: Mutex<ChaCha20Rng>,
}

impl RandomPlacer {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::from_entropy()),
        }
    }

    /// Reproducible placer for simulations.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }
}

impl MinePlacer for RandomPlacer {
    fn place(&self, mine_count: u8) -> Result<BTreeSet<u8>, MinesError> {
        validate_mine_count(mine_count)?;
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| MinesError::adapter("rng", "mine placer lock poisoned"))?;
        let mines = generate_mines(&mut *rng, mine_count as usize, BOARD_SIZE)?;
        debug!(mine_count, "Mines placed");
        Ok(mines)
    }
}

/// Always returns the same layout. Used to script rounds in tests and replays.
#[derive(Debug, Clone)]
pub struct FixedPlacer {
    mines: BTreeSet<u8>,
}

impl FixedPlacer {
    pub fn new(mines: impl IntoIterator<Item = u8>) -> Self {
        Self {
            mines: mines.into_iter().collect(),
        }
    }
}

impl MinePlacer for FixedPlacer {
    fn place(&self, mine_count: u8) -> Result<BTreeSet<u8>, MinesError> {
        if self.mines.len() != mine_count as usize {
            return Err(MinesError::InvalidParameters(format!(
                "fixed layout has {} mines, round asked for {mine_count}",
                self.mines.len()
            )));
        }
        Ok(self.mines.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_every_mine_count_yields_distinct_in_range_positions() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for mine_count in 1..=24usize {
            for _ in 0..50 {
                let mines = generate_mines(&mut rng, mine_count, BOARD_SIZE).unwrap();
                assert_eq!(mines.len(), mine_count);
                assert!(mines.iter().all(|&p| (p as usize) < BOARD_SIZE));
            }
        }
    }

    #[test]
    fn test_position_frequency_is_uniform() {
        // Each cell should be mined in ~mine_count/25 of trials.
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        let trials = 40_000;
        for mine_count in [1usize, 3, 12, 24] {
            let mut hits = [0u32; BOARD_SIZE];
            for _ in 0..trials {
                for p in generate_mines(&mut rng, mine_count, BOARD_SIZE).unwrap() {
                    hits[p as usize] += 1;
                }
            }
            let expected = mine_count as f64 / BOARD_SIZE as f64;
            for (pos, &h) in hits.iter().enumerate() {
                let freq = h as f64 / trials as f64;
                assert!(
                    (freq - expected).abs() < 0.015,
                    "mine_count={mine_count} pos={pos} freq={freq:.4} expected={expected:.4}"
                );
            }
        }
    }

    #[test]
    fn test_pair_frequency_is_uniform() {
        // Unbiased subsets: with 2 mines each of the 300 pairs is equally likely.
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let trials = 150_000;
        let mut counts = std::collections::HashMap::new();
        for _ in 0..trials {
            let mines = generate_mines(&mut rng, 2, BOARD_SIZE).unwrap();
            *counts.entry(mines).or_insert(0u32) += 1;
        }
        assert_eq!(counts.len(), 300);
        let expected = trials as f64 / 300.0;
        for &c in counts.values() {
            assert!((c as f64 - expected).abs() < expected * 0.25);
        }
    }

    #[test]
    fn test_deterministic_rng_is_reproducible() {
        let a = generate_mines(&mut StepRng::new(0, 1), 5, BOARD_SIZE).unwrap();
        let b = generate_mines(&mut StepRng::new(0, 1), 5, BOARD_SIZE).unwrap();
        assert_eq!(a, b);

        let mut r1 = ChaCha8Rng::seed_from_u64(1);
        let mut r2 = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            generate_mines(&mut r1, 10, BOARD_SIZE).unwrap(),
            generate_mines(&mut r2, 10, BOARD_SIZE).unwrap()
        );
    }

    #[test]
    fn test_edge_counts() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(generate_mines(&mut rng, 0, BOARD_SIZE).unwrap().is_empty());
        assert_eq!(generate_mines(&mut rng, 25, BOARD_SIZE).unwrap().len(), 25);
        assert!(matches!(
            generate_mines(&mut rng, 26, BOARD_SIZE),
            Err(MinesError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_random_placer_rejects_bad_counts() {
        let placer = RandomPlacer::seeded(11);
        assert_eq!(placer.place(3).unwrap().len(), 3);
        assert!(placer.place(0).is_err());
        assert!(placer.place(25).is_err());
    }

    #[test]
    fn test_fixed_placer() {
        let placer = FixedPlacer::new([4, 9, 20]);
        assert_eq!(placer.place(3).unwrap(), BTreeSet::from([4, 9, 20]));
        assert!(placer.place(2).is_err());
    }
}
