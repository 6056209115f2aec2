//! Full rounds through `GameService` on both storage backends.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use mines::game::{GameRules, GameService};
use mines::odds::{payout_for, standard_multiplier, FixedPlacer, MinePlacer};
use mines::storage::memory::MemoryStore;
use mines::storage::sqlite::SqliteStore;
use mines::storage::{password_digest, Storage};
use mines::types::{CellState, MinesError, OwnerId, RoundStatus};

use crate::flaky_ledger::FlakyLedger;

const MINES: [u8; 3] = [0, 1, 2];

async fn sqlite_storage() -> Storage {
    Storage::from_backend(Arc::new(SqliteStore::in_memory().await.unwrap()))
}

fn memory_storage() -> Storage {
    Storage::from_backend(Arc::new(MemoryStore::new()))
}

async fn player(storage: &Storage, balance: Decimal) -> OwnerId {
    let secret = secrecy::SecretString::new("pw".to_string());
    let digest = password_digest("alice", &secret);
    storage.accounts.register("alice", &digest, balance).await.unwrap().id
}

fn service(storage: &Storage, placer: impl MinePlacer + 'static) -> GameService {
    GameService::new(
        storage.ledger.clone(),
        storage.rounds.clone(),
        Arc::new(placer),
        GameRules::default(),
    )
}

async fn winning_round(storage: Storage) {
    let owner = player(&storage, dec!(1000)).await;
    let game = service(&storage, FixedPlacer::new(MINES));

    let started = game.start(owner, dec!(10), 3).await.unwrap();
    assert_eq!(started.balance, dec!(990));
    let round_id = started.round.game_id;

    for pos in [5, 6, 7] {
        let outcome = game.reveal(owner, round_id, pos).await.unwrap();
        assert_eq!(outcome.cell, CellState::Safe);
    }

    let expected = payout_for(dec!(10), standard_multiplier(3, 3).unwrap()).unwrap();
    let receipt = game.cashout(owner, round_id).await.unwrap();
    assert_eq!(receipt.payout, expected);
    assert_eq!(receipt.balance, dec!(990) + expected);
    assert_eq!(storage.ledger.balance(owner).await.unwrap(), dec!(990) + expected);

    let view = game.get_state(owner, round_id).await.unwrap();
    assert_eq!(view.status, RoundStatus::WonOut);
    assert_eq!(view.revealed_count, 3);
    assert_eq!(view.mines, Some(MINES.to_vec()));
    assert!(matches!(
        game.cashout(owner, round_id).await,
        Err(MinesError::InvalidMove(_))
    ));
}

async fn losing_round(storage: Storage) {
    let owner = player(&storage, dec!(100)).await;
    let game = service(&storage, FixedPlacer::new(MINES));

    let round_id = game.start(owner, dec!(25), 3).await.unwrap().round.game_id;
    game.reveal(owner, round_id, 20).await.unwrap();
    let hit = game.reveal(owner, round_id, 2).await.unwrap();
    assert_eq!(hit.cell, CellState::Mine);
    assert!(hit.round.game_over);
    assert_eq!(hit.round.win_amount, Decimal::ZERO);

    assert!(matches!(
        game.reveal(owner, round_id, 21).await,
        Err(MinesError::InvalidMove(_))
    ));
    assert!(matches!(
        game.cashout(owner, round_id).await,
        Err(MinesError::InvalidMove(_))
    ));
    assert_eq!(storage.ledger.balance(owner).await.unwrap(), dec!(75));
}

#[tokio::test]
async fn test_winning_round_memory() {
    winning_round(memory_storage()).await;
}

#[tokio::test]
async fn test_winning_round_sqlite() {
    winning_round(sqlite_storage().await).await;
}

#[tokio::test]
async fn test_losing_round_memory() {
    losing_round(memory_storage()).await;
}

#[tokio::test]
async fn test_losing_round_sqlite() {
    losing_round(sqlite_storage().await).await;
}

#[tokio::test]
async fn test_insufficient_funds_sqlite() {
    let storage = sqlite_storage().await;
    let owner = player(&storage, dec!(5)).await;
    let game = service(&storage, FixedPlacer::new(MINES));

    let err = game.start(owner, dec!(10), 3).await.unwrap_err();
    assert_eq!(
        err,
        MinesError::InsufficientFunds {
            needed: dec!(10),
            available: dec!(5)
        }
    );
    assert!(game.history(owner, 10).await.unwrap().is_empty());
    assert_eq!(storage.ledger.balance(owner).await.unwrap(), dec!(5));
}

#[tokio::test]
async fn test_wallet_outage_reopens_round_until_credit_succeeds() {
    let storage = sqlite_storage().await;
    let owner = player(&storage, dec!(100)).await;
    let flaky = Arc::new(FlakyLedger::new(storage.ledger.clone()));
    let game = GameService::new(
        flaky.clone(),
        storage.rounds.clone(),
        Arc::new(FixedPlacer::new(MINES)),
        GameRules::default(),
    );

    let round_id = game.start(owner, dec!(10), 3).await.unwrap().round.game_id;
    game.reveal(owner, round_id, 12).await.unwrap();

    flaky.set_failing(true);
    let err = game.cashout(owner, round_id).await.unwrap_err();
    assert!(matches!(err, MinesError::AdapterFailure { .. }));
    assert_eq!(flaky.credit_calls(), 3);

    let view = game.get_state(owner, round_id).await.unwrap();
    assert_eq!(view.status, RoundStatus::Active);
    assert_eq!(view.revealed_count, 1);
    assert_eq!(storage.ledger.balance(owner).await.unwrap(), dec!(90));

    flaky.set_failing(false);
    let receipt = game.cashout(owner, round_id).await.unwrap();
    assert_eq!(receipt.balance, dec!(90) + receipt.payout);
    assert_eq!(receipt.round.status, RoundStatus::WonOut);
    assert!(!receipt.round.payout_pending);
    assert_eq!(flaky.credit_calls(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_mine_and_cashout_sqlite() {
    for _ in 0..20 {
        let storage = sqlite_storage().await;
        let owner = player(&storage, dec!(100)).await;
        let game = service(&storage, FixedPlacer::new(MINES));
        let round_id = game.start(owner, dec!(10), 3).await.unwrap().round.game_id;
        game.reveal(owner, round_id, 9).await.unwrap();

        let (g1, g2) = (game.clone(), game.clone());
        let mine = tokio::spawn(async move { g1.reveal(owner, round_id, 0).await });
        let cash = tokio::spawn(async move { g2.cashout(owner, round_id).await });
        let mine = mine.await.unwrap();
        let cash = cash.await.unwrap();

        assert!(mine.is_ok() ^ cash.is_ok());
        let view = game.get_state(owner, round_id).await.unwrap();
        let balance = storage.ledger.balance(owner).await.unwrap();
        match cash {
            Ok(receipt) => {
                assert_eq!(view.status, RoundStatus::WonOut);
                assert_eq!(balance, dec!(90) + receipt.payout);
            }
            Err(e) => {
                assert!(matches!(e, MinesError::InvalidMove(_)));
                assert_eq!(view.status, RoundStatus::Lost);
                assert_eq!(balance, dec!(90));
            }
        }
    }
}
