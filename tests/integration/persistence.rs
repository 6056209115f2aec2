//! Rounds and balances survive reopening a SQLite database file.

use rust_decimal_macros::dec;
use std::sync::Arc;

use mines::game::{GameRules, GameService};
use mines::odds::FixedPlacer;
use mines::storage::sqlite::SqliteStore;
use mines::storage::Storage;
use mines::types::RoundStatus;

struct TempDb {
    path: std::path::PathBuf,
}

impl TempDb {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("mines-test-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }

    fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut p = self.path.clone().into_os_string();
            p.push(suffix);
            let _ = std::fs::remove_file(p);
        }
    }
}

async fn open(db: &TempDb) -> (Storage, GameService) {
    let store = SqliteStore::connect(&db.url(), 2).await.unwrap();
    let storage = Storage::from_backend(Arc::new(store));
    let game = GameService::new(
        storage.ledger.clone(),
        storage.rounds.clone(),
        Arc::new(FixedPlacer::new([4, 8, 15, 16])),
        GameRules::default(),
    );
    (storage, game)
}

#[tokio::test]
async fn test_active_round_survives_reopen() {
    let db = TempDb::new();

    let (owner, round_id) = {
        let (storage, game) = open(&db).await;
        let owner = storage
            .accounts
            .register("bob", "digest", dec!(50))
            .await
            .unwrap()
            .id;
        let round_id = game.start(owner, dec!(5), 4).await.unwrap().round.game_id;
        game.reveal(owner, round_id, 0).await.unwrap();
        (owner, round_id)
    };

    let (storage, game) = open(&db).await;
    let view = game.get_state(owner, round_id).await.unwrap();
    assert_eq!(view.status, RoundStatus::Active);
    assert_eq!(view.revealed_count, 1);
    assert!(view.mines.is_none());
    assert_eq!(storage.ledger.balance(owner).await.unwrap(), dec!(45));

    // Mine layout is the one drawn at start.
    let hit = game.reveal(owner, round_id, 15).await.unwrap();
    assert!(hit.round.game_over);
    assert_eq!(hit.round.mines, Some(vec![4, 8, 15, 16]));

    let auth = storage.accounts.authenticate("bob", "digest").await.unwrap();
    assert_eq!(auth.map(|a| a.id), Some(owner));
}
