//! MINES: fair-odds Mines wagering service.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens storage, and serves the HTTP API until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use mines::api::{self, ApiState};
use mines::config::AppConfig;
use mines::game::GameService;
use mines::odds::RandomPlacer;
use mines::storage;

const BANNER: &str = r#"
 __  __ ___ _   _ _____ ____
|  \/  |_ _| \ | | ____/ ___|
| |\/| || ||  \| |  _| \___ \
| |  | || || |\  | |___ ___) |
|_|  |_|___|_| \_|_____|____/

  Fair-odds 5x5 Mines
"#;

/// Environment variable naming the config file.
const CONFIG_PATH_ENV: &str = "MINES_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".into());
    let mut cfg = AppConfig::load(&config_path)?;
    cfg.apply_env();
    cfg.validate()?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        house_edge = cfg.game.house_edge,
        min_bet = cfg.game.min_bet,
        max_bet = ?cfg.game.max_bet,
        backend = ?cfg.storage.backend,
        "MINES starting up"
    );

    let storage = storage::open(&cfg.storage)
        .await
        .context("Failed to open storage")?;

    let game = GameService::new(
        storage.ledger.clone(),
        storage.rounds.clone(),
        Arc::new(RandomPlacer::from_entropy()),
        cfg.rules()?,
    );

    let state = Arc::new(ApiState {
        game,
        accounts: storage.accounts.clone(),
        initial_balance: cfg.initial_balance()?,
    });

    let addr = format!("{}:{}", cfg.server.bind, cfg.server.port);
    api::serve(state, &addr).await?;

    info!("MINES shut down cleanly.");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mines=info"));

    let json_logging = std::env::var("MINES_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
