//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The database URL can be overridden at runtime through the
//! `MINES_DATABASE_URL` environment variable.

use anyhow::{bail, Context, Result};
use rust_decimal::prelude::*;
use serde::Deserialize;
use std::fs;

use crate::game::GameRules;
use crate::types::DEFAULT_HOUSE_EDGE;

/// Environment variable that overrides `storage.database_url`.
pub const DATABASE_URL_ENV: &str = "MINES_DATABASE_URL";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub game: GameConfig,
    pub accounts: AccountsConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GameConfig {
    #[serde(default = "default_house_edge")]
    pub house_edge: f64,
    pub min_bet: f64,
    /// No upper limit when absent.
    #[serde(default)]
    pub max_bet: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccountsConfig {
    /// Balance granted to newly registered accounts.
    pub initial_balance: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_house_edge() -> f64 {
    DEFAULT_HOUSE_EDGE
}

fn default_max_connections() -> u32 {
    5
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = Self::resolve_env(DATABASE_URL_ENV) {
            self.storage.database_url = url;
        }
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Reject values the game engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let edge = self.game.house_edge;
        if !(edge.is_finite() && edge > 0.0 && edge <= 1.0) {
            bail!("game.house_edge must be in (0, 1], got {edge}");
        }
        if !(self.game.min_bet > 0.0) {
            bail!("game.min_bet must be positive, got {}", self.game.min_bet);
        }
        if let Some(max) = self.game.max_bet {
            if max < self.game.min_bet {
                bail!("game.max_bet ({max}) is below game.min_bet ({})", self.game.min_bet);
            }
        }
        if !(self.accounts.initial_balance >= 0.0) {
            bail!("accounts.initial_balance must not be negative");
        }
        if self.storage.backend == StorageBackend::Sqlite && self.storage.database_url.is_empty() {
            bail!("storage.database_url is required for the sqlite backend");
        }
        Ok(())
    }

    /// Game rules in engine units.
    pub fn rules(&self) -> Result<GameRules> {
        Ok(GameRules {
            house_edge: self.game.house_edge,
            min_bet: to_decimal("game.min_bet", self.game.min_bet)?,
            max_bet: self
                .game
                .max_bet
                .map(|m| to_decimal("game.max_bet", m))
                .transpose()?,
        })
    }

    pub fn initial_balance(&self) -> Result<Decimal> {
        to_decimal("accounts.initial_balance", self.accounts.initial_balance)
    }
}

fn to_decimal(key: &str, value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .with_context(|| format!("{key} is not a representable amount: {value}"))
}
