//! Persistence layer.
//!
//! Defines the boundary contracts the game core depends on:
//! - `Ledger`: journaled debits and credits on account balances
//! - `RoundStore`: round records with compare-and-swap updates
//! - `Accounts`: registration, login, and session tokens
//!
//! Two backends implement all three: an in-process `MemoryStore` and a
//! SQLite-backed `SqliteStore`.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::{StorageBackend, StorageConfig};
use crate::types::{Account, LedgerEntry, MinesError, OwnerId, Round, RoundId};

use memory::MemoryStore;
use sqlite::SqliteStore;

/// Balance bookkeeping for bettors.
///
/// Every movement carries a caller-chosen reference and is journaled
/// under it. A reference already in the journal is not applied again;
/// the call returns the current balance instead.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Remove `amount` from the owner's balance. Returns the new balance.
    /// Fails with `InsufficientFunds` and changes nothing if the balance is short.
    async fn debit(
        &self,
        owner: OwnerId,
        amount: Decimal,
        reference: &str,
    ) -> Result<Decimal, MinesError>;

    /// Add `amount` to the owner's balance. Returns the new balance.
    async fn credit(
        &self,
        owner: OwnerId,
        amount: Decimal,
        reference: &str,
    ) -> Result<Decimal, MinesError>;

    async fn balance(&self, owner: OwnerId) -> Result<Decimal, MinesError>;

    /// The journaled movement for `reference`, if it was applied.
    async fn entry(&self, reference: &str) -> Result<Option<LedgerEntry>, MinesError>;
}

/// Round persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoundStore: Send + Sync {
    async fn create(&self, round: &Round) -> Result<RoundId, MinesError>;

    async fn get(&self, id: RoundId) -> Result<Round, MinesError>;

    /// Replace the stored round only if its revision is still
    /// `expected_revision`. Otherwise fails with `Conflict`.
    async fn update(&self, round: &Round, expected_revision: u64) -> Result<(), MinesError>;

    /// Most recent rounds for an owner, newest first.
    async fn list_by_owner(&self, owner: OwnerId, limit: usize) -> Result<Vec<Round>, MinesError>;
}

/// Account directory and session tokens.
#[async_trait]
pub trait Accounts: Send + Sync {
    async fn register(
        &self,
        username: &str,
        password_digest: &str,
        initial_balance: Decimal,
    ) -> Result<Account, MinesError>;

    /// Look up an account by credentials. `None` when they don't match.
    async fn authenticate(
        &self,
        username: &str,
        password_digest: &str,
    ) -> Result<Option<Account>, MinesError>;

    async fn issue_session(&self, owner: OwnerId) -> Result<String, MinesError>;

    async fn resolve_session(&self, token: &str) -> Result<Option<OwnerId>, MinesError>;

    async fn account(&self, owner: OwnerId) -> Result<Account, MinesError>;
}

/// Handles to one backend through each of its contracts.
#[derive(Clone)]
pub struct Storage {
    pub ledger: Arc<dyn Ledger>,
    pub rounds: Arc<dyn RoundStore>,
    pub accounts: Arc<dyn Accounts>,
}

impl Storage {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: Ledger + RoundStore + Accounts + 'static,
    {
        Self {
            ledger: backend.clone(),
            rounds: backend.clone(),
            accounts: backend,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }
}

/// Open the backend selected in configuration.
pub async fn open(cfg: &StorageConfig) -> Result<Storage, MinesError> {
    match cfg.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage; state is lost on shutdown");
            Ok(Storage::in_memory())
        }
        StorageBackend::Sqlite => {
            let store = SqliteStore::connect(&cfg.database_url, cfg.max_connections).await?;
            info!(url = %cfg.database_url, "SQLite storage ready");
            Ok(Storage::from_backend(Arc::new(store)))
        }
    }
}

/// Hex SHA-256 of `username:password`. The stored credential.
pub fn password_digest(username: &str, password: &SecretString) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(password.expose_secret().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fresh opaque session token.
pub fn new_session_token() -> String {
    format!("mt_{}", Uuid::new_v4().simple())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
