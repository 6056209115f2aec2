//! In-process backend.
//!
//! All state lives behind one `RwLock`, so every operation is a single
//! critical section and the compare-and-swap contracts hold trivially.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{new_session_token, Accounts, Ledger, RoundStore};
use crate::types::{Account, EntryKind, LedgerEntry, MinesError, OwnerId, Round, RoundId};

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<OwnerId, AccountRecord>,
    usernames: HashMap<String, OwnerId>,
    sessions: HashMap<String, OwnerId>,
    rounds: HashMap<RoundId, Round>,
    journal: HashMap<String, LedgerEntry>,
}

struct AccountRecord {
    account: Account,
    password_digest: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn record_mut(&mut self, owner: OwnerId) -> Result<&mut AccountRecord, MinesError> {
        self.accounts
            .get_mut(&owner)
            .ok_or_else(|| MinesError::NotFound(format!("account {owner}")))
    }
}

impl Inner {
    /// Apply one journaled movement. `apply` maps the old balance to the new.
    fn apply_entry<F>(
        &mut self,
        owner: OwnerId,
        kind: EntryKind,
        amount: Decimal,
        reference: &str,
        apply: F,
    ) -> Result<Decimal, MinesError>
    where
        F: FnOnce(Decimal) -> Result<Decimal, MinesError>,
    {
        let replayed = self.journal.contains_key(reference);
        let record = self.record_mut(owner)?;
        if replayed {
            debug!(%owner, reference, "Ledger reference already applied");
            return Ok(record.account.balance);
        }
        let next = apply(record.account.balance)?;
        record.account.balance = next;
        self.journal.insert(
            reference.to_string(),
            LedgerEntry {
                reference: reference.to_string(),
                owner_id: owner,
                kind,
                amount,
                created_at: Utc::now(),
            },
        );
        Ok(next)
    }
}

#[async_trait]
impl Ledger for MemoryStore {
    async fn debit(
        &self,
        owner: OwnerId,
        amount: Decimal,
        reference: &str,
    ) -> Result<Decimal, MinesError> {
        let mut inner = self.inner.write().await;
        inner.apply_entry(owner, EntryKind::Debit, amount, reference, |available| {
            if available < amount {
                Err(MinesError::InsufficientFunds {
                    needed: amount,
                    available,
                })
            } else {
                Ok(available - amount)
            }
        })
    }

    async fn credit(
        &self,
        owner: OwnerId,
        amount: Decimal,
        reference: &str,
    ) -> Result<Decimal, MinesError> {
        let mut inner = self.inner.write().await;
        inner.apply_entry(owner, EntryKind::Credit, amount, reference, |available| {
            Ok(available + amount)
        })
    }

    async fn balance(&self, owner: OwnerId) -> Result<Decimal, MinesError> {
        let inner = self.inner.read().await;
        inner
            .accounts
            .get(&owner)
            .map(|r| r.account.balance)
            .ok_or_else(|| MinesError::NotFound(format!("account {owner}")))
    }

    async fn entry(&self, reference: &str) -> Result<Option<LedgerEntry>, MinesError> {
        let inner = self.inner.read().await;
        Ok(inner.journal.get(reference).cloned())
    }
}

#[async_trait]
impl RoundStore for MemoryStore {
    async fn create(&self, round: &Round) -> Result<RoundId, MinesError> {
        let mut inner = self.inner.write().await;
        if inner.rounds.contains_key(&round.id) {
            return Err(MinesError::adapter(
                "memory",
                format!("round {} already exists", round.id),
            ));
        }
        inner.rounds.insert(round.id, round.clone());
        Ok(round.id)
    }

    async fn get(&self, id: RoundId) -> Result<Round, MinesError> {
        let inner = self.inner.read().await;
        inner
            .rounds
            .get(&id)
            .cloned()
            .ok_or_else(|| MinesError::NotFound(format!("round {id}")))
    }

    async fn update(&self, round: &Round, expected_revision: u64) -> Result<(), MinesError> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .rounds
            .get_mut(&round.id)
            .ok_or_else(|| MinesError::NotFound(format!("round {}", round.id)))?;
        if stored.revision != expected_revision {
            return Err(MinesError::Conflict {
                round_id: round.id,
                expected: expected_revision,
            });
        }
        *stored = round.clone();
        debug!(round_id = %round.id, revision = round.revision, "Round updated");
        Ok(())
    }

    async fn list_by_owner(&self, owner: OwnerId, limit: usize) -> Result<Vec<Round>, MinesError> {
        let inner = self.inner.read().await;
        let mut rounds: Vec<Round> = inner
            .rounds
            .values()
            .filter(|r| r.owner_id == owner)
            .cloned()
            .collect();
        rounds.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rounds.truncate(limit);
        Ok(rounds)
    }
}

#[async_trait]
impl Accounts for MemoryStore {
    async fn register(
        &self,
        username: &str,
        password_digest: &str,
        initial_balance: Decimal,
    ) -> Result<Account, MinesError> {
        let mut inner = self.inner.write().await;
        if inner.usernames.contains_key(username) {
            return Err(MinesError::UsernameTaken(username.to_string()));
        }
        let account = Account {
            id: Uuid::new_v4(),
            username: username.to_string(),
            balance: initial_balance,
            created_at: Utc::now(),
        };
        inner.usernames.insert(username.to_string(), account.id);
        inner.accounts.insert(
            account.id,
            AccountRecord {
                account: account.clone(),
                password_digest: password_digest.to_string(),
            },
        );
        Ok(account)
    }

    async fn authenticate(
        &self,
        username: &str,
        password_digest: &str,
    ) -> Result<Option<Account>, MinesError> {
        let inner = self.inner.read().await;
        Ok(inner
            .usernames
            .get(username)
            .and_then(|id| inner.accounts.get(id))
            .filter(|r| r.password_digest == password_digest)
            .map(|r| r.account.clone()))
    }

    async fn issue_session(&self, owner: OwnerId) -> Result<String, MinesError> {
        let mut inner = self.inner.write().await;
        if !inner.accounts.contains_key(&owner) {
            return Err(MinesError::NotFound(format!("account {owner}")));
        }
        let token = new_session_token();
        inner.sessions.insert(token.clone(), owner);
        Ok(token)
    }

    async fn resolve_session(&self, token: &str) -> Result<Option<OwnerId>, MinesError> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(token).copied())
    }

    async fn account(&self, owner: OwnerId) -> Result<Account, MinesError> {
        let inner = self.inner.read().await;
        inner
            .accounts
            .get(&owner)
            .map(|r| r.account.clone())
            .ok_or_else(|| MinesError::NotFound(format!("account {owner}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
