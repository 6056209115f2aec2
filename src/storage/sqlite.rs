//! SQLite backend via sqlx.
//!
//! Rounds are updated with a compare-and-swap statement
//! (`UPDATE … WHERE revision = <old>`). Balance movements run in one write
//! transaction that first claims their journal reference, so a replayed
//! reference is never applied twice, even across processes sharing one
//! database file.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::{new_session_token, Accounts, Ledger, RoundStore};
use crate::types::{
    Account, CellState, EntryKind, LedgerEntry, MinesError, OwnerId, Round, RoundId,
};

impl From<sqlx::Error> for MinesError {
    fn from(e: sqlx::Error) -> Self {
        MinesError::adapter("sqlite", e)
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect, creating the database file if needed, and apply migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, MinesError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// A private in-memory database. One connection, never recycled,
    /// since each SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self, MinesError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, MinesError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| MinesError::adapter("sqlite", format!("migration failed: {e}")))?;
        info!("SQLite schema up to date");
        Ok(Self { pool })
    }

    /// Apply one journaled balance movement. `apply` maps the old balance
    /// to the new one; an error from it rolls the whole movement back.
    async fn apply_entry<F>(
        &self,
        owner: OwnerId,
        kind: EntryKind,
        amount: Decimal,
        reference: &str,
        apply: F,
    ) -> Result<Decimal, MinesError>
    where
        F: FnOnce(Decimal) -> Result<Decimal, MinesError> + Send,
    {
        let owner_id = owner.to_string();
        let mut tx = self.pool.begin().await?;

        // The insert takes the write lock, so the read below cannot go stale.
        let claimed = sqlx::query(
            "INSERT INTO ledger_entries (reference, owner_id, kind, amount, created_at) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT(reference) DO NOTHING",
        )
        .bind(reference)
        .bind(&owner_id)
        .bind(kind.to_string())
        .bind(amount.to_string())
        .bind(format_time(&Utc::now()))
        .execute(&mut *tx)
        .await?;

        let stored = sqlx::query_scalar::<_, String>("SELECT balance FROM accounts WHERE id = ?")
            .bind(&owner_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| MinesError::NotFound(format!("account {owner}")))?;
        let available = parse_decimal("balance", &stored)?;

        if claimed.rows_affected() == 0 {
            debug!(%owner, reference, "Ledger reference already applied");
            return Ok(available);
        }

        let next = apply(available)?;
        sqlx::query("UPDATE accounts SET balance = ? WHERE id = ?")
            .bind(next.to_string())
            .bind(&owner_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct RoundRow {
    id: String,
    owner_id: String,
    bet_amount: String,
    mine_count: i64,
    cells: String,
    mine_positions: String,
    revealed_safe_count: i64,
    status: String,
    payout: String,
    payout_pending: bool,
    house_edge: f64,
    multiplier: f64,
    revision: i64,
    created_at: String,
    finished_at: Option<String>,
}

impl TryFrom<RoundRow> for Round {
    type Error = MinesError;

    fn try_from(row: RoundRow) -> Result<Self, Self::Error> {
        let cells: Vec<CellState> =
            serde_json::from_str(&row.cells).map_err(|e| corrupt("cells", e))?;
        let mine_positions: BTreeSet<u8> =
            serde_json::from_str(&row.mine_positions).map_err(|e| corrupt("mine_positions", e))?;
        Ok(Round {
            id: parse_uuid("id", &row.id)?,
            owner_id: parse_uuid("owner_id", &row.owner_id)?,
            bet_amount: parse_decimal("bet_amount", &row.bet_amount)?,
            mine_count: u8::try_from(row.mine_count).map_err(|e| corrupt("mine_count", e))?,
            cells,
            mine_positions,
            revealed_safe_count: u8::try_from(row.revealed_safe_count)
                .map_err(|e| corrupt("revealed_safe_count", e))?,
            status: row.status.parse()?,
            payout: parse_decimal("payout", &row.payout)?,
            payout_pending: row.payout_pending,
            house_edge: row.house_edge,
            multiplier: row.multiplier,
            revision: u64::try_from(row.revision).map_err(|e| corrupt("revision", e))?,
            created_at: parse_time("created_at", &row.created_at)?,
            finished_at: row
                .finished_at
                .as_deref()
                .map(|t| parse_time("finished_at", t))
                .transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    username: String,
    balance: String,
    created_at: String,
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    reference: String,
    owner_id: String,
    kind: String,
    amount: String,
    created_at: String,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = MinesError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            owner_id: parse_uuid("owner_id", &row.owner_id)?,
            kind: row.kind.parse()?,
            amount: parse_decimal("amount", &row.amount)?,
            created_at: parse_time("created_at", &row.created_at)?,
            reference: row.reference,
        })
    }
}

impl TryFrom<AccountRow> for Account {
    type Error = MinesError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: parse_uuid("id", &row.id)?,
            username: row.username,
            balance: parse_decimal("balance", &row.balance)?,
            created_at: parse_time("created_at", &row.created_at)?,
        })
    }
}

fn corrupt(field: &str, e: impl std::fmt::Display) -> MinesError {
    MinesError::adapter("sqlite", format!("corrupt {field}: {e}"))
}

fn parse_uuid(field: &str, s: &str) -> Result<Uuid, MinesError> {
    Uuid::parse_str(s).map_err(|e| corrupt(field, e))
}

fn parse_decimal(field: &str, s: &str) -> Result<Decimal, MinesError> {
    Decimal::from_str(s).map_err(|e| corrupt(field, e))
}

// Fixed-width nanosecond timestamps sort correctly as text.
fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(field: &str, s: &str) -> Result<DateTime<Utc>, MinesError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(field, e))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, MinesError> {
    serde_json::to_string(value).map_err(|e| MinesError::adapter("sqlite", e))
}

fn to_i64(field: &str, v: u64) -> Result<i64, MinesError> {
    i64::try_from(v).map_err(|e| corrupt(field, e))
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

#[async_trait]
impl Ledger for SqliteStore {
    async fn debit(
        &self,
        owner: OwnerId,
        amount: Decimal,
        reference: &str,
    ) -> Result<Decimal, MinesError> {
        self.apply_entry(owner, EntryKind::Debit, amount, reference, |available| {
            if available < amount {
                Err(MinesError::InsufficientFunds {
                    needed: amount,
                    available,
                })
            } else {
                Ok(available - amount)
            }
        })
        .await
    }

    async fn credit(
        &self,
        owner: OwnerId,
        amount: Decimal,
        reference: &str,
    ) -> Result<Decimal, MinesError> {
        self.apply_entry(owner, EntryKind::Credit, amount, reference, |available| {
            Ok(available + amount)
        })
        .await
    }

    async fn balance(&self, owner: OwnerId) -> Result<Decimal, MinesError> {
        let stored = sqlx::query_scalar::<_, String>("SELECT balance FROM accounts WHERE id = ?")
            .bind(owner.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MinesError::NotFound(format!("account {owner}")))?;
        parse_decimal("balance", &stored)
    }

    async fn entry(&self, reference: &str) -> Result<Option<LedgerEntry>, MinesError> {
        sqlx::query_as::<_, EntryRow>(
            "SELECT reference, owner_id, kind, amount, created_at \
             FROM ledger_entries WHERE reference = ?",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?
        .map(LedgerEntry::try_from)
        .transpose()
    }
}

#[async_trait]
impl RoundStore for SqliteStore {
    async fn create(&self, round: &Round) -> Result<RoundId, MinesError> {
        sqlx::query(
            "INSERT INTO rounds (id, owner_id, bet_amount, mine_count, cells, mine_positions, \
             revealed_safe_count, status, payout, payout_pending, house_edge, multiplier, \
             revision, created_at, finished_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(round.id.to_string())
        .bind(round.owner_id.to_string())
        .bind(round.bet_amount.to_string())
        .bind(i64::from(round.mine_count))
        .bind(to_json(&round.cells)?)
        .bind(to_json(&round.mine_positions)?)
        .bind(i64::from(round.revealed_safe_count))
        .bind(round.status.to_string())
        .bind(round.payout.to_string())
        .bind(round.payout_pending)
        .bind(round.house_edge)
        .bind(round.multiplier)
        .bind(to_i64("revision", round.revision)?)
        .bind(format_time(&round.created_at))
        .bind(round.finished_at.as_ref().map(format_time))
        .execute(&self.pool)
        .await?;
        debug!(round_id = %round.id, "Round inserted");
        Ok(round.id)
    }

    async fn get(&self, id: RoundId) -> Result<Round, MinesError> {
        let row = sqlx::query_as::<_, RoundRow>("SELECT * FROM rounds WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MinesError::NotFound(format!("round {id}")))?;
        Round::try_from(row)
    }

    async fn update(&self, round: &Round, expected_revision: u64) -> Result<(), MinesError> {
        let result = sqlx::query(
            "UPDATE rounds SET cells = ?, revealed_safe_count = ?, status = ?, payout = ?, \
             payout_pending = ?, multiplier = ?, revision = ?, finished_at = ? \
             WHERE id = ? AND revision = ?",
        )
        .bind(to_json(&round.cells)?)
        .bind(i64::from(round.revealed_safe_count))
        .bind(round.status.to_string())
        .bind(round.payout.to_string())
        .bind(round.payout_pending)
        .bind(round.multiplier)
        .bind(to_i64("revision", round.revision)?)
        .bind(round.finished_at.as_ref().map(format_time))
        .bind(round.id.to_string())
        .bind(to_i64("revision", expected_revision)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(round_id = %round.id, revision = round.revision, "Round updated");
            return Ok(());
        }

        let exists = sqlx::query_scalar::<_, i64>("SELECT revision FROM rounds WHERE id = ?")
            .bind(round.id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Err(MinesError::Conflict {
                round_id: round.id,
                expected: expected_revision,
            }),
            None => Err(MinesError::NotFound(format!("round {}", round.id))),
        }
    }

    async fn list_by_owner(&self, owner: OwnerId, limit: usize) -> Result<Vec<Round>, MinesError> {
        let rows = sqlx::query_as::<_, RoundRow>(
            "SELECT * FROM rounds WHERE owner_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(owner.to_string())
        .bind(to_i64("limit", limit as u64)?)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Round::try_from).collect()
    }
}

#[async_trait]
impl Accounts for SqliteStore {
    async fn register(
        &self,
        username: &str,
        password_digest: &str,
        initial_balance: Decimal,
    ) -> Result<Account, MinesError> {
        let account = Account {
            id: Uuid::new_v4(),
            username: username.to_string(),
            balance: initial_balance,
            created_at: Utc::now(),
        };
        let inserted = sqlx::query(
            "INSERT INTO accounts (id, username, password_digest, balance, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(account.id.to_string())
        .bind(&account.username)
        .bind(password_digest)
        .bind(account.balance.to_string())
        .bind(format_time(&account.created_at))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(account),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(MinesError::UsernameTaken(username.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn authenticate(
        &self,
        username: &str,
        password_digest: &str,
    ) -> Result<Option<Account>, MinesError> {
        sqlx::query_as::<_, AccountRow>(
            "SELECT id, username, balance, created_at FROM accounts \
             WHERE username = ? AND password_digest = ?",
        )
        .bind(username)
        .bind(password_digest)
        .fetch_optional(&self.pool)
        .await?
        .map(Account::try_from)
        .transpose()
    }

    async fn issue_session(&self, owner: OwnerId) -> Result<String, MinesError> {
        self.account(owner).await?;
        let token = new_session_token();
        sqlx::query("INSERT INTO sessions (token, owner_id, created_at) VALUES (?, ?, ?)")
            .bind(&token)
            .bind(owner.to_string())
            .bind(format_time(&Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(token)
    }

    async fn resolve_session(&self, token: &str) -> Result<Option<OwnerId>, MinesError> {
        sqlx::query_scalar::<_, String>("SELECT owner_id FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .map(|id| parse_uuid("owner_id", &id))
            .transpose()
    }

    async fn account(&self, owner: OwnerId) -> Result<Account, MinesError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, username, balance, created_at FROM accounts WHERE id = ?",
        )
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| MinesError::NotFound(format!("account {owner}")))?;
        Account::try_from(row)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
