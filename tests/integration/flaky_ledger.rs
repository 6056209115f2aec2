//! Ledger wrapper for failure-injection tests.
//!
//! Delegates to a real backend, but credits can be made to fail on
//! demand, the way a remote wallet service would during an outage.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use mines::storage::Ledger;
use mines::types::{LedgerEntry, MinesError, OwnerId};

pub struct FlakyLedger {
    inner: Arc<dyn Ledger>,
    fail_credits: AtomicBool,
    credit_calls: AtomicUsize,
}

impl FlakyLedger {
    pub fn new(inner: Arc<dyn Ledger>) -> Self {
        Self {
            inner,
            fail_credits: AtomicBool::new(false),
            credit_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_credits.store(failing, Ordering::SeqCst);
    }

    pub fn credit_calls(&self) -> usize {
        self.credit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn debit(
        &self,
        owner: OwnerId,
        amount: Decimal,
        reference: &str,
    ) -> Result<Decimal, MinesError> {
        self.inner.debit(owner, amount, reference).await
    }

    async fn credit(
        &self,
        owner: OwnerId,
        amount: Decimal,
        reference: &str,
    ) -> Result<Decimal, MinesError> {
        self.credit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_credits.load(Ordering::SeqCst) {
            return Err(MinesError::adapter("wallet", "connection reset"));
        }
        self.inner.credit(owner, amount, reference).await
    }

    async fn balance(&self, owner: OwnerId) -> Result<Decimal, MinesError> {
        self.inner.balance(owner).await
    }

    async fn entry(&self, reference: &str) -> Result<Option<LedgerEntry>, MinesError> {
        self.inner.entry(reference).await
    }
}
