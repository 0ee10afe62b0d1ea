//! In-memory `LedgerStore`.
//!
//! One mutex guards all state, so every trait operation is a single critical
//! section: exactly the all-or-nothing behavior the contract demands. Good
//! enough for the service's store seam and for tests; a durable engine would
//! provide the same guarantees with real transactions.

use crate::error::LedgerError;
use crate::model::{EndReason, LedgerEntry, SessionId, SessionRecord, SessionStatus, UserId};
use crate::money::{Money, RevenueSplit};
use crate::store::{LedgerStore, TickCharge, TickOutcome};
use crate::transaction::Transaction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, LedgerEntry>,
    sessions: HashMap<SessionId, SessionRecord>,
    transactions: Vec<Transaction>,
    /// Fault injection: the next N charge attempts fail as transient errors.
    fail_next_charges: u32,
}

/// In-memory transactional ledger store.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, LedgerError> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger mutex poisoned".to_string()))
    }

    /// Make the next `n` charge attempts fail with a transient error, for
    /// exercising the billing engine's retry/skip behavior.
    pub fn inject_charge_failures(&self, n: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_next_charges = n;
        }
    }

    /// Total transaction count (audit/test helper).
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.inner.lock().map(|i| i.transactions.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn ensure_user(&self, user: &UserId) -> Result<(), LedgerError> {
        let mut inner = self.lock()?;
        inner.users.entry(user.clone()).or_default();
        Ok(())
    }

    async fn ledger_entry(&self, user: &UserId) -> Result<LedgerEntry, LedgerError> {
        let inner = self.lock()?;
        inner
            .users
            .get(user)
            .copied()
            .ok_or(LedgerError::UserNotFound)
    }

    async fn credit_balance(&self, user: &UserId, amount: Money) -> Result<Money, LedgerError> {
        let mut inner = self.lock()?;
        let entry = inner.users.entry(user.clone()).or_default();
        entry.balance += amount;
        let balance_after = entry.balance;
        let tx = Transaction::top_up(user.clone(), amount, balance_after, Utc::now());
        inner.transactions.push(tx);
        Ok(balance_after)
    }

    async fn create_session(&self, record: SessionRecord) -> Result<(), LedgerError> {
        let mut inner = self.lock()?;
        inner.sessions.insert(record.id.clone(), record);
        Ok(())
    }

    async fn session(&self, id: &SessionId) -> Result<SessionRecord, LedgerError> {
        let inner = self.lock()?;
        inner
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::SessionNotFound(id.clone()))
    }

    async fn find_open_session_for(
        &self,
        user: &UserId,
    ) -> Result<Option<SessionRecord>, LedgerError> {
        let inner = self.lock()?;
        Ok(inner
            .sessions
            .values()
            .find(|s| s.is_open() && s.involves(user))
            .cloned())
    }

    async fn begin_session(
        &self,
        id: &SessionId,
        started_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut inner = self.lock()?;
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| LedgerError::SessionNotFound(id.clone()))?;
        if session.status != SessionStatus::Pending {
            return Err(LedgerError::InvalidState);
        }
        session.status = SessionStatus::Active;
        session.started_at = Some(started_at);
        Ok(())
    }

    async fn charge_tick(
        &self,
        id: &SessionId,
        split: RevenueSplit,
        tick_secs: i64,
    ) -> Result<TickOutcome, LedgerError> {
        let mut inner = self.lock()?;

        if inner.fail_next_charges > 0 {
            inner.fail_next_charges -= 1;
            return Err(LedgerError::Unavailable("injected failure".to_string()));
        }

        // Consistent view: session status and payer balance under one lock.
        let session = inner
            .sessions
            .get(id)
            .ok_or_else(|| LedgerError::SessionNotFound(id.clone()))?;
        if session.status != SessionStatus::Active {
            return Ok(TickOutcome::SessionNotActive);
        }
        let rate = session.rate;
        let payer = session.payer.clone();
        let payee = session.payee.clone();

        let balance_before = inner
            .users
            .get(&payer)
            .ok_or(LedgerError::UserNotFound)?
            .balance;

        // A tick that would overdraw applies nothing, not even partially.
        let Some(balance_after) = balance_before.checked_debit(rate) else {
            return Ok(TickOutcome::InsufficientFunds {
                required: rate,
                available: balance_before,
            });
        };

        let (platform_fee, payee_earnings) = split.split(rate);

        if let Some(entry) = inner.users.get_mut(&payer) {
            entry.balance = balance_after;
        }
        inner.users.entry(payee).or_default().pending_earnings += payee_earnings;

        if let Some(session) = inner.sessions.get_mut(id) {
            session.total_cost += rate;
            session.platform_fee += platform_fee;
            session.payee_earnings += payee_earnings;
            session.duration_secs += tick_secs;
        }

        let tx = Transaction::charge(
            payer,
            id.clone(),
            rate,
            balance_before,
            balance_after,
            Utc::now(),
        );
        let transaction_id = tx.id.clone();
        inner.transactions.push(tx);

        Ok(TickOutcome::Charged(TickCharge {
            transaction_id,
            balance_before,
            balance_after,
            amount: rate,
            platform_fee,
            payee_earnings,
        }))
    }

    async fn finalize_session(
        &self,
        id: &SessionId,
        ended_at: DateTime<Utc>,
        reason: EndReason,
    ) -> Result<SessionRecord, LedgerError> {
        let mut inner = self.lock()?;
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| LedgerError::SessionNotFound(id.clone()))?;
        if session.status == SessionStatus::Ended {
            return Err(LedgerError::AlreadyEnded);
        }
        session.status = SessionStatus::Ended;
        session.ended_at = Some(ended_at);
        session.end_reason = Some(reason);
        if let Some(started_at) = session.started_at {
            session.duration_secs = (ended_at - started_at).num_seconds().max(0);
        }
        Ok(session.clone())
    }

    async fn begin_payout(&self, payee: &UserId, minimum: Money) -> Result<Money, LedgerError> {
        let mut inner = self.lock()?;
        let entry = inner.users.get_mut(payee).ok_or(LedgerError::UserNotFound)?;
        let pending = entry.pending_earnings;
        if pending < minimum {
            return Err(LedgerError::BelowPayoutThreshold { pending, minimum });
        }
        entry.pending_earnings = Money::ZERO;
        entry.paid_earnings += pending;
        let tx = Transaction::payout(payee.clone(), pending, Utc::now());
        inner.transactions.push(tx);
        Ok(pending)
    }

    async fn restore_pending(&self, payee: &UserId, amount: Money) -> Result<(), LedgerError> {
        let mut inner = self.lock()?;
        let entry = inner.users.get_mut(payee).ok_or(LedgerError::UserNotFound)?;
        if entry.paid_earnings < amount {
            return Err(LedgerError::RestoreExceedsPaid {
                amount,
                paid: entry.paid_earnings,
            });
        }
        entry.paid_earnings -= amount;
        entry.pending_earnings += amount;
        let tx = Transaction::payout_reversal(payee.clone(), amount, Utc::now());
        inner.transactions.push(tx);
        Ok(())
    }

    async fn transactions_for_session(
        &self,
        id: &SessionId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let inner = self.lock()?;
        Ok(inner
            .transactions
            .iter()
            .filter(|tx| tx.session.as_ref() == Some(id))
            .cloned()
            .collect())
    }
}
