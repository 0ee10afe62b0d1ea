//! The `LedgerStore` consistency contract.
//!
//! The billing core does not prescribe a persistence engine; it prescribes
//! what the engine must guarantee. Every method here is one atomic unit:
//! either every sub-update lands or none do. In particular a billing tick
//! must never leave the payer debited without the payee credited, or a
//! transaction record without the matching balance movement.

use crate::error::LedgerError;
use crate::model::{EndReason, LedgerEntry, SessionId, SessionRecord, UserId};
use crate::money::{Money, RevenueSplit};
use crate::transaction::Transaction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result of one atomic [`LedgerStore::charge_tick`] attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick applied in full.
    Charged(TickCharge),
    /// The payer could not afford the tick. Nothing was applied, not even
    /// partially; the caller is expected to end the session.
    InsufficientFunds { required: Money, available: Money },
    /// The session was not Active in the store's consistent view. Nothing
    /// was applied; the caller should stop ticking.
    SessionNotActive,
}

/// Amounts moved by one applied tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickCharge {
    /// Id of the appended charge transaction.
    pub transaction_id: String,
    /// Payer balance before the debit.
    pub balance_before: Money,
    /// Payer balance after the debit.
    pub balance_after: Money,
    /// Full tick amount (the session's snapshotted per-minute rate).
    pub amount: Money,
    /// Platform-fee portion of the amount.
    pub platform_fee: Money,
    /// Payee-earnings portion of the amount.
    pub payee_earnings: Money,
}

/// Transactional store holding user balances/earnings, session records and
/// charge records. The only resource shared across sessions.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the ledger entry for a user if absent.
    async fn ensure_user(&self, user: &UserId) -> Result<(), LedgerError>;

    /// Read a user's ledger entry.
    async fn ledger_entry(&self, user: &UserId) -> Result<LedgerEntry, LedgerError>;

    /// Credit a user's spendable balance (top-up path; caller out of scope).
    async fn credit_balance(&self, user: &UserId, amount: Money) -> Result<Money, LedgerError>;

    /// Persist a freshly created session record.
    async fn create_session(&self, record: SessionRecord) -> Result<(), LedgerError>;

    /// Read one session record.
    async fn session(&self, id: &SessionId) -> Result<SessionRecord, LedgerError>;

    /// Find any Pending or Active session the user is party to.
    async fn find_open_session_for(
        &self,
        user: &UserId,
    ) -> Result<Option<SessionRecord>, LedgerError>;

    /// Pending -> Active, recording the start timestamp.
    ///
    /// Fails with [`LedgerError::InvalidState`] unless the session is Pending.
    async fn begin_session(
        &self,
        id: &SessionId,
        started_at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    /// Apply one billing tick atomically.
    ///
    /// In one consistent view: check the session is Active, check the payer
    /// can afford `rate`, then debit the payer, split the rate per `split`,
    /// credit the payee's pending earnings, bump the session's accumulated
    /// totals and duration by `tick_secs`, and append one charge transaction
    /// with the payer's pre/post balance. Refusals (not Active, insufficient
    /// funds) apply nothing and are reported via [`TickOutcome`], not as
    /// errors; [`LedgerError::Unavailable`] means the tick did not apply and
    /// may be retried.
    async fn charge_tick(
        &self,
        id: &SessionId,
        split: RevenueSplit,
        tick_secs: i64,
    ) -> Result<TickOutcome, LedgerError>;

    /// Pending|Active -> Ended. Sets the end timestamp, the terminal reason,
    /// and the final duration (`ended_at - started_at` when a start exists).
    /// Repeat finalization fails with [`LedgerError::AlreadyEnded`].
    async fn finalize_session(
        &self,
        id: &SessionId,
        ended_at: DateTime<Utc>,
        reason: EndReason,
    ) -> Result<SessionRecord, LedgerError>;

    /// Move the payee's full pending earnings to the paid bucket, gated on
    /// `minimum`, appending a payout transaction. Returns the amount moved.
    async fn begin_payout(&self, payee: &UserId, minimum: Money) -> Result<Money, LedgerError>;

    /// Compensating move of `amount` from paid back to pending after a failed
    /// external transfer, appending a reversal transaction.
    async fn restore_pending(&self, payee: &UserId, amount: Money) -> Result<(), LedgerError>;

    /// All transactions owned by a session, in append order.
    async fn transactions_for_session(
        &self,
        id: &SessionId,
    ) -> Result<Vec<Transaction>, LedgerError>;
}
