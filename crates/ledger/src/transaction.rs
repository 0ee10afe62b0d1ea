//! Immutable transaction records.
//!
//! Every balance movement appends exactly one record. Records are never
//! updated or deleted; a failed movement produces either no record or one
//! explicitly marked [`TransactionStatus::Failed`], never a record implying
//! money moved when it did not.

use crate::model::{SessionId, UserId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of balance movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// One billing tick: payer debited, payee pending earnings credited.
    Charge,
    /// Pending earnings moved to the external payout destination.
    Payout,
    /// Compensating reversal after a failed external payout.
    PayoutReversal,
    /// Balance top-up (recorded by out-of-scope callers).
    TopUp,
}

/// Outcome recorded on the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Posted,
    Failed,
}

/// One immutable, append-only transaction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction id.
    pub id: String,
    /// The user whose balance the movement primarily concerns.
    pub user: UserId,
    /// Owning session, when the movement belongs to one.
    pub session: Option<SessionId>,
    /// Kind of movement.
    pub kind: TransactionKind,
    /// Amount moved. Always non-negative; the kind carries the direction.
    pub amount: Money,
    /// Payer balance before a charge (charge records only).
    pub balance_before: Option<Money>,
    /// Payer balance after a charge (charge records only).
    pub balance_after: Option<Money>,
    /// Outcome.
    pub status: TransactionStatus,
    /// When the record was appended.
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Record one posted billing tick with the payer's pre/post balance.
    #[must_use]
    pub fn charge(
        payer: UserId,
        session: SessionId,
        amount: Money,
        balance_before: Money,
        balance_after: Money,
        at: DateTime<Utc>,
    ) -> Self {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            user: payer,
            session: Some(session),
            kind: TransactionKind::Charge,
            amount,
            balance_before: Some(balance_before),
            balance_after: Some(balance_after),
            status: TransactionStatus::Posted,
            created_at: at,
        }
    }

    /// Record pending earnings moved out for payout.
    #[must_use]
    pub fn payout(payee: UserId, amount: Money, at: DateTime<Utc>) -> Self {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            user: payee,
            session: None,
            kind: TransactionKind::Payout,
            amount,
            balance_before: None,
            balance_after: None,
            status: TransactionStatus::Posted,
            created_at: at,
        }
    }

    /// Record the compensating reversal of a failed payout.
    #[must_use]
    pub fn payout_reversal(payee: UserId, amount: Money, at: DateTime<Utc>) -> Self {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            user: payee,
            session: None,
            kind: TransactionKind::PayoutReversal,
            amount,
            balance_before: None,
            balance_after: None,
            status: TransactionStatus::Posted,
            created_at: at,
        }
    }

    /// Record a balance top-up.
    #[must_use]
    pub fn top_up(user: UserId, amount: Money, balance_after: Money, at: DateTime<Utc>) -> Self {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            user,
            session: None,
            kind: TransactionKind::TopUp,
            amount,
            balance_before: Some(balance_after - amount),
            balance_after: Some(balance_after),
            status: TransactionStatus::Posted,
            created_at: at,
        }
    }
}
