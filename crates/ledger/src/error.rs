//! Ledger store error type.

use crate::model::SessionId;
use crate::money::Money;
use thiserror::Error;

/// Errors surfaced by [`crate::store::LedgerStore`] operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No session record with this id.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// No ledger entry for this user.
    #[error("user not found")]
    UserNotFound,

    /// A transition was attempted from the wrong state.
    #[error("session is not in the required state")]
    InvalidState,

    /// The session is already Ended; finalization is not repeatable.
    #[error("session already ended")]
    AlreadyEnded,

    /// Pending earnings below the payout threshold.
    #[error("pending earnings {pending} below payout threshold {minimum}")]
    BelowPayoutThreshold { pending: Money, minimum: Money },

    /// The paid bucket cannot cover the requested compensating restore.
    #[error("cannot restore {amount}: only {paid} marked paid")]
    RestoreExceedsPaid { amount: Money, paid: Money },

    /// Transient store failure; the operation did not apply and may be retried.
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
}
