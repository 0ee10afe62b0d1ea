//! Session controller error types.
//!
//! Error types map to wire `error_code` values for client responses.
//! Internal details are logged server-side but not exposed to clients.

use ledger::{LedgerError, Money};
use thiserror::Error;

/// Session controller error type.
///
/// Maps to wire `error_code` values:
/// - `InvalidParty`: `INVALID_PARTY` (1)
/// - `Unauthorized`: `UNAUTHORIZED` (2)
/// - `NotFound`: `NOT_FOUND` (4)
/// - `AlreadyProcessed`, `AlreadyEnded`, `Conflict`: `CONFLICT` (5)
/// - `Ledger`, `PayoutFailed`, `Internal`: `INTERNAL_ERROR` (6)
/// - `PayeeUnavailable`: `UNAVAILABLE` (7)
/// - `InsufficientFunds`, `BelowPayoutThreshold`: `PAYMENT_REQUIRED` (8)
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session request named the same user on both sides.
    #[error("Payer and payee must be distinct users")]
    InvalidParty,

    /// The payee is offline or already party to an open session.
    #[error("Payee unavailable: {0}")]
    PayeeUnavailable(String),

    /// The payer cannot cover the next billed minute.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Money, available: Money },

    /// Session not found (or not visible to the requesting user).
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The session already left the Pending state; accept/decline is stale.
    #[error("Session already processed: {0}")]
    AlreadyProcessed(String),

    /// The session already reached its terminal state.
    #[error("Session already ended: {0}")]
    AlreadyEnded(String),

    /// Conflict with existing state (e.g., requester already in a session).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The acting user is not a party to the session.
    #[error("Unauthorized")]
    Unauthorized,

    /// The sender has not joined the session's room.
    #[error("Not in room: {0}")]
    NotInRoom(String),

    /// Pending earnings are below the payout minimum.
    #[error("Pending earnings {pending} below payout threshold {minimum}")]
    BelowPayoutThreshold { pending: Money, minimum: Money },

    /// The external payout transfer was refused; pending earnings restored.
    #[error("Payout failed: {0}")]
    PayoutFailed(String),

    /// Ledger store failure.
    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Returns the wire `error_code` value for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            SessionError::InvalidParty => 1,
            SessionError::Unauthorized => 2, // UNAUTHORIZED
            SessionError::NotFound(_) | SessionError::NotInRoom(_) => 4, // NOT_FOUND
            SessionError::AlreadyProcessed(_)
            | SessionError::AlreadyEnded(_)
            | SessionError::Conflict(_) => 5, // CONFLICT
            SessionError::Ledger(_) | SessionError::PayoutFailed(_) | SessionError::Internal(_) => {
                6 // INTERNAL_ERROR
            }
            SessionError::PayeeUnavailable(_) => 7, // UNAVAILABLE
            SessionError::InsufficientFunds { .. } | SessionError::BelowPayoutThreshold { .. } => {
                8 // PAYMENT_REQUIRED
            }
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            SessionError::InvalidParty => "Payer and payee must be distinct users".to_string(),
            SessionError::PayeeUnavailable(_) => "The payee is not available".to_string(),
            SessionError::InsufficientFunds { required, .. } => {
                format!("Insufficient balance: at least {required} is required")
            }
            SessionError::NotFound(_) => "Session not found".to_string(),
            SessionError::AlreadyProcessed(_) => {
                "This session request was already processed".to_string()
            }
            SessionError::AlreadyEnded(_) => "This session has already ended".to_string(),
            SessionError::Conflict(msg) => msg.clone(),
            SessionError::Unauthorized => "You are not a party to this session".to_string(),
            SessionError::NotInRoom(_) => "You have not joined this session".to_string(),
            SessionError::BelowPayoutThreshold { minimum, .. } => {
                format!("Earnings below the payout minimum of {minimum}")
            }
            SessionError::PayoutFailed(_) => {
                "Payout could not be completed, your earnings are unchanged".to_string()
            }
            SessionError::Ledger(_) | SessionError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

impl From<LedgerError> for SessionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::SessionNotFound(id) => SessionError::NotFound(id.to_string()),
            LedgerError::AlreadyEnded => SessionError::AlreadyEnded("finalized".to_string()),
            LedgerError::BelowPayoutThreshold { pending, minimum } => {
                SessionError::BelowPayoutThreshold { pending, minimum }
            }
            other => SessionError::Ledger(other),
        }
    }
}
