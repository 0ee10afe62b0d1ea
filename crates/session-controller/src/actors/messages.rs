//! Message types for the session actor hierarchy.
//!
//! All request/response messages use oneshot channels for responses.
//! Fire-and-forget messages (internal lifecycle reports) have no
//! `respond_to`.

use crate::errors::SessionError;
use ledger::{EndReason, Modality, SessionId, UserId};
use tokio::sync::oneshot;

/// Messages handled by the `SessionSupervisorActor`.
pub enum SupervisorMessage {
    /// A payer requests a session with a payee.
    RequestSession {
        payer: UserId,
        payee: UserId,
        modality: Modality,
        respond_to: oneshot::Sender<Result<SessionId, SessionError>>,
    },

    /// The payee accepts a Pending session.
    AcceptSession {
        session_id: SessionId,
        payee: UserId,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// The payee declines a Pending session.
    DeclineSession {
        session_id: SessionId,
        payee: UserId,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// A party ends a session.
    EndSession {
        session_id: SessionId,
        requested_by: UserId,
        reason: EndReason,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Internal: a session actor reached its terminal state and is exiting.
    SessionClosed { session_id: SessionId },

    /// Get current supervisor status.
    GetStatus {
        respond_to: oneshot::Sender<SupervisorStatus>,
    },

    /// Initiate graceful shutdown.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Messages handled by a `SessionActor`.
pub enum SessionMessage {
    /// Payee accepts; billing starts on success.
    Accept {
        payee: UserId,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Payee declines the Pending request.
    Decline {
        payee: UserId,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// A party ends the session.
    End {
        requested_by: UserId,
        reason: EndReason,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Supervisor status snapshot.
#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    /// Number of supervised (open) session actors.
    pub open_sessions: usize,
    /// Whether the supervisor has stopped accepting new sessions.
    pub is_draining: bool,
}
