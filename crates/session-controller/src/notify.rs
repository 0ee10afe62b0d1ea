//! Out-of-band lifecycle notifications.
//!
//! Every lifecycle transition emits one notification through the
//! [`NotificationSink`] seam (push, email, whatever the deployment wires
//! in). Delivery is advisory: a sink failure is logged and never blocks or
//! rolls back the transition that produced it.

use async_trait::async_trait;
use ledger::{EndReason, Modality, Money, SessionId, UserId};
use serde::Serialize;
use std::sync::Arc;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

/// One lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// A payer requested a session with a payee.
    SessionRequested {
        session_id: SessionId,
        payer: UserId,
        payee: UserId,
        modality: Modality,
    },
    /// The payee accepted; billing has started.
    SessionAccepted { session_id: SessionId },
    /// The payee declined the request.
    SessionDeclined { session_id: SessionId },
    /// The session reached its terminal state.
    SessionEnded {
        session_id: SessionId,
        reason: EndReason,
    },
    /// A billing tick could not be covered by the payer.
    PaymentFailed {
        session_id: SessionId,
        payer: UserId,
        required: Money,
        available: Money,
    },
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivery seam for lifecycle notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Deliver one notification, logging (never propagating) delivery failure.
pub async fn dispatch(sink: &Arc<dyn NotificationSink>, notification: Notification) {
    if let Err(err) = sink.deliver(notification).await {
        warn!(
            target: "session_controller::notify",
            error = %err,
            "Notification delivery failed"
        );
    }
}

/// Sink that logs each notification. The default for bare deployments.
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn deliver(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            target: "session_controller::notify",
            notification = ?notification,
            "Lifecycle notification"
        );
        Ok(())
    }
}

/// Sink that buffers notifications in memory, optionally refusing
/// delivery. Used by tests and by deployments that drain the buffer into
/// an external queue.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Notification>>,
    failing: Mutex<bool>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deliveries fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut f) = self.failing.lock() {
            *f = failing;
        }
    }

    /// Drain everything delivered so far.
    pub fn take(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|mut d| std::mem::take(&mut *d))
            .unwrap_or_default()
    }

    /// Snapshot of everything delivered so far.
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: Notification) -> Result<(), NotifyError> {
        if self.failing.lock().map(|f| *f).unwrap_or(false) {
            return Err(NotifyError("sink unavailable".to_string()));
        }
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(notification);
        }
        Ok(())
    }
}
