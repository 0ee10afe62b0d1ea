//! `SessionActor` - per-session actor owning one session's lifecycle.
//!
//! Each `SessionActor`:
//! - Owns the Pending -> Active -> Ended progression for one session
//! - Arms the pending-acceptance deadline while Pending
//! - Arms the billing ticker on the transition to Active
//! - Drives every billing tick through the `BillingEngine`
//!
//! Ticks, accept/decline/end requests and the timeout all flow through
//! this actor's single message loop, so two ticks for one session can
//! never run concurrently and a tick can never interleave with the
//! session ending.
//!
//! The ticker uses `MissedTickBehavior::Skip`: if the process stalls past
//! a tick boundary, the missed minute is charged once when the loop
//! resumes, never replayed as a burst of catch-up charges.

use crate::actors::messages::{SessionMessage, SupervisorMessage};
use crate::billing::BillingEngine;
use crate::errors::SessionError;
use crate::notify::{self, Notification, NotificationSink};
use crate::observability::EngineMetrics;
use crate::relay::RelayHandle;

use chrono::Utc;
use ledger::{
    EndReason, LedgerError, LedgerStore, Money, SessionId, SessionStatus, TickOutcome, UserId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for a session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Shared dependencies handed to every session actor.
#[derive(Clone)]
pub(crate) struct SessionDeps {
    pub ledger: Arc<dyn LedgerStore>,
    pub billing: Arc<BillingEngine>,
    /// For the acceptance-time payee reachability check.
    pub relay: RelayHandle,
    pub sink: Arc<dyn NotificationSink>,
    pub metrics: Arc<EngineMetrics>,
    /// For reporting terminal state back to the supervisor.
    pub supervisor_tx: mpsc::Sender<SupervisorMessage>,
    pub tick_interval: Duration,
    pub pending_timeout: Duration,
}

/// Handle to a `SessionActor`.
#[derive(Clone)]
pub(crate) struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: SessionId,
}

impl SessionActorHandle {
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Payee accepts the Pending session.
    pub async fn accept(&self, payee: UserId) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::Accept {
                payee,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Payee declines the Pending session.
    pub async fn decline(&self, payee: UserId) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::Decline {
                payee,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// A party ends the session.
    pub async fn end(
        &self,
        requested_by: UserId,
        reason: EndReason,
    ) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::End {
                requested_by,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the session actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `SessionActor` implementation.
pub(crate) struct SessionActor {
    session_id: SessionId,
    payer: UserId,
    payee: UserId,
    /// Per-minute rate snapshotted at creation.
    rate: Money,
    /// Local view of the lifecycle; the ledger's view is authoritative for
    /// money, this one gates which select arms are armed.
    status: SessionStatus,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    deps: SessionDeps,
}

impl SessionActor {
    /// Spawn a session actor for a freshly created Pending session.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        session_id: SessionId,
        payer: UserId,
        payee: UserId,
        rate: Money,
        cancel_token: CancellationToken,
        deps: SessionDeps,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let actor = Self {
            session_id: session_id.clone(),
            payer,
            payee,
            rate,
            status: SessionStatus::Pending,
            receiver,
            cancel_token: cancel_token.clone(),
            deps,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            cancel_token,
            session_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "sc.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "sc.actor.session",
            session_id = %self.session_id,
            payer = %self.payer,
            payee = %self.payee,
            rate = %self.rate,
            "SessionActor started"
        );

        let mut ticker = tokio::time::interval(self.deps.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticker_armed = false;

        let pending_deadline = tokio::time::sleep(self.deps.pending_timeout);
        tokio::pin!(pending_deadline);

        loop {
            if self.status == SessionStatus::Active && !ticker_armed {
                // First billed minute completes one full interval after
                // activation, not immediately.
                ticker.reset();
                ticker_armed = true;
            }
            if self.status == SessionStatus::Ended {
                break;
            }

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    // An open session must not outlive its actor.
                    self.finalize(EndReason::PeerDisconnected).await;
                    break;
                }

                () = &mut pending_deadline, if self.status == SessionStatus::Pending => {
                    self.handle_pending_timeout().await;
                }

                _ = ticker.tick(), if ticker_armed && self.status == SessionStatus::Active => {
                    self.handle_tick().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "sc.actor.session",
                                session_id = %self.session_id,
                                "SessionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        // Answer anything still queued (stale accepts racing the end)
        // before the mailbox is dropped.
        while let Ok(message) = self.receiver.try_recv() {
            self.handle_message(message).await;
        }

        let _ = self
            .deps
            .supervisor_tx
            .send(SupervisorMessage::SessionClosed {
                session_id: self.session_id.clone(),
            })
            .await;

        info!(
            target: "sc.actor.session",
            session_id = %self.session_id,
            "SessionActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Accept { payee, respond_to } => {
                let result = self.handle_accept(payee).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Decline { payee, respond_to } => {
                let result = self.handle_decline(payee).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::End {
                requested_by,
                reason,
                respond_to,
            } => {
                let result = self.handle_end(requested_by, reason).await;
                let _ = respond_to.send(result);
            }
        }
    }

    /// Pending -> Active, with a balance recheck at acceptance time.
    ///
    /// The request-time affordability check may be minutes stale by the
    /// time the payee accepts; rechecking here stops a session that would
    /// fail its very first tick from ever starting.
    async fn handle_accept(&mut self, payee: UserId) -> Result<(), SessionError> {
        if self.status != SessionStatus::Pending {
            return Err(SessionError::AlreadyProcessed(self.session_id.to_string()));
        }
        if payee != self.payee {
            return Err(SessionError::NotFound(self.session_id.to_string()));
        }

        // A stale accept can arrive after the payee dropped their
        // connection. The session stays Pending; the payee may still
        // reconnect and accept inside the acceptance window.
        if !self.deps.relay.is_reachable(self.payee.clone()).await? {
            return Err(SessionError::PayeeUnavailable("offline".to_string()));
        }

        let entry = self.deps.ledger.ledger_entry(&self.payer).await?;
        if entry.balance < self.rate {
            let available = entry.balance;
            notify::dispatch(
                &self.deps.sink,
                Notification::PaymentFailed {
                    session_id: self.session_id.clone(),
                    payer: self.payer.clone(),
                    required: self.rate,
                    available,
                },
            )
            .await;
            self.finalize(EndReason::InsufficientBalance).await;
            return Err(SessionError::InsufficientFunds {
                required: self.rate,
                available,
            });
        }

        self.deps
            .ledger
            .begin_session(&self.session_id, Utc::now())
            .await?;
        self.status = SessionStatus::Active;

        info!(
            target: "sc.actor.session",
            session_id = %self.session_id,
            "Session accepted, billing armed"
        );
        notify::dispatch(
            &self.deps.sink,
            Notification::SessionAccepted {
                session_id: self.session_id.clone(),
            },
        )
        .await;

        Ok(())
    }

    async fn handle_decline(&mut self, payee: UserId) -> Result<(), SessionError> {
        if self.status != SessionStatus::Pending {
            return Err(SessionError::AlreadyProcessed(self.session_id.to_string()));
        }
        if payee != self.payee {
            return Err(SessionError::NotFound(self.session_id.to_string()));
        }

        self.finalize(EndReason::Declined).await;
        Ok(())
    }

    async fn handle_end(
        &mut self,
        requested_by: UserId,
        reason: EndReason,
    ) -> Result<(), SessionError> {
        if self.status == SessionStatus::Ended {
            return Err(SessionError::AlreadyEnded(self.session_id.to_string()));
        }
        if requested_by != self.payer && requested_by != self.payee {
            return Err(SessionError::Unauthorized);
        }

        self.finalize(reason).await;
        Ok(())
    }

    /// The acceptance window elapsed without an accept or decline.
    async fn handle_pending_timeout(&mut self) {
        if self.status != SessionStatus::Pending {
            return;
        }
        info!(
            target: "sc.actor.session",
            session_id = %self.session_id,
            "Pending session timed out without acceptance"
        );
        self.finalize(EndReason::Timeout).await;
    }

    /// One billed minute.
    async fn handle_tick(&mut self) {
        match self.deps.billing.charge_tick(&self.session_id).await {
            Ok(TickOutcome::Charged(charge)) => {
                self.deps.metrics.tick_charged();
                debug!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    amount = %charge.amount,
                    balance_after = %charge.balance_after,
                    "Billing tick applied"
                );
            }

            Ok(TickOutcome::InsufficientFunds {
                required,
                available,
            }) => {
                info!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    required = %required,
                    available = %available,
                    "Payer cannot cover next minute, ending session"
                );
                notify::dispatch(
                    &self.deps.sink,
                    Notification::PaymentFailed {
                        session_id: self.session_id.clone(),
                        payer: self.payer.clone(),
                        required,
                        available,
                    },
                )
                .await;
                self.finalize(EndReason::InsufficientBalance).await;
            }

            Ok(TickOutcome::SessionNotActive) => {
                // Ended through another path; sync the local view and stop.
                warn!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    "Tick refused: session no longer Active"
                );
                self.status = SessionStatus::Ended;
            }

            Err(err) => {
                // All retries exhausted. The minute goes unbilled; skipping
                // is safe because the store applied nothing.
                self.deps.metrics.tick_skipped();
                warn!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    error = %err,
                    "Billing tick skipped after retries"
                );
            }
        }
    }

    /// Transition to Ended in the ledger and emit the terminal notification.
    async fn finalize(&mut self, reason: EndReason) {
        if self.status == SessionStatus::Ended {
            return;
        }

        match self
            .deps
            .ledger
            .finalize_session(&self.session_id, Utc::now(), reason)
            .await
        {
            Ok(record) => {
                self.status = SessionStatus::Ended;
                self.deps.metrics.session_ended();
                info!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    reason = %reason,
                    duration_secs = record.duration_secs,
                    total_cost = %record.total_cost,
                    "Session ended"
                );
                let notification = match reason {
                    EndReason::Declined => Notification::SessionDeclined {
                        session_id: self.session_id.clone(),
                    },
                    _ => Notification::SessionEnded {
                        session_id: self.session_id.clone(),
                        reason,
                    },
                };
                notify::dispatch(&self.deps.sink, notification).await;
            }

            Err(LedgerError::AlreadyEnded) => {
                // Someone else finalized first; their notification stands.
                self.status = SessionStatus::Ended;
            }

            Err(err) => {
                error!(
                    target: "sc.actor.session",
                    session_id = %self.session_id,
                    error = %err,
                    "Failed to finalize session"
                );
                // Exit anyway; the supervisor's orphan sweep will settle
                // the record once the store recovers.
                self.status = SessionStatus::Ended;
            }
        }
    }
}
