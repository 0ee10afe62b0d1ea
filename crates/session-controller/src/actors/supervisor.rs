//! `SessionSupervisorActor` - singleton supervisor for session actors.
//!
//! The supervisor is the top-level actor in the hierarchy:
//!
//! - Singleton per controller instance
//! - Validates session requests and spawns one `SessionActor` per session
//! - Routes accept/decline/end to the owning session actor
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`) and
//!   settles any open session record left behind by a dead actor
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the supervisor:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to all children)
//! 3. Waits for session actors to finalize and exit

use crate::actors::messages::{SupervisorMessage, SupervisorStatus};
use crate::actors::session::{SessionActor, SessionActorHandle, SessionDeps};
use crate::billing::BillingEngine;
use crate::errors::SessionError;
use crate::notify::{self, Notification, NotificationSink};
use crate::observability::EngineMetrics;
use crate::rates::RateSource;
use crate::relay::{ClientEvent, RelayHandle};

use chrono::Utc;
use ledger::{
    EndReason, LedgerError, LedgerStore, Modality, SessionId, SessionRecord, SessionStatus, UserId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the supervisor mailbox.
const SUPERVISOR_CHANNEL_BUFFER: usize = 1000;

/// Everything the supervisor (and its session actors) depend on.
pub struct SupervisorDeps {
    pub controller_id: String,
    pub ledger: Arc<dyn LedgerStore>,
    pub billing: Arc<BillingEngine>,
    pub rates: Arc<dyn RateSource>,
    pub relay: RelayHandle,
    pub sink: Arc<dyn NotificationSink>,
    pub metrics: Arc<EngineMetrics>,
    pub tick_interval: Duration,
    pub pending_timeout: Duration,
}

/// Handle to the `SessionSupervisorActor`.
///
/// This is the public interface for driving the session lifecycle.
/// All methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct SessionSupervisorHandle {
    sender: mpsc::Sender<SupervisorMessage>,
    cancel_token: CancellationToken,
}

impl SessionSupervisorHandle {
    /// Create a new `SessionSupervisorActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(deps: SupervisorDeps) -> Self {
        let (sender, receiver) = mpsc::channel(SUPERVISOR_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor =
            SessionSupervisorActor::new(receiver, sender.clone(), cancel_token.clone(), deps);

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Request a session: payer asks payee for a live session.
    ///
    /// Returns the new session id; the payee is notified out of band.
    pub async fn request_session(
        &self,
        payer: UserId,
        payee: UserId,
        modality: Modality,
    ) -> Result<SessionId, SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SupervisorMessage::RequestSession {
                payer,
                payee,
                modality,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Payee accepts a Pending session.
    pub async fn accept_session(
        &self,
        session_id: SessionId,
        payee: UserId,
    ) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SupervisorMessage::AcceptSession {
                session_id,
                payee,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Payee declines a Pending session.
    pub async fn decline_session(
        &self,
        session_id: SessionId,
        payee: UserId,
    ) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SupervisorMessage::DeclineSession {
                session_id,
                payee,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// A party ends a session normally.
    ///
    /// The caller never picks the terminal reason; a user-initiated end is
    /// always recorded as `completed`. Disconnect teardown goes through
    /// [`Self::end_session_with_reason`].
    pub async fn end_session(
        &self,
        session_id: SessionId,
        requested_by: UserId,
    ) -> Result<(), SessionError> {
        self.end_session_with_reason(session_id, requested_by, EndReason::Completed)
            .await
    }

    /// Internal end carrying its own terminal reason (relay disconnects).
    pub(crate) async fn end_session_with_reason(
        &self,
        session_id: SessionId,
        requested_by: UserId,
        reason: EndReason,
    ) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SupervisorMessage::EndSession {
                session_id,
                requested_by,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current supervisor status.
    pub async fn get_status(&self) -> Result<SupervisorStatus, SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SupervisorMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SupervisorMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token (e.g. for the health server).
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed session.
struct ManagedSession {
    /// Handle to the session actor.
    handle: SessionActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
}

/// The `SessionSupervisorActor` implementation.
struct SessionSupervisorActor {
    receiver: mpsc::Receiver<SupervisorMessage>,
    /// Cloned into each session actor so it can report `SessionClosed`.
    self_sender: mpsc::Sender<SupervisorMessage>,
    /// Root cancellation token.
    cancel_token: CancellationToken,
    /// Managed session actors by id.
    sessions: HashMap<SessionId, ManagedSession>,
    /// Whether the supervisor is accepting new sessions.
    accepting_new: bool,
    deps: SupervisorDeps,
}

impl SessionSupervisorActor {
    fn new(
        receiver: mpsc::Receiver<SupervisorMessage>,
        self_sender: mpsc::Sender<SupervisorMessage>,
        cancel_token: CancellationToken,
        deps: SupervisorDeps,
    ) -> Self {
        Self {
            receiver,
            self_sender,
            cancel_token,
            sessions: HashMap::new(),
            accepting_new: true,
            deps,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "sc.actor.supervisor", fields(controller_id = %self.deps.controller_id))]
    async fn run(mut self) {
        info!(
            target: "sc.actor.supervisor",
            controller_id = %self.deps.controller_id,
            "SessionSupervisorActor started"
        );

        loop {
            // Check for terminated session actors
            self.check_session_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.supervisor",
                        controller_id = %self.deps.controller_id,
                        "SessionSupervisorActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "sc.actor.supervisor",
                                controller_id = %self.deps.controller_id,
                                "SessionSupervisorActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.supervisor",
            controller_id = %self.deps.controller_id,
            sessions_remaining = self.sessions.len(),
            "SessionSupervisorActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: SupervisorMessage) {
        match message {
            SupervisorMessage::RequestSession {
                payer,
                payee,
                modality,
                respond_to,
            } => {
                let result = self.handle_request(payer, payee, modality).await;
                let _ = respond_to.send(result);
            }

            SupervisorMessage::AcceptSession {
                session_id,
                payee,
                respond_to,
            } => {
                let result = self.handle_accept(session_id, payee).await;
                let _ = respond_to.send(result);
            }

            SupervisorMessage::DeclineSession {
                session_id,
                payee,
                respond_to,
            } => {
                let result = self.handle_decline(session_id, payee).await;
                let _ = respond_to.send(result);
            }

            SupervisorMessage::EndSession {
                session_id,
                requested_by,
                reason,
                respond_to,
            } => {
                let result = self.handle_end(session_id, requested_by, reason).await;
                let _ = respond_to.send(result);
            }

            SupervisorMessage::SessionClosed { session_id } => {
                self.handle_session_closed(&session_id);
            }

            SupervisorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(SupervisorStatus {
                    open_sessions: self.sessions.len(),
                    is_draining: !self.accepting_new,
                });
            }

            SupervisorMessage::Shutdown { respond_to } => {
                info!(
                    target: "sc.actor.supervisor",
                    controller_id = %self.deps.controller_id,
                    open_sessions = self.sessions.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.cancel_token.cancel();
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    /// Validate and create a new Pending session, spawning its actor.
    async fn handle_request(
        &mut self,
        payer: UserId,
        payee: UserId,
        modality: Modality,
    ) -> Result<SessionId, SessionError> {
        if !self.accepting_new {
            return Err(SessionError::Conflict("controller is draining".to_string()));
        }
        if payer == payee {
            return Err(SessionError::InvalidParty);
        }

        if !self.deps.relay.is_reachable(payee.clone()).await? {
            return Err(SessionError::PayeeUnavailable("offline".to_string()));
        }

        let Some(card) = self.deps.rates.rate_card(&payee).await else {
            return Err(SessionError::PayeeUnavailable(
                "no published rates".to_string(),
            ));
        };
        let rate = card.rate_for(modality);

        // One open session per party: a payee cannot be double-booked and a
        // payer cannot be double-billed.
        if self.deps.ledger.find_open_session_for(&payee).await?.is_some() {
            return Err(SessionError::PayeeUnavailable(
                "already in a session".to_string(),
            ));
        }
        if self.deps.ledger.find_open_session_for(&payer).await?.is_some() {
            return Err(SessionError::Conflict(
                "You already have an open session".to_string(),
            ));
        }

        self.deps.ledger.ensure_user(&payer).await?;
        self.deps.ledger.ensure_user(&payee).await?;

        // Affordability gate: the payer must at least cover the first minute.
        let entry = self.deps.ledger.ledger_entry(&payer).await?;
        if entry.balance < rate {
            return Err(SessionError::InsufficientFunds {
                required: rate,
                available: entry.balance,
            });
        }

        let record = SessionRecord::pending(
            payer.clone(),
            payee.clone(),
            modality,
            rate,
            Utc::now(),
        );
        let session_id = record.id.clone();
        self.deps.ledger.create_session(record).await?;

        debug!(
            target: "sc.actor.supervisor",
            controller_id = %self.deps.controller_id,
            session_id = %session_id,
            "Spawning session actor"
        );

        let session_token = self.cancel_token.child_token();
        let (handle, task_handle) = SessionActor::spawn(
            session_id.clone(),
            payer.clone(),
            payee.clone(),
            rate,
            session_token,
            SessionDeps {
                ledger: Arc::clone(&self.deps.ledger),
                billing: Arc::clone(&self.deps.billing),
                relay: self.deps.relay.clone(),
                sink: Arc::clone(&self.deps.sink),
                metrics: Arc::clone(&self.deps.metrics),
                supervisor_tx: self.self_sender.clone(),
                tick_interval: self.deps.tick_interval,
                pending_timeout: self.deps.pending_timeout,
            },
        );

        self.sessions.insert(
            session_id.clone(),
            ManagedSession {
                handle,
                task_handle,
            },
        );
        self.deps.metrics.session_created();

        info!(
            target: "sc.actor.supervisor",
            controller_id = %self.deps.controller_id,
            session_id = %session_id,
            payer = %payer,
            payee = %payee,
            modality = %modality.as_str(),
            rate = %rate,
            total_sessions = self.sessions.len(),
            "Session requested"
        );

        // Payee sees the incoming request on their live connection; the
        // sink covers out-of-band channels.
        let _ = self
            .deps
            .relay
            .notify_user(
                payee.clone(),
                ClientEvent::SessionRequested {
                    session_id: session_id.clone(),
                    payer: payer.clone(),
                    modality,
                    rate,
                },
            )
            .await;
        notify::dispatch(
            &self.deps.sink,
            Notification::SessionRequested {
                session_id: session_id.clone(),
                payer,
                payee,
                modality,
            },
        )
        .await;

        Ok(session_id)
    }

    async fn handle_accept(
        &mut self,
        session_id: SessionId,
        payee: UserId,
    ) -> Result<(), SessionError> {
        if let Some(managed) = self.sessions.get(&session_id) {
            match managed.handle.accept(payee.clone()).await {
                // Actor already gone; fall through to the record.
                Err(SessionError::Internal(_)) => {}
                other => return other,
            }
        }
        self.stale_pending_action(&session_id, &payee).await
    }

    async fn handle_decline(
        &mut self,
        session_id: SessionId,
        payee: UserId,
    ) -> Result<(), SessionError> {
        if let Some(managed) = self.sessions.get(&session_id) {
            match managed.handle.decline(payee.clone()).await {
                Err(SessionError::Internal(_)) => {}
                other => return other,
            }
        }
        self.stale_pending_action(&session_id, &payee).await
    }

    async fn handle_end(
        &mut self,
        session_id: SessionId,
        requested_by: UserId,
        reason: EndReason,
    ) -> Result<(), SessionError> {
        if let Some(managed) = self.sessions.get(&session_id) {
            match managed.handle.end(requested_by.clone(), reason).await {
                Err(SessionError::Internal(_)) => {}
                other => return other,
            }
        }

        // No live actor. Answer from the record, settling an orphan if the
        // controller restarted underneath an open session.
        let record = self.lookup(&session_id).await?;
        if !record.involves(&requested_by) {
            return Err(SessionError::Unauthorized);
        }
        if !record.is_open() {
            return Err(SessionError::AlreadyEnded(session_id.to_string()));
        }
        self.settle_orphan(&record, reason).await;
        Ok(())
    }

    /// Accept/decline aimed at a session with no live actor.
    async fn stale_pending_action(
        &mut self,
        session_id: &SessionId,
        payee: &UserId,
    ) -> Result<(), SessionError> {
        let record = self.lookup(session_id).await?;
        if &record.payee != payee {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        if record.is_open() {
            // Open record without an actor means its ticker is gone too;
            // force-terminate rather than billing unsupervised.
            self.settle_orphan(&record, EndReason::PeerDisconnected).await;
        }
        Err(SessionError::AlreadyProcessed(session_id.to_string()))
    }

    async fn lookup(&self, session_id: &SessionId) -> Result<SessionRecord, SessionError> {
        match self.deps.ledger.session(session_id).await {
            Ok(record) => Ok(record),
            Err(LedgerError::SessionNotFound(id)) => Err(SessionError::NotFound(id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Finalize an open session record that has no supervising actor.
    async fn settle_orphan(&self, record: &SessionRecord, reason: EndReason) {
        warn!(
            target: "sc.actor.supervisor",
            controller_id = %self.deps.controller_id,
            session_id = %record.id,
            reason = %reason,
            "Settling open session without a live actor"
        );
        match self
            .deps
            .ledger
            .finalize_session(&record.id, Utc::now(), reason)
            .await
        {
            Ok(_) => {
                self.deps.metrics.session_ended();
                notify::dispatch(
                    &self.deps.sink,
                    Notification::SessionEnded {
                        session_id: record.id.clone(),
                        reason,
                    },
                )
                .await;
            }
            Err(LedgerError::AlreadyEnded) => {}
            Err(err) => {
                error!(
                    target: "sc.actor.supervisor",
                    controller_id = %self.deps.controller_id,
                    session_id = %record.id,
                    error = %err,
                    "Failed to settle orphaned session"
                );
            }
        }
    }

    /// A session actor finished cleanly; drop it from the map.
    ///
    /// Cleanup of the task handle is spawned so the message loop never
    /// blocks on a child exiting.
    fn handle_session_closed(&mut self, session_id: &SessionId) {
        if let Some(managed) = self.sessions.remove(session_id) {
            debug!(
                target: "sc.actor.supervisor",
                controller_id = %self.deps.controller_id,
                session_id = %session_id,
                total_sessions = self.sessions.len(),
                "Session actor closed"
            );

            let session_id = session_id.clone();
            let controller_id = self.deps.controller_id.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(
                            target: "sc.actor.supervisor",
                            controller_id = %controller_id,
                            session_id = %session_id,
                            error = ?e,
                            "Session actor task panicked during removal"
                        );
                    }
                    Err(_) => {
                        warn!(
                            target: "sc.actor.supervisor",
                            controller_id = %controller_id,
                            session_id = %session_id,
                            "Session actor task cleanup timed out"
                        );
                    }
                }
            });
        }
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "sc.actor.supervisor",
            controller_id = %self.deps.controller_id,
            open_sessions = self.sessions.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        // Cancel all session actors (already done via parent token, but be
        // explicit)
        for (session_id, managed) in &self.sessions {
            debug!(
                target: "sc.actor.supervisor",
                controller_id = %self.deps.controller_id,
                session_id = %session_id,
                "Cancelling session actor"
            );
            managed.handle.cancel();
        }

        // Wait for all session tasks to complete
        for (session_id, managed) in self.sessions.drain() {
            match tokio::time::timeout(Duration::from_secs(30), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sc.actor.supervisor",
                        controller_id = %self.deps.controller_id,
                        session_id = %session_id,
                        "Session actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sc.actor.supervisor",
                        controller_id = %self.deps.controller_id,
                        session_id = %session_id,
                        error = ?e,
                        "Session actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sc.actor.supervisor",
                        controller_id = %self.deps.controller_id,
                        session_id = %session_id,
                        "Session actor shutdown timed out"
                    );
                }
            }
        }

        info!(
            target: "sc.actor.supervisor",
            controller_id = %self.deps.controller_id,
            "Graceful shutdown complete"
        );
    }

    /// Check health of managed session actors.
    async fn check_session_health(&mut self) {
        let mut finished = Vec::new();

        for (session_id, managed) in &self.sessions {
            if managed.task_handle.is_finished() {
                finished.push(session_id.clone());
            }
        }

        for session_id in finished {
            if let Some(managed) = self.sessions.remove(&session_id) {
                match managed.task_handle.await {
                    Ok(()) => {
                        // Clean exit racing its own SessionClosed message.
                        debug!(
                            target: "sc.actor.supervisor",
                            controller_id = %self.deps.controller_id,
                            session_id = %session_id,
                            "Session actor exited cleanly"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "sc.actor.supervisor",
                                controller_id = %self.deps.controller_id,
                                session_id = %session_id,
                                error = ?join_error,
                                "Session actor panicked"
                            );
                        }
                        // The actor died without finalizing; settle the
                        // record so its ticker can never be orphaned.
                        if let Ok(record) = self.deps.ledger.session(&session_id).await {
                            if record.is_open() {
                                self.settle_orphan(&record, EndReason::PeerDisconnected)
                                    .await;
                            }
                        }
                    }
                }
            }
        }
    }
}
