//! `RelayActor` - single-writer owner of the connection map and rooms.
//!
//! The relay is the only task that touches who-is-online state:
//!
//! - One registered connection per user (re-register replaces the old one)
//! - One room per session; only the session's two parties may join
//! - Opaque signaling payloads forwarded to the other room members
//! - Chat messages persisted through [`ChatArchive`] before forwarding
//!
//! A disconnect is one message through the same mailbox, so "remove the
//! connection, tear down room membership, end open sessions" can never
//! interleave with a concurrent join or send. The relay never awaits the
//! lifecycle supervisor inline (session teardown is spawned); the
//! supervisor is free to query the relay without risking a cycle.

use crate::actors::supervisor::SessionSupervisorHandle;
use crate::errors::SessionError;
use async_trait::async_trait;
use ledger::{EndReason, LedgerError, LedgerStore, Money, SessionId, UserId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the relay mailbox.
const RELAY_CHANNEL_BUFFER: usize = 1000;

/// Per-connection event buffer size.
pub const CONNECTION_EVENT_BUFFER: usize = 64;

/// One event pushed to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A payer wants a session; shown to the payee as an incoming request.
    SessionRequested {
        session_id: SessionId,
        payer: UserId,
        modality: ledger::Modality,
        rate: Money,
    },
    /// Another party joined the session's room.
    RoomPeerJoined {
        session_id: SessionId,
        user: UserId,
        display_name: String,
    },
    /// Another party left the session's room.
    RoomPeerLeft { session_id: SessionId, user: UserId },
    /// Opaque signaling payload from the other party.
    Signal {
        session_id: SessionId,
        from: UserId,
        payload: serde_json::Value,
    },
    /// Chat message from the other party (already archived).
    Chat {
        session_id: SessionId,
        from: UserId,
        body: String,
    },
    /// A payee's availability changed.
    AvailabilityChanged { user: UserId, online: bool },
}

/// Payload kinds a room member may send through the relay.
#[derive(Debug, Clone)]
pub enum RelayPayload {
    /// Opaque signaling blob; the relay never inspects it.
    Signal(serde_json::Value),
    /// Chat text; archived before forwarding.
    Chat { body: String },
}

/// One user's registered connection.
pub struct UserConnection {
    /// Unique connection identifier (new on every register).
    pub connection_id: String,
    /// Public display name shown to room peers.
    pub display_name: String,
    /// Whether this user offers sessions (payee side).
    pub is_payee: bool,
    /// Push channel to the client.
    pub sender: mpsc::Sender<ClientEvent>,
}

#[derive(Debug, Error)]
#[error("chat archive error: {0}")]
pub struct ArchiveError(pub String);

/// Durable chat history seam.
///
/// The relay awaits the store call before forwarding, so a chat message a
/// peer has seen is always recoverable from the archive.
#[async_trait]
pub trait ChatArchive: Send + Sync {
    async fn store(
        &self,
        session: &SessionId,
        from: &UserId,
        body: &str,
    ) -> Result<(), ArchiveError>;
}

/// One archived chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub session: SessionId,
    pub from: UserId,
    pub body: String,
}

/// In-memory chat archive.
#[derive(Default)]
pub struct MemoryChatArchive {
    records: Mutex<Vec<ChatRecord>>,
    failing: Mutex<bool>,
}

impl MemoryChatArchive {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent stores fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut f) = self.failing.lock() {
            *f = failing;
        }
    }

    /// Snapshot of everything archived so far, in arrival order.
    pub fn records(&self) -> Vec<ChatRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatArchive for MemoryChatArchive {
    async fn store(
        &self,
        session: &SessionId,
        from: &UserId,
        body: &str,
    ) -> Result<(), ArchiveError> {
        if self.failing.lock().map(|f| *f).unwrap_or(false) {
            return Err(ArchiveError("archive unavailable".to_string()));
        }
        if let Ok(mut records) = self.records.lock() {
            records.push(ChatRecord {
                session: session.clone(),
                from: from.clone(),
                body: body.to_string(),
            });
        }
        Ok(())
    }
}

/// Messages handled by the relay actor.
enum RelayMessage {
    Register {
        user: UserId,
        connection: UserConnection,
    },
    JoinRoom {
        session_id: SessionId,
        user: UserId,
        respond_to: tokio::sync::oneshot::Sender<Result<(), SessionError>>,
    },
    Relay {
        session_id: SessionId,
        from: UserId,
        payload: RelayPayload,
        respond_to: tokio::sync::oneshot::Sender<Result<(), SessionError>>,
    },
    Leave {
        user: UserId,
    },
    IsReachable {
        user: UserId,
        respond_to: tokio::sync::oneshot::Sender<bool>,
    },
    NotifyUser {
        user: UserId,
        event: ClientEvent,
    },
    BindLifecycle {
        supervisor: SessionSupervisorHandle,
    },
}

/// Handle to the `RelayActor`.
#[derive(Clone)]
pub struct RelayHandle {
    sender: mpsc::Sender<RelayMessage>,
    cancel_token: CancellationToken,
}

impl RelayHandle {
    /// Spawn the relay actor and return a handle to it.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        archive: Arc<dyn ChatArchive>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(RELAY_CHANNEL_BUFFER);

        let actor = RelayActor {
            receiver,
            cancel_token: cancel_token.clone(),
            ledger,
            archive,
            supervisor: None,
            connections: HashMap::new(),
            rooms: HashMap::new(),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Late-bind the lifecycle supervisor (the two handles reference each
    /// other, so one side has to be wired after construction).
    pub async fn bind_lifecycle(
        &self,
        supervisor: SessionSupervisorHandle,
    ) -> Result<(), SessionError> {
        self.sender
            .send(RelayMessage::BindLifecycle { supervisor })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))
    }

    /// Register (or replace) a user's connection. Last registration wins.
    pub async fn register_user(
        &self,
        user: UserId,
        connection: UserConnection,
    ) -> Result<(), SessionError> {
        self.sender
            .send(RelayMessage::Register { user, connection })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))
    }

    /// Join the room for a session the user is a party to.
    pub async fn join_room(
        &self,
        session_id: SessionId,
        user: UserId,
    ) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RelayMessage::JoinRoom {
                session_id,
                user,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Relay a payload to the other members of the session's room.
    pub async fn relay_message(
        &self,
        session_id: SessionId,
        from: UserId,
        payload: RelayPayload,
    ) -> Result<(), SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RelayMessage::Relay {
                session_id,
                from,
                payload,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Explicit leave and transport disconnect are the same teardown.
    /// Idempotent: leaving while absent is a no-op.
    pub async fn leave(&self, user: UserId) -> Result<(), SessionError> {
        self.sender
            .send(RelayMessage::Leave { user })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))
    }

    /// Whether the user currently has a registered connection.
    pub async fn is_reachable(&self, user: UserId) -> Result<bool, SessionError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RelayMessage::IsReachable {
                user,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }

    /// Push an out-of-band event to a user, dropped silently if offline.
    pub async fn notify_user(&self, user: UserId, event: ClientEvent) -> Result<(), SessionError> {
        self.sender
            .send(RelayMessage::NotifyUser { user, event })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))
    }

    /// Cancel the relay actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `RelayActor` implementation.
struct RelayActor {
    receiver: mpsc::Receiver<RelayMessage>,
    cancel_token: CancellationToken,
    /// Read-only session lookups for room authorization.
    ledger: Arc<dyn LedgerStore>,
    archive: Arc<dyn ChatArchive>,
    /// Bound after construction; session teardown is skipped until then.
    supervisor: Option<SessionSupervisorHandle>,
    /// One registered connection per user.
    connections: HashMap<UserId, UserConnection>,
    /// Room membership per session.
    rooms: HashMap<SessionId, HashSet<UserId>>,
}

impl RelayActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "sc.actor.relay")]
    async fn run(mut self) {
        info!(target: "sc.actor.relay", "RelayActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.relay",
                        connections = self.connections.len(),
                        "RelayActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(target: "sc.actor.relay", "RelayActor channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!(target: "sc.actor.relay", "RelayActor stopped");
    }

    async fn handle_message(&mut self, message: RelayMessage) {
        match message {
            RelayMessage::Register { user, connection } => {
                self.handle_register(user, connection).await;
            }

            RelayMessage::JoinRoom {
                session_id,
                user,
                respond_to,
            } => {
                let result = self.handle_join_room(session_id, user).await;
                let _ = respond_to.send(result);
            }

            RelayMessage::Relay {
                session_id,
                from,
                payload,
                respond_to,
            } => {
                let result = self.handle_relay(session_id, from, payload).await;
                let _ = respond_to.send(result);
            }

            RelayMessage::Leave { user } => {
                self.handle_leave(user).await;
            }

            RelayMessage::IsReachable { user, respond_to } => {
                let _ = respond_to.send(self.connections.contains_key(&user));
            }

            RelayMessage::NotifyUser { user, event } => {
                if let Some(connection) = self.connections.get(&user) {
                    let _ = connection.sender.send(event).await;
                }
            }

            RelayMessage::BindLifecycle { supervisor } => {
                self.supervisor = Some(supervisor);
            }
        }
    }

    async fn handle_register(&mut self, user: UserId, connection: UserConnection) {
        let is_payee = connection.is_payee;
        let replaced = self.connections.insert(user.clone(), connection).is_some();

        info!(
            target: "sc.actor.relay",
            user = %user,
            replaced,
            "User connection registered"
        );

        // A payee coming online is visible to everyone else.
        if is_payee && !replaced {
            self.broadcast_availability(&user, true).await;
        }
    }

    async fn handle_join_room(
        &mut self,
        session_id: SessionId,
        user: UserId,
    ) -> Result<(), SessionError> {
        let record = match self.ledger.session(&session_id).await {
            Ok(record) => record,
            Err(LedgerError::SessionNotFound(id)) => {
                return Err(SessionError::NotFound(id.to_string()))
            }
            Err(err) => return Err(err.into()),
        };

        if !record.involves(&user) {
            return Err(SessionError::Unauthorized);
        }
        if !record.is_open() {
            return Err(SessionError::AlreadyEnded(session_id.to_string()));
        }

        let display_name = match self.connections.get(&user) {
            Some(connection) => connection.display_name.clone(),
            // No registered connection to deliver room traffic to.
            None => return Err(SessionError::NotInRoom(user.to_string())),
        };

        let members = self.rooms.entry(session_id.clone()).or_default();
        if !members.insert(user.clone()) {
            // Re-join is a no-op.
            return Ok(());
        }
        let peers: Vec<UserId> = members.iter().filter(|m| **m != user).cloned().collect();

        debug!(
            target: "sc.actor.relay",
            session_id = %session_id,
            user = %user,
            "User joined session room"
        );

        for peer in peers {
            if let Some(connection) = self.connections.get(&peer) {
                let _ = connection
                    .sender
                    .send(ClientEvent::RoomPeerJoined {
                        session_id: session_id.clone(),
                        user: user.clone(),
                        display_name: display_name.clone(),
                    })
                    .await;
            }
        }

        Ok(())
    }

    async fn handle_relay(
        &mut self,
        session_id: SessionId,
        from: UserId,
        payload: RelayPayload,
    ) -> Result<(), SessionError> {
        let in_room = self
            .rooms
            .get(&session_id)
            .is_some_and(|members| members.contains(&from));
        if !in_room {
            return Err(SessionError::NotInRoom(from.to_string()));
        }

        let event = match payload {
            RelayPayload::Signal(payload) => ClientEvent::Signal {
                session_id: session_id.clone(),
                from: from.clone(),
                payload,
            },
            RelayPayload::Chat { body } => {
                // Archive before forwarding: a peer never sees a chat line
                // that cannot later be recovered from history.
                self.archive
                    .store(&session_id, &from, &body)
                    .await
                    .map_err(|e| SessionError::Internal(format!("chat archive failed: {e}")))?;
                ClientEvent::Chat {
                    session_id: session_id.clone(),
                    from: from.clone(),
                    body,
                }
            }
        };

        let peers: Vec<UserId> = self
            .rooms
            .get(&session_id)
            .map(|members| members.iter().filter(|m| **m != from).cloned().collect())
            .unwrap_or_default();

        for peer in peers {
            if let Some(connection) = self.connections.get(&peer) {
                let _ = connection.sender.send(event.clone()).await;
            }
        }

        Ok(())
    }

    /// Full teardown for one user: connection gone, rooms left, open
    /// sessions ended with `peer_disconnected`.
    async fn handle_leave(&mut self, user: UserId) {
        let removed = self.connections.remove(&user);

        let mut left_sessions = Vec::new();
        self.rooms.retain(|session_id, members| {
            if members.remove(&user) {
                left_sessions.push(session_id.clone());
            }
            !members.is_empty()
        });

        for session_id in &left_sessions {
            if let Some(members) = self.rooms.get(session_id) {
                for peer in members.clone() {
                    if let Some(connection) = self.connections.get(&peer) {
                        let _ = connection
                            .sender
                            .send(ClientEvent::RoomPeerLeft {
                                session_id: session_id.clone(),
                                user: user.clone(),
                            })
                            .await;
                    }
                }
            }
        }

        let Some(connection) = removed else {
            return; // Never registered; nothing else to tear down.
        };

        info!(
            target: "sc.actor.relay",
            user = %user,
            connection_id = %connection.connection_id,
            rooms_left = left_sessions.len(),
            "User disconnected"
        );

        if connection.is_payee {
            self.broadcast_availability(&user, false).await;
        }

        // End any session the user was mid-room in. Spawned so the relay
        // never blocks on the supervisor (which may be blocked on us).
        if let Some(supervisor) = self.supervisor.clone() {
            for session_id in left_sessions {
                let supervisor = supervisor.clone();
                let user = user.clone();
                tokio::spawn(async move {
                    match supervisor
                        .end_session_with_reason(
                            session_id.clone(),
                            user,
                            EndReason::PeerDisconnected,
                        )
                        .await
                    {
                        Ok(())
                        | Err(SessionError::AlreadyEnded(_) | SessionError::NotFound(_)) => {}
                        Err(err) => {
                            warn!(
                                target: "sc.actor.relay",
                                session_id = %session_id,
                                error = %err,
                                "Failed to end session after disconnect"
                            );
                        }
                    }
                });
            }
        }
    }

    async fn broadcast_availability(&self, user: &UserId, online: bool) {
        for (other, connection) in &self.connections {
            if other == user {
                continue;
            }
            let _ = connection
                .sender
                .send(ClientEvent::AvailabilityChanged {
                    user: user.clone(),
                    online,
                })
                .await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledger::{MemoryLedger, Modality, SessionRecord};

    struct TestClient {
        user: UserId,
        events: mpsc::Receiver<ClientEvent>,
    }

    impl TestClient {
        fn try_next(&mut self) -> Option<ClientEvent> {
            self.events.try_recv().ok()
        }
    }

    async fn register(relay: &RelayHandle, user: &str, is_payee: bool) -> TestClient {
        let (tx, rx) = mpsc::channel(CONNECTION_EVENT_BUFFER);
        relay
            .register_user(
                UserId::from(user),
                UserConnection {
                    connection_id: uuid::Uuid::new_v4().to_string(),
                    display_name: format!("{user} display"),
                    is_payee,
                    sender: tx,
                },
            )
            .await
            .unwrap();
        TestClient {
            user: UserId::from(user),
            events: rx,
        }
    }

    async fn seed_session(ledger: &MemoryLedger, payer: &str, payee: &str) -> SessionId {
        let record = SessionRecord::pending(
            UserId::from(payer),
            UserId::from(payee),
            Modality::Video,
            ledger::Money::from_cents(399),
            Utc::now(),
        );
        let id = record.id.clone();
        ledger.create_session(record).await.unwrap();
        id
    }

    fn setup() -> (Arc<MemoryLedger>, Arc<MemoryChatArchive>, RelayHandle) {
        let ledger = Arc::new(MemoryLedger::new());
        let archive = Arc::new(MemoryChatArchive::new());
        let relay = RelayHandle::new(
            Arc::clone(&ledger) as Arc<dyn LedgerStore>,
            Arc::clone(&archive) as Arc<dyn ChatArchive>,
            CancellationToken::new(),
        );
        (ledger, archive, relay)
    }

    #[tokio::test]
    async fn register_makes_user_reachable_and_leave_clears_it() {
        let (_ledger, _archive, relay) = setup();

        assert!(!relay.is_reachable(UserId::from("payee-1")).await.unwrap());
        let _client = register(&relay, "payee-1", true).await;
        assert!(relay.is_reachable(UserId::from("payee-1")).await.unwrap());

        relay.leave(UserId::from("payee-1")).await.unwrap();
        assert!(!relay.is_reachable(UserId::from("payee-1")).await.unwrap());

        // Leaving again is a no-op, not an error.
        relay.leave(UserId::from("payee-1")).await.unwrap();
    }

    #[tokio::test]
    async fn join_room_requires_session_party() {
        let (ledger, _archive, relay) = setup();
        let session = seed_session(&ledger, "payer-1", "payee-1").await;

        let _payer = register(&relay, "payer-1", false).await;
        let _stranger = register(&relay, "stranger", false).await;

        relay
            .join_room(session.clone(), UserId::from("payer-1"))
            .await
            .unwrap();

        let err = relay
            .join_room(session.clone(), UserId::from("stranger"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Unauthorized));

        let err = relay
            .join_room(SessionId::from("no-such-session"), UserId::from("payer-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn join_notifies_existing_members() {
        let (ledger, _archive, relay) = setup();
        let session = seed_session(&ledger, "payer-1", "payee-1").await;

        let mut payer = register(&relay, "payer-1", false).await;
        let _payee = register(&relay, "payee-1", true).await;

        relay
            .join_room(session.clone(), UserId::from("payer-1"))
            .await
            .unwrap();
        relay
            .join_room(session.clone(), UserId::from("payee-1"))
            .await
            .unwrap();

        // Drain the availability event from payee registration, then the join.
        let mut saw_join = false;
        while let Some(event) = payer.try_next() {
            if let ClientEvent::RoomPeerJoined { user, .. } = event {
                assert_eq!(user, UserId::from("payee-1"));
                saw_join = true;
            }
        }
        assert!(saw_join, "payer should see the payee join");
    }

    #[tokio::test]
    async fn signal_reaches_other_member_only() {
        let (ledger, _archive, relay) = setup();
        let session = seed_session(&ledger, "payer-1", "payee-1").await;

        let mut payer = register(&relay, "payer-1", false).await;
        let mut payee = register(&relay, "payee-1", true).await;
        relay
            .join_room(session.clone(), payer.user.clone())
            .await
            .unwrap();
        relay
            .join_room(session.clone(), payee.user.clone())
            .await
            .unwrap();
        while payer.try_next().is_some() {}
        while payee.try_next().is_some() {}

        relay
            .relay_message(
                session.clone(),
                payer.user.clone(),
                RelayPayload::Signal(serde_json::json!({"sdp": "offer"})),
            )
            .await
            .unwrap();

        match payee.try_next() {
            Some(ClientEvent::Signal { from, payload, .. }) => {
                assert_eq!(from, UserId::from("payer-1"));
                assert_eq!(payload["sdp"], "offer");
            }
            other => panic!("expected Signal, got {other:?}"),
        }
        assert!(payer.try_next().is_none(), "sender gets no echo");
    }

    #[tokio::test]
    async fn relay_from_outside_room_is_rejected() {
        let (ledger, _archive, relay) = setup();
        let session = seed_session(&ledger, "payer-1", "payee-1").await;
        let _payer = register(&relay, "payer-1", false).await;

        // Registered but never joined the room.
        let err = relay
            .relay_message(
                session,
                UserId::from("payer-1"),
                RelayPayload::Signal(serde_json::json!({})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotInRoom(_)));
    }

    #[tokio::test]
    async fn chat_is_archived_before_forwarding() {
        let (ledger, archive, relay) = setup();
        let session = seed_session(&ledger, "payer-1", "payee-1").await;

        let mut payer = register(&relay, "payer-1", false).await;
        let mut payee = register(&relay, "payee-1", true).await;
        relay
            .join_room(session.clone(), payer.user.clone())
            .await
            .unwrap();
        relay
            .join_room(session.clone(), payee.user.clone())
            .await
            .unwrap();
        while payer.try_next().is_some() {}
        while payee.try_next().is_some() {}

        relay
            .relay_message(
                session.clone(),
                payer.user.clone(),
                RelayPayload::Chat {
                    body: "hello".to_string(),
                },
            )
            .await
            .unwrap();

        let records = archive.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records.first().map(|r| r.body.as_str()), Some("hello"));
        assert!(matches!(
            payee.try_next(),
            Some(ClientEvent::Chat { body, .. }) if body == "hello"
        ));
    }

    #[tokio::test]
    async fn chat_is_not_forwarded_when_archive_fails() {
        let (ledger, archive, relay) = setup();
        let session = seed_session(&ledger, "payer-1", "payee-1").await;

        let mut payer = register(&relay, "payer-1", false).await;
        let mut payee = register(&relay, "payee-1", true).await;
        relay
            .join_room(session.clone(), payer.user.clone())
            .await
            .unwrap();
        relay
            .join_room(session.clone(), payee.user.clone())
            .await
            .unwrap();
        while payer.try_next().is_some() {}
        while payee.try_next().is_some() {}

        archive.set_failing(true);
        let err = relay
            .relay_message(
                session,
                payer.user.clone(),
                RelayPayload::Chat {
                    body: "lost?".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Internal(_)));
        assert!(payee.try_next().is_none(), "unarchived chat never forwarded");
        assert!(archive.records().is_empty());
    }

    #[tokio::test]
    async fn payee_availability_is_broadcast() {
        let (_ledger, _archive, relay) = setup();

        let mut payer = register(&relay, "payer-1", false).await;
        let _payee = register(&relay, "payee-1", true).await;

        // Give the relay a chance to process both registrations.
        relay.is_reachable(UserId::from("payee-1")).await.unwrap();

        assert!(matches!(
            payer.try_next(),
            Some(ClientEvent::AvailabilityChanged { online: true, .. })
        ));

        relay.leave(UserId::from("payee-1")).await.unwrap();
        relay.is_reachable(UserId::from("payee-1")).await.unwrap();
        assert!(matches!(
            payer.try_next(),
            Some(ClientEvent::AvailabilityChanged { online: false, .. })
        ));
    }

    #[tokio::test]
    async fn leave_notifies_remaining_room_members() {
        let (ledger, _archive, relay) = setup();
        let session = seed_session(&ledger, "payer-1", "payee-1").await;

        let mut payer = register(&relay, "payer-1", false).await;
        let payee = register(&relay, "payee-1", true).await;
        relay
            .join_room(session.clone(), payer.user.clone())
            .await
            .unwrap();
        relay
            .join_room(session.clone(), payee.user.clone())
            .await
            .unwrap();
        while payer.try_next().is_some() {}

        relay.leave(payee.user.clone()).await.unwrap();
        relay.is_reachable(UserId::from("payer-1")).await.unwrap();

        let mut saw_left = false;
        while let Some(event) = payer.try_next() {
            if matches!(event, ClientEvent::RoomPeerLeft { ref user, .. } if *user == UserId::from("payee-1"))
            {
                saw_left = true;
            }
        }
        assert!(saw_left, "payer should see the payee leave the room");
    }
}
