//! Relay integration tests: room traffic and disconnect teardown wired
//! through the live supervisor, not a relay in isolation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::settle;
use ledger::{EndReason, LedgerStore, Money, SessionId, SessionStatus, UserId};
use session_controller::notify::Notification;
use session_controller::relay::{ClientEvent, RelayPayload};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::advance;

/// Request, accept and join both parties into the session room.
async fn roomed_session(
    h: &common::Harness,
) -> (
    SessionId,
    mpsc::Receiver<ClientEvent>,
    mpsc::Receiver<ClientEvent>,
) {
    let mut payee_rx = h.payee_online("payee-1", Money::from_cents(399)).await;
    let mut payer_rx = h.connect("payer-1", false).await;
    h.fund("payer-1", Money::from_dollars(20)).await;

    let session_id = h.request("payer-1", "payee-1").await.unwrap();
    settle().await;
    h.supervisor
        .accept_session(session_id.clone(), UserId::from("payee-1"))
        .await
        .unwrap();
    settle().await;

    h.relay
        .join_room(session_id.clone(), UserId::from("payer-1"))
        .await
        .unwrap();
    h.relay
        .join_room(session_id.clone(), UserId::from("payee-1"))
        .await
        .unwrap();
    settle().await;

    // Drop the setup chatter (availability, request, join events).
    while payer_rx.try_recv().is_ok() {}
    while payee_rx.try_recv().is_ok() {}

    (session_id, payer_rx, payee_rx)
}

#[tokio::test(start_paused = true)]
async fn payee_disconnect_ends_the_active_session() {
    let h = common::start().await;
    let (session_id, mut payer_rx, _payee_rx) = roomed_session(&h).await;

    advance(Duration::from_secs(61)).await;
    settle().await;

    h.relay.leave(UserId::from("payee-1")).await.unwrap();
    settle().await;
    settle().await;

    let record = h.ledger.session(&session_id).await.unwrap();
    assert_eq!(record.status, SessionStatus::Ended);
    assert_eq!(record.end_reason, Some(EndReason::PeerDisconnected));
    // The billed minute before the drop stays billed.
    assert_eq!(record.total_cost, Money::from_cents(399));

    assert!(!h
        .relay
        .is_reachable(UserId::from("payee-1"))
        .await
        .unwrap());

    let mut saw_left = false;
    while let Ok(event) = payer_rx.try_recv() {
        if matches!(event, ClientEvent::RoomPeerLeft { ref user, .. } if *user == UserId::from("payee-1"))
        {
            saw_left = true;
        }
    }
    assert!(saw_left, "payer should see the payee leave");

    assert!(h.sink.delivered().iter().any(|n| matches!(
        n,
        Notification::SessionEnded {
            reason: EndReason::PeerDisconnected,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn payer_disconnect_ends_the_active_session() {
    let h = common::start().await;
    let (session_id, _payer_rx, _payee_rx) = roomed_session(&h).await;

    h.relay.leave(UserId::from("payer-1")).await.unwrap();
    settle().await;
    settle().await;

    let record = h.ledger.session(&session_id).await.unwrap();
    assert_eq!(record.status, SessionStatus::Ended);
    assert_eq!(record.end_reason, Some(EndReason::PeerDisconnected));

    // No further ticks after the teardown.
    advance(Duration::from_secs(120)).await;
    settle().await;
    assert_eq!(
        h.ledger.session(&session_id).await.unwrap().total_cost,
        Money::ZERO
    );
}

#[tokio::test(start_paused = true)]
async fn signaling_and_chat_flow_through_the_room() {
    let h = common::start().await;
    let (session_id, mut payer_rx, mut payee_rx) = roomed_session(&h).await;

    h.relay
        .relay_message(
            session_id.clone(),
            UserId::from("payer-1"),
            RelayPayload::Signal(serde_json::json!({"sdp": "offer"})),
        )
        .await
        .unwrap();
    assert!(matches!(
        payee_rx.try_recv(),
        Ok(ClientEvent::Signal { from, .. }) if from == UserId::from("payer-1")
    ));

    h.relay
        .relay_message(
            session_id.clone(),
            UserId::from("payee-1"),
            RelayPayload::Chat {
                body: "hello there".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        payer_rx.try_recv(),
        Ok(ClientEvent::Chat { body, .. }) if body == "hello there"
    ));

    // The chat line survived into the archive.
    let records = h.archive.records();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records.first().map(|r| r.body.as_str()),
        Some("hello there")
    );
}

#[tokio::test(start_paused = true)]
async fn room_rejects_joins_after_the_session_ends() {
    let h = common::start().await;
    let (session_id, _payer_rx, _payee_rx) = roomed_session(&h).await;

    h.supervisor
        .end_session(session_id.clone(), UserId::from("payer-1"))
        .await
        .unwrap();
    settle().await;

    let mut late_rx = h.connect("payer-1", false).await;
    let err = h
        .relay
        .join_room(session_id, UserId::from("payer-1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        session_controller::errors::SessionError::AlreadyEnded(_)
    ));
    while late_rx.try_recv().is_ok() {}
}

#[tokio::test(start_paused = true)]
async fn reconnect_replaces_the_previous_connection() {
    let h = common::start().await;
    let mut first_rx = h.payee_online("payee-1", Money::from_cents(399)).await;
    let mut second_rx = h.connect("payee-1", true).await;
    h.fund("payer-1", Money::from_dollars(20)).await;

    h.request("payer-1", "payee-1").await.unwrap();
    settle().await;

    // The request lands on the replacement connection only.
    assert!(second_rx
        .try_recv()
        .is_ok_and(|e| matches!(e, ClientEvent::SessionRequested { .. })));
    assert!(first_rx.try_recv().is_err());
}
