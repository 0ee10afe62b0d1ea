//! Billing integration tests: tick atomicity under depletion and store
//! outages, and the payout flow with its compensating restore.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use common::settle;
use ledger::{EndReason, LedgerStore, Money, SessionStatus, TransactionKind, UserId};
use session_controller::errors::SessionError;
use session_controller::notify::Notification;
use std::time::Duration;
use tokio::time::advance;

/// Drive one funded session through request and accept, returning its id.
async fn active_session(h: &common::Harness, rate: Money, funding: Money) -> ledger::SessionId {
    let _payee_events = h.payee_online("payee-1", rate).await;
    h.fund("payer-1", funding).await;
    let session_id = h.request("payer-1", "payee-1").await.unwrap();
    settle().await;
    h.supervisor
        .accept_session(session_id.clone(), UserId::from("payee-1"))
        .await
        .unwrap();
    settle().await;
    session_id
}

#[tokio::test(start_paused = true)]
async fn depleted_balance_ends_the_session_with_nothing_partial() {
    let h = common::start().await;
    // Exactly two minutes of funding.
    let session_id = active_session(&h, Money::from_cents(399), Money::from_cents(798)).await;

    advance(Duration::from_secs(61)).await;
    settle().await;
    advance(Duration::from_secs(60)).await;
    settle().await;

    let payer = h.ledger.ledger_entry(&UserId::from("payer-1")).await.unwrap();
    assert_eq!(payer.balance, Money::ZERO);
    assert_eq!(
        h.ledger.session(&session_id).await.unwrap().status,
        SessionStatus::Active
    );

    // The third minute cannot be covered; the tick applies nothing and the
    // session ends.
    advance(Duration::from_secs(60)).await;
    settle().await;

    let record = h.ledger.session(&session_id).await.unwrap();
    assert_eq!(record.status, SessionStatus::Ended);
    assert_eq!(record.end_reason, Some(EndReason::InsufficientBalance));
    assert_eq!(record.total_cost, Money::from_cents(798));
    assert!(record.financials_consistent());

    let payer = h.ledger.ledger_entry(&UserId::from("payer-1")).await.unwrap();
    assert_eq!(payer.balance, Money::ZERO);
    let payee = h.ledger.ledger_entry(&UserId::from("payee-1")).await.unwrap();
    assert_eq!(payee.pending_earnings, Money::from_mills(2 * 2793));

    let txs = h.ledger.transactions_for_session(&session_id).await.unwrap();
    assert_eq!(txs.len(), 2, "the refused tick appends no record");

    let delivered = h.sink.delivered();
    assert!(delivered.iter().any(|n| matches!(
        n,
        Notification::PaymentFailed {
            required,
            available,
            ..
        } if *required == Money::from_cents(399) && *available == Money::ZERO
    )));
    assert!(delivered.iter().any(|n| matches!(
        n,
        Notification::SessionEnded {
            reason: EndReason::InsufficientBalance,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn transient_store_failures_are_retried_within_the_tick() {
    let h = common::start().await;
    let session_id = active_session(&h, Money::from_cents(399), Money::from_dollars(20)).await;

    // Fewer failures than the retry budget: the tick still lands.
    h.ledger.inject_charge_failures(2);
    advance(Duration::from_secs(61)).await;
    // Generous settle so the backoff sleeps inside the retry loop elapse.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let txs = h.ledger.transactions_for_session(&session_id).await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(h.metrics.ticks_charged_total(), 1);
    assert_eq!(h.metrics.ticks_skipped_total(), 0);
    assert_eq!(
        h.ledger.session(&session_id).await.unwrap().status,
        SessionStatus::Active
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_skip_the_minute_but_keep_the_session() {
    let h = common::start().await;
    let session_id = active_session(&h, Money::from_cents(399), Money::from_dollars(20)).await;

    // More failures than one attempt plus three retries can absorb.
    h.ledger.inject_charge_failures(4);
    advance(Duration::from_secs(61)).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(h
        .ledger
        .transactions_for_session(&session_id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(h.metrics.ticks_skipped_total(), 1);
    assert_eq!(
        h.ledger.session(&session_id).await.unwrap().status,
        SessionStatus::Active
    );

    // The next minute bills normally; the skipped one is simply unbilled.
    advance(Duration::from_secs(60)).await;
    settle().await;
    assert_eq!(
        h.ledger
            .transactions_for_session(&session_id)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(h.metrics.ticks_charged_total(), 1);
}

#[tokio::test(start_paused = true)]
async fn payout_moves_full_pending_earnings_once_over_threshold() {
    let h = common::start().await;
    // One $23.00 minute earns 16,100 mills, over the $15.00 threshold.
    let session_id = active_session(&h, Money::from_dollars(23), Money::from_dollars(30)).await;
    advance(Duration::from_secs(61)).await;
    settle().await;
    h.supervisor
        .end_session(session_id, UserId::from("payer-1"))
        .await
        .unwrap();
    settle().await;

    let payee = UserId::from("payee-1");
    let earned = Money::from_mills(16_100);
    assert_eq!(
        h.ledger.ledger_entry(&payee).await.unwrap().pending_earnings,
        earned
    );

    let paid = h.billing.request_payout(&payee).await.unwrap();
    assert_eq!(paid, earned);

    let entry = h.ledger.ledger_entry(&payee).await.unwrap();
    assert_eq!(entry.pending_earnings, Money::ZERO);
    assert_eq!(entry.paid_earnings, earned);
    assert_eq!(h.payouts.transferred(), vec![(payee.clone(), earned)]);

    // Nothing left to pay out.
    let err = h.billing.request_payout(&payee).await.unwrap_err();
    assert!(matches!(err, SessionError::BelowPayoutThreshold { .. }));
}

#[tokio::test(start_paused = true)]
async fn payout_below_threshold_is_refused() {
    let h = common::start().await;
    // One $3.99 minute earns 2,793 mills, well under $15.00.
    let _session_id = active_session(&h, Money::from_cents(399), Money::from_dollars(20)).await;
    advance(Duration::from_secs(61)).await;
    settle().await;

    let err = h
        .billing
        .request_payout(&UserId::from("payee-1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::BelowPayoutThreshold { pending, .. } if pending == Money::from_mills(2793)
    ));

    // Earnings untouched by the refusal.
    let entry = h
        .ledger
        .ledger_entry(&UserId::from("payee-1"))
        .await
        .unwrap();
    assert_eq!(entry.pending_earnings, Money::from_mills(2793));
}

#[tokio::test(start_paused = true)]
async fn refused_transfer_restores_pending_earnings() {
    let h = common::start().await;
    let session_id = active_session(&h, Money::from_dollars(23), Money::from_dollars(30)).await;
    advance(Duration::from_secs(61)).await;
    settle().await;
    h.supervisor
        .end_session(session_id, UserId::from("payer-1"))
        .await
        .unwrap();
    settle().await;

    let payee = UserId::from("payee-1");
    let earned = Money::from_mills(16_100);

    h.payouts.refuse_next(1);
    let err = h.billing.request_payout(&payee).await.unwrap_err();
    assert!(matches!(err, SessionError::PayoutFailed(_)));

    // The compensating restore put every mill back.
    let entry = h.ledger.ledger_entry(&payee).await.unwrap();
    assert_eq!(entry.pending_earnings, earned);
    assert_eq!(entry.paid_earnings, Money::ZERO);
    assert!(h.payouts.transferred().is_empty());

    // A later attempt succeeds with the same amount.
    let paid = h.billing.request_payout(&payee).await.unwrap();
    assert_eq!(paid, earned);
    let entry = h.ledger.ledger_entry(&payee).await.unwrap();
    assert_eq!(entry.pending_earnings, Money::ZERO);
    assert_eq!(entry.paid_earnings, earned);
}

#[tokio::test(start_paused = true)]
async fn charges_record_the_payer_balance_chain() {
    let h = common::start().await;
    let session_id = active_session(&h, Money::from_cents(399), Money::from_dollars(20)).await;

    advance(Duration::from_secs(61)).await;
    settle().await;
    advance(Duration::from_secs(60)).await;
    settle().await;

    let txs = h.ledger.transactions_for_session(&session_id).await.unwrap();
    assert_eq!(txs.len(), 2);
    for tx in &txs {
        assert_eq!(tx.kind, TransactionKind::Charge);
        assert_eq!(tx.session.as_ref(), Some(&session_id));
    }
    let first = &txs[0];
    let second = &txs[1];
    assert_eq!(first.balance_after, second.balance_before);
}
