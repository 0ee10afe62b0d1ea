//! Shared wiring for integration tests: a full actor hierarchy over the
//! in-memory ledger, with recording/flaky test doubles at every seam.

#![allow(dead_code)]

use ledger::{LedgerStore, MemoryLedger, Modality, Money, RateCard, RevenueSplit, SessionId, UserId};
use session_controller::actors::{SessionSupervisorHandle, SupervisorDeps};
use session_controller::billing::BillingEngine;
use session_controller::errors::SessionError;
use session_controller::notify::{NotificationSink, RecordingSink};
use session_controller::observability::EngineMetrics;
use session_controller::payout::{FlakyPayoutProcessor, PayoutProcessor};
use session_controller::rates::{InMemoryRates, RateSource};
use session_controller::relay::{
    ChatArchive, ClientEvent, MemoryChatArchive, RelayHandle, UserConnection,
    CONNECTION_EVENT_BUFFER,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub rates: Arc<InMemoryRates>,
    pub relay: RelayHandle,
    pub supervisor: SessionSupervisorHandle,
    pub sink: Arc<RecordingSink>,
    pub archive: Arc<MemoryChatArchive>,
    pub payouts: Arc<FlakyPayoutProcessor>,
    pub billing: Arc<BillingEngine>,
    pub metrics: Arc<EngineMetrics>,
}

/// Spin up the full hierarchy with one-minute ticks, a 120s pending
/// window and a $15.00 payout threshold.
pub async fn start() -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    let rates = Arc::new(InMemoryRates::new());
    let sink = Arc::new(RecordingSink::new());
    let archive = Arc::new(MemoryChatArchive::new());
    let payouts = Arc::new(FlakyPayoutProcessor::new());
    let metrics = EngineMetrics::new();

    let relay = RelayHandle::new(
        Arc::clone(&ledger) as Arc<dyn LedgerStore>,
        Arc::clone(&archive) as Arc<dyn ChatArchive>,
        CancellationToken::new(),
    );

    let billing = Arc::new(BillingEngine::new(
        Arc::clone(&ledger) as Arc<dyn LedgerStore>,
        Arc::clone(&payouts) as Arc<dyn PayoutProcessor>,
        RevenueSplit::default(),
        60,
        Money::from_cents(1500),
        3,
        Duration::from_millis(10),
    ));

    let supervisor = SessionSupervisorHandle::new(SupervisorDeps {
        controller_id: "sc-test-001".to_string(),
        ledger: Arc::clone(&ledger) as Arc<dyn LedgerStore>,
        billing: Arc::clone(&billing),
        rates: Arc::clone(&rates) as Arc<dyn RateSource>,
        relay: relay.clone(),
        sink: Arc::clone(&sink) as Arc<dyn NotificationSink>,
        metrics: Arc::clone(&metrics),
        tick_interval: Duration::from_secs(60),
        pending_timeout: Duration::from_secs(120),
    });
    relay
        .bind_lifecycle(supervisor.clone())
        .await
        .expect("bind supervisor");

    Harness {
        ledger,
        rates,
        relay,
        supervisor,
        sink,
        archive,
        payouts,
        billing,
        metrics,
    }
}

/// Let in-flight actor work finish under the paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

impl Harness {
    /// Register a live connection for a user and return its event stream.
    pub async fn connect(&self, user: &str, is_payee: bool) -> mpsc::Receiver<ClientEvent> {
        let (tx, rx) = mpsc::channel(CONNECTION_EVENT_BUFFER);
        self.relay
            .register_user(
                UserId::from(user),
                UserConnection {
                    connection_id: uuid::Uuid::new_v4().to_string(),
                    display_name: user.to_string(),
                    is_payee,
                    sender: tx,
                },
            )
            .await
            .expect("register connection");
        rx
    }

    /// Bring a payee online with a flat per-minute rate.
    pub async fn payee_online(&self, payee: &str, rate: Money) -> mpsc::Receiver<ClientEvent> {
        let rx = self.connect(payee, true).await;
        self.rates
            .set_rate_card(UserId::from(payee), RateCard::flat(rate));
        rx
    }

    /// Create the user's ledger entry and credit their balance.
    pub async fn fund(&self, user: &str, amount: Money) {
        self.ledger
            .ensure_user(&UserId::from(user))
            .await
            .expect("ensure user");
        self.ledger
            .credit_balance(&UserId::from(user), amount)
            .await
            .expect("credit balance");
    }

    /// Request a video session.
    pub async fn request(&self, payer: &str, payee: &str) -> Result<SessionId, SessionError> {
        self.supervisor
            .request_session(UserId::from(payer), UserId::from(payee), Modality::Video)
            .await
    }
}
