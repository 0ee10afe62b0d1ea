//! Session Controller
//!
//! Stateful service connecting paying clients to readers for live billed
//! sessions.
//!
//! # Architecture
//!
//! Uses an actor model hierarchy:
//! - `SessionSupervisorActor` (singleton): validates requests, supervises
//!   session actors
//! - `SessionActor` (per session): owns the lifecycle and billing ticker
//! - `RelayActor` (singleton): owns the connection map and session rooms
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize the ledger store and billing engine
//! 3. Spawn the relay and supervisor actors, then bind them together
//! 4. Start the health HTTP server (liveness, readiness)
//! 5. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ledger::{LedgerStore, MemoryLedger};
use session_controller::actors::{SessionSupervisorHandle, SupervisorDeps};
use session_controller::billing::BillingEngine;
use session_controller::config::Config;
use session_controller::notify::{NotificationSink, TracingSink};
use session_controller::observability::{health_router, EngineMetrics, HealthState};
use session_controller::payout::LoggingPayoutProcessor;
use session_controller::rates::{InMemoryRates, RateSource};
use session_controller::relay::{ChatArchive, MemoryChatArchive, RelayHandle};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_controller=debug,ledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Session Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        controller_id = %config.controller_id,
        health_bind_address = %config.health_bind_address,
        tick_interval_seconds = config.tick_interval_seconds,
        platform_fee_bps = config.platform_fee_bps,
        payout_threshold_cents = config.payout_threshold_cents,
        pending_timeout_seconds = config.pending_timeout_seconds,
        "Configuration loaded successfully"
    );

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Ledger store and seams. The in-memory implementations serve until a
    // durable store and real integrations are wired in deployment.
    let ledger: Arc<dyn LedgerStore> = Arc::new(MemoryLedger::new());
    let rates: Arc<dyn RateSource> = Arc::new(InMemoryRates::new());
    let archive: Arc<dyn ChatArchive> = Arc::new(MemoryChatArchive::new());
    let sink: Arc<dyn NotificationSink> = Arc::new(TracingSink);

    let billing = Arc::new(BillingEngine::new(
        Arc::clone(&ledger),
        Arc::new(LoggingPayoutProcessor),
        config.revenue_split(),
        i64::try_from(config.tick_interval_seconds).unwrap_or(60),
        config.payout_threshold(),
        config.tick_retry_attempts,
        config.tick_retry_backoff(),
    ));

    // Initialize actor system. The relay and the supervisor reference each
    // other, so the relay is spawned first and bound afterwards.
    info!("Initializing actor system...");
    let metrics = EngineMetrics::new();
    let relay_token = tokio_util::sync::CancellationToken::new();
    let relay = RelayHandle::new(Arc::clone(&ledger), archive, relay_token.clone());

    let supervisor = SessionSupervisorHandle::new(SupervisorDeps {
        controller_id: config.controller_id.clone(),
        ledger: Arc::clone(&ledger),
        billing,
        rates,
        relay: relay.clone(),
        sink,
        metrics,
        tick_interval: config.tick_interval(),
        pending_timeout: config.pending_timeout(),
    });
    relay.bind_lifecycle(supervisor.clone()).await?;
    info!("Actor system initialized");

    // Shutdown token as child of the supervisor's root token
    let shutdown_token = supervisor.child_token();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let app = health_router(Arc::clone(&health_state));

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    health_state.set_ready();

    // Wait for shutdown signal
    info!("Session Controller running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.set_not_ready();

    // Drain the actor hierarchy: supervisor finalizes open sessions
    if let Err(e) = supervisor.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }
    relay_token.cancel();

    // Give tasks time to shut down
    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Session Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
