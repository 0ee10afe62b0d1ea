//! Health endpoints and engine counters.
//!
//! Provides Kubernetes-compatible health endpoints:
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (can we serve traffic?)
//!
//! `EngineMetrics` tracks lifecycle and billing counters shared by the
//! supervisor and the per-session actors.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Health state for the session controller.
///
/// Tracks liveness and readiness for Kubernetes probes.
#[derive(Debug)]
pub struct HealthState {
    /// Whether the service is live (process running).
    /// Always true after startup initialization.
    live: AtomicBool,
    /// Whether the service is ready to serve traffic.
    /// True once the actor hierarchy is up, false while draining.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the service as ready to serve traffic.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Check if the service is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Lifecycle and billing counters, shared across the actor hierarchy.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    sessions_created: AtomicU64,
    sessions_ended: AtomicU64,
    open_sessions: AtomicUsize,
    ticks_charged: AtomicU64,
    ticks_skipped: AtomicU64,
}

impl EngineMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.open_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_ended(&self) {
        self.sessions_ended.fetch_add(1, Ordering::Relaxed);
        // Saturating: a reaped actor may already have decremented.
        let _ = self
            .open_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn tick_charged(&self) {
        self.ticks_charged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn sessions_created_total(&self) -> u64 {
        self.sessions_created.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn sessions_ended_total(&self) -> u64 {
        self.sessions_ended.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn open_session_count(&self) -> usize {
        self.open_sessions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn ticks_charged_total(&self) -> u64 {
        self.ticks_charged.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn ticks_skipped_total(&self) -> u64 {
        self.ticks_skipped.load(Ordering::Relaxed)
    }
}

/// Create the health router with liveness and readiness endpoints.
///
/// # Endpoints
///
/// - `GET /health` - Returns 200 if process is running (liveness)
/// - `GET /ready` - Returns 200 if ready to serve traffic, 503 otherwise (readiness)
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

/// Liveness probe handler.
async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Readiness probe handler.
async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
