//! Session controller configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults, so a bare `session-controller` binary comes up billing a
//! 70/30 split on one-minute ticks.

use ledger::{Money, RevenueSplit};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default billing tick interval in seconds (one billed minute).
pub const DEFAULT_TICK_INTERVAL_SECONDS: u64 = 60;

/// Default platform fee in basis points (30%).
pub const DEFAULT_PLATFORM_FEE_BPS: u32 = 3000;

/// Default payout threshold in cents ($15.00).
pub const DEFAULT_PAYOUT_THRESHOLD_CENTS: i64 = 1500;

/// Default pending-acceptance timeout in seconds.
pub const DEFAULT_PENDING_TIMEOUT_SECONDS: u64 = 120;

/// Default number of retries for a transiently failed billing tick.
pub const DEFAULT_TICK_RETRY_ATTEMPTS: u32 = 3;

/// Default backoff between tick retries in milliseconds.
pub const DEFAULT_TICK_RETRY_BACKOFF_MS: u64 = 250;

/// Default controller instance ID prefix.
pub const DEFAULT_CONTROLLER_ID_PREFIX: &str = "sc";

/// Session controller configuration.
///
/// Loaded from `SC_*` environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this controller instance.
    pub controller_id: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Billing tick interval in seconds (default: 60).
    pub tick_interval_seconds: u64,

    /// Platform fee in basis points of each tick (default: 3000).
    pub platform_fee_bps: u32,

    /// Minimum pending earnings for a payout, in cents (default: 1500).
    pub payout_threshold_cents: i64,

    /// How long a Pending session waits for acceptance, in seconds
    /// (default: 120).
    pub pending_timeout_seconds: u64,

    /// Retries for a billing tick that failed transiently (default: 3).
    pub tick_retry_attempts: u32,

    /// Backoff between tick retries in milliseconds (default: 250).
    pub tick_retry_backoff_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let health_bind_address = vars
            .get("SC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let tick_interval_seconds = vars
            .get("SC_TICK_INTERVAL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TICK_INTERVAL_SECONDS);
        if tick_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_TICK_INTERVAL_SECONDS must be positive".to_string(),
            ));
        }

        let platform_fee_bps = vars
            .get("SC_PLATFORM_FEE_BPS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PLATFORM_FEE_BPS);
        if platform_fee_bps > 10_000 {
            return Err(ConfigError::InvalidValue(
                "SC_PLATFORM_FEE_BPS must be at most 10000".to_string(),
            ));
        }

        let payout_threshold_cents = vars
            .get("SC_PAYOUT_THRESHOLD_CENTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PAYOUT_THRESHOLD_CENTS);
        if payout_threshold_cents < 0 {
            return Err(ConfigError::InvalidValue(
                "SC_PAYOUT_THRESHOLD_CENTS must be non-negative".to_string(),
            ));
        }

        let pending_timeout_seconds = vars
            .get("SC_PENDING_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PENDING_TIMEOUT_SECONDS);
        if pending_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_PENDING_TIMEOUT_SECONDS must be positive".to_string(),
            ));
        }

        let tick_retry_attempts = vars
            .get("SC_TICK_RETRY_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TICK_RETRY_ATTEMPTS);

        let tick_retry_backoff_ms = vars
            .get("SC_TICK_RETRY_BACKOFF_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TICK_RETRY_BACKOFF_MS);

        // Generate controller instance ID
        let controller_id = vars.get("SC_CONTROLLER_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_CONTROLLER_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            controller_id,
            health_bind_address,
            tick_interval_seconds,
            platform_fee_bps,
            payout_threshold_cents,
            pending_timeout_seconds,
            tick_retry_attempts,
            tick_retry_backoff_ms,
        })
    }

    /// Billing tick interval.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    /// Pending-acceptance timeout.
    #[must_use]
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_seconds)
    }

    /// Backoff between tick retries.
    #[must_use]
    pub fn tick_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.tick_retry_backoff_ms)
    }

    /// Configured revenue split.
    #[must_use]
    pub fn revenue_split(&self) -> RevenueSplit {
        RevenueSplit::from_platform_bps(i64::from(self.platform_fee_bps))
    }

    /// Configured payout threshold.
    #[must_use]
    pub fn payout_threshold(&self) -> Money {
        Money::from_cents(self.payout_threshold_cents)
    }
}
