//! Session controller library.
//!
//! Connects paying clients ("payers") to readers ("payees") for live
//! billed sessions. Three cooperating parts:
//!
//! - Lifecycle actors ([`actors`]): the Pending -> Active -> Ended state
//!   machine, one actor per session under a singleton supervisor
//! - Billing engine ([`billing`]): per-minute atomic ticks against the
//!   ledger, revenue split, threshold-gated payouts with compensation
//! - Signaling relay ([`relay`]): connection registry, per-session rooms,
//!   opaque signal forwarding and archived chat
//!
//! Persistence lives behind the `ledger` crate's `LedgerStore` trait;
//! notifications, payouts, rates and chat history are seams
//! ([`notify::NotificationSink`], [`payout::PayoutProcessor`],
//! [`rates::RateSource`], [`relay::ChatArchive`]).

pub mod actors;
pub mod billing;
pub mod config;
pub mod errors;
pub mod notify;
pub mod observability;
pub mod payout;
pub mod rates;
pub mod relay;

pub use actors::{SessionSupervisorHandle, SupervisorDeps, SupervisorStatus};
pub use billing::BillingEngine;
pub use config::Config;
pub use errors::SessionError;
pub use relay::RelayHandle;
