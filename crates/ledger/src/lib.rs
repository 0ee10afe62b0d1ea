//! Ledger core for the marketplace session/billing engine.
//!
//! This crate holds everything the billing core needs to reason about money
//! and state, independent of any transport or scheduler:
//!
//! - [`money`] - exact integer money arithmetic and the revenue split policy
//! - [`model`] - sessions, per-user ledger entries, rates and identifiers
//! - [`transaction`] - immutable, append-only transaction records
//! - [`store`] - the [`LedgerStore`] consistency contract (atomic
//!   read-modify-write operations the billing engine depends on)
//! - [`memory`] - an in-memory [`LedgerStore`] used by the service and tests
//!
//! # Consistency contract
//!
//! The store is the only resource shared across sessions. Every operation on
//! it is all-or-nothing: a billing tick either debits the payer, credits the
//! payee and appends its transaction record, or does none of those. See
//! [`store::LedgerStore::charge_tick`].

pub mod error;
pub mod memory;
pub mod model;
pub mod money;
pub mod store;
pub mod transaction;

pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use model::{
    EndReason, LedgerEntry, Modality, RateCard, SessionId, SessionRecord, SessionStatus, UserId,
};
pub use money::{Money, RevenueSplit};
pub use store::{LedgerStore, TickCharge, TickOutcome};
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
