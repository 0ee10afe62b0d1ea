//! Actor system for the session controller.
//!
//! Two-level hierarchy:
//! - `SessionSupervisorActor` (singleton): validates requests, spawns and
//!   supervises session actors
//! - `SessionActor` (one per session): owns that session's lifecycle and
//!   billing ticker
//!
//! The `RelayActor` (see [`crate::relay`]) sits beside the hierarchy and
//! owns connection/room state.

pub mod messages;
pub mod session;
pub mod supervisor;

pub use messages::SupervisorStatus;
pub use supervisor::{SessionSupervisorHandle, SupervisorDeps};
