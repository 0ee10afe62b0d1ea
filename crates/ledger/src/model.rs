//! Data model: identifiers, rates, sessions and per-user ledger entries.

use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque session identifier, distinct from any internal storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

/// Opaque user identifier (payer or payee).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

/// Session modality, fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Video,
    Audio,
    Text,
}

impl Modality {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Modality::Video => "video",
            Modality::Audio => "audio",
            Modality::Text => "text",
        }
    }
}

/// A payee's per-minute rate table.
///
/// The lifecycle manager snapshots the applicable rate onto the session at
/// creation; later rate changes never affect an in-progress session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCard {
    /// Per-minute rate for video sessions.
    pub video: Money,
    /// Per-minute rate for audio sessions.
    pub audio: Money,
    /// Per-minute rate for text sessions.
    pub text: Money,
}

impl RateCard {
    /// Uniform rate across all modalities.
    #[must_use]
    pub const fn flat(rate: Money) -> Self {
        RateCard {
            video: rate,
            audio: rate,
            text: rate,
        }
    }

    /// Rate for the given modality.
    #[must_use]
    pub const fn rate_for(&self, modality: Modality) -> Money {
        match modality {
            Modality::Video => self.video,
            Modality::Audio => self.audio,
            Modality::Text => self.text,
        }
    }
}

/// Session status. Monotonic: Pending -> Active -> Ended, no other edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Ended,
}

/// Why a session reached the Ended state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Payee declined the request.
    Declined,
    /// Pending request received no accept/decline within the policy window.
    Timeout,
    /// A party ended the session normally.
    Completed,
    /// The payer could not afford the next tick (or the accept-time recheck).
    InsufficientBalance,
    /// A party disconnected while the session was open.
    PeerDisconnected,
}

impl EndReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EndReason::Declined => "declined",
            EndReason::Timeout => "timeout",
            EndReason::Completed => "completed",
            EndReason::InsufficientBalance => "insufficient_balance",
            EndReason::PeerDisconnected => "peer_disconnected",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent record of one session. Never physically deleted; terminal
/// records are retained for history and audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Globally unique session identifier.
    pub id: SessionId,
    /// Party whose balance is debited per tick.
    pub payer: UserId,
    /// Party whose earnings are credited per tick.
    pub payee: UserId,
    /// Modality, fixed at creation.
    pub modality: Modality,
    /// Per-minute rate snapshotted from the payee's rate card at creation.
    pub rate: Money,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set on the transition to Active.
    pub started_at: Option<DateTime<Utc>>,
    /// Set on the transition to Ended.
    pub ended_at: Option<DateTime<Utc>>,
    /// Accumulated duration in whole seconds.
    pub duration_secs: i64,
    /// Accumulated total cost. Only the billing tick moves this.
    pub total_cost: Money,
    /// Accumulated platform-fee portion of `total_cost`.
    pub platform_fee: Money,
    /// Accumulated payee-earnings portion of `total_cost`.
    pub payee_earnings: Money,
    /// Terminal reason, set on the transition to Ended.
    pub end_reason: Option<EndReason>,
}

impl SessionRecord {
    /// Create a new Pending session with a snapshotted rate.
    #[must_use]
    pub fn pending(
        payer: UserId,
        payee: UserId,
        modality: Modality,
        rate: Money,
        created_at: DateTime<Utc>,
    ) -> Self {
        SessionRecord {
            id: SessionId::generate(),
            payer,
            payee,
            modality,
            rate,
            status: SessionStatus::Pending,
            created_at,
            started_at: None,
            ended_at: None,
            duration_secs: 0,
            total_cost: Money::ZERO,
            platform_fee: Money::ZERO,
            payee_earnings: Money::ZERO,
            end_reason: None,
        }
    }

    /// True if the given user is the payer or the payee.
    #[must_use]
    pub fn involves(&self, user: &UserId) -> bool {
        &self.payer == user || &self.payee == user
    }

    /// For a two-party session, the counterparty of `user` (if any).
    #[must_use]
    pub fn counterparty(&self, user: &UserId) -> Option<&UserId> {
        if &self.payer == user {
            Some(&self.payee)
        } else if &self.payee == user {
            Some(&self.payer)
        } else {
            None
        }
    }

    /// True if the session is Pending or Active (not terminal).
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status != SessionStatus::Ended
    }

    /// The financial invariant: cost fully attributed between fee and earnings.
    #[must_use]
    pub fn financials_consistent(&self) -> bool {
        self.total_cost == self.platform_fee + self.payee_earnings
    }
}

/// Per-user ledger entry: spendable balance plus earnings buckets.
///
/// Explicit named fields (rather than loosely-typed sub-objects) so every
/// access is compiler checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Spendable balance (payer side).
    pub balance: Money,
    /// Earnings credited but not yet transferred to a payout destination.
    pub pending_earnings: Money,
    /// Earnings already transferred out.
    pub paid_earnings: Money,
}
