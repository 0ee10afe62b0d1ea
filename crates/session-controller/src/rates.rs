//! Payee rate lookup.
//!
//! Rate cards are profile data owned by an external service; the
//! controller only reads them when pricing a session request. The snapshot
//! taken at request time is what the session bills, so later edits to a
//! card never affect a running session.

use async_trait::async_trait;
use ledger::{RateCard, UserId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Read-only source of payee rate cards.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// The payee's current rate card, or `None` when the payee has no
    /// published rates.
    async fn rate_card(&self, payee: &UserId) -> Option<RateCard>;
}

/// In-memory rate directory.
#[derive(Default)]
pub struct InMemoryRates {
    cards: Mutex<HashMap<UserId, RateCard>>,
}

impl InMemoryRates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish or replace a payee's rate card.
    pub fn set_rate_card(&self, payee: UserId, card: RateCard) {
        if let Ok(mut cards) = self.cards.lock() {
            cards.insert(payee, card);
        }
    }
}

#[async_trait]
impl RateSource for InMemoryRates {
    async fn rate_card(&self, payee: &UserId) -> Option<RateCard> {
        self.cards.lock().ok().and_then(|c| c.get(payee).cloned())
    }
}
