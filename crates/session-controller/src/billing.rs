//! Billing engine: tick charging and payouts.
//!
//! The engine owns the money-movement policy around the ledger: how a
//! transiently failed tick is retried, and how a refused external payout
//! is compensated. It holds no session state of its own; every call is
//! driven by a session actor or a payout request.

use crate::errors::SessionError;
use crate::payout::PayoutProcessor;
use ledger::{LedgerError, LedgerStore, Money, RevenueSplit, SessionId, TickOutcome, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct BillingEngine {
    ledger: Arc<dyn LedgerStore>,
    payouts: Arc<dyn PayoutProcessor>,
    split: RevenueSplit,
    tick_secs: i64,
    payout_threshold: Money,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl BillingEngine {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        payouts: Arc<dyn PayoutProcessor>,
        split: RevenueSplit,
        tick_secs: i64,
        payout_threshold: Money,
        retry_attempts: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            ledger,
            payouts,
            split,
            tick_secs,
            payout_threshold,
            retry_attempts,
            retry_backoff,
        }
    }

    /// Apply one billing tick for the session.
    ///
    /// A transiently failed attempt is retried up to the configured number
    /// of times with linear backoff. If every attempt fails the error is
    /// returned and the caller skips this tick; the minute is simply not
    /// billed, which keeps the never-partially-applied guarantee at the
    /// cost of revenue rather than correctness.
    pub async fn charge_tick(&self, id: &SessionId) -> Result<TickOutcome, SessionError> {
        let mut attempt: u32 = 0;
        loop {
            match self.ledger.charge_tick(id, self.split, self.tick_secs).await {
                Ok(outcome) => return Ok(outcome),
                Err(LedgerError::Unavailable(reason)) if attempt < self.retry_attempts => {
                    attempt += 1;
                    warn!(
                        target: "session_controller::billing",
                        session_id = %id,
                        attempt,
                        reason = %reason,
                        "Billing tick failed transiently, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Move the payee's full pending earnings out for payout.
    ///
    /// The ledger move happens first; if the external transfer is then
    /// refused, the same amount is restored to pending so no earnings are
    /// lost. Returns the amount paid out.
    pub async fn request_payout(&self, payee: &UserId) -> Result<Money, SessionError> {
        let amount = self
            .ledger
            .begin_payout(payee, self.payout_threshold)
            .await?;

        if let Err(refusal) = self.payouts.transfer(payee, amount).await {
            warn!(
                target: "session_controller::billing",
                payee = %payee,
                amount = %amount,
                error = %refusal,
                "Payout transfer refused, restoring pending earnings"
            );
            if let Err(restore_err) = self.ledger.restore_pending(payee, amount).await {
                // Funds are now stranded in the paid bucket; this needs an
                // operator, not a retry.
                error!(
                    target: "session_controller::billing",
                    payee = %payee,
                    amount = %amount,
                    error = %restore_err,
                    "Compensating restore failed after refused payout"
                );
                return Err(SessionError::Ledger(restore_err));
            }
            return Err(SessionError::PayoutFailed(refusal.to_string()));
        }

        info!(
            target: "session_controller::billing",
            payee = %payee,
            amount = %amount,
            "Payout completed"
        );
        Ok(amount)
    }
}
