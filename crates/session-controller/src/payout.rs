//! External payout transfer seam.
//!
//! Moving earnings to a payee's bank account happens outside the ledger.
//! The billing engine drives the transfer through this trait and
//! compensates the ledger when the transfer is refused.

use async_trait::async_trait;
use ledger::{Money, UserId};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PayoutProcessorError {
    /// The processor rejected the transfer (bad account, compliance hold).
    #[error("transfer rejected: {0}")]
    Rejected(String),

    /// The processor could not be reached.
    #[error("processor unreachable: {0}")]
    Unreachable(String),
}

/// External money-movement seam.
#[async_trait]
pub trait PayoutProcessor: Send + Sync {
    /// Transfer `amount` to the payee's external destination.
    async fn transfer(&self, payee: &UserId, amount: Money)
        -> Result<(), PayoutProcessorError>;
}

/// Processor that accepts every transfer and logs it. The default for
/// deployments without a real money-movement integration.
pub struct LoggingPayoutProcessor;

#[async_trait]
impl PayoutProcessor for LoggingPayoutProcessor {
    async fn transfer(
        &self,
        payee: &UserId,
        amount: Money,
    ) -> Result<(), PayoutProcessorError> {
        info!(
            target: "session_controller::payout",
            payee = %payee,
            amount = %amount,
            "Payout transfer accepted"
        );
        Ok(())
    }
}

/// Processor scripted to refuse the next N transfers. Used by tests to
/// exercise the compensating-restore path.
#[derive(Default)]
pub struct FlakyPayoutProcessor {
    refuse_next: Mutex<u32>,
    transferred: Mutex<Vec<(UserId, Money)>>,
}

impl FlakyPayoutProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` transfers.
    pub fn refuse_next(&self, count: u32) {
        if let Ok(mut n) = self.refuse_next.lock() {
            *n = count;
        }
    }

    /// Transfers that went through, in order.
    pub fn transferred(&self) -> Vec<(UserId, Money)> {
        self.transferred
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PayoutProcessor for FlakyPayoutProcessor {
    async fn transfer(
        &self,
        payee: &UserId,
        amount: Money,
    ) -> Result<(), PayoutProcessorError> {
        if let Ok(mut n) = self.refuse_next.lock() {
            if *n > 0 {
                *n -= 1;
                return Err(PayoutProcessorError::Rejected(
                    "scripted refusal".to_string(),
                ));
            }
        }
        if let Ok(mut t) = self.transferred.lock() {
            t.push((payee.clone(), amount));
        }
        Ok(())
    }
}
