//! Money arithmetic in integer mills.
//!
//! All amounts are counts of mills (thousandths of a dollar). Integer mills
//! keep the default 70/30 split of a cent-denominated per-minute rate exact:
//! a $3.99 tick splits into $1.197 platform fee and $2.793 payee earnings
//! with no rounding drift, so `total_cost == platform_fee + payee_earnings`
//! holds as integer equality at every observation point.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Mills per dollar.
const MILLS_PER_DOLLAR: i64 = 1000;

/// Mills per cent.
const MILLS_PER_CENT: i64 = 10;

/// Basis points denominator (100% == 10_000 bps).
const BPS_DENOMINATOR: i64 = 10_000;

/// An exact monetary amount in mills (thousandths of a dollar).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero amount.
    pub const ZERO: Money = Money(0);

    /// Construct from a raw mill count.
    #[must_use]
    pub const fn from_mills(mills: i64) -> Self {
        Money(mills)
    }

    /// Construct from whole cents.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents * MILLS_PER_CENT)
    }

    /// Construct from whole dollars.
    #[must_use]
    pub const fn from_dollars(dollars: i64) -> Self {
        Money(dollars * MILLS_PER_DOLLAR)
    }

    /// Raw mill count.
    #[must_use]
    pub const fn mills(self) -> i64 {
        self.0
    }

    /// True if the amount is negative.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// True if the amount is zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked subtraction that refuses to go below zero.
    ///
    /// Returns `None` when `other` exceeds `self`. Balance debits go through
    /// this so a tick can never drive a balance negative.
    #[must_use]
    pub fn checked_debit(self, other: Money) -> Option<Money> {
        if other.0 > self.0 {
            None
        } else {
            Some(Money(self.0 - other.0))
        }
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let dollars = abs / MILLS_PER_DOLLAR;
        let mills = abs % MILLS_PER_DOLLAR;
        if mills % MILLS_PER_CENT == 0 {
            write!(f, "{sign}${dollars}.{:02}", mills / MILLS_PER_CENT)
        } else {
            write!(f, "{sign}${dollars}.{mills:03}")
        }
    }
}

/// Revenue split policy: how each tick's charge is divided between the
/// platform and the payee.
///
/// Expressed as the platform share in basis points so the split is a
/// configurable policy constant rather than hard-coded business law. The
/// payee always receives the exact remainder, which guarantees
/// `fee + earnings == amount` under integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueSplit {
    platform_bps: i64,
}

/// Default platform share: 30%.
pub const DEFAULT_PLATFORM_BPS: i64 = 3000;

impl Default for RevenueSplit {
    fn default() -> Self {
        RevenueSplit {
            platform_bps: DEFAULT_PLATFORM_BPS,
        }
    }
}

impl RevenueSplit {
    /// Create a split with the given platform share in basis points.
    ///
    /// Values outside 0..=10_000 are clamped into range.
    #[must_use]
    pub fn from_platform_bps(bps: i64) -> Self {
        RevenueSplit {
            platform_bps: bps.clamp(0, BPS_DENOMINATOR),
        }
    }

    /// Platform share in basis points.
    #[must_use]
    pub const fn platform_bps(self) -> i64 {
        self.platform_bps
    }

    /// Split an amount into `(platform_fee, payee_earnings)`.
    ///
    /// The fee is rounded down; the payee receives the remainder, so the two
    /// parts always sum back to `amount` exactly.
    #[must_use]
    pub fn split(self, amount: Money) -> (Money, Money) {
        let fee = Money::from_mills(amount.mills() * self.platform_bps / BPS_DENOMINATOR);
        (fee, amount - fee)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn constructors_agree() {
        assert_eq!(Money::from_dollars(3), Money::from_cents(300));
        assert_eq!(Money::from_cents(399).mills(), 3990);
    }

    #[test]
    fn display_formats_cents_and_mills() {
        assert_eq!(Money::from_cents(399).to_string(), "$3.99");
        assert_eq!(Money::from_mills(2793).to_string(), "$2.793");
        assert_eq!(Money::from_dollars(15).to_string(), "$15.00");
        assert_eq!(Money::from_mills(-500).to_string(), "-$0.50");
    }

    #[test]
    fn checked_debit_refuses_overdraw() {
        let balance = Money::from_cents(399);
        assert_eq!(
            balance.checked_debit(Money::from_cents(399)),
            Some(Money::ZERO)
        );
        assert_eq!(balance.checked_debit(Money::from_cents(400)), None);
    }

    #[test]
    fn default_split_is_exact_for_cent_rates() {
        let rate = Money::from_cents(399);
        let (fee, earnings) = RevenueSplit::default().split(rate);
        assert_eq!(fee, Money::from_mills(1197));
        assert_eq!(earnings, Money::from_mills(2793));
        assert_eq!(fee + earnings, rate);
    }

    #[test]
    fn split_always_sums_back() {
        let split = RevenueSplit::from_platform_bps(3333);
        for mills in [1, 7, 399, 1000, 99_999] {
            let amount = Money::from_mills(mills);
            let (fee, earnings) = split.split(amount);
            assert_eq!(fee + earnings, amount);
            assert!(!fee.is_negative());
            assert!(!earnings.is_negative());
        }
    }

    #[test]
    fn split_bps_clamped() {
        assert_eq!(RevenueSplit::from_platform_bps(-5).platform_bps(), 0);
        assert_eq!(
            RevenueSplit::from_platform_bps(20_000).platform_bps(),
            10_000
        );
    }

    #[test]
    fn sum_of_amounts() {
        let total: Money = [Money::from_cents(399), Money::from_cents(399)]
            .into_iter()
            .sum();
        assert_eq!(total, Money::from_cents(798));
    }
}
