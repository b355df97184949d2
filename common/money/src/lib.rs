//! Minor-unit money arithmetic shared by the checkout crates.
//!
//! Amounts travel end-to-end as integer minor units (cents). `BigDecimal` only appears at the
//! edges, when an amount has to be compared or displayed in major units.

use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Basis points in one whole (100%).
pub const BPS_SCALE: i64 = 10_000;

/// Minor units in one major unit.
pub const MINOR_PER_MAJOR: i64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount out of range")]
    Overflow,
}

/// How a fractional minor unit is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Ties move away from zero.
    HalfUp,
    /// Toward negative infinity.
    Floor,
}

/// Integer division of `numer / denom` resolved with `rounding`. `denom` must be positive.
pub fn div_round(numer: i128, denom: i128, rounding: Rounding) -> i128 {
    debug_assert!(denom > 0);
    match rounding {
        Rounding::Floor => numer.div_euclid(denom),
        Rounding::HalfUp => {
            let magnitude = (numer.abs() * 2 + denom) / (denom * 2);
            if numer < 0 { -magnitude } else { magnitude }
        }
    }
}

/// `amount * bps / 10_000`, rounded.
pub fn apply_bps(amount: i64, bps: u32, rounding: Rounding) -> i64 {
    let raw = div_round(amount as i128 * bps as i128, BPS_SCALE as i128, rounding);
    raw.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Percentage expressed as a decimal (e.g. `12.5`) converted to basis points, rounded to the
/// nearest point. Non-finite input yields `None`.
pub fn percent_to_bps(percent: f64) -> Option<u32> {
    if !percent.is_finite() || percent < 0.0 {
        return None;
    }
    let bps = (percent * 100.0).round();
    if bps > u32::MAX as f64 { None } else { Some(bps as u32) }
}

/// An amount in minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self { Self(cents) }

    pub fn as_cents(&self) -> i64 { self.0 }

    pub fn is_zero(&self) -> bool { self.0 == 0 }

    /// Value in major units, exact.
    pub fn to_major(&self) -> BigDecimal {
        BigDecimal::from(self.0) / BigDecimal::from(MINOR_PER_MAJOR)
    }

    /// Convert a major-unit amount, rounding half-up to the nearest minor unit.
    pub fn from_major(value: &BigDecimal) -> Result<Self, MoneyError> {
        let scaled = value.clone() * BigDecimal::from(MINOR_PER_MAJOR);
        let truncated = scaled.with_scale(0);
        let remainder = (&scaled - &truncated).abs();
        let half = BigDecimal::from(1) / BigDecimal::from(2);
        let mut cents = truncated.to_i64().ok_or(MoneyError::Overflow)?;
        if remainder >= half {
            cents = if scaled < BigDecimal::from(0) { cents - 1 } else { cents + 1 };
        }
        Ok(Self(cents))
    }
}

impl From<Money> for BigDecimal {
    fn from(value: Money) -> Self { value.to_major() }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / MINOR_PER_MAJOR as u64, abs % MINOR_PER_MAJOR as u64)
    }
}
