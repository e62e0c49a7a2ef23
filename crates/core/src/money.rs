//! Fixed-point currency amounts.
//!
//! Amounts are held in minor units (cents) as `i64`. The HTTP surface speaks
//! decimal numbers in major units, so `Money` (de)serializes as such and rounds
//! to the nearest minor unit on the way in.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

const MINOR_PER_MAJOR: i64 = 100;

// Largest magnitude an f64 still represents exactly as an integer.
const MAX_EXACT_F64: f64 = 9_007_199_254_740_992.0;

/// Non-negative amount of money in minor units.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    /// Build an amount from minor units (e.g. cents).
    pub fn from_minor(minor: i64) -> DomainResult<Self> {
        if minor < 0 {
            return Err(DomainError::validation("amount cannot be negative"));
        }
        Ok(Self(minor))
    }

    /// Build an amount from a decimal number of major units, rounding to the
    /// nearest minor unit.
    pub fn from_major(major: f64) -> DomainResult<Self> {
        if !major.is_finite() {
            return Err(DomainError::validation("amount must be a finite number"));
        }
        let scaled = (major * MINOR_PER_MAJOR as f64).round();
        if scaled < 0.0 {
            return Err(DomainError::validation("amount cannot be negative"));
        }
        if scaled > MAX_EXACT_F64 {
            return Err(DomainError::validation("amount is too large"));
        }
        Ok(Self(scaled as i64))
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn to_major(&self) -> f64 {
        self.0 as f64 / MINOR_PER_MAJOR as f64
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::conflict("amount overflow"))
    }

    /// Multiply a unit price by a (non-negative) quantity.
    pub fn checked_mul(self, quantity: i64) -> DomainResult<Money> {
        if quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        self.0
            .checked_mul(quantity)
            .map(Money)
            .ok_or_else(|| DomainError::conflict("amount overflow"))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}.{:02}",
            self.0 / MINOR_PER_MAJOR,
            self.0 % MINOR_PER_MAJOR
        )
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_major())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let major = f64::deserialize(deserializer)?;
        Money::from_major(major).map_err(serde::de::Error::custom)
    }
}
