// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Money
//!
//! Every balance, fee and conversion amount in the ledger is a [`Money`]
//! value: an arbitrary-precision decimal backed by [`rust_decimal::Decimal`].
//! Floating point never touches a monetary value.
//!
//! ## Serialization
//!
//! Money serializes as a decimal **string** and keeps the scale it was
//! parsed with, so `"1000.00"` parses and formats back to `"1000.00"`.
//! Equality and ordering are numeric (`1000 == 1000.00`).
//!
//! ```rust,ignore
//! let amount: Money = "5000".parse()?;
//! let fee: Money = "200.00".parse()?;
//! assert_eq!((amount - fee).to_string(), "4800.00");
//! ```

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Upper bound accepted for any single operation amount.
///
/// Keeps every sum the ledger computes far away from `Decimal::MAX`.
pub const MAX_OPERATION_AMOUNT: Decimal = Decimal::from_parts(0xA4C6_8000, 0x38D7E, 0, false, 0); // 1_000_000_000_000_000

/// Money parsing and arithmetic errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("invalid amount `{0}`")]
    InvalidFormat(String),

    #[error("amount overflow")]
    Overflow,
}

/// A fixed-precision currency amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Whole-unit amount, mostly useful in tests and static tables.
    pub fn from_units(units: i64) -> Self {
        Self(Decimal::from(units))
    }

    /// Parse a decimal string such as `"1000.00"` or `"0.00000001"`.
    ///
    /// Scientific notation and values that would need rounding to fit are
    /// rejected.
    pub fn parse(raw: &str) -> Result<Self, MoneyError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(MoneyError::InvalidFormat(raw.to_string()));
        }
        Decimal::from_str_exact(trimmed)
            .map(Self)
            .map_err(|_| MoneyError::InvalidFormat(raw.to_string()))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn max(self, other: Money) -> Money {
        if other > self {
            other
        } else {
            self
        }
    }

    pub fn checked_add(self, other: Money) -> Result<Money, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or(MoneyError::Overflow)
    }

    pub fn checked_sub(self, other: Money) -> Result<Money, MoneyError> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or(MoneyError::Overflow)
    }

    /// Multiply by a scalar (fee rate, exchange rate).
    pub fn checked_mul(self, factor: Decimal) -> Result<Money, MoneyError> {
        self.0
            .checked_mul(factor)
            .map(Money)
            .ok_or(MoneyError::Overflow)
    }

    /// Round half away from zero to `scale` decimal places.
    pub fn round_to(self, scale: u32) -> Money {
        Money(
            self.0
                .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Round away from zero to `scale` decimal places (fees never round down).
    pub fn round_up_to(self, scale: u32) -> Money {
        Money(self.0.round_dp_with_strategy(scale, RoundingStrategy::AwayFromZero))
    }

    /// Format with exactly `scale` decimal places, e.g. `4800` → `"4800.00"`.
    pub fn format_scaled(&self, scale: u32) -> String {
        let mut value = self
            .0
            .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(scale);
        value.to_string()
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Money(value)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Money::parse(&raw).map_err(serde::de::Error::custom)
    }
}
