// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fee calculation.
//!
//! `fee = max(amount × rate(kind), min_fee(currency, kind))`, rounded up to
//! the currency's display scale. Rates and minimums live in a static
//! [`FeeSchedule`] that can be replaced from a JSON file at startup.
//!
//! | kind | rate | NGN min | KES min | unknown currency |
//! |------|------|---------|---------|------------------|
//! | deposit | 0.10% | 200 | 50 | 1 |
//! | transfer | 0.10% | 20 | 10 | 0.5 |
//! | conversion | 0.25% | 100 | 50 | 0.5 |
//! | bill_payment | 0.10% | 50 | 10 | 0.5 |

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ConfigError;
use crate::currency;
use crate::error::{LedgerError, LedgerResult};
use crate::money::{Money, MoneyError};

/// Operation kinds that carry a fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deposit,
    Transfer,
    Conversion,
    BillPayment,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Transfer => "transfer",
            OperationKind::Conversion => "conversion",
            OperationKind::BillPayment => "bill_payment",
        }
    }
}

/// Rate and per-currency minimums for one operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindSchedule {
    /// Fractional rate (`0.001` = 0.10%).
    pub rate: Decimal,
    /// Minimum used for currencies missing from `minimums`.
    pub default_minimum: Money,
    #[serde(default)]
    pub minimums: HashMap<String, Money>,
}

impl KindSchedule {
    fn minimum_for(&self, currency: &str) -> Money {
        self.minimums
            .get(currency)
            .copied()
            .unwrap_or(self.default_minimum)
    }
}

/// Complete fee table keyed by operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub kinds: HashMap<OperationKind, KindSchedule>,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        let mut kinds = HashMap::new();
        kinds.insert(
            OperationKind::Deposit,
            kind_schedule(
                "0.001",
                "1",
                &[
                    ("NGN", "200"),
                    ("KES", "50"),
                    ("GHS", "5"),
                    ("ZAR", "10"),
                    ("USD", "1"),
                    ("EUR", "1"),
                    ("GBP", "1"),
                    ("USDT", "1"),
                    ("USDC", "1"),
                    ("BTC", "0.00001"),
                    ("ETH", "0.0001"),
                ],
            ),
        );
        kinds.insert(
            OperationKind::Transfer,
            kind_schedule(
                "0.001",
                "0.5",
                &[
                    ("NGN", "20"),
                    ("KES", "10"),
                    ("GHS", "1"),
                    ("ZAR", "2"),
                    ("USD", "0.5"),
                    ("EUR", "0.5"),
                    ("GBP", "0.5"),
                    ("USDT", "1"),
                    ("USDC", "1"),
                    ("BTC", "0.00001"),
                    ("ETH", "0.0002"),
                ],
            ),
        );
        kinds.insert(
            OperationKind::Conversion,
            kind_schedule(
                "0.0025",
                "0.5",
                &[
                    ("NGN", "100"),
                    ("KES", "50"),
                    ("GHS", "2"),
                    ("ZAR", "5"),
                    ("USD", "0.5"),
                    ("EUR", "0.5"),
                    ("GBP", "0.5"),
                ],
            ),
        );
        kinds.insert(
            OperationKind::BillPayment,
            kind_schedule(
                "0.001",
                "0.5",
                &[
                    ("NGN", "50"),
                    ("KES", "10"),
                    ("GHS", "1"),
                    ("ZAR", "2"),
                    ("USD", "0.5"),
                ],
            ),
        );
        Self { kinds }
    }
}

fn kind_schedule(rate: &str, default_minimum: &str, minimums: &[(&str, &str)]) -> KindSchedule {
    // Static literals above; a typo here is a programming error caught by tests.
    let parse = |raw: &str| Money::parse(raw).unwrap_or(Money::ZERO);
    KindSchedule {
        rate: Decimal::from_str(rate).unwrap_or(Decimal::ZERO),
        default_minimum: parse(default_minimum),
        minimums: minimums
            .iter()
            .map(|(code, min)| ((*code).to_string(), parse(min)))
            .collect(),
    }
}

/// Pure fee calculator over a [`FeeSchedule`].
#[derive(Debug, Clone, Default)]
pub struct FeePolicy {
    schedule: FeeSchedule,
}

impl FeePolicy {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    /// Load a schedule from JSON. Kinds missing from the file keep their
    /// built-in defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let overrides: FeeSchedule = serde_json::from_str(&raw)?;
        let mut schedule = FeeSchedule::default();
        schedule.kinds.extend(overrides.kinds);
        Ok(Self { schedule })
    }

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    /// Compute the fee for `amount` of `currency`.
    pub fn compute_fee(
        &self,
        amount: Money,
        currency: &str,
        kind: OperationKind,
    ) -> Result<Money, MoneyError> {
        let Some(table) = self.schedule.kinds.get(&kind) else {
            return Ok(Money::ZERO);
        };
        let proportional = amount.checked_mul(table.rate)?;
        let fee = proportional
            .max(table.minimum_for(currency))
            .max(Money::ZERO);
        Ok(fee.round_up_to(currency::scale_of(currency)))
    }

    /// Reject operations whose fee swallows the whole amount.
    ///
    /// This only happens with tiny amounts or a misconfigured table, so it
    /// is logged as a configuration warning and surfaced as a validation
    /// error.
    pub fn check_covers(
        &self,
        amount: Money,
        fee: Money,
        currency: &str,
        kind: OperationKind,
    ) -> LedgerResult<()> {
        if fee >= amount {
            warn!(
                kind = kind.as_str(),
                currency,
                amount = %amount,
                fee = %fee,
                "fee schedule yields a fee that is not below the operation amount"
            );
            return Err(LedgerError::validation(format!(
                "Amount {amount} {currency} does not cover the {fee} {currency} {} fee",
                kind.as_str()
            )));
        }
        Ok(())
    }
}
