// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bill categories, billers and plans.
//!
//! The catalog is static. Account validation is a format check only; no
//! biller is contacted to confirm that a meter or smartcard exists.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillCategory {
    Airtime,
    Data,
    Electricity,
    CableTv,
    Internet,
    Betting,
}

impl BillCategory {
    pub const ALL: [BillCategory; 6] = [
        BillCategory::Airtime,
        BillCategory::Data,
        BillCategory::Electricity,
        BillCategory::CableTv,
        BillCategory::Internet,
        BillCategory::Betting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BillCategory::Airtime => "airtime",
            BillCategory::Data => "data",
            BillCategory::Electricity => "electricity",
            BillCategory::CableTv => "cable_tv",
            BillCategory::Internet => "internet",
            BillCategory::Betting => "betting",
        }
    }

    /// What the destination account is called for this category.
    pub fn account_label(&self) -> &'static str {
        match self {
            BillCategory::Airtime | BillCategory::Data => "phone number",
            BillCategory::Electricity => "meter number",
            BillCategory::CableTv => "smartcard number",
            BillCategory::Internet => "customer ID",
            BillCategory::Betting => "betting account ID",
        }
    }

    /// Validate and normalize a destination account for this category.
    pub fn validate_account(&self, raw: &str) -> LedgerResult<String> {
        let account: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let digits = |min: usize, max: usize| {
            (min..=max).contains(&account.len()) && account.chars().all(|c| c.is_ascii_digit())
        };
        let valid = match self {
            BillCategory::Airtime | BillCategory::Data => {
                let number = account.strip_prefix('+').unwrap_or(&account);
                (10..=15).contains(&number.len()) && number.chars().all(|c| c.is_ascii_digit())
            }
            BillCategory::Electricity => digits(11, 13),
            BillCategory::CableTv => digits(10, 12),
            BillCategory::Internet => {
                (6..=20).contains(&account.len())
                    && account.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            }
            BillCategory::Betting => {
                (4..=20).contains(&account.len())
                    && account.chars().all(|c| c.is_ascii_alphanumeric())
            }
        };
        if !valid {
            return Err(LedgerError::validation(format!(
                "Invalid {} for {}",
                self.account_label(),
                self.as_str()
            )));
        }
        Ok(account)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillPlan {
    pub code: String,
    pub name: String,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillProvider {
    pub code: String,
    pub name: String,
    pub category: BillCategory,
    pub currency: String,
    /// Empty for freeform-amount billers.
    pub plans: Vec<BillPlan>,
}

impl BillProvider {
    pub fn requires_plan(&self) -> bool {
        !self.plans.is_empty()
    }

    pub fn plan(&self, plan_code: &str) -> Option<&BillPlan> {
        self.plans
            .iter()
            .find(|p| p.code.eq_ignore_ascii_case(plan_code))
    }
}

/// Static biller catalog.
#[derive(Debug, Clone)]
pub struct BillCatalog {
    providers: Vec<BillProvider>,
}

impl Default for BillCatalog {
    fn default() -> Self {
        let ngn = |code: &str, name: &str, category, plans: &[(&str, &str, i64)]| BillProvider {
            code: code.to_string(),
            name: name.to_string(),
            category,
            currency: "NGN".to_string(),
            plans: plans
                .iter()
                .map(|(code, name, price)| BillPlan {
                    code: (*code).to_string(),
                    name: (*name).to_string(),
                    price: Money::from_units(*price),
                })
                .collect(),
        };

        let providers = vec![
            ngn("MTN", "MTN Airtime", BillCategory::Airtime, &[]),
            ngn("AIRTEL", "Airtel Airtime", BillCategory::Airtime, &[]),
            ngn("GLO", "Glo Airtime", BillCategory::Airtime, &[]),
            ngn("9MOBILE", "9mobile Airtime", BillCategory::Airtime, &[]),
            ngn(
                "MTN-DATA",
                "MTN Data",
                BillCategory::Data,
                &[("MTN-1GB", "1GB / 30 days", 1_000), ("MTN-5GB", "5GB / 30 days", 3_500)],
            ),
            ngn(
                "AIRTEL-DATA",
                "Airtel Data",
                BillCategory::Data,
                &[("AIRTEL-2GB", "2GB / 30 days", 1_500), ("AIRTEL-10GB", "10GB / 30 days", 5_000)],
            ),
            ngn("IKEDC", "Ikeja Electric", BillCategory::Electricity, &[]),
            ngn("EKEDC", "Eko Electric", BillCategory::Electricity, &[]),
            ngn("AEDC", "Abuja Electric", BillCategory::Electricity, &[]),
            ngn(
                "DSTV",
                "DStv",
                BillCategory::CableTv,
                &[("DSTV-COMPACT", "Compact", 15_700), ("DSTV-PREMIUM", "Premium", 37_000)],
            ),
            ngn(
                "GOTV",
                "GOtv",
                BillCategory::CableTv,
                &[("GOTV-JOLLI", "Jolli", 4_850), ("GOTV-MAX", "Max", 7_200)],
            ),
            ngn(
                "SPECTRANET",
                "Spectranet",
                BillCategory::Internet,
                &[("SPECTRANET-30", "Unlimited 30 days", 20_000)],
            ),
            ngn("BET9JA", "Bet9ja", BillCategory::Betting, &[]),
            ngn("SPORTYBET", "SportyBet", BillCategory::Betting, &[]),
            BillProvider {
                code: "SAFARICOM".to_string(),
                name: "Safaricom Airtime".to_string(),
                category: BillCategory::Airtime,
                currency: "KES".to_string(),
                plans: Vec::new(),
            },
            BillProvider {
                code: "KPLC".to_string(),
                name: "Kenya Power".to_string(),
                category: BillCategory::Electricity,
                currency: "KES".to_string(),
                plans: Vec::new(),
            },
        ];
        Self { providers }
    }
}

impl BillCatalog {
    pub fn new(providers: Vec<BillProvider>) -> Self {
        Self { providers }
    }

    pub fn providers(&self, category: BillCategory) -> Vec<&BillProvider> {
        self.providers
            .iter()
            .filter(|p| p.category == category)
            .collect()
    }

    pub fn provider(&self, code: &str) -> Option<&BillProvider> {
        self.providers
            .iter()
            .find(|p| p.code.eq_ignore_ascii_case(code.trim()))
    }
}
