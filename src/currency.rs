// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Currency codes and their display scales.

use crate::error::LedgerError;

/// Crypto symbols held through external virtual accounts.
pub const CRYPTO_CURRENCIES: [&str; 8] = ["BTC", "ETH", "USDT", "USDC", "BNB", "SOL", "TRX", "LTC"];

/// Decimal places shown for fiat amounts.
pub const FIAT_SCALE: u32 = 2;

/// Decimal places shown for crypto amounts.
pub const CRYPTO_SCALE: u32 = 8;

/// Normalize a caller-supplied currency code (`" ngn "` → `"NGN"`).
pub fn normalize(code: &str) -> Result<String, LedgerError> {
    let normalized = code.trim().to_ascii_uppercase();
    if normalized.len() < 2
        || normalized.len() > 10
        || !normalized.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(LedgerError::validation(format!(
            "Unsupported currency code `{code}`"
        )));
    }
    Ok(normalized)
}

pub fn is_crypto(code: &str) -> bool {
    CRYPTO_CURRENCIES
        .iter()
        .any(|symbol| symbol.eq_ignore_ascii_case(code))
}

pub fn scale_of(code: &str) -> u32 {
    if is_crypto(code) {
        CRYPTO_SCALE
    } else {
        FIAT_SCALE
    }
}
