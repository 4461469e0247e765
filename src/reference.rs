// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Opaque transaction references.
//!
//! Format: `{PREFIX}{base36 millis}{hex random}{hex sequence}`, uppercased.
//! The per-process sequence makes two references generated in the same
//! millisecond differ even if the random bytes collide. The format is
//! advisory for banks and mobile-money providers; uniqueness is also
//! enforced by the reference index in storage.

use std::sync::atomic::{AtomicU16, Ordering};

use chrono::Utc;
use rand::RngCore;

pub const DEPOSIT_PREFIX: &str = "DEP";
pub const TRANSFER_PREFIX: &str = "TRF";
pub const CONVERSION_PREFIX: &str = "CNV";
pub const BILL_PAYMENT_PREFIX: &str = "BIL";

/// Suffix appended to a sender reference for the recipient's credit leg.
pub const CREDIT_LEG_SUFFIX: &str = "-CR";

/// Suffixes for the two legs of a conversion.
pub const DEBIT_LEG_SUFFIX: &str = "-DR";

static SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Generate a new reference with the given prefix.
pub fn generate(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut random = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut random);
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);

    format!(
        "{}{}{}{:04x}",
        prefix,
        to_base36(millis),
        hex::encode(random),
        sequence
    )
    .to_ascii_uppercase()
}

/// Reference of the recipient credit leg paired with `sender_reference`.
pub fn credit_leg(sender_reference: &str) -> String {
    format!("{sender_reference}{CREDIT_LEG_SUFFIX}")
}

/// Reference of the debit leg of a conversion.
pub fn debit_leg(correlation: &str) -> String {
    format!("{correlation}{DEBIT_LEG_SUFFIX}")
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(13);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_706_400_000_000), "lrwqi2o0");
    }

    #[test]
    fn format_is_prefixed_and_uppercase() {
        let reference = generate(TRANSFER_PREFIX);
        assert!(reference.starts_with("TRF"));
        assert_eq!(reference, reference.to_ascii_uppercase());
        assert!(reference.chars().all(|c| c.is_ascii_alphanumeric()));
        // prefix + 8 base36 digits + 8 hex random + 4 hex sequence
        assert_eq!(reference.len(), 3 + 8 + 8 + 4);
    }

    #[test]
    fn ten_thousand_references_never_collide() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generate(DEPOSIT_PREFIX)));
        }
    }

    #[test]
    fn concurrent_generation_never_collides() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..5_000).map(|_| generate("X")).collect::<Vec<_>>()))
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for reference in handle.join().unwrap() {
                assert!(seen.insert(reference));
            }
        }
        assert_eq!(seen.len(), 20_000);
    }

    #[test]
    fn leg_references() {
        assert_eq!(credit_leg("TRF1"), "TRF1-CR");
        assert_eq!(debit_leg("CNV1"), "CNV1-DR");
    }
}
