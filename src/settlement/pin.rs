// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction PIN checks.
//!
//! PINs are only ever compared against a bcrypt hash held by the identity
//! provider. bcrypt is deliberately slow, so the comparison runs on the
//! blocking pool.

use crate::error::{LedgerError, LedgerResult};
use crate::providers::UserProfile;

/// Hash a PIN with bcrypt at the given cost.
pub fn hash_pin(pin: &str, cost: u32) -> LedgerResult<String> {
    bcrypt::hash(pin, cost).map_err(|e| LedgerError::Internal(format!("bcrypt: {e}")))
}

/// Fail unless the user has a PIN configured.
pub fn ensure_pin_set(profile: &UserProfile) -> LedgerResult<&str> {
    profile
        .pin_hash
        .as_deref()
        .filter(|hash| !hash.is_empty())
        .ok_or(LedgerError::PinNotSet)
}

/// Compare `pin` against the user's stored hash.
pub async fn verify_pin(profile: &UserProfile, pin: &str) -> LedgerResult<()> {
    let hash = ensure_pin_set(profile)?.to_string();
    let candidate = pin.to_string();

    let matched = tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &hash))
        .await
        .map_err(|e| LedgerError::Internal(format!("PIN check aborted: {e}")))?;

    match matched {
        Ok(true) => Ok(()),
        Ok(false) => Err(LedgerError::InvalidPin),
        Err(e) => {
            // A malformed stored hash can never match.
            tracing::warn!(user_id = %profile.user_id, error = %e, "Stored PIN hash is unreadable");
            Err(LedgerError::InvalidPin)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(pin_hash: Option<String>) -> UserProfile {
        UserProfile {
            user_id: "user-1".to_string(),
            email: "a@x.com".to_string(),
            display_name: "Ada".to_string(),
            pin_hash,
        }
    }

    #[tokio::test]
    async fn correct_pin_passes_and_wrong_pin_fails() {
        let user = profile(Some(hash_pin("1234", 4).unwrap()));
        assert!(verify_pin(&user, "1234").await.is_ok());
        assert!(matches!(
            verify_pin(&user, "4321").await,
            Err(LedgerError::InvalidPin)
        ));
    }

    #[tokio::test]
    async fn missing_hash_is_pin_not_set() {
        assert!(matches!(
            verify_pin(&profile(None), "1234").await,
            Err(LedgerError::PinNotSet)
        ));
        assert!(matches!(
            verify_pin(&profile(Some(String::new())), "1234").await,
            Err(LedgerError::PinNotSet)
        ));
    }

    #[tokio::test]
    async fn garbage_hash_never_matches() {
        let user = profile(Some("not-a-bcrypt-hash".to_string()));
        assert!(matches!(
            verify_pin(&user, "1234").await,
            Err(LedgerError::InvalidPin)
        ));
    }
}
