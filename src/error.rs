// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger error taxonomy.
//!
//! Every engine operation returns [`LedgerError`]. The variants are kinds,
//! not call sites: the HTTP layer maps them to status codes using
//! [`LedgerError::error_code`], and nothing below the engine swallows them
//! except the partial-settlement path, which is recorded for reconciliation
//! instead of being returned.

use crate::money::{Money, MoneyError};
use crate::providers::ProviderError;
use crate::storage::StoreError;
use crate::storage::TxStatus;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Bad or missing input. Never retried.
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The resource exists but belongs to someone else.
    #[error("{0} does not belong to the caller")]
    Unauthorized(String),

    #[error(
        "Insufficient funds: available {available} {currency}, required {required} {currency}"
    )]
    InsufficientFunds {
        available: Money,
        required: Money,
        currency: String,
    },

    #[error("KYC verification is not complete (status: {status})")]
    KycNotComplete { status: String },

    #[error("Transaction PIN has not been set")]
    PinNotSet,

    #[error("Invalid transaction PIN")]
    InvalidPin,

    #[error("Invalid or expired OTP")]
    InvalidOrExpiredOtp,

    /// The transaction already left `pending`; carries the actual state.
    #[error("Transaction {reference} is already {status}")]
    StateConflict { reference: String, status: TxStatus },

    /// Sender leg completed but the recipient credit did not. Internal only.
    #[error("Partial settlement on {reference}: {reason}")]
    PartialSettlement { reference: String, reason: String },

    #[error("External provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Invariant breach inside the engine (e.g. a blocking task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unauthorized(what: impl Into<String>) -> Self {
        Self::Unauthorized(what.into())
    }

    /// Stable machine-readable code for API consumers.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation_error",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Unauthorized(_) => "unauthorized",
            LedgerError::InsufficientFunds { .. } => "insufficient_funds",
            LedgerError::KycNotComplete { .. } => "kyc_not_complete",
            LedgerError::PinNotSet => "pin_not_set",
            LedgerError::InvalidPin => "invalid_pin",
            LedgerError::InvalidOrExpiredOtp => "invalid_or_expired_otp",
            LedgerError::StateConflict { .. } => "state_conflict",
            LedgerError::PartialSettlement { .. } => "partial_settlement",
            LedgerError::Provider(_) => "provider_error",
            LedgerError::Storage(_) | LedgerError::Internal(_) => "internal_error",
        }
    }
}

impl From<MoneyError> for LedgerError {
    fn from(error: MoneyError) -> Self {
        LedgerError::Validation(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind_and_message() {
        let nf = LedgerError::not_found("Transaction abc");
        assert_eq!(nf.error_code(), "not_found");
        assert_eq!(nf.to_string(), "Transaction abc not found");

        let bad = LedgerError::validation("Amount must be positive");
        assert_eq!(bad.error_code(), "validation_error");
        assert_eq!(bad.to_string(), "Amount must be positive");

        let denied = LedgerError::unauthorized("Wallet w-1");
        assert_eq!(denied.error_code(), "unauthorized");
    }

    #[test]
    fn insufficient_funds_reports_available_balance() {
        let err = LedgerError::InsufficientFunds {
            available: "1000.00".parse().unwrap(),
            required: "1000.01".parse().unwrap(),
            currency: "NGN".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: available 1000.00 NGN, required 1000.01 NGN"
        );
    }

    #[test]
    fn state_conflict_names_current_status() {
        let err = LedgerError::StateConflict {
            reference: "DEPX1".to_string(),
            status: TxStatus::Completed,
        };
        assert_eq!(err.to_string(), "Transaction DEPX1 is already completed");
        assert_eq!(err.error_code(), "state_conflict");
    }

    #[test]
    fn money_errors_become_validation_errors() {
        let err: LedgerError = MoneyError::InvalidFormat("x".into()).into();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
