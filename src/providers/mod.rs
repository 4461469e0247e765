// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External collaborators consumed by the settlement engine.
//!
//! The engine never talks to an identity service, KYC vendor, payment
//! method vault, mail transport, rate feed or crypto custodian directly. It
//! goes through these traits so deployments can plug real clients in and
//! tests can use the in-memory versions from [`memory`].
//!
//! Implementations may block on I/O. The engine never holds a write
//! transaction while awaiting them.

pub mod memory;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::storage::{OtpPurpose, StoredTransaction};

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Transport or upstream outage; the call may succeed later.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The upstream understood the request and refused it.
    #[error("provider rejected request: {0}")]
    Rejected(String),

    #[error("provider record not found: {0}")]
    NotFound(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

// =============================================================================
// Identity
// =============================================================================

/// What the ledger needs to know about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    /// bcrypt hash of the transaction PIN, if one was set.
    pub pin_hash: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer credential to a stable user id.
    async fn resolve_bearer(&self, token: &str) -> ProviderResult<String>;

    async fn user(&self, user_id: &str) -> ProviderResult<Option<UserProfile>>;

    /// Lookup by e-mail, case-insensitive.
    async fn find_by_email(&self, email: &str) -> ProviderResult<Option<UserProfile>>;
}

// =============================================================================
// KYC
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycState {
    NotStarted,
    Pending,
    Verified,
    Rejected,
}

impl KycState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycState::NotStarted => "not_started",
            KycState::Pending => "pending",
            KycState::Verified => "verified",
            KycState::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycStatus {
    pub has_record: bool,
    pub status: KycState,
    pub tier: u8,
}

impl KycStatus {
    pub fn missing() -> Self {
        Self {
            has_record: false,
            status: KycState::NotStarted,
            tier: 0,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.has_record && self.status == KycState::Verified
    }
}

#[async_trait]
pub trait KycStatusProvider: Send + Sync {
    async fn get_status(&self, owner_id: &str) -> ProviderResult<KycStatus>;
}

// =============================================================================
// Payment method vault
// =============================================================================

/// Decrypted payout destination. Lives only in memory for the duration of
/// one operation; the ledger persists a masked snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentDestination {
    Bank {
        bank_name: String,
        account_number: String,
        account_name: String,
    },
    MobileMoney {
        provider: String,
        phone_number: String,
        account_name: String,
    },
}

#[async_trait]
pub trait PaymentMethodVault: Send + Sync {
    async fn resolve(
        &self,
        owner_id: &str,
        method_id: &str,
    ) -> ProviderResult<Option<PaymentDestination>>;
}

// =============================================================================
// Notifications
// =============================================================================

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send_otp(
        &self,
        recipient: &UserProfile,
        code: &str,
        purpose: OtpPurpose,
        reference: &str,
    ) -> ProviderResult<()>;

    async fn send_deposit_instructions(
        &self,
        recipient: &UserProfile,
        transaction: &StoredTransaction,
    ) -> ProviderResult<()>;
}

// =============================================================================
// Exchange rates
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub rate: Decimal,
    pub inverse_rate: Decimal,
}

#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    /// Units of `to` per unit of `from`.
    async fn get_rate(&self, from: &str, to: &str) -> ProviderResult<ExchangeRate>;
}

// =============================================================================
// Crypto custody
// =============================================================================

/// Externally custodied crypto balance. The custodian is the system of
/// record; the ledger keeps a shadow crypto wallet in sync with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualAccount {
    pub account_id: String,
    pub owner_id: String,
    pub blockchain: String,
    pub currency: String,
    pub account_balance: Money,
    pub available_balance: Money,
    pub active: bool,
    pub frozen: bool,
}

impl VirtualAccount {
    pub fn is_usable(&self) -> bool {
        self.active && !self.frozen
    }
}

#[async_trait]
pub trait CryptoBalanceProvider: Send + Sync {
    async fn account(&self, owner_id: &str, currency: &str) -> ProviderResult<Option<VirtualAccount>>;

    /// Debit `amount`; the custodian refuses if its available balance is short.
    async fn debit(
        &self,
        account_id: &str,
        amount: Money,
        reference: &str,
    ) -> ProviderResult<VirtualAccount>;

    async fn credit(
        &self,
        account_id: &str,
        amount: Money,
        reference: &str,
    ) -> ProviderResult<VirtualAccount>;
}
