// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory collaborators for development and tests.
//!
//! Everything here keeps its state behind `tokio::sync` locks and is safe
//! to share across tasks. The notifier records what it would have sent so
//! tests can read OTP codes back.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::{
    CryptoBalanceProvider, ExchangeRate, ExchangeRateProvider, IdentityProvider, KycStatus,
    KycStatusProvider, NotificationChannel, PaymentDestination, PaymentMethodVault, ProviderError,
    ProviderResult, UserProfile, VirtualAccount,
};
use crate::config::ConfigError;
use crate::money::Money;
use crate::storage::{OtpPurpose, StoredTransaction};

// =============================================================================
// Identity
// =============================================================================

#[derive(Default)]
pub struct InMemoryIdentity {
    users: RwLock<HashMap<String, UserProfile>>,
    tokens: RwLock<HashMap<String, String>>,
}

impl InMemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, profile: UserProfile) {
        self.users
            .write()
            .await
            .insert(profile.user_id.clone(), profile);
    }

    pub async fn set_pin_hash(&self, user_id: &str, pin_hash: Option<String>) {
        if let Some(user) = self.users.write().await.get_mut(user_id) {
            user.pin_hash = pin_hash;
        }
    }

    /// Register a bearer token for `user_id`.
    pub async fn issue_token(&self, token: &str, user_id: &str) {
        self.tokens
            .write()
            .await
            .insert(token.to_string(), user_id.to_string());
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentity {
    async fn resolve_bearer(&self, token: &str) -> ProviderResult<String> {
        self.tokens
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| ProviderError::Rejected("unknown bearer token".to_string()))
    }

    async fn user(&self, user_id: &str) -> ProviderResult<Option<UserProfile>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> ProviderResult<Option<UserProfile>> {
        let wanted = email.trim();
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(wanted))
            .cloned())
    }
}

// =============================================================================
// KYC
// =============================================================================

#[derive(Default)]
pub struct InMemoryKyc {
    statuses: RwLock<HashMap<String, KycStatus>>,
}

impl InMemoryKyc {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_status(&self, owner_id: &str, status: KycStatus) {
        self.statuses
            .write()
            .await
            .insert(owner_id.to_string(), status);
    }
}

#[async_trait]
impl KycStatusProvider for InMemoryKyc {
    async fn get_status(&self, owner_id: &str) -> ProviderResult<KycStatus> {
        Ok(self
            .statuses
            .read()
            .await
            .get(owner_id)
            .copied()
            .unwrap_or_else(KycStatus::missing))
    }
}

// =============================================================================
// Payment method vault
// =============================================================================

#[derive(Default)]
pub struct InMemoryVault {
    methods: RwLock<HashMap<(String, String), PaymentDestination>>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, owner_id: &str, method_id: &str, destination: PaymentDestination) {
        self.methods
            .write()
            .await
            .insert((owner_id.to_string(), method_id.to_string()), destination);
    }
}

#[async_trait]
impl PaymentMethodVault for InMemoryVault {
    async fn resolve(
        &self,
        owner_id: &str,
        method_id: &str,
    ) -> ProviderResult<Option<PaymentDestination>> {
        Ok(self
            .methods
            .read()
            .await
            .get(&(owner_id.to_string(), method_id.to_string()))
            .cloned())
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// An OTP the notifier was asked to deliver.
#[derive(Debug, Clone)]
pub struct SentOtp {
    pub user_id: String,
    pub email: String,
    pub code: String,
    pub purpose: OtpPurpose,
    pub reference: String,
}

/// Notifier that logs and records instead of sending mail.
#[derive(Default)]
pub struct RecordingNotifier {
    otps: Mutex<Vec<SentOtp>>,
    deposit_instructions: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail with `Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Most recent OTP sent for `reference`.
    pub async fn last_otp_for(&self, reference: &str) -> Option<String> {
        self.otps
            .lock()
            .await
            .iter()
            .rev()
            .find(|otp| otp.reference == reference)
            .map(|otp| otp.code.clone())
    }

    pub async fn sent_otps(&self) -> Vec<SentOtp> {
        self.otps.lock().await.clone()
    }

    /// References for which deposit instructions were sent.
    pub async fn deposit_instructions(&self) -> Vec<String> {
        self.deposit_instructions.lock().await.clone()
    }

    fn check_available(&self) -> ProviderResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("mail transport down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for RecordingNotifier {
    async fn send_otp(
        &self,
        recipient: &UserProfile,
        code: &str,
        purpose: OtpPurpose,
        reference: &str,
    ) -> ProviderResult<()> {
        self.check_available()?;
        info!(
            user_id = %recipient.user_id,
            purpose = purpose.as_str(),
            reference,
            "OTP dispatched"
        );
        self.otps.lock().await.push(SentOtp {
            user_id: recipient.user_id.clone(),
            email: recipient.email.clone(),
            code: code.to_string(),
            purpose,
            reference: reference.to_string(),
        });
        Ok(())
    }

    async fn send_deposit_instructions(
        &self,
        recipient: &UserProfile,
        transaction: &StoredTransaction,
    ) -> ProviderResult<()> {
        self.check_available()?;
        info!(
            user_id = %recipient.user_id,
            reference = %transaction.reference,
            "Deposit instructions dispatched"
        );
        self.deposit_instructions
            .lock()
            .await
            .push(transaction.reference.clone());
        Ok(())
    }
}

// =============================================================================
// Exchange rates
// =============================================================================

/// Fixed rate table, optionally loaded from JSON:
///
/// ```json
/// { "NGN": { "KES": "0.15", "USD": "0.00065" } }
/// ```
///
/// A missing reverse pair is derived from the forward rate.
#[derive(Debug, Clone, Default)]
pub struct StaticRateTable {
    rates: HashMap<(String, String), Decimal>,
}

impl StaticRateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, from: &str, to: &str, rate: Decimal) -> Self {
        self.rates
            .insert((from.to_ascii_uppercase(), to.to_ascii_uppercase()), rate);
        self
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let nested: HashMap<String, HashMap<String, String>> = serde_json::from_str(&raw)?;
        let mut table = Self::new();
        for (from, targets) in nested {
            for (to, rate) in targets {
                let parsed = Decimal::from_str(rate.trim()).map_err(|_| ConfigError::Invalid {
                    name: "exchange rate",
                    value: format!("{from}->{to}: {rate}"),
                })?;
                if parsed <= Decimal::ZERO {
                    return Err(ConfigError::Invalid {
                        name: "exchange rate",
                        value: format!("{from}->{to}: {rate}"),
                    });
                }
                table = table.with_rate(&from, &to, parsed);
            }
        }
        info!(pairs = table.rates.len(), "Exchange rate table loaded");
        Ok(table)
    }

    fn lookup(&self, from: &str, to: &str) -> Option<Decimal> {
        let key = (from.to_ascii_uppercase(), to.to_ascii_uppercase());
        if let Some(rate) = self.rates.get(&key) {
            return Some(*rate);
        }
        let reverse = (key.1, key.0);
        self.rates
            .get(&reverse)
            .filter(|rate| !rate.is_zero())
            .and_then(|rate| Decimal::ONE.checked_div(*rate))
    }
}

#[async_trait]
impl ExchangeRateProvider for StaticRateTable {
    async fn get_rate(&self, from: &str, to: &str) -> ProviderResult<ExchangeRate> {
        let rate = self
            .lookup(from, to)
            .ok_or_else(|| ProviderError::NotFound(format!("rate {from}->{to}")))?;
        let inverse_rate = self
            .lookup(to, from)
            .ok_or_else(|| ProviderError::NotFound(format!("rate {to}->{from}")))?;
        Ok(ExchangeRate { rate, inverse_rate })
    }
}

// =============================================================================
// Crypto custody
// =============================================================================

/// In-memory custodian of virtual accounts.
#[derive(Default)]
pub struct InMemoryCustody {
    accounts: RwLock<HashMap<String, VirtualAccount>>,
    fail_credits: AtomicBool,
    refuse_debits: AtomicBool,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_account(
        &self,
        owner_id: &str,
        currency: &str,
        blockchain: &str,
        balance: Money,
    ) -> VirtualAccount {
        let account = VirtualAccount {
            account_id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            blockchain: blockchain.to_string(),
            currency: currency.to_ascii_uppercase(),
            account_balance: balance,
            available_balance: balance,
            active: true,
            frozen: false,
        };
        self.accounts
            .write()
            .await
            .insert(account.account_id.clone(), account.clone());
        account
    }

    pub async fn get(&self, account_id: &str) -> Option<VirtualAccount> {
        self.accounts.read().await.get(account_id).cloned()
    }

    pub async fn set_frozen(&self, account_id: &str, frozen: bool) {
        if let Some(account) = self.accounts.write().await.get_mut(account_id) {
            account.frozen = frozen;
        }
    }

    /// Make every subsequent credit fail with `Unavailable`.
    pub fn set_failing_credits(&self, failing: bool) {
        self.fail_credits.store(failing, Ordering::SeqCst);
    }

    /// Make every subsequent debit fail with `Rejected`.
    pub fn set_refusing_debits(&self, refusing: bool) {
        self.refuse_debits.store(refusing, Ordering::SeqCst);
    }
}

#[async_trait]
impl CryptoBalanceProvider for InMemoryCustody {
    async fn account(&self, owner_id: &str, currency: &str) -> ProviderResult<Option<VirtualAccount>> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|a| a.owner_id == owner_id && a.currency.eq_ignore_ascii_case(currency))
            .cloned())
    }

    async fn debit(
        &self,
        account_id: &str,
        amount: Money,
        reference: &str,
    ) -> ProviderResult<VirtualAccount> {
        if self.refuse_debits.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected("debit refused by custodian".to_string()));
        }
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(account_id)
            .ok_or_else(|| ProviderError::NotFound(format!("virtual account {account_id}")))?;
        if !account.is_usable() {
            return Err(ProviderError::Rejected(format!(
                "virtual account {account_id} is not usable"
            )));
        }
        if account.available_balance < amount {
            return Err(ProviderError::Rejected(format!(
                "virtual account {account_id} has insufficient balance"
            )));
        }
        account.account_balance = account.account_balance - amount;
        account.available_balance = account.available_balance - amount;
        debug!(account_id, reference, amount = %amount, "Virtual account debited");
        Ok(account.clone())
    }

    async fn credit(
        &self,
        account_id: &str,
        amount: Money,
        reference: &str,
    ) -> ProviderResult<VirtualAccount> {
        if self.fail_credits.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("custodian unreachable".to_string()));
        }
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(account_id)
            .ok_or_else(|| ProviderError::NotFound(format!("virtual account {account_id}")))?;
        if !account.active {
            return Err(ProviderError::Rejected(format!(
                "virtual account {account_id} is inactive"
            )));
        }
        account.account_balance = account.account_balance + amount;
        account.available_balance = account.available_balance + amount;
        debug!(account_id, reference, amount = %amount, "Virtual account credited");
        Ok(account.clone())
    }
}
