// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Settlement Engine
//!
//! Two-phase money movement for deposits, transfers, conversions and bill
//! payments. Every flow follows the same shape:
//!
//! 1. **initiate** validates input, resolves wallets, computes the fee and
//!    (except for bill payments) writes a `pending` transaction.
//! 2. **confirm** re-checks ownership, state, PIN (and OTP for transfers),
//!    then moves money and completes the transaction in one redb write
//!    transaction that re-reads the row and re-checks `pending` and the
//!    available balance. Nothing is trusted from the initiate-time snapshot
//!    except the destination and fee terms.
//!
//! Collaborator calls (identity, KYC, vault, notifications, rates, crypto
//! custody) happen before or after a write transaction, never inside one.
//!
//! ## Flow modules
//!
//! - [`deposit`]: `initiate_deposit`, `confirm_deposit`
//! - [`transfer`]: `initiate_transfer`, `verify_transfer`, `resend_transfer_otp`,
//!   `update_integration_status`
//! - [`conversion`]: `calculate_conversion`, `initiate_conversion`, `confirm_conversion`
//! - [`bill_payment`]: `initiate_bill_payment`, `confirm_bill_payment`, beneficiaries
//! - [`crypto`]: virtual-account resolution and shadow-wallet sync
//! - [`recipient`]: internal recipient credits and their reconciliation
//! - [`queries`]: wallet listing, history and wallet administration

pub mod bill_payment;
pub mod conversion;
pub mod crypto;
pub mod deposit;
pub mod pin;
pub mod queries;
pub mod recipient;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testkit;

pub use bill_payment::{BillDestination, BillPaymentPreview, BillPaymentRequest, NewBeneficiary};
pub use conversion::{ConversionLegs, ConversionQuote, ConversionRequest};
pub use crypto::CryptoBalance;
pub use deposit::{ConfirmedDeposit, DepositRequest, InitiatedDeposit};
pub use recipient::ReconciliationReport;
pub use transfer::{
    CompletedTransfer, InitiatedTransfer, OtpDispatch, RecipientLookup, TransferDestination,
    TransferRequest,
};

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::billing::BillCatalog;
use crate::currency;
use crate::error::{LedgerError, LedgerResult};
use crate::fees::FeePolicy;
use crate::money::Money;
use crate::providers::{
    CryptoBalanceProvider, ExchangeRateProvider, IdentityProvider, KycStatusProvider,
    NotificationChannel, PaymentMethodVault, UserProfile,
};
use crate::reference;
use crate::storage::repository::wallets::ensure_valid_amount;
use crate::storage::{
    AuditEvent, AuditEventType, AuditRepository, LedgerDatabase, OwnershipCheck, StoreError,
    StoredTransaction, TxCache,
};

/// Transfer OTP lifetime unless overridden with [`SettlementEngine::with_otp_ttl`].
const DEFAULT_OTP_TTL_MINUTES: i64 = 5;

/// Wallets whose first history page is kept in memory.
const HISTORY_CACHE_CAPACITY: usize = 1_000;

const HISTORY_CACHE_TTL: Duration = Duration::from_secs(60);

/// Attempts at allocating a fresh reference before giving up.
const REFERENCE_ATTEMPTS: usize = 3;

/// External services the engine depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub kyc: Arc<dyn KycStatusProvider>,
    pub vault: Arc<dyn PaymentMethodVault>,
    pub notifier: Arc<dyn NotificationChannel>,
    pub rates: Arc<dyn ExchangeRateProvider>,
    pub custody: Arc<dyn CryptoBalanceProvider>,
}

/// Orchestrates every ledger operation.
///
/// Cheap to share behind an `Arc`; all state lives in the database.
pub struct SettlementEngine {
    db: Arc<LedgerDatabase>,
    fees: FeePolicy,
    catalog: BillCatalog,
    providers: Collaborators,
    history: TxCache,
    otp_ttl: chrono::Duration,
}

impl SettlementEngine {
    /// Create an engine over an opened database.
    pub fn new(db: Arc<LedgerDatabase>, fees: FeePolicy, providers: Collaborators) -> Self {
        Self {
            db,
            fees,
            catalog: BillCatalog::default(),
            providers,
            history: TxCache::new(HISTORY_CACHE_CAPACITY, HISTORY_CACHE_TTL),
            otp_ttl: chrono::Duration::minutes(DEFAULT_OTP_TTL_MINUTES),
        }
    }

    /// Override the transfer OTP lifetime. Out-of-range values keep the
    /// current setting.
    pub fn with_otp_ttl(mut self, ttl: Duration) -> Self {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self.otp_ttl = ttl,
            Err(_) => warn!(?ttl, "OTP lifetime out of range, keeping default"),
        }
        self
    }

    pub fn with_catalog(mut self, catalog: BillCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn database(&self) -> &LedgerDatabase {
        &self.db
    }

    pub fn fee_policy(&self) -> &FeePolicy {
        &self.fees
    }

    pub fn catalog(&self) -> &BillCatalog {
        &self.catalog
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    /// Load a user profile or fail with `NotFound`.
    async fn require_user(&self, user_id: &str) -> LedgerResult<UserProfile> {
        self.providers
            .identity
            .user(user_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("User {user_id}")))
    }

    /// KYC verified and PIN configured. Checked before anything is written.
    async fn require_transfer_gate(&self, owner_id: &str) -> LedgerResult<UserProfile> {
        let kyc = self.providers.kyc.get_status(owner_id).await?;
        if !kyc.is_verified() {
            return Err(LedgerError::KycNotComplete {
                status: kyc.status.as_str().to_string(),
            });
        }
        let profile = self.require_user(owner_id).await?;
        pin::ensure_pin_set(&profile)?;
        Ok(profile)
    }

    /// bcrypt PIN check; a mismatch is audited against `resource_id`.
    async fn check_pin(&self, profile: &UserProfile, pin: &str, resource_id: &str) -> LedgerResult<()> {
        let result = pin::verify_pin(profile, pin).await;
        if let Err(LedgerError::InvalidPin) = &result {
            self.audit(
                AuditEvent::new(AuditEventType::InvalidPin)
                    .with_user(&profile.user_id)
                    .with_resource("transaction", resource_id)
                    .failed("PIN mismatch"),
            );
        }
        result
    }

    /// Load a transaction by id and check the caller owns it.
    fn owned_transaction(&self, caller: &str, tx_id: &str) -> LedgerResult<StoredTransaction> {
        let found = self.db.snapshot()?.transaction(tx_id)?;
        let result = found.verify_owner(caller, &format!("Transaction {tx_id}"));
        if let Err(LedgerError::Unauthorized(_)) = &result {
            self.audit(
                AuditEvent::new(AuditEventType::PermissionDenied)
                    .with_user(caller)
                    .with_resource("transaction", tx_id)
                    .failed("not the owner"),
            );
        }
        result
    }

    /// Run `attempt` with freshly generated references until one is free.
    fn with_fresh_reference<T>(
        &self,
        prefix: &str,
        mut attempt: impl FnMut(String) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        for _ in 0..REFERENCE_ATTEMPTS {
            match attempt(reference::generate(prefix)) {
                Err(LedgerError::Storage(StoreError::Conflict(what))) => {
                    warn!(prefix, conflict = %what, "Reference collision, regenerating");
                }
                other => return other,
            }
        }
        Err(LedgerError::Internal(format!(
            "could not allocate a unique {prefix} reference"
        )))
    }

    /// Append an audit event. Audit failures are logged, never surfaced.
    fn audit(&self, event: AuditEvent) {
        if let Err(e) = AuditRepository::new(&self.db).log(&event) {
            warn!(
                event_type = ?event.event_type,
                error = %e,
                "Failed to write audit event"
            );
        }
    }

    /// Drop cached history for wallets touched by a commit.
    fn invalidate_history(&self, wallet_ids: &[&str]) {
        for wallet_id in wallet_ids {
            self.history.invalidate(wallet_id);
        }
    }
}

/// Positive, bounded and no finer than the currency's scale.
fn validate_amount(amount: Money, currency: &str) -> LedgerResult<()> {
    ensure_valid_amount(amount)?;
    let scale = currency::scale_of(currency);
    if amount.round_to(scale) != amount {
        return Err(LedgerError::validation(format!(
            "{currency} amounts have at most {scale} decimal places"
        )));
    }
    Ok(())
}
