// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet repository.
//!
//! A wallet holds one currency for one owner. There is exactly one wallet
//! per `(owner, currency, kind)`; the `wallet_owner_index` table is the
//! uniqueness constraint and is claimed in the same write transaction that
//! inserts the wallet row.
//!
//! The `*_in` functions operate on an open [`LedgerBatch`] so the settlement
//! engine can compose them with transaction writes. The [`WalletStore`]
//! methods wrap each one in its own write transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};
use crate::money::{Money, MAX_OPERATION_AMOUNT};
use crate::storage::ledger_db::{wallet_owner_key, LedgerBatch, LedgerDatabase, StoreError};
use crate::storage::ownership::OwnedResource;

/// Wallet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletKind {
    Fiat,
    /// Shadow of an external virtual account.
    Crypto,
}

impl WalletKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletKind::Fiat => "fiat",
            WalletKind::Crypto => "crypto",
        }
    }
}

/// Wallet record stored in the `wallets` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_id: String,
    pub owner_id: String,
    pub currency: String,
    pub kind: WalletKind,
    pub balance: Money,
    /// Earmarked funds; always `0 ≤ locked_balance ≤ balance`.
    pub locked_balance: Money,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// A fresh, active wallet with zero balances.
    pub fn new(wallet_id: String, owner_id: String, currency: String, kind: WalletKind) -> Self {
        let now = Utc::now();
        Self {
            wallet_id,
            owner_id,
            currency,
            kind,
            balance: Money::ZERO,
            locked_balance: Money::ZERO,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Spendable portion of the balance.
    pub fn available_balance(&self) -> Money {
        self.balance - self.locked_balance
    }

    pub fn owner_key(&self) -> String {
        wallet_owner_key(&self.owner_id, &self.currency, self.kind.as_str())
    }
}

impl OwnedResource for Wallet {
    fn owner_user_id(&self) -> &str {
        &self.owner_id
    }

    fn resource_label(&self) -> String {
        format!("Wallet {}", self.wallet_id)
    }
}

// =============================================================================
// Batch operations
// =============================================================================

/// Reject non-positive and absurdly large amounts.
pub fn ensure_valid_amount(amount: Money) -> LedgerResult<()> {
    if !amount.is_positive() {
        return Err(LedgerError::validation("Amount must be greater than zero"));
    }
    if amount.amount() > MAX_OPERATION_AMOUNT {
        return Err(LedgerError::validation("Amount exceeds the maximum allowed"));
    }
    Ok(())
}

/// Reject inactive wallets.
pub fn ensure_active(wallet: &Wallet) -> LedgerResult<()> {
    if !wallet.is_active {
        return Err(LedgerError::validation(format!(
            "Wallet {} is inactive",
            wallet.wallet_id
        )));
    }
    Ok(())
}

fn load_active(batch: &LedgerBatch<'_>, wallet_id: &str) -> LedgerResult<Wallet> {
    let wallet = batch
        .wallet(wallet_id)?
        .ok_or_else(|| LedgerError::not_found(format!("Wallet {wallet_id}")))?;
    ensure_active(&wallet)?;
    Ok(wallet)
}

/// Return the wallet for `(owner, currency, kind)`, creating it if absent.
pub fn get_or_create_in(
    batch: &LedgerBatch<'_>,
    owner_id: &str,
    currency: &str,
    kind: WalletKind,
) -> LedgerResult<Wallet> {
    let key = wallet_owner_key(owner_id, currency, kind.as_str());
    if let Some(wallet_id) = batch.wallet_id_for(&key)? {
        return batch
            .wallet(&wallet_id)?
            .ok_or_else(|| LedgerError::not_found(format!("Wallet {wallet_id}")));
    }

    let wallet = Wallet::new(
        uuid::Uuid::new_v4().to_string(),
        owner_id.to_string(),
        currency.to_string(),
        kind,
    );
    batch.index_wallet(&key, &wallet.wallet_id)?;
    batch.put_wallet(&wallet)?;
    info!(
        wallet_id = %wallet.wallet_id,
        owner_id,
        currency,
        kind = kind.as_str(),
        "Wallet created"
    );
    Ok(wallet)
}

/// Decrement the balance if `available ≥ amount`.
pub fn debit_in(batch: &LedgerBatch<'_>, wallet_id: &str, amount: Money) -> LedgerResult<Wallet> {
    ensure_valid_amount(amount)?;
    let mut wallet = load_active(batch, wallet_id)?;
    let available = wallet.available_balance();
    if available < amount {
        return Err(LedgerError::InsufficientFunds {
            available,
            required: amount,
            currency: wallet.currency,
        });
    }
    wallet.balance = wallet.balance.checked_sub(amount)?;
    wallet.updated_at = Utc::now();
    batch.put_wallet(&wallet)?;
    debug!(wallet_id, amount = %amount, balance = %wallet.balance, "Wallet debited");
    Ok(wallet)
}

/// Increment the balance. Fails only for inactive wallets.
pub fn credit_in(batch: &LedgerBatch<'_>, wallet_id: &str, amount: Money) -> LedgerResult<Wallet> {
    ensure_valid_amount(amount)?;
    let mut wallet = load_active(batch, wallet_id)?;
    wallet.balance = wallet.balance.checked_add(amount)?;
    wallet.updated_at = Utc::now();
    batch.put_wallet(&wallet)?;
    debug!(wallet_id, amount = %amount, balance = %wallet.balance, "Wallet credited");
    Ok(wallet)
}

pub fn lock_in(batch: &LedgerBatch<'_>, wallet_id: &str, amount: Money) -> LedgerResult<Wallet> {
    ensure_valid_amount(amount)?;
    let mut wallet = load_active(batch, wallet_id)?;
    let locked = wallet.locked_balance.checked_add(amount)?;
    if locked > wallet.balance {
        return Err(LedgerError::InsufficientFunds {
            available: wallet.available_balance(),
            required: amount,
            currency: wallet.currency,
        });
    }
    wallet.locked_balance = locked;
    wallet.updated_at = Utc::now();
    batch.put_wallet(&wallet)?;
    Ok(wallet)
}

pub fn unlock_in(batch: &LedgerBatch<'_>, wallet_id: &str, amount: Money) -> LedgerResult<Wallet> {
    ensure_valid_amount(amount)?;
    let mut wallet = batch
        .wallet(wallet_id)?
        .ok_or_else(|| LedgerError::not_found(format!("Wallet {wallet_id}")))?;
    if amount > wallet.locked_balance {
        return Err(LedgerError::validation(format!(
            "Cannot unlock {amount} {}: only {} is locked",
            wallet.currency, wallet.locked_balance
        )));
    }
    wallet.locked_balance = wallet.locked_balance.checked_sub(amount)?;
    wallet.updated_at = Utc::now();
    batch.put_wallet(&wallet)?;
    Ok(wallet)
}

/// Overwrite a shadow wallet's balance with the external account balance.
///
/// The locked amount is clamped so the wallet stays consistent.
pub fn sync_balance_in(
    batch: &LedgerBatch<'_>,
    wallet_id: &str,
    balance: Money,
) -> LedgerResult<Wallet> {
    if balance.is_negative() {
        return Err(LedgerError::validation("Mirrored balance cannot be negative"));
    }
    let mut wallet = batch
        .wallet(wallet_id)?
        .ok_or_else(|| LedgerError::not_found(format!("Wallet {wallet_id}")))?;
    if wallet.balance == balance {
        return Ok(wallet);
    }
    wallet.balance = balance;
    if wallet.locked_balance > balance {
        wallet.locked_balance = balance;
    }
    wallet.updated_at = Utc::now();
    batch.put_wallet(&wallet)?;
    Ok(wallet)
}

fn set_active_in(batch: &LedgerBatch<'_>, wallet_id: &str, active: bool) -> LedgerResult<Wallet> {
    let mut wallet = batch
        .wallet(wallet_id)?
        .ok_or_else(|| LedgerError::not_found(format!("Wallet {wallet_id}")))?;
    wallet.is_active = active;
    wallet.updated_at = Utc::now();
    batch.put_wallet(&wallet)?;
    Ok(wallet)
}

// =============================================================================
// WalletStore
// =============================================================================

/// Repository for wallet operations.
pub struct WalletStore<'a> {
    db: &'a LedgerDatabase,
}

impl<'a> WalletStore<'a> {
    /// Create a new WalletStore.
    pub fn new(db: &'a LedgerDatabase) -> Self {
        Self { db }
    }

    /// Get a wallet by ID.
    pub fn get(&self, wallet_id: &str) -> LedgerResult<Wallet> {
        self.db
            .snapshot()?
            .wallet(wallet_id)?
            .ok_or_else(|| LedgerError::not_found(format!("Wallet {wallet_id}")))
    }

    /// Find the wallet for `(owner, currency, kind)` without creating it.
    pub fn find(&self, owner_id: &str, currency: &str, kind: WalletKind) -> LedgerResult<Option<Wallet>> {
        let snapshot = self.db.snapshot()?;
        let key = wallet_owner_key(owner_id, currency, kind.as_str());
        match snapshot.wallet_id_for(&key)? {
            Some(wallet_id) => Ok(snapshot.wallet(&wallet_id)?),
            None => Ok(None),
        }
    }

    /// Return the existing wallet or create one with zero balances.
    ///
    /// Concurrent callers serialize on the write transaction; whoever loses
    /// sees the winner's index entry and returns the same wallet.
    pub fn get_or_create(&self, owner_id: &str, currency: &str, kind: WalletKind) -> LedgerResult<Wallet> {
        if let Some(wallet) = self.find(owner_id, currency, kind)? {
            return Ok(wallet);
        }
        match self
            .db
            .write(|batch| get_or_create_in(batch, owner_id, currency, kind))
        {
            Err(LedgerError::Storage(StoreError::Conflict(_))) => self
                .find(owner_id, currency, kind)?
                .ok_or_else(|| LedgerError::not_found(format!("Wallet for {owner_id} {currency}"))),
            other => other,
        }
    }

    /// List all wallets owned by a user.
    pub fn list_by_owner(&self, owner_id: &str) -> LedgerResult<Vec<Wallet>> {
        Ok(self.db.snapshot()?.wallets_for_owner(owner_id)?)
    }

    pub fn debit(&self, wallet_id: &str, amount: Money) -> LedgerResult<Wallet> {
        self.db.write(|batch| debit_in(batch, wallet_id, amount))
    }

    pub fn credit(&self, wallet_id: &str, amount: Money) -> LedgerResult<Wallet> {
        self.db.write(|batch| credit_in(batch, wallet_id, amount))
    }

    pub fn lock(&self, wallet_id: &str, amount: Money) -> LedgerResult<Wallet> {
        self.db.write(|batch| lock_in(batch, wallet_id, amount))
    }

    pub fn unlock(&self, wallet_id: &str, amount: Money) -> LedgerResult<Wallet> {
        self.db.write(|batch| unlock_in(batch, wallet_id, amount))
    }

    pub fn sync_balance(&self, wallet_id: &str, balance: Money) -> LedgerResult<Wallet> {
        self.db.write(|batch| sync_balance_in(batch, wallet_id, balance))
    }

    /// Soft-disable a wallet. Wallets are never deleted.
    pub fn deactivate(&self, wallet_id: &str) -> LedgerResult<Wallet> {
        let wallet = self.db.write(|batch| set_active_in(batch, wallet_id, false))?;
        info!(wallet_id, "Wallet deactivated");
        Ok(wallet)
    }

    pub fn reactivate(&self, wallet_id: &str) -> LedgerResult<Wallet> {
        let wallet = self.db.write(|batch| set_active_in(batch, wallet_id, true))?;
        info!(wallet_id, "Wallet reactivated");
        Ok(wallet)
    }
}
