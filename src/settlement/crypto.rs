// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Crypto balances.
//!
//! The custodian's virtual account is the system of record. The ledger keeps
//! a shadow crypto wallet per `(owner, currency)` and overwrites its balance
//! with the custodian's every time the account is read, debited or credited.
//!
//! A crypto debit runs in two steps: the custodian is debited first, then
//! the shadow wallet and transaction are updated locally. If the local step
//! fails the custodian debit is reversed with a compensating credit.

use serde::Serialize;
use tracing::{error, info, warn};

use super::SettlementEngine;
use crate::currency;
use crate::error::{LedgerError, LedgerResult};
use crate::money::Money;
use crate::providers::VirtualAccount;
use crate::storage::repository::wallets::{get_or_create_in, sync_balance_in};
use crate::storage::{LedgerBatch, Wallet, WalletKind};

/// Custodian account and its freshly synced shadow wallet.
#[derive(Debug, Clone, Serialize)]
pub struct CryptoBalance {
    pub account: VirtualAccount,
    pub wallet: Wallet,
}

/// Mirror `account` into the owner's shadow wallet inside `batch`.
pub(crate) fn mirror_in(batch: &LedgerBatch<'_>, account: &VirtualAccount) -> LedgerResult<Wallet> {
    let wallet = get_or_create_in(batch, &account.owner_id, &account.currency, WalletKind::Crypto)?;
    sync_balance_in(batch, &wallet.wallet_id, account.account_balance)
}

impl SettlementEngine {
    /// Look up the owner's usable virtual account for `currency`.
    pub(crate) async fn usable_account(
        &self,
        owner_id: &str,
        currency: &str,
    ) -> LedgerResult<VirtualAccount> {
        let account = self
            .providers
            .custody
            .account(owner_id, currency)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("{currency} virtual account")))?;
        if !account.is_usable() {
            return Err(LedgerError::validation(format!(
                "{currency} virtual account is frozen or inactive"
            )));
        }
        Ok(account)
    }

    /// Current custodian balance for `currency`, mirrored into the shadow wallet.
    pub async fn crypto_balance(&self, owner_id: &str, currency: &str) -> LedgerResult<CryptoBalance> {
        let currency = currency::normalize(currency)?;
        if !currency::is_crypto(&currency) {
            return Err(LedgerError::validation(format!(
                "{currency} is not a crypto currency"
            )));
        }
        let account = self.usable_account(owner_id, &currency).await?;
        let wallet = self.db.write(|batch| mirror_in(batch, &account))?;
        Ok(CryptoBalance { account, wallet })
    }

    /// Refresh every crypto shadow wallet the owner has. Custodian errors
    /// leave the stale balance in place.
    pub(crate) async fn refresh_shadows(&self, wallets: &mut [Wallet]) {
        for wallet in wallets.iter_mut().filter(|w| w.kind == WalletKind::Crypto) {
            match self
                .providers
                .custody
                .account(&wallet.owner_id, &wallet.currency)
                .await
            {
                Ok(Some(account)) => match self.db.write(|batch| mirror_in(batch, &account)) {
                    Ok(synced) => *wallet = synced,
                    Err(e) => warn!(wallet_id = %wallet.wallet_id, error = %e, "Shadow wallet sync failed"),
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(wallet_id = %wallet.wallet_id, error = %e, "Custodian unavailable, serving stale balance")
                }
            }
        }
    }

    /// Debit the custodian, then run `local` against the updated account.
    ///
    /// `local` gets the post-debit account so it can mirror the balance in
    /// the same write transaction that completes the ledger row. If it
    /// fails, the debit is reversed and the local error returned.
    pub(crate) async fn debit_custody_then<T>(
        &self,
        account_id: &str,
        amount: Money,
        reference: &str,
        local: impl FnOnce(&VirtualAccount) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let debited = self
            .providers
            .custody
            .debit(account_id, amount, reference)
            .await?;

        match local(&debited) {
            Ok(value) => Ok(value),
            Err(local_error) => {
                match self
                    .providers
                    .custody
                    .credit(account_id, amount, reference)
                    .await
                {
                    Ok(restored) => {
                        info!(
                            account_id,
                            reference,
                            amount = %amount,
                            "Custodian debit reversed after local failure"
                        );
                        // Best effort: the next read re-syncs anyway.
                        if let Err(e) = self.db.write(|batch| mirror_in(batch, &restored)) {
                            warn!(account_id, error = %e, "Shadow wallet sync after reversal failed");
                        }
                    }
                    Err(e) => {
                        error!(
                            account_id,
                            reference,
                            amount = %amount,
                            error = %e,
                            local_error = %local_error,
                            "Compensating custodian credit failed; manual correction required"
                        );
                    }
                }
                Err(local_error)
            }
        }
    }
}
