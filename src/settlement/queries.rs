// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read paths and wallet administration.

use tracing::debug;

use super::SettlementEngine;
use crate::error::{LedgerError, LedgerResult};
use crate::receipt::Receipt;
use crate::storage::{
    AuditEvent, AuditEventType, OwnershipCheck, TransactionPage, TransactionRepository, Wallet,
    WalletStore,
};

/// Default and maximum history page sizes.
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

impl SettlementEngine {
    /// Load a wallet and check the caller owns it.
    fn owned_wallet(&self, caller: &str, wallet_id: &str) -> LedgerResult<Wallet> {
        let found = self.db.snapshot()?.wallet(wallet_id)?;
        let result = found.verify_owner(caller, &format!("Wallet {wallet_id}"));
        if let Err(LedgerError::Unauthorized(_)) = &result {
            self.audit(
                AuditEvent::new(AuditEventType::PermissionDenied)
                    .with_user(caller)
                    .with_resource("wallet", wallet_id)
                    .failed("not the owner"),
            );
        }
        result
    }

    /// Every wallet the owner has, with crypto balances refreshed from the
    /// custodian.
    pub async fn list_wallets(&self, owner_id: &str) -> LedgerResult<Vec<Wallet>> {
        let mut wallets = WalletStore::new(&self.db).list_by_owner(owner_id)?;
        self.refresh_shadows(&mut wallets).await;
        Ok(wallets)
    }

    /// Newest-first history. `limit` of 0 means the default page size.
    pub fn wallet_history(
        &self,
        owner_id: &str,
        wallet_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> LedgerResult<TransactionPage> {
        self.owned_wallet(owner_id, wallet_id)?;
        let limit = match limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };

        if cursor.is_none() {
            if let Some(page) = self.history.get_first_page(wallet_id, limit) {
                debug!(wallet_id, "History cache hit");
                return Ok(page);
            }
        }

        let page = TransactionRepository::new(&self.db).list_by_wallet(wallet_id, cursor, limit)?;
        if cursor.is_none() {
            self.history.put_first_page(wallet_id, limit, page.clone());
        }
        Ok(page)
    }

    /// Soft-disable one of the caller's wallets.
    pub fn deactivate_wallet(&self, owner_id: &str, wallet_id: &str) -> LedgerResult<Wallet> {
        self.owned_wallet(owner_id, wallet_id)?;
        let wallet = WalletStore::new(&self.db).deactivate(wallet_id)?;
        self.audit(
            AuditEvent::new(AuditEventType::WalletDeactivated)
                .with_user(owner_id)
                .with_resource("wallet", wallet_id),
        );
        Ok(wallet)
    }

    pub fn reactivate_wallet(&self, owner_id: &str, wallet_id: &str) -> LedgerResult<Wallet> {
        self.owned_wallet(owner_id, wallet_id)?;
        let wallet = WalletStore::new(&self.db).reactivate(wallet_id)?;
        self.audit(
            AuditEvent::new(AuditEventType::WalletReactivated)
                .with_user(owner_id)
                .with_resource("wallet", wallet_id),
        );
        Ok(wallet)
    }

    /// Receipt for one of the caller's completed transactions.
    pub fn get_receipt(&self, owner_id: &str, reference: &str) -> LedgerResult<Receipt> {
        let reference = reference.trim();
        let tx = self
            .db
            .snapshot()?
            .transaction_by_reference(reference)?
            .verify_owner(owner_id, &format!("Transaction {reference}"))?;
        Receipt::project(&tx)
    }
}
