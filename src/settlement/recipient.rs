// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Internal recipient credits and partial settlement.
//!
//! After the sender leg of an internal transfer commits, the recipient is
//! credited in a second write transaction that also writes a completed
//! `-CR` deposit leg and annotates the sender leg. If that step fails the
//! sender stays completed, its metadata records `credit_status: failed`,
//! and a [`ReconciliationEvent`] is persisted for the worker to retry.
//!
//! Retries are idempotent: the credit leg's reference is unique, so a leg
//! that already exists resolves the event without crediting again.

use serde::Serialize;
use tracing::{error, info, warn};

use super::crypto::mirror_in;
use super::SettlementEngine;
use crate::error::{LedgerError, LedgerResult};
use crate::money::Money;
use crate::providers::{UserProfile, VirtualAccount};
use crate::reference;
use crate::storage::repository::wallets::{credit_in, get_or_create_in};
use crate::storage::{
    AuditEvent, AuditEventType, Channel, CreditStatus, DestinationSnapshot, LedgerBatch,
    ReconciliationEvent, ReconciliationRepository, StoredTransaction, TransferCreditMetadata,
    TxMetadata, TxType, WalletKind,
};

/// Everything needed to write the recipient leg.
struct CreditPlan {
    sender_tx_id: String,
    sender_wallet_id: String,
    sender_reference: String,
    credit_reference: String,
    recipient_id: String,
    amount: Money,
    currency: String,
    is_crypto: bool,
    metadata: TransferCreditMetadata,
}

impl CreditPlan {
    fn from_sender(sender_tx: &StoredTransaction, sender: &UserProfile) -> LedgerResult<Self> {
        let TxMetadata::Transfer(meta) = &sender_tx.metadata else {
            return Err(LedgerError::validation(format!(
                "Transaction {} is not a transfer",
                sender_tx.reference
            )));
        };
        let DestinationSnapshot::RhionxUser { user_id, .. } = &meta.destination else {
            return Err(LedgerError::validation(format!(
                "Transfer {} has no internal recipient",
                sender_tx.reference
            )));
        };
        Ok(Self {
            sender_tx_id: sender_tx.tx_id.clone(),
            sender_wallet_id: sender_tx.wallet_id.clone(),
            sender_reference: sender_tx.reference.clone(),
            credit_reference: reference::credit_leg(&sender_tx.reference),
            recipient_id: user_id.clone(),
            amount: sender_tx.amount,
            currency: sender_tx.currency.clone(),
            is_crypto: meta.is_crypto,
            metadata: TransferCreditMetadata {
                sender_id: sender.user_id.clone(),
                sender_email: sender.email.clone(),
                sender_name: sender.display_name.clone(),
                sender_reference: sender_tx.reference.clone(),
                sender_tx_id: sender_tx.tx_id.clone(),
                is_crypto: meta.is_crypto,
                narration: meta.narration.clone(),
            },
        })
    }
}

/// Why a credit attempt failed, and whether the custodian already paid.
struct CreditFailure {
    error: LedgerError,
    external_applied: bool,
}

impl From<LedgerError> for CreditFailure {
    fn from(error: LedgerError) -> Self {
        Self {
            error,
            external_applied: false,
        }
    }
}

/// Outcome of a reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub attempted: usize,
    pub resolved: usize,
    pub still_failing: usize,
}

impl SettlementEngine {
    /// Credit the internal recipient of a completed transfer.
    ///
    /// Returns the credit leg, or `None` if the credit failed and was queued
    /// for reconciliation.
    pub(crate) async fn settle_recipient(
        &self,
        sender_tx: &StoredTransaction,
        sender: &UserProfile,
    ) -> LedgerResult<Option<StoredTransaction>> {
        let plan = CreditPlan::from_sender(sender_tx, sender)?;
        match self.apply_credit(&plan, None, false).await {
            Ok(credit) => Ok(Some(credit)),
            Err(failure) => {
                self.record_partial_settlement(&plan, failure);
                Ok(None)
            }
        }
    }

    /// Write the recipient leg. `resolving` marks a reconciliation event
    /// resolved in the same write transaction.
    async fn apply_credit(
        &self,
        plan: &CreditPlan,
        resolving: Option<&str>,
        external_applied: bool,
    ) -> Result<StoredTransaction, CreditFailure> {
        if !plan.is_crypto {
            return Ok(self.write_credit_leg(plan, resolving, None)?);
        }

        let account = self
            .providers
            .custody
            .account(&plan.recipient_id, &plan.currency)
            .await
            .map_err(LedgerError::from)?
            .ok_or_else(|| {
                LedgerError::not_found(format!("Recipient {} virtual account", plan.currency))
            })?;

        let credited = if external_applied {
            account
        } else {
            if !account.active {
                return Err(LedgerError::validation(format!(
                    "Recipient {} virtual account is inactive",
                    plan.currency
                ))
                .into());
            }
            self.providers
                .custody
                .credit(&account.account_id, plan.amount, &plan.credit_reference)
                .await
                .map_err(LedgerError::from)?
        };

        self.write_credit_leg(plan, resolving, Some(&credited))
            .map_err(|error| CreditFailure {
                error,
                external_applied: true,
            })
    }

    fn write_credit_leg(
        &self,
        plan: &CreditPlan,
        resolving: Option<&str>,
        custody: Option<&VirtualAccount>,
    ) -> LedgerResult<StoredTransaction> {
        let credit = self.db.write(|batch| {
            if let Some(existing) = batch.transaction_by_reference(&plan.credit_reference)? {
                resolve_in(batch, resolving, &existing.wallet_id)?;
                return Ok(existing);
            }

            let wallet = match custody {
                Some(account) => mirror_in(batch, account)?,
                None => {
                    let wallet =
                        get_or_create_in(batch, &plan.recipient_id, &plan.currency, WalletKind::Fiat)?;
                    credit_in(batch, &wallet.wallet_id, plan.amount)?
                }
            };

            let mut credit = StoredTransaction::new_pending(
                uuid::Uuid::new_v4().to_string(),
                wallet.wallet_id.clone(),
                plan.recipient_id.clone(),
                TxType::Deposit,
                plan.amount,
                Money::ZERO,
                plan.currency.clone(),
                plan.credit_reference.clone(),
                Channel::RhionxUser,
                TxMetadata::TransferCredit(plan.metadata.clone()),
            )
            .with_correlation(&plan.sender_reference);
            credit.mark_completed();
            batch.insert_transaction(&credit)?;

            let mut sender = batch
                .transaction(&plan.sender_tx_id)?
                .ok_or_else(|| LedgerError::not_found(format!("Transaction {}", plan.sender_tx_id)))?;
            if let TxMetadata::Transfer(meta) = &mut sender.metadata {
                meta.credit_status = Some(CreditStatus::Completed);
                meta.credit_error = None;
                meta.counterpart_tx_id = Some(credit.tx_id.clone());
            }
            sender.updated_at = chrono::Utc::now();
            batch.update_transaction(&sender)?;

            resolve_in(batch, resolving, &wallet.wallet_id)?;
            Ok::<_, LedgerError>(credit)
        })?;

        self.invalidate_history(&[&credit.wallet_id, &plan.sender_wallet_id]);
        info!(
            reference = %plan.sender_reference,
            credit_reference = %credit.reference,
            recipient_id = %plan.recipient_id,
            amount = %plan.amount,
            currency = %plan.currency,
            "Recipient credited"
        );
        Ok(credit)
    }

    /// The sender leg has already committed, so nothing here may turn the
    /// transfer into an error for the caller.
    fn record_partial_settlement(&self, plan: &CreditPlan, failure: CreditFailure) {
        let reason = failure.error.to_string();
        let mut event = ReconciliationEvent::new(
            plan.sender_reference.clone(),
            plan.sender_tx_id.clone(),
            plan.credit_reference.clone(),
            plan.recipient_id.clone(),
            plan.amount,
            plan.currency.clone(),
            plan.is_crypto,
            reason.clone(),
        );
        event.external_applied = failure.external_applied;

        let recorded = self.db.write(|batch| {
            let mut sender = batch
                .transaction(&plan.sender_tx_id)?
                .ok_or_else(|| LedgerError::not_found(format!("Transaction {}", plan.sender_tx_id)))?;
            if let TxMetadata::Transfer(meta) = &mut sender.metadata {
                meta.credit_status = Some(CreditStatus::Failed);
                meta.credit_error = Some(reason.clone());
            }
            sender.updated_at = chrono::Utc::now();
            batch.update_transaction(&sender)?;
            batch.put_reconciliation(&event)?;
            Ok::<_, LedgerError>(())
        });
        if let Err(e) = recorded {
            error!(
                reference = %plan.sender_reference,
                recipient_id = %plan.recipient_id,
                amount = %plan.amount,
                currency = %plan.currency,
                external_applied = failure.external_applied,
                credit_error = %reason,
                error = %e,
                "Partial settlement could not be queued; manual reconciliation required"
            );
            return;
        }
        self.invalidate_history(&[&plan.sender_wallet_id]);

        let partial = LedgerError::PartialSettlement {
            reference: plan.sender_reference.clone(),
            reason: reason.clone(),
        };
        warn!(
            reference = %plan.sender_reference,
            recipient_id = %plan.recipient_id,
            amount = %plan.amount,
            currency = %plan.currency,
            external_applied = failure.external_applied,
            event_id = %event.event_id,
            error = %partial,
            "Partial settlement recorded for reconciliation"
        );
        self.audit(
            AuditEvent::new(AuditEventType::PartialSettlement)
                .with_user(&plan.metadata.sender_id)
                .with_resource("transaction", &plan.sender_reference)
                .with_details(serde_json::json!({
                    "event_id": event.event_id,
                    "recipient_id": plan.recipient_id,
                }))
                .failed(reason),
        );
    }

    /// Retry one reconciliation event. Returns `true` once it is resolved.
    pub async fn retry_reconciliation(&self, event_id: &str) -> LedgerResult<bool> {
        let event = self
            .db
            .snapshot()?
            .reconciliation(event_id)?
            .ok_or_else(|| LedgerError::not_found(format!("Reconciliation event {event_id}")))?;
        if event.resolved {
            return Ok(true);
        }

        let plan = match self.plan_for(&event).await {
            Ok(plan) => plan,
            Err(e) => {
                ReconciliationRepository::new(&self.db).record_attempt(event_id, &e.to_string())?;
                return Err(e);
            }
        };

        match self
            .apply_credit(&plan, Some(event_id), event.external_applied)
            .await
        {
            Ok(credit) => {
                info!(
                    event_id,
                    reference = %event.sender_reference,
                    credit_reference = %credit.reference,
                    attempts = event.attempts + 1,
                    "Partial settlement reconciled"
                );
                self.audit(
                    AuditEvent::new(AuditEventType::SettlementReconciled)
                        .with_user(&event.recipient_id)
                        .with_resource("transaction", &event.sender_reference),
                );
                Ok(true)
            }
            Err(failure) => {
                let message = failure.error.to_string();
                let external_applied = event.external_applied || failure.external_applied;
                self.db.write(|batch| {
                    let mut current = batch
                        .reconciliation(event_id)?
                        .ok_or_else(|| LedgerError::not_found(format!("Reconciliation event {event_id}")))?;
                    current.attempts += 1;
                    current.last_error = Some(message.clone());
                    current.external_applied = external_applied;
                    current.updated_at = chrono::Utc::now();
                    batch.put_reconciliation(&current)?;
                    Ok::<_, LedgerError>(())
                })?;
                warn!(event_id, error = %message, "Reconciliation attempt failed");
                Ok(false)
            }
        }
    }

    async fn plan_for(&self, event: &ReconciliationEvent) -> LedgerResult<CreditPlan> {
        let sender_tx = self
            .db
            .snapshot()?
            .transaction(&event.sender_tx_id)?
            .ok_or_else(|| LedgerError::not_found(format!("Transaction {}", event.sender_tx_id)))?;
        let sender = self.require_user(&sender_tx.owner_id).await?;
        CreditPlan::from_sender(&sender_tx, &sender)
    }

    /// Retry every unresolved reconciliation event, oldest first.
    pub async fn reconcile_pending(&self) -> LedgerResult<ReconciliationReport> {
        let events = ReconciliationRepository::new(&self.db).list_unresolved()?;
        let mut report = ReconciliationReport::default();
        for event in events {
            report.attempted += 1;
            match self.retry_reconciliation(&event.event_id).await {
                Ok(true) => report.resolved += 1,
                Ok(false) => report.still_failing += 1,
                Err(e) => {
                    warn!(event_id = %event.event_id, error = %e, "Reconciliation retry errored");
                    report.still_failing += 1;
                }
            }
        }
        Ok(report)
    }
}

fn resolve_in(batch: &LedgerBatch<'_>, event_id: Option<&str>, wallet_id: &str) -> LedgerResult<()> {
    let Some(event_id) = event_id else {
        return Ok(());
    };
    if let Some(mut event) = batch.reconciliation(event_id)? {
        event.resolved = true;
        event.attempts += 1;
        event.last_error = None;
        event.recipient_wallet_id = Some(wallet_id.to_string());
        event.updated_at = chrono::Utc::now();
        batch.put_reconciliation(&event)?;
    }
    Ok(())
}
