// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deposits.
//!
//! A deposit is initiated with funding instructions and stays `pending`
//! until the owner confirms it with their PIN. Confirmation credits
//! `amount - fee`. There is no gateway callback: the confirm call is the
//! trust boundary.

use serde::Serialize;
use tracing::{info, warn};

use super::{validate_amount, SettlementEngine};
use crate::currency;
use crate::error::{LedgerError, LedgerResult};
use crate::fees::OperationKind;
use crate::money::Money;
use crate::reference::DEPOSIT_PREFIX;
use crate::storage::repository::wallets::{credit_in, get_or_create_in};
use crate::storage::{
    AuditEvent, AuditEventType, Channel, DepositMetadata, FundingInstructions, StoredTransaction,
    TxMetadata, TxType, WalletKind,
};

/// Input for [`SettlementEngine::initiate_deposit`].
#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub amount: Money,
    pub currency: String,
    /// Where the user sends funds. Also selects the channel.
    pub funding: FundingInstructions,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiatedDeposit {
    pub transaction: StoredTransaction,
    /// `false` if the instructions could not be delivered; the deposit is
    /// still valid.
    pub instructions_sent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmedDeposit {
    pub transaction: StoredTransaction,
    pub credited: Money,
    pub balance: Money,
}

fn channel_for(funding: &FundingInstructions) -> Channel {
    match funding {
        FundingInstructions::BankTransfer { .. } => Channel::BankTransfer,
        FundingInstructions::MobileMoney { .. } => Channel::MobileMoney,
    }
}

impl SettlementEngine {
    /// Create a pending deposit and send the funding instructions.
    pub async fn initiate_deposit(
        &self,
        owner_id: &str,
        request: DepositRequest,
    ) -> LedgerResult<InitiatedDeposit> {
        let currency = currency::normalize(&request.currency)?;
        if currency::is_crypto(&currency) {
            return Err(LedgerError::validation(format!(
                "{currency} deposits are credited by the custodian"
            )));
        }
        validate_amount(request.amount, &currency)?;

        let fee = self
            .fees
            .compute_fee(request.amount, &currency, OperationKind::Deposit)?;
        self.fees
            .check_covers(request.amount, fee, &currency, OperationKind::Deposit)?;

        let profile = self.require_user(owner_id).await?;
        let channel = channel_for(&request.funding);

        let transaction = self.with_fresh_reference(DEPOSIT_PREFIX, |reference| {
            self.db.write(|batch| {
                let wallet = get_or_create_in(batch, owner_id, &currency, WalletKind::Fiat)?;
                if !wallet.is_active {
                    return Err(LedgerError::validation(format!(
                        "Wallet {} is inactive",
                        wallet.wallet_id
                    )));
                }
                let tx = StoredTransaction::new_pending(
                    uuid::Uuid::new_v4().to_string(),
                    wallet.wallet_id,
                    owner_id.to_string(),
                    TxType::Deposit,
                    request.amount,
                    fee,
                    currency.clone(),
                    reference,
                    channel,
                    TxMetadata::Deposit(DepositMetadata {
                        funding: request.funding.clone(),
                        instructions_sent: false,
                    }),
                );
                batch.insert_transaction(&tx)?;
                Ok(tx)
            })
        })?;
        self.invalidate_history(&[&transaction.wallet_id]);

        info!(
            reference = %transaction.reference,
            owner_id,
            amount = %transaction.amount,
            fee = %transaction.fee,
            currency = %transaction.currency,
            channel = channel.as_str(),
            "Deposit initiated"
        );
        self.audit(
            AuditEvent::new(AuditEventType::DepositInitiated)
                .with_user(owner_id)
                .with_resource("transaction", &transaction.reference),
        );

        match self
            .providers
            .notifier
            .send_deposit_instructions(&profile, &transaction)
            .await
        {
            Ok(()) => {
                let transaction = match self.mark_instructions_sent(&transaction.tx_id) {
                    Ok(updated) => updated,
                    Err(e) => {
                        warn!(reference = %transaction.reference, error = %e, "Could not flag instructions as sent");
                        transaction
                    }
                };
                Ok(InitiatedDeposit {
                    transaction,
                    instructions_sent: true,
                })
            }
            Err(e) => {
                warn!(
                    reference = %transaction.reference,
                    error = %e,
                    "Deposit instructions not delivered"
                );
                Ok(InitiatedDeposit {
                    transaction,
                    instructions_sent: false,
                })
            }
        }
    }

    fn mark_instructions_sent(&self, tx_id: &str) -> LedgerResult<StoredTransaction> {
        self.db.write(|batch| {
            let mut tx = batch
                .transaction(tx_id)?
                .ok_or_else(|| LedgerError::not_found(format!("Transaction {tx_id}")))?;
            if let TxMetadata::Deposit(meta) = &mut tx.metadata {
                meta.instructions_sent = true;
            }
            batch.update_transaction(&tx)?;
            Ok(tx)
        })
    }

    /// Confirm a pending deposit and credit `amount - fee`.
    pub async fn confirm_deposit(
        &self,
        owner_id: &str,
        tx_id: &str,
        pin: &str,
    ) -> LedgerResult<ConfirmedDeposit> {
        let tx = self.owned_transaction(owner_id, tx_id)?;
        if !matches!(tx.metadata, TxMetadata::Deposit(_)) {
            return Err(LedgerError::validation(format!(
                "Transaction {} is not a deposit",
                tx.reference
            )));
        }
        tx.ensure_pending()?;

        let profile = self.require_user(owner_id).await?;
        self.check_pin(&profile, pin, &tx.reference).await?;

        let (transaction, credited, wallet) = self.db.write(|batch| {
            let mut current = batch
                .transaction(tx_id)?
                .ok_or_else(|| LedgerError::not_found(format!("Transaction {tx_id}")))?;
            current.ensure_pending()?;
            let credited = current.amount.checked_sub(current.fee)?;
            let wallet = credit_in(batch, &current.wallet_id, credited)?;
            current.mark_completed();
            batch.update_transaction(&current)?;
            Ok::<_, LedgerError>((current, credited, wallet))
        })?;
        self.invalidate_history(&[&transaction.wallet_id]);

        info!(
            reference = %transaction.reference,
            owner_id,
            credited = %credited,
            balance = %wallet.balance,
            "Deposit confirmed"
        );
        self.audit(
            AuditEvent::new(AuditEventType::DepositConfirmed)
                .with_user(owner_id)
                .with_resource("transaction", &transaction.reference)
                .with_details(serde_json::json!({ "credited": credited.to_string() })),
        );

        Ok(ConfirmedDeposit {
            transaction,
            credited,
            balance: wallet.balance,
        })
    }
}
