// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction records.
//!
//! A transaction starts `pending` (deposits, transfers, conversion legs) or
//! is written directly as `completed` (bill payments, recipient credits).
//! A pending transaction moves to `completed` or `failed` exactly once;
//! after that only its metadata may be annotated.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metadata::TxMetadata;
use crate::error::{LedgerError, LedgerResult};
use crate::money::Money;
use crate::storage::ledger_db::LedgerDatabase;
use crate::storage::ownership::OwnedResource;

/// Transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Deposit,
    Withdrawal,
    Transfer,
    BillPayment,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Deposit => "deposit",
            TxType::Withdrawal => "withdrawal",
            TxType::Transfer => "transfer",
            TxType::BillPayment => "bill_payment",
        }
    }
}

/// Rail or flow a transaction went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    BankTransfer,
    BankAccount,
    MobileMoney,
    RhionxUser,
    P2p,
    Conversion,
    BillPayment,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::BankTransfer => "bank_transfer",
            Channel::BankAccount => "bank_account",
            Channel::MobileMoney => "mobile_money",
            Channel::RhionxUser => "rhionx_user",
            Channel::P2p => "p2p",
            Channel::Conversion => "conversion",
            Channel::BillPayment => "bill_payment",
        }
    }
}

/// Stored transaction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTransaction {
    /// UUID v4
    pub tx_id: String,
    pub wallet_id: String,
    pub owner_id: String,
    pub tx_type: TxType,
    pub status: TxStatus,
    pub amount: Money,
    pub fee: Money,
    pub currency: String,
    /// Globally unique; enforced by the reference index.
    pub reference: String,
    /// Shared by the legs of one logical operation.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_ref: Option<String>,
    pub channel: Channel,
    pub metadata: TxMetadata,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredTransaction {
    /// Create a new pending transaction record.
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        tx_id: String,
        wallet_id: String,
        owner_id: String,
        tx_type: TxType,
        amount: Money,
        fee: Money,
        currency: String,
        reference: String,
        channel: Channel,
        metadata: TxMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            tx_id,
            wallet_id,
            owner_id,
            tx_type,
            status: TxStatus::Pending,
            amount,
            fee,
            currency,
            reference,
            correlation_ref: None,
            channel,
            metadata,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_correlation(mut self, correlation_ref: impl Into<String>) -> Self {
        self.correlation_ref = Some(correlation_ref.into());
        self
    }

    /// Fail with `StateConflict` unless the transaction is still pending.
    pub fn ensure_pending(&self) -> LedgerResult<()> {
        if self.status == TxStatus::Pending {
            Ok(())
        } else {
            Err(LedgerError::StateConflict {
                reference: self.reference.clone(),
                status: self.status,
            })
        }
    }

    /// Mark the transaction as completed.
    pub fn mark_completed(&mut self) {
        let now = Utc::now();
        self.status = TxStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Mark the transaction as failed.
    pub fn mark_failed(&mut self) {
        self.status = TxStatus::Failed;
        self.updated_at = Utc::now();
    }

    /// `amount + fee`, the total a debit-side transaction takes.
    pub fn total(&self) -> LedgerResult<Money> {
        Ok(self.amount.checked_add(self.fee)?)
    }
}

impl OwnedResource for StoredTransaction {
    fn owner_user_id(&self) -> &str {
        &self.owner_id
    }

    fn resource_label(&self) -> String {
        format!("Transaction {}", self.reference)
    }
}

/// A page of wallet history.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub transactions: Vec<StoredTransaction>,
    pub next_cursor: Option<String>,
}

/// Read-side repository for transactions.
pub struct TransactionRepository<'a> {
    db: &'a LedgerDatabase,
}

impl<'a> TransactionRepository<'a> {
    /// Create a new TransactionRepository.
    pub fn new(db: &'a LedgerDatabase) -> Self {
        Self { db }
    }

    /// Get a transaction by ID.
    pub fn get(&self, tx_id: &str) -> LedgerResult<Option<StoredTransaction>> {
        Ok(self.db.snapshot()?.transaction(tx_id)?)
    }

    pub fn get_by_reference(&self, reference: &str) -> LedgerResult<Option<StoredTransaction>> {
        Ok(self.db.snapshot()?.transaction_by_reference(reference)?)
    }

    /// All legs sharing `correlation_ref`.
    pub fn legs(&self, correlation_ref: &str) -> LedgerResult<Vec<StoredTransaction>> {
        Ok(self.db.snapshot()?.correlated(correlation_ref)?)
    }

    /// Newest-first history for a wallet.
    pub fn list_by_wallet(
        &self,
        wallet_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> LedgerResult<TransactionPage> {
        let (transactions, next_cursor) =
            self.db.snapshot()?.wallet_history(wallet_id, cursor, limit)?;
        Ok(TransactionPage {
            transactions,
            next_cursor,
        })
    }
}
