// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Receipt projection for completed transactions.
//!
//! A receipt is a read-only view: amounts are rendered as decimal strings at
//! the currency's display scale and the counterpart is derived from the
//! transaction's metadata. Nothing here touches storage.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::billing::BillCategory;
use crate::currency;
use crate::error::{LedgerError, LedgerResult};
use crate::reference;
use crate::storage::{
    Channel, ConversionLeg, DestinationSnapshot, FundingInstructions, IntegrationStatus,
    StoredTransaction, TxMetadata, TxStatus, TxType,
};

/// Whether the transaction took money out of or put money into the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    fn of(tx_type: TxType) -> Self {
        match tx_type {
            TxType::Deposit => Direction::Credit,
            TxType::Withdrawal | TxType::Transfer | TxType::BillPayment => Direction::Debit,
        }
    }
}

/// The other side of the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Counterpart {
    /// Internal transfer, sender's view.
    Recipient {
        user_id: String,
        email: String,
        display_name: String,
    },
    /// External withdrawal. The account is already masked.
    MaskedDestination {
        channel: Channel,
        institution: String,
        account_name: String,
        account: String,
        integration_status: Option<IntegrationStatus>,
    },
    /// Internal transfer, recipient's view.
    Sender {
        user_id: String,
        email: String,
        display_name: String,
        sender_reference: String,
    },
    ConversionPair {
        paired_reference: String,
        from_currency: String,
        from_amount: String,
        to_currency: String,
        to_amount: String,
        rate: Decimal,
    },
    Biller {
        category: BillCategory,
        provider_code: String,
        provider_name: String,
        plan_name: Option<String>,
        account_number: String,
        integration_status: IntegrationStatus,
    },
    /// Deposit, showing where the funds were sent.
    Funding {
        method: Channel,
        institution: String,
        account: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub reference: String,
    pub correlation_ref: Option<String>,
    pub kind: TxType,
    pub channel: Channel,
    pub status: TxStatus,
    pub direction: Direction,
    pub amount: String,
    pub fee: String,
    /// `amount + fee` for debits, `amount - fee` for credits.
    pub total: String,
    pub currency: String,
    pub counterpart: Counterpart,
    pub narration: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Receipt {
    /// Project a completed transaction into a receipt.
    pub fn project(tx: &StoredTransaction) -> LedgerResult<Self> {
        if tx.status != TxStatus::Completed {
            return Err(LedgerError::StateConflict {
                reference: tx.reference.clone(),
                status: tx.status,
            });
        }

        let scale = currency::scale_of(&tx.currency);
        let direction = Direction::of(tx.tx_type);
        let total = match direction {
            Direction::Debit => tx.amount.checked_add(tx.fee)?,
            Direction::Credit => tx.amount.checked_sub(tx.fee)?,
        };

        Ok(Self {
            reference: tx.reference.clone(),
            correlation_ref: tx.correlation_ref.clone(),
            kind: tx.tx_type,
            channel: tx.channel,
            status: tx.status,
            direction,
            amount: tx.amount.format_scaled(scale),
            fee: tx.fee.format_scaled(scale),
            total: total.format_scaled(scale),
            currency: tx.currency.clone(),
            counterpart: counterpart(tx),
            narration: narration(&tx.metadata),
            created_at: tx.created_at,
            completed_at: tx.completed_at,
        })
    }
}

fn narration(metadata: &TxMetadata) -> Option<String> {
    match metadata {
        TxMetadata::Transfer(meta) => meta.narration.clone(),
        TxMetadata::TransferCredit(meta) => meta.narration.clone(),
        _ => None,
    }
}

fn counterpart(tx: &StoredTransaction) -> Counterpart {
    match &tx.metadata {
        TxMetadata::Deposit(meta) => match &meta.funding {
            FundingInstructions::BankTransfer {
                bank_name,
                account_number,
                ..
            } => Counterpart::Funding {
                method: Channel::BankTransfer,
                institution: bank_name.clone(),
                account: account_number.clone(),
            },
            FundingInstructions::MobileMoney {
                provider,
                phone_number,
            } => Counterpart::Funding {
                method: Channel::MobileMoney,
                institution: provider.clone(),
                account: phone_number.clone(),
            },
        },
        TxMetadata::Transfer(meta) => match &meta.destination {
            DestinationSnapshot::RhionxUser {
                user_id,
                email,
                display_name,
            } => Counterpart::Recipient {
                user_id: user_id.clone(),
                email: email.clone(),
                display_name: display_name.clone(),
            },
            DestinationSnapshot::BankAccount {
                bank_name,
                account_name,
                account_number_masked,
                ..
            } => Counterpart::MaskedDestination {
                channel: Channel::BankAccount,
                institution: bank_name.clone(),
                account_name: account_name.clone(),
                account: account_number_masked.clone(),
                integration_status: meta.integration_status,
            },
            DestinationSnapshot::MobileMoney {
                provider,
                account_name,
                phone_number_masked,
                ..
            } => Counterpart::MaskedDestination {
                channel: Channel::MobileMoney,
                institution: provider.clone(),
                account_name: account_name.clone(),
                account: phone_number_masked.clone(),
                integration_status: meta.integration_status,
            },
        },
        TxMetadata::TransferCredit(meta) => Counterpart::Sender {
            user_id: meta.sender_id.clone(),
            email: meta.sender_email.clone(),
            display_name: meta.sender_name.clone(),
            sender_reference: meta.sender_reference.clone(),
        },
        TxMetadata::Conversion(meta) => {
            let correlation = tx.correlation_ref.as_deref().unwrap_or(&tx.reference);
            let paired_reference = match meta.leg {
                ConversionLeg::Debit => correlation.to_string(),
                ConversionLeg::Credit => reference::debit_leg(correlation),
            };
            Counterpart::ConversionPair {
                paired_reference,
                from_currency: meta.from_currency.clone(),
                from_amount: meta
                    .from_amount
                    .format_scaled(currency::scale_of(&meta.from_currency)),
                to_currency: meta.to_currency.clone(),
                to_amount: meta
                    .to_amount
                    .format_scaled(currency::scale_of(&meta.to_currency)),
                rate: meta.rate,
            }
        }
        TxMetadata::BillPayment(meta) => Counterpart::Biller {
            category: meta.category,
            provider_code: meta.provider_code.clone(),
            provider_name: meta.provider_name.clone(),
            plan_name: meta.plan_name.clone(),
            account_number: meta.account_number.clone(),
            integration_status: meta.integration_status,
        },
    }
}
