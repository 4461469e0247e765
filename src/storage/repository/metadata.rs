// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Typed transaction metadata.
//!
//! Each transaction carries exactly one variant, serialized inline with the
//! transaction row as `{"kind": "...", ...}`. The variant is chosen by the
//! flow that created the transaction and carries what that flow needs to
//! link paired legs and rebuild a receipt.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::billing::BillCategory;
use crate::money::Money;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxMetadata {
    Deposit(DepositMetadata),
    Transfer(TransferMetadata),
    TransferCredit(TransferCreditMetadata),
    Conversion(ConversionMetadata),
    BillPayment(BillPaymentMetadata),
}

// =============================================================================
// Deposit
// =============================================================================

/// Where the user was told to send funds, snapshotted at initiate time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FundingInstructions {
    BankTransfer {
        bank_name: String,
        account_number: String,
        account_name: String,
    },
    MobileMoney {
        provider: String,
        phone_number: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositMetadata {
    pub funding: FundingInstructions,
    /// Whether the instructions e-mail went out.
    pub instructions_sent: bool,
}

// =============================================================================
// Transfer
// =============================================================================

/// Destination snapshot. Account numbers are stored masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DestinationSnapshot {
    RhionxUser {
        user_id: String,
        email: String,
        display_name: String,
    },
    BankAccount {
        payment_method_id: String,
        bank_name: String,
        account_name: String,
        account_number_masked: String,
    },
    MobileMoney {
        payment_method_id: String,
        provider: String,
        account_name: String,
        phone_number_masked: String,
    },
}

/// Outcome of the internal recipient credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditStatus {
    Completed,
    Failed,
}

/// Settlement progress on an external rail (bank, mobile money, biller).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Pending => "pending",
            IntegrationStatus::Processing => "processing",
            IntegrationStatus::Completed => "completed",
            IntegrationStatus::Failed => "failed",
        }
    }

    /// Terminal rail states cannot be changed again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntegrationStatus::Completed | IntegrationStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub destination: DestinationSnapshot,
    #[serde(default)]
    pub narration: Option<String>,
    pub is_crypto: bool,
    /// Virtual account debited, for crypto transfers.
    #[serde(default)]
    pub virtual_account_id: Option<String>,
    pub otp_sent: bool,
    /// Set for internal recipients once the credit step ran.
    #[serde(default)]
    pub credit_status: Option<CreditStatus>,
    #[serde(default)]
    pub credit_error: Option<String>,
    /// Recipient credit transaction, once written.
    #[serde(default)]
    pub counterpart_tx_id: Option<String>,
    /// Set for external destinations once the source is debited.
    #[serde(default)]
    pub integration_status: Option<IntegrationStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCreditMetadata {
    pub sender_id: String,
    pub sender_email: String,
    pub sender_name: String,
    pub sender_reference: String,
    pub sender_tx_id: String,
    pub is_crypto: bool,
    #[serde(default)]
    pub narration: Option<String>,
}

// =============================================================================
// Conversion
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionLeg {
    Debit,
    Credit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionMetadata {
    pub leg: ConversionLeg,
    pub from_currency: String,
    pub to_currency: String,
    pub from_amount: Money,
    pub to_amount: Money,
    pub rate: Decimal,
    /// Fee in the destination currency.
    pub fee: Money,
    pub received_amount: Money,
    pub counterpart_tx_id: String,
}

// =============================================================================
// Bill payment
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillPaymentMetadata {
    pub category: BillCategory,
    pub provider_code: String,
    pub provider_name: String,
    #[serde(default)]
    pub plan_code: Option<String>,
    #[serde(default)]
    pub plan_name: Option<String>,
    pub account_number: String,
    #[serde(default)]
    pub beneficiary_id: Option<String>,
    pub integration_status: IntegrationStatus,
}

/// Mask all but the last four characters of an account number or phone.
pub fn mask_account(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_tagged_by_kind() {
        let meta = TxMetadata::Transfer(TransferMetadata {
            destination: DestinationSnapshot::BankAccount {
                payment_method_id: "pm-1".to_string(),
                bank_name: "GTBank".to_string(),
                account_name: "Ada Obi".to_string(),
                account_number_masked: mask_account("0123456789"),
            },
            narration: None,
            is_crypto: false,
            virtual_account_id: None,
            otp_sent: true,
            credit_status: None,
            credit_error: None,
            counterpart_tx_id: None,
            integration_status: Some(IntegrationStatus::Pending),
        });

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["kind"], "transfer");
        assert_eq!(json["destination"]["type"], "bank_account");
        assert_eq!(json["destination"]["account_number_masked"], "******6789");
        assert_eq!(json["integration_status"], "pending");

        let back: TxMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn masking_keeps_last_four() {
        assert_eq!(mask_account("08031234567"), "*******4567");
        assert_eq!(mask_account("123"), "***");
    }

    #[test]
    fn integration_terminal_states() {
        assert!(IntegrationStatus::Completed.is_terminal());
        assert!(IntegrationStatus::Failed.is_terminal());
        assert!(!IntegrationStatus::Processing.is_terminal());
    }
}
