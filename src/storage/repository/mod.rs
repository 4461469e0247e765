// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the ledger database.
//!
//! Each repository covers one entity type. Wallet and transaction writes
//! that must commit together are composed by the settlement engine inside
//! a single [`LedgerDatabase::write`](super::LedgerDatabase::write).

pub mod beneficiaries;
pub mod metadata;
pub mod otp;
pub mod reconciliation;
pub mod transactions;
pub mod wallets;

pub use beneficiaries::{Beneficiary, BeneficiaryRepository};
pub use metadata::{
    BillPaymentMetadata, ConversionLeg, ConversionMetadata, CreditStatus, DepositMetadata,
    DestinationSnapshot, FundingInstructions, IntegrationStatus, TransferCreditMetadata,
    TransferMetadata, TxMetadata,
};
pub use otp::{IssuedOtp, OtpPurpose, OtpStore, StoredOtp};
pub use reconciliation::{ReconciliationEvent, ReconciliationRepository};
pub use transactions::{Channel, StoredTransaction, TransactionPage, TransactionRepository, TxStatus, TxType};
pub use wallets::{Wallet, WalletKind, WalletStore};
