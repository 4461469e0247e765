// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Storage Module
//!
//! Persistent ledger state lives in a single embedded redb database
//! (see [`ledger_db`]). Every balance mutation is a conditional update
//! inside one serializable write transaction; there is no read-modify-write
//! of balances in application memory.
//!
//! ## Layout
//!
//! ```text
//! {DATA_DIR}/
//!   ledger.redb     # wallets, transactions, indexes, OTPs, beneficiaries,
//!                   # reconciliation queue, audit events
//! ```
//!
//! Repositories borrow the database and are built on demand:
//!
//! ```rust,ignore
//! let wallet = WalletStore::new(&db).get_or_create("user-1", "NGN", WalletKind::Fiat)?;
//! ```

pub mod audit;
pub mod ledger_db;
pub mod ownership;
pub mod repository;
pub mod tx_cache;

pub use audit::{AuditEvent, AuditEventType, AuditRepository};
pub use ledger_db::{LedgerBatch, LedgerDatabase, LedgerSnapshot, StoreError, StoreResult};
pub use ownership::{OwnedResource, OwnershipCheck, OwnershipEnforcer};
pub use repository::{
    Beneficiary, BeneficiaryRepository, BillPaymentMetadata, Channel, ConversionLeg,
    ConversionMetadata, CreditStatus, DepositMetadata, DestinationSnapshot, FundingInstructions,
    IntegrationStatus, OtpPurpose, OtpStore, ReconciliationEvent, ReconciliationRepository,
    StoredTransaction, TransactionPage, TransactionRepository, TransferCreditMetadata,
    TransferMetadata, TxMetadata, TxStatus, TxType, Wallet, WalletKind, WalletStore,
};
pub use tx_cache::TxCache;
