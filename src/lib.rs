// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Rhionx Ledger - Wallet Ledger & Settlement Engine
//!
//! Multi-currency wallets (fiat and crypto) with deposits, transfers,
//! conversions and bill payments settled through a two-phase
//! initiate/confirm protocol over an embedded redb database.
//!
//! ## Modules
//!
//! - `settlement` - the engine and its per-flow operations
//! - `storage` - redb tables, repositories, ownership checks and audit log
//! - `providers` - collaborator traits (identity, KYC, vault, notifications,
//!   exchange rates, crypto custody) and in-memory implementations
//! - `money`, `currency`, `fees`, `reference`, `billing` - domain primitives
//! - `receipt` - read-only receipt projection
//! - `reconciliation` - background retry of failed recipient credits

pub mod billing;
pub mod config;
pub mod currency;
pub mod error;
pub mod fees;
pub mod money;
pub mod providers;
pub mod receipt;
pub mod reconciliation;
pub mod reference;
pub mod settlement;
pub mod storage;

pub use error::{LedgerError, LedgerResult};
pub use money::Money;
pub use settlement::{Collaborators, SettlementEngine};
