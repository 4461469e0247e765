// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ledger database backed by redb (pure Rust, ACID).
//!
//! redb admits a single write transaction at a time and every write
//! transaction is serializable. All balance mutations therefore happen
//! inside [`LedgerDatabase::write`]: the closure re-reads the current row,
//! checks its condition ("available ≥ amount", "status is pending") and
//! writes the new row. Nothing is applied unless the closure returns `Ok`
//! and the commit succeeds.
//!
//! Never `.await` inside a write closure; collaborator calls happen before
//! or after it.
//!
//! ## Table Layout
//!
//! - `wallets`: wallet_id → serialized Wallet
//! - `wallet_owner_index`: `owner|currency|kind` → wallet_id (uniqueness)
//! - `transactions`: tx_id → serialized StoredTransaction
//! - `reference_index`: reference → tx_id (uniqueness)
//! - `correlation_index`: `correlation|tx_id` → tx_id
//! - `wallet_tx_index`: composite key (wallet_id|!millis|tx_id) → tx_id
//! - `otps`: `user|purpose:subject|otp_id` → serialized StoredOtp
//! - `beneficiaries`: beneficiary_id → serialized Beneficiary
//! - `reconciliation`: event_id → serialized ReconciliationEvent
//! - `audit_events`: `date|millis|event_id` → serialized AuditEvent

use std::path::Path;

use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::audit::AuditEvent;
use super::repository::beneficiaries::Beneficiary;
use super::repository::otp::StoredOtp;
use super::repository::reconciliation::ReconciliationEvent;
use super::repository::transactions::StoredTransaction;
use super::repository::wallets::Wallet;

// =============================================================================
// Table Definitions
// =============================================================================

const WALLETS: TableDefinition<&str, &[u8]> = TableDefinition::new("wallets");

const WALLET_OWNER_INDEX: TableDefinition<&str, &str> = TableDefinition::new("wallet_owner_index");

const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

const REFERENCE_INDEX: TableDefinition<&str, &str> = TableDefinition::new("reference_index");

const CORRELATION_INDEX: TableDefinition<&str, &str> = TableDefinition::new("correlation_index");

/// Key format: `wallet_id|!millis_be|tx_id` for descending-time range scans.
const WALLET_TX_INDEX: TableDefinition<&[u8], &str> = TableDefinition::new("wallet_tx_index");

const OTPS: TableDefinition<&str, &[u8]> = TableDefinition::new("otps");

const BENEFICIARIES: TableDefinition<&str, &[u8]> = TableDefinition::new("beneficiaries");

const RECONCILIATION: TableDefinition<&str, &[u8]> = TableDefinition::new("reconciliation");

const AUDIT_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_events");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("duplicate key: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Key Helpers
// =============================================================================

/// Key of the `(owner, currency, kind)` uniqueness index.
pub fn wallet_owner_key(owner_id: &str, currency: &str, kind: &str) -> String {
    format!("{owner_id}|{currency}|{kind}")
}

/// Bounds covering every `&str` key that starts with `prefix|`.
///
/// `}` is the byte right after `|`, so `prefix}` is the first key past the
/// prefix range.
fn prefix_bounds(prefix: &str) -> (String, String) {
    (format!("{prefix}|"), format!("{prefix}}}"))
}

/// Build a composite key for the wallet_tx_index table.
///
/// The inverted timestamp makes a forward scan return newest first.
fn make_history_key(wallet_id: &str, millis: i64, tx_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(wallet_id.len() + 1 + 8 + 1 + tx_id.len());
    key.extend_from_slice(wallet_id.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&(!millis as u64).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(tx_id.as_bytes());
    key
}

fn make_history_prefix(wallet_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(wallet_id.len() + 1);
    prefix.extend_from_slice(wallet_id.as_bytes());
    prefix.push(b'|');
    prefix
}

fn make_history_prefix_end(wallet_id: &str) -> Vec<u8> {
    let mut end = make_history_prefix(wallet_id);
    end.extend_from_slice(&[0xFF; 20]);
    end
}

fn encode_cursor(key: &[u8]) -> String {
    hex::encode(key)
}

fn decode_cursor(cursor: &str) -> Option<Vec<u8>> {
    hex::decode(cursor).ok()
}

// =============================================================================
// Table Access Helpers
// =============================================================================

fn read_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StoreResult<Option<T>> {
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

fn read_str(
    table: &impl ReadableTable<&'static str, &'static str>,
    key: &str,
) -> StoreResult<Option<String>> {
    Ok(table.get(key)?.map(|value| value.value().to_string()))
}

/// Deserialize every row whose key starts with `prefix|` (or all rows).
fn scan_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: Option<&str>,
) -> StoreResult<Vec<(String, T)>> {
    let mut rows = Vec::new();
    let range = match prefix {
        Some(prefix) => {
            let (start, end) = prefix_bounds(prefix);
            table.range::<&str>(start.as_str()..end.as_str())?
        }
        None => table.iter()?,
    };
    for entry in range {
        let (key, value) = entry?;
        rows.push((key.value().to_string(), serde_json::from_slice(value.value())?));
    }
    Ok(rows)
}

fn scan_values(
    table: &impl ReadableTable<&'static str, &'static str>,
    prefix: &str,
) -> StoreResult<Vec<String>> {
    let (start, end) = prefix_bounds(prefix);
    let mut values = Vec::new();
    for entry in table.range::<&str>(start.as_str()..end.as_str())? {
        let (_, value) = entry?;
        values.push(value.value().to_string());
    }
    Ok(values)
}

fn load_transactions(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    ids: &[String],
) -> StoreResult<Vec<StoredTransaction>> {
    let mut transactions = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(tx) = read_json(table, id)? {
            transactions.push(tx);
        }
    }
    Ok(transactions)
}

// =============================================================================
// LedgerDatabase
// =============================================================================

/// Embedded ACID ledger database.
pub struct LedgerDatabase {
    db: Database,
}

impl LedgerDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(WALLETS)?;
            let _ = write_txn.open_table(WALLET_OWNER_INDEX)?;
            let _ = write_txn.open_table(TRANSACTIONS)?;
            let _ = write_txn.open_table(REFERENCE_INDEX)?;
            let _ = write_txn.open_table(CORRELATION_INDEX)?;
            let _ = write_txn.open_table(WALLET_TX_INDEX)?;
            let _ = write_txn.open_table(OTPS)?;
            let _ = write_txn.open_table(BENEFICIARIES)?;
            let _ = write_txn.open_table(RECONCILIATION)?;
            let _ = write_txn.open_table(AUDIT_EVENTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Run `f` inside one serializable write transaction.
    ///
    /// Commits when `f` returns `Ok`; aborts (applying nothing) otherwise.
    pub fn write<T, E>(&self, f: impl FnOnce(&LedgerBatch<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let txn = self.db.begin_write().map_err(StoreError::from)?;
        let outcome = f(&LedgerBatch { txn: &txn });
        match outcome {
            Ok(value) => {
                txn.commit().map_err(StoreError::from)?;
                Ok(value)
            }
            Err(error) => {
                if let Err(abort_error) = txn.abort() {
                    tracing::warn!(error = %abort_error, "failed to abort ledger write transaction");
                }
                Err(error)
            }
        }
    }

    /// Open a consistent read-only snapshot.
    pub fn snapshot(&self) -> StoreResult<LedgerSnapshot> {
        Ok(LedgerSnapshot {
            txn: self.db.begin_read()?,
        })
    }
}

// =============================================================================
// LedgerBatch (write side)
// =============================================================================

/// Typed access to the tables inside one write transaction.
pub struct LedgerBatch<'t> {
    txn: &'t WriteTransaction,
}

impl LedgerBatch<'_> {
    // ---- wallets ------------------------------------------------------------

    pub fn wallet(&self, wallet_id: &str) -> StoreResult<Option<Wallet>> {
        let table = self.txn.open_table(WALLETS)?;
        read_json(&table, wallet_id)
    }

    pub fn put_wallet(&self, wallet: &Wallet) -> StoreResult<()> {
        let json = serde_json::to_vec(wallet)?;
        let mut table = self.txn.open_table(WALLETS)?;
        table.insert(wallet.wallet_id.as_str(), json.as_slice())?;
        Ok(())
    }

    pub fn wallet_id_for(&self, owner_key: &str) -> StoreResult<Option<String>> {
        let table = self.txn.open_table(WALLET_OWNER_INDEX)?;
        read_str(&table, owner_key)
    }

    /// Claim `owner_key` for `wallet_id`; fails if already claimed.
    pub fn index_wallet(&self, owner_key: &str, wallet_id: &str) -> StoreResult<()> {
        let mut table = self.txn.open_table(WALLET_OWNER_INDEX)?;
        if table.get(owner_key)?.is_some() {
            return Err(StoreError::Conflict(format!("wallet {owner_key}")));
        }
        table.insert(owner_key, wallet_id)?;
        Ok(())
    }

    // ---- transactions -------------------------------------------------------

    pub fn transaction(&self, tx_id: &str) -> StoreResult<Option<StoredTransaction>> {
        let table = self.txn.open_table(TRANSACTIONS)?;
        read_json(&table, tx_id)
    }

    pub fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<StoredTransaction>> {
        let tx_id = {
            let index = self.txn.open_table(REFERENCE_INDEX)?;
            read_str(&index, reference)?
        };
        match tx_id {
            Some(tx_id) => self.transaction(&tx_id),
            None => Ok(None),
        }
    }

    pub fn correlated(&self, correlation_ref: &str) -> StoreResult<Vec<StoredTransaction>> {
        let ids = {
            let index = self.txn.open_table(CORRELATION_INDEX)?;
            scan_values(&index, correlation_ref)?
        };
        let table = self.txn.open_table(TRANSACTIONS)?;
        load_transactions(&table, &ids)
    }

    /// Insert a new transaction and all of its index entries.
    ///
    /// Fails with [`StoreError::Conflict`] if the reference is taken.
    pub fn insert_transaction(&self, tx: &StoredTransaction) -> StoreResult<()> {
        let json = serde_json::to_vec(tx)?;
        {
            let mut references = self.txn.open_table(REFERENCE_INDEX)?;
            if references.get(tx.reference.as_str())?.is_some() {
                return Err(StoreError::Conflict(format!("reference {}", tx.reference)));
            }
            references.insert(tx.reference.as_str(), tx.tx_id.as_str())?;
        }
        {
            let mut table = self.txn.open_table(TRANSACTIONS)?;
            table.insert(tx.tx_id.as_str(), json.as_slice())?;
        }
        {
            let mut history = self.txn.open_table(WALLET_TX_INDEX)?;
            let key = make_history_key(&tx.wallet_id, tx.created_at.timestamp_millis(), &tx.tx_id);
            history.insert(key.as_slice(), tx.tx_id.as_str())?;
        }
        if let Some(correlation) = &tx.correlation_ref {
            let mut index = self.txn.open_table(CORRELATION_INDEX)?;
            let key = format!("{correlation}|{}", tx.tx_id);
            index.insert(key.as_str(), tx.tx_id.as_str())?;
        }
        Ok(())
    }

    /// Overwrite an existing transaction row (indexes are immutable).
    pub fn update_transaction(&self, tx: &StoredTransaction) -> StoreResult<()> {
        let json = serde_json::to_vec(tx)?;
        let mut table = self.txn.open_table(TRANSACTIONS)?;
        table.insert(tx.tx_id.as_str(), json.as_slice())?;
        Ok(())
    }

    // ---- otps ---------------------------------------------------------------

    pub fn otps_with_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, StoredOtp)>> {
        let table = self.txn.open_table(OTPS)?;
        scan_json(&table, Some(prefix))
    }

    pub fn put_otp(&self, key: &str, otp: &StoredOtp) -> StoreResult<()> {
        put_json(self.txn, OTPS, key, otp)
    }

    // ---- beneficiaries ------------------------------------------------------

    pub fn beneficiaries(&self) -> StoreResult<Vec<Beneficiary>> {
        let table = self.txn.open_table(BENEFICIARIES)?;
        Ok(scan_json(&table, None)?.into_iter().map(|(_, b)| b).collect())
    }

    pub fn beneficiary(&self, beneficiary_id: &str) -> StoreResult<Option<Beneficiary>> {
        let table = self.txn.open_table(BENEFICIARIES)?;
        read_json(&table, beneficiary_id)
    }

    pub fn put_beneficiary(&self, beneficiary: &Beneficiary) -> StoreResult<()> {
        put_json(self.txn, BENEFICIARIES, &beneficiary.beneficiary_id, beneficiary)
    }

    pub fn remove_beneficiary(&self, beneficiary_id: &str) -> StoreResult<bool> {
        let mut table = self.txn.open_table(BENEFICIARIES)?;
        let removed = table.remove(beneficiary_id)?.is_some();
        Ok(removed)
    }

    // ---- reconciliation -----------------------------------------------------

    pub fn reconciliation(&self, event_id: &str) -> StoreResult<Option<ReconciliationEvent>> {
        let table = self.txn.open_table(RECONCILIATION)?;
        read_json(&table, event_id)
    }

    pub fn put_reconciliation(&self, event: &ReconciliationEvent) -> StoreResult<()> {
        put_json(self.txn, RECONCILIATION, &event.event_id, event)
    }

    // ---- audit --------------------------------------------------------------

    pub fn append_audit(&self, key: &str, event: &AuditEvent) -> StoreResult<()> {
        put_json(self.txn, AUDIT_EVENTS, key, event)
    }
}

fn put_json<T: Serialize>(
    txn: &WriteTransaction,
    definition: TableDefinition<&str, &[u8]>,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let json = serde_json::to_vec(value)?;
    let mut table = txn.open_table(definition)?;
    table.insert(key, json.as_slice())?;
    Ok(())
}

// =============================================================================
// LedgerSnapshot (read side)
// =============================================================================

/// A consistent read-only view of the ledger.
pub struct LedgerSnapshot {
    txn: ReadTransaction,
}

impl LedgerSnapshot {
    pub fn wallet(&self, wallet_id: &str) -> StoreResult<Option<Wallet>> {
        let table = self.txn.open_table(WALLETS)?;
        read_json(&table, wallet_id)
    }

    pub fn wallet_id_for(&self, owner_key: &str) -> StoreResult<Option<String>> {
        let table = self.txn.open_table(WALLET_OWNER_INDEX)?;
        read_str(&table, owner_key)
    }

    /// All wallets owned by `owner_id`, in index order.
    pub fn wallets_for_owner(&self, owner_id: &str) -> StoreResult<Vec<Wallet>> {
        let index = self.txn.open_table(WALLET_OWNER_INDEX)?;
        let ids = scan_values(&index, owner_id)?;
        let table = self.txn.open_table(WALLETS)?;
        let mut wallets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(wallet) = read_json(&table, &id)? {
                wallets.push(wallet);
            }
        }
        Ok(wallets)
    }

    pub fn transaction(&self, tx_id: &str) -> StoreResult<Option<StoredTransaction>> {
        let table = self.txn.open_table(TRANSACTIONS)?;
        read_json(&table, tx_id)
    }

    pub fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> StoreResult<Option<StoredTransaction>> {
        let index = self.txn.open_table(REFERENCE_INDEX)?;
        match read_str(&index, reference)? {
            Some(tx_id) => self.transaction(&tx_id),
            None => Ok(None),
        }
    }

    pub fn correlated(&self, correlation_ref: &str) -> StoreResult<Vec<StoredTransaction>> {
        let index = self.txn.open_table(CORRELATION_INDEX)?;
        let ids = scan_values(&index, correlation_ref)?;
        let table = self.txn.open_table(TRANSACTIONS)?;
        load_transactions(&table, &ids)
    }

    /// Paginated listing of transactions for a wallet, newest first.
    ///
    /// Returns `(transactions, next_cursor)`.
    pub fn wallet_history(
        &self,
        wallet_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> StoreResult<(Vec<StoredTransaction>, Option<String>)> {
        let history = self.txn.open_table(WALLET_TX_INDEX)?;
        let table = self.txn.open_table(TRANSACTIONS)?;

        let prefix = make_history_prefix(wallet_id);
        let prefix_end = make_history_prefix_end(wallet_id);

        let decoded = cursor.and_then(decode_cursor);
        let start = decoded.clone().unwrap_or_else(|| prefix.clone());

        let mut results = Vec::with_capacity(limit);
        let mut last_key: Option<Vec<u8>> = None;
        let mut skip_first = decoded.is_some();

        for entry in history.range(start.as_slice()..prefix_end.as_slice())? {
            let (key, tx_id) = entry?;
            // Skip the cursor entry itself
            if skip_first {
                skip_first = false;
                continue;
            }
            if results.len() >= limit {
                break;
            }
            if let Some(tx) = read_json::<StoredTransaction>(&table, tx_id.value())? {
                results.push(tx);
                last_key = Some(key.value().to_vec());
            }
        }

        let next_cursor = if results.len() >= limit {
            last_key.map(|k| encode_cursor(&k))
        } else {
            None
        };

        Ok((results, next_cursor))
    }

    pub fn beneficiaries(&self) -> StoreResult<Vec<Beneficiary>> {
        let table = self.txn.open_table(BENEFICIARIES)?;
        Ok(scan_json(&table, None)?.into_iter().map(|(_, b)| b).collect())
    }

    pub fn beneficiary(&self, beneficiary_id: &str) -> StoreResult<Option<Beneficiary>> {
        let table = self.txn.open_table(BENEFICIARIES)?;
        read_json(&table, beneficiary_id)
    }

    pub fn reconciliation(&self, event_id: &str) -> StoreResult<Option<ReconciliationEvent>> {
        let table = self.txn.open_table(RECONCILIATION)?;
        read_json(&table, event_id)
    }

    pub fn reconciliation_events(&self) -> StoreResult<Vec<ReconciliationEvent>> {
        let table = self.txn.open_table(RECONCILIATION)?;
        Ok(scan_json(&table, None)?.into_iter().map(|(_, e)| e).collect())
    }

    pub fn audit_events(&self, date: &str) -> StoreResult<Vec<AuditEvent>> {
        let table = self.txn.open_table(AUDIT_EVENTS)?;
        Ok(scan_json(&table, Some(date))?
            .into_iter()
            .map(|(_, e)| e)
            .collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
