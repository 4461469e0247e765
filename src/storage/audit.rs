// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive ledger operations.
//!
//! Money movements, PIN/OTP failures, ownership violations and partial
//! settlements are appended to the `audit_events` table. Keys start with the
//! UTC date so a day's events are one prefix scan, in write order.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ledger_db::{LedgerDatabase, StoreResult};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Wallet events
    WalletCreated,
    WalletDeactivated,
    WalletReactivated,

    // Settlement events
    DepositInitiated,
    DepositConfirmed,
    TransferInitiated,
    TransferCompleted,
    TransferFailed,
    ConversionInitiated,
    ConversionConfirmed,
    BillPaymentCompleted,
    PartialSettlement,
    SettlementReconciled,

    // Gate failures
    InvalidPin,
    InvalidOtp,
    PermissionDenied,

    // Beneficiary events
    BeneficiaryAdded,
    BeneficiaryRemoved,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// User who triggered the event (if known).
    pub user_id: Option<String>,
    /// Resource affected (transaction reference, wallet_id, etc.).
    pub resource_id: Option<String>,
    /// Resource type (transaction, wallet, beneficiary).
    pub resource_type: Option<String>,
    /// Additional details as JSON.
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            resource_id: None,
            resource_type: None,
            details: None,
            success: true,
            error: None,
        }
    }

    /// Set the user ID.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the resource.
    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Add details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    fn storage_key(&self) -> String {
        format!(
            "{}|{:020}|{:020}|{}",
            self.timestamp.format("%Y-%m-%d"),
            self.timestamp.timestamp_micros().max(0),
            SEQUENCE.fetch_add(1, Ordering::Relaxed),
            self.event_id
        )
    }
}

/// Repository for audit events.
pub struct AuditRepository<'a> {
    db: &'a LedgerDatabase,
}

impl<'a> AuditRepository<'a> {
    /// Create a new audit repository.
    pub fn new(db: &'a LedgerDatabase) -> Self {
        Self { db }
    }

    /// Log an audit event.
    pub fn log(&self, event: &AuditEvent) -> StoreResult<()> {
        let key = event.storage_key();
        self.db.write(|batch| batch.append_audit(&key, event))
    }

    /// Read audit events for a specific date (`YYYY-MM-DD`).
    pub fn read_events(&self, date: &str) -> StoreResult<Vec<AuditEvent>> {
        self.db.snapshot()?.audit_events(date)
    }

    /// Search events by user ID.
    pub fn search_by_user(&self, user_id: &str, date: &str) -> StoreResult<Vec<AuditEvent>> {
        let events = self.read_events(date)?;
        Ok(events
            .into_iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .collect())
    }

    /// Search events by resource.
    pub fn search_by_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
        date: &str,
    ) -> StoreResult<Vec<AuditEvent>> {
        let events = self.read_events(date)?;
        Ok(events
            .into_iter()
            .filter(|e| {
                e.resource_type.as_deref() == Some(resource_type)
                    && e.resource_id.as_deref() == Some(resource_id)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LedgerDatabase) {
        let temp = TempDir::new().unwrap();
        let db = LedgerDatabase::open(&temp.path().join("ledger.redb")).unwrap();
        (temp, db)
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    #[test]
    fn create_audit_event() {
        let event = AuditEvent::new(AuditEventType::DepositConfirmed)
            .with_user("user_123")
            .with_resource("transaction", "DEP123");

        assert_eq!(event.event_type, AuditEventType::DepositConfirmed);
        assert_eq!(event.user_id, Some("user_123".to_string()));
        assert_eq!(event.resource_type, Some("transaction".to_string()));
        assert!(event.success);
    }

    #[test]
    fn failed_event() {
        let event = AuditEvent::new(AuditEventType::InvalidPin)
            .with_user("user_123")
            .failed("Invalid transaction PIN");

        assert!(!event.success);
        assert_eq!(event.error, Some("Invalid transaction PIN".to_string()));
    }

    #[test]
    fn log_and_read_events_in_order() {
        let (_temp, db) = setup();
        let repo = AuditRepository::new(&db);

        repo.log(&AuditEvent::new(AuditEventType::TransferInitiated).with_user("user_1"))
            .unwrap();
        repo.log(&AuditEvent::new(AuditEventType::TransferCompleted).with_user("user_1"))
            .unwrap();

        let events = repo.read_events(&today()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::TransferInitiated);
        assert_eq!(events[1].event_type, AuditEventType::TransferCompleted);
    }

    #[test]
    fn search_by_user_and_resource() {
        let (_temp, db) = setup();
        let repo = AuditRepository::new(&db);

        repo.log(
            &AuditEvent::new(AuditEventType::ConversionInitiated)
                .with_user("user_target")
                .with_resource("transaction", "CNV1"),
        )
        .unwrap();
        repo.log(
            &AuditEvent::new(AuditEventType::ConversionConfirmed)
                .with_user("user_other")
                .with_resource("transaction", "CNV1"),
        )
        .unwrap();
        repo.log(
            &AuditEvent::new(AuditEventType::BeneficiaryAdded)
                .with_user("user_target")
                .with_resource("beneficiary", "b1"),
        )
        .unwrap();

        assert_eq!(repo.search_by_user("user_target", &today()).unwrap().len(), 2);
        assert_eq!(
            repo.search_by_resource("transaction", "CNV1", &today())
                .unwrap()
                .len(),
            2
        );
        assert!(repo.read_events("1999-01-01").unwrap().is_empty());
    }
}
