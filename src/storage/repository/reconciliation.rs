// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable queue of partial settlements.
//!
//! When a sender leg completes but the recipient credit does not, an event
//! is written here. The reconciliation worker retries unresolved events;
//! an operator can inspect the queue through [`ReconciliationRepository`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::money::Money;
use crate::storage::ledger_db::LedgerDatabase;

/// A recipient credit that still has to be applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationEvent {
    pub event_id: String,
    pub sender_reference: String,
    pub sender_tx_id: String,
    /// Reference the recipient credit leg will carry once applied.
    pub credit_reference: String,
    pub recipient_id: String,
    #[serde(default)]
    pub recipient_wallet_id: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub is_crypto: bool,
    /// Crypto only: the custodian already credited the recipient, so a
    /// retry writes the local leg without crediting again.
    #[serde(default)]
    pub external_applied: bool,
    pub reason: String,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReconciliationEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sender_reference: String,
        sender_tx_id: String,
        credit_reference: String,
        recipient_id: String,
        amount: Money,
        currency: String,
        is_crypto: bool,
        reason: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            sender_reference,
            sender_tx_id,
            credit_reference,
            recipient_id,
            recipient_wallet_id: None,
            amount,
            currency,
            is_crypto,
            external_applied: false,
            reason,
            attempts: 0,
            last_error: None,
            resolved: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Repository for reconciliation events.
pub struct ReconciliationRepository<'a> {
    db: &'a LedgerDatabase,
}

impl<'a> ReconciliationRepository<'a> {
    /// Create a new ReconciliationRepository.
    pub fn new(db: &'a LedgerDatabase) -> Self {
        Self { db }
    }

    pub fn record(&self, event: &ReconciliationEvent) -> LedgerResult<()> {
        Ok(self.db.write(|batch| batch.put_reconciliation(event))?)
    }

    /// Unresolved events, oldest first.
    pub fn list_unresolved(&self) -> LedgerResult<Vec<ReconciliationEvent>> {
        let mut events: Vec<_> = self
            .db
            .snapshot()?
            .reconciliation_events()?
            .into_iter()
            .filter(|e| !e.resolved)
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(events)
    }

    pub fn list_all(&self) -> LedgerResult<Vec<ReconciliationEvent>> {
        Ok(self.db.snapshot()?.reconciliation_events()?)
    }

    /// Count a failed retry.
    pub fn record_attempt(&self, event_id: &str, error: &str) -> LedgerResult<ReconciliationEvent> {
        self.db.write(|batch| {
            let mut event = batch
                .reconciliation(event_id)?
                .ok_or_else(|| LedgerError::not_found(format!("Reconciliation event {event_id}")))?;
            event.attempts += 1;
            event.last_error = Some(error.to_string());
            event.updated_at = Utc::now();
            batch.put_reconciliation(&event)?;
            Ok(event)
        })
    }
}
