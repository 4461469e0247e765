// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Saved bill-payment destinations.
//!
//! A beneficiary is a (category, provider, account number) triple a user
//! pays repeatedly, e.g. a prepaid meter or a betting account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::BillCategory;
use crate::error::{LedgerError, LedgerResult};
use crate::storage::ledger_db::LedgerDatabase;
use crate::storage::ownership::OwnedResource;

/// Beneficiary stored in the `beneficiaries` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Beneficiary {
    /// Unique beneficiary identifier (UUID)
    pub beneficiary_id: String,
    pub owner_id: String,
    pub category: BillCategory,
    pub provider_code: String,
    pub account_number: String,
    /// Human-readable label
    pub nickname: String,
    pub created_at: DateTime<Utc>,
}

impl OwnedResource for Beneficiary {
    fn owner_user_id(&self) -> &str {
        &self.owner_id
    }

    fn resource_label(&self) -> String {
        format!("Beneficiary {}", self.beneficiary_id)
    }
}

/// Repository for beneficiary operations.
pub struct BeneficiaryRepository<'a> {
    db: &'a LedgerDatabase,
}

impl<'a> BeneficiaryRepository<'a> {
    /// Create a new BeneficiaryRepository.
    pub fn new(db: &'a LedgerDatabase) -> Self {
        Self { db }
    }

    /// Get a beneficiary by ID.
    pub fn get(&self, beneficiary_id: &str) -> LedgerResult<Option<Beneficiary>> {
        Ok(self.db.snapshot()?.beneficiary(beneficiary_id)?)
    }

    /// Save a new beneficiary. The same destination cannot be saved twice
    /// by one owner.
    pub fn create(&self, beneficiary: &Beneficiary) -> LedgerResult<()> {
        self.db.write(|batch| {
            let duplicate = batch.beneficiaries()?.into_iter().any(|existing| {
                existing.owner_id == beneficiary.owner_id
                    && existing.category == beneficiary.category
                    && existing.provider_code == beneficiary.provider_code
                    && existing.account_number == beneficiary.account_number
            });
            if duplicate {
                return Err(LedgerError::validation(format!(
                    "Beneficiary {} is already saved",
                    beneficiary.account_number
                )));
            }
            batch.put_beneficiary(beneficiary)?;
            Ok(())
        })
    }

    /// List all beneficiaries owned by a user, oldest first.
    pub fn list_by_owner(&self, owner_id: &str) -> LedgerResult<Vec<Beneficiary>> {
        let mut beneficiaries: Vec<_> = self
            .db
            .snapshot()?
            .beneficiaries()?
            .into_iter()
            .filter(|b| b.owner_id == owner_id)
            .collect();
        beneficiaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(beneficiaries)
    }

    /// Delete a beneficiary. Returns `false` if it did not exist.
    pub fn delete(&self, beneficiary_id: &str) -> LedgerResult<bool> {
        Ok(self
            .db
            .write(|batch| batch.remove_beneficiary(beneficiary_id))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (LedgerDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDatabase::open(&dir.path().join("ledger.redb")).unwrap();
        (db, dir)
    }

    fn meter(owner: &str, id: &str) -> Beneficiary {
        Beneficiary {
            beneficiary_id: id.to_string(),
            owner_id: owner.to_string(),
            category: BillCategory::Electricity,
            provider_code: "IKEDC".to_string(),
            account_number: "45012345678".to_string(),
            nickname: "Home meter".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_get_list_delete() {
        let (db, _dir) = temp_db();
        let repo = BeneficiaryRepository::new(&db);

        repo.create(&meter("user-1", "b1")).unwrap();
        repo.create(&meter("user-2", "b2")).unwrap();

        assert_eq!(repo.get("b1").unwrap().unwrap().nickname, "Home meter");
        assert_eq!(repo.list_by_owner("user-1").unwrap().len(), 1);

        assert!(repo.delete("b1").unwrap());
        assert!(!repo.delete("b1").unwrap());
        assert!(repo.get("b1").unwrap().is_none());
    }

    #[test]
    fn duplicate_destination_is_rejected() {
        let (db, _dir) = temp_db();
        let repo = BeneficiaryRepository::new(&db);
        repo.create(&meter("user-1", "b1")).unwrap();

        let err = repo.create(&meter("user-1", "b2")).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
