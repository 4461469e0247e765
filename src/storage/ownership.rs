// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ownership enforcement for ledger records.
//!
//! Every engine operation that touches a wallet or transaction on behalf of
//! a caller goes through these checks. A record that does not exist is
//! `NotFound`; a record that exists but belongs to someone else is
//! `Unauthorized`. The two are never conflated.

use crate::error::{LedgerError, LedgerResult};

/// Trait for resources that have an owner.
pub trait OwnedResource {
    /// Get the owner's user ID.
    fn owner_user_id(&self) -> &str;

    /// Human-readable label used in error messages, e.g. `Wallet w-1`.
    fn resource_label(&self) -> String;
}

/// Trait for enforcing ownership on ledger records.
pub trait OwnershipEnforcer {
    /// Verify that `caller` owns this resource.
    ///
    /// # Errors
    /// Returns `LedgerError::Unauthorized` if the caller doesn't own it.
    fn verify_ownership(&self, caller: &str) -> LedgerResult<()>;
}

impl<T: OwnedResource> OwnershipEnforcer for T {
    fn verify_ownership(&self, caller: &str) -> LedgerResult<()> {
        if self.owner_user_id() == caller {
            Ok(())
        } else {
            Err(LedgerError::unauthorized(self.resource_label()))
        }
    }
}

/// Resolve a lookup result into an owned resource.
pub trait OwnershipCheck<T> {
    /// `what` names the missing record in the `NotFound` error.
    fn verify_owner(self, caller: &str, what: &str) -> LedgerResult<T>;
}

impl<T: OwnedResource> OwnershipCheck<T> for Option<T> {
    fn verify_owner(self, caller: &str, what: &str) -> LedgerResult<T> {
        match self {
            Some(resource) => {
                resource.verify_ownership(caller)?;
                Ok(resource)
            }
            None => Err(LedgerError::not_found(what)),
        }
    }
}
