// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Engine wired to in-memory collaborators over a temporary database.

use std::sync::Arc;

use rust_decimal::Decimal;
use tempfile::TempDir;

use super::pin::hash_pin;
use super::{Collaborators, SettlementEngine};
use crate::fees::FeePolicy;
use crate::money::Money;
use crate::providers::memory::{
    InMemoryCustody, InMemoryIdentity, InMemoryKyc, InMemoryVault, RecordingNotifier,
    StaticRateTable,
};
use crate::providers::{KycState, KycStatus, UserProfile};
use crate::storage::{FundingInstructions, LedgerDatabase, WalletKind, WalletStore};

pub(crate) const PIN: &str = "1234";

pub(crate) fn m(raw: &str) -> Money {
    Money::parse(raw).unwrap()
}

pub(crate) fn bank_funding() -> FundingInstructions {
    FundingInstructions::BankTransfer {
        bank_name: "Providus Bank".to_string(),
        account_number: "9912345678".to_string(),
        account_name: "Rhionx Collections".to_string(),
    }
}

pub(crate) struct Harness {
    pub engine: SettlementEngine,
    pub identity: Arc<InMemoryIdentity>,
    pub kyc: Arc<InMemoryKyc>,
    pub vault: Arc<InMemoryVault>,
    pub notifier: Arc<RecordingNotifier>,
    pub custody: Arc<InMemoryCustody>,
    _dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDatabase::open(&dir.path().join("ledger.redb")).unwrap();

        let identity = Arc::new(InMemoryIdentity::new());
        let kyc = Arc::new(InMemoryKyc::new());
        let vault = Arc::new(InMemoryVault::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let custody = Arc::new(InMemoryCustody::new());
        let rates = Arc::new(
            StaticRateTable::new().with_rate("NGN", "KES", Decimal::new(15, 2)),
        );

        let engine = SettlementEngine::new(
            Arc::new(db),
            FeePolicy::default(),
            Collaborators {
                identity: identity.clone(),
                kyc: kyc.clone(),
                vault: vault.clone(),
                notifier: notifier.clone(),
                rates,
                custody: custody.clone(),
            },
        );

        Self {
            engine,
            identity,
            kyc,
            vault,
            notifier,
            custody,
            _dir: dir,
        }
    }

    /// KYC-verified user `{name}@example.com` with [`PIN`] set.
    pub async fn user(&self, name: &str) -> String {
        let user_id = format!("user-{name}");
        let mut display_name = name.to_string();
        if let Some(first) = display_name.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        self.identity
            .insert_user(UserProfile {
                user_id: user_id.clone(),
                email: format!("{name}@example.com"),
                display_name,
                pin_hash: Some(hash_pin(PIN, 4).unwrap()),
            })
            .await;
        self.verify_kyc(&user_id).await;
        user_id
    }

    pub async fn verify_kyc(&self, user_id: &str) {
        self.kyc
            .set_status(
                user_id,
                KycStatus {
                    has_record: true,
                    status: KycState::Verified,
                    tier: 1,
                },
            )
            .await;
    }

    /// Credit a fiat wallet directly, returning its id.
    pub async fn fund(&self, owner_id: &str, currency: &str, amount: &str) -> String {
        let wallets = WalletStore::new(self.engine.database());
        let wallet = wallets
            .get_or_create(owner_id, currency, WalletKind::Fiat)
            .unwrap();
        wallets.credit(&wallet.wallet_id, m(amount)).unwrap();
        wallet.wallet_id
    }
}
