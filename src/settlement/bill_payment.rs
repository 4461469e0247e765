// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bill payments and saved beneficiaries.
//!
//! Unlike the other flows, initiate is a preview: nothing is persisted until
//! confirm, which is gated by the PIN alone (no OTP, no KYC check). Confirm
//! writes a single completed transaction whose biller-side settlement is
//! tracked through `integration_status`.
//!
//! The account format check runs at confirm time only. A preview for a
//! malformed meter number succeeds and the confirm rejects it.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{validate_amount, SettlementEngine};
use crate::billing::{BillCategory, BillProvider};
use crate::error::{LedgerError, LedgerResult};
use crate::fees::OperationKind;
use crate::money::Money;
use crate::reference::BILL_PAYMENT_PREFIX;
use crate::storage::repository::wallets::debit_in;
use crate::storage::{
    AuditEvent, AuditEventType, Beneficiary, BeneficiaryRepository, BillPaymentMetadata, Channel,
    IntegrationStatus, OwnershipCheck, StoredTransaction, TxMetadata, TxType, Wallet, WalletKind,
    WalletStore,
};

const MAX_NICKNAME_CHARS: usize = 50;

/// Where the bill is paid to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillDestination {
    Account { account_number: String },
    Beneficiary { beneficiary_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillPaymentRequest {
    pub category: BillCategory,
    pub provider_code: String,
    /// Required for plan-priced billers (data bundles, cable bouquets).
    #[serde(default)]
    pub plan_code: Option<String>,
    /// Required for freeform billers; ignored when a plan sets the price.
    #[serde(default)]
    pub amount: Option<Money>,
    pub destination: BillDestination,
}

/// Priced bill payment. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillPaymentPreview {
    pub category: BillCategory,
    pub provider_code: String,
    pub provider_name: String,
    pub plan_code: Option<String>,
    pub plan_name: Option<String>,
    pub account_number: String,
    pub beneficiary_id: Option<String>,
    pub amount: Money,
    pub fee: Money,
    pub total: Money,
    pub currency: String,
    pub wallet_id: String,
    pub available_balance: Money,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBeneficiary {
    pub category: BillCategory,
    pub provider_code: String,
    pub account_number: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

impl SettlementEngine {
    fn bill_provider(&self, category: BillCategory, code: &str) -> LedgerResult<&BillProvider> {
        let provider = self
            .catalog
            .provider(code)
            .ok_or_else(|| LedgerError::not_found(format!("Bill provider {}", code.trim())))?;
        if provider.category != category {
            return Err(LedgerError::validation(format!(
                "{} does not offer {} payments",
                provider.name,
                category.as_str()
            )));
        }
        Ok(provider)
    }

    /// Resolve biller, price, destination and source wallet.
    fn price_bill(&self, owner_id: &str, request: &BillPaymentRequest) -> LedgerResult<BillPaymentPreview> {
        let provider = self.bill_provider(request.category, &request.provider_code)?;

        let (amount, plan) = if provider.requires_plan() {
            let code = request
                .plan_code
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    LedgerError::validation(format!("{} requires a plan", provider.name))
                })?;
            let plan = provider
                .plan(code)
                .ok_or_else(|| LedgerError::not_found(format!("Plan {code}")))?;
            (plan.price, Some(plan))
        } else {
            let amount = request
                .amount
                .ok_or_else(|| LedgerError::validation("Amount is required"))?;
            (amount, None)
        };
        validate_amount(amount, &provider.currency)?;

        let (account_number, beneficiary_id) = match &request.destination {
            BillDestination::Account { account_number } => {
                let account = account_number.trim();
                if account.is_empty() {
                    return Err(LedgerError::validation(format!(
                        "{} is required",
                        request.category.account_label()
                    )));
                }
                (account.to_string(), None)
            }
            BillDestination::Beneficiary { beneficiary_id } => {
                let saved = BeneficiaryRepository::new(&self.db)
                    .get(beneficiary_id)?
                    .verify_owner(owner_id, &format!("Beneficiary {beneficiary_id}"))?;
                if saved.category != request.category
                    || !saved.provider_code.eq_ignore_ascii_case(&provider.code)
                {
                    return Err(LedgerError::validation(format!(
                        "Beneficiary {beneficiary_id} is saved for a different biller"
                    )));
                }
                (saved.account_number, Some(saved.beneficiary_id))
            }
        };

        let fee = self
            .fees
            .compute_fee(amount, &provider.currency, OperationKind::BillPayment)?;
        self.fees
            .check_covers(amount, fee, &provider.currency, OperationKind::BillPayment)?;
        let total = amount.checked_add(fee)?;

        let wallet = self.bill_source(owner_id, &provider.currency)?;
        let available = wallet.available_balance();
        if available < total {
            return Err(LedgerError::InsufficientFunds {
                available,
                required: total,
                currency: provider.currency.clone(),
            });
        }

        Ok(BillPaymentPreview {
            category: request.category,
            provider_code: provider.code.clone(),
            provider_name: provider.name.clone(),
            plan_code: plan.map(|p| p.code.clone()),
            plan_name: plan.map(|p| p.name.clone()),
            account_number,
            beneficiary_id,
            amount,
            fee,
            total,
            currency: provider.currency.clone(),
            wallet_id: wallet.wallet_id,
            available_balance: available,
        })
    }

    fn bill_source(&self, owner_id: &str, currency: &str) -> LedgerResult<Wallet> {
        let wallet = WalletStore::new(&self.db)
            .find(owner_id, currency, WalletKind::Fiat)?
            .ok_or_else(|| LedgerError::not_found(format!("{currency} wallet")))?;
        if !wallet.is_active {
            return Err(LedgerError::validation(format!(
                "Wallet {} is inactive",
                wallet.wallet_id
            )));
        }
        Ok(wallet)
    }

    /// Price a bill payment and check the balance covers it.
    pub fn initiate_bill_payment(
        &self,
        owner_id: &str,
        request: &BillPaymentRequest,
    ) -> LedgerResult<BillPaymentPreview> {
        self.price_bill(owner_id, request)
    }

    /// Debit `amount + fee` and record a completed bill payment.
    pub async fn confirm_bill_payment(
        &self,
        owner_id: &str,
        pin: &str,
        request: &BillPaymentRequest,
    ) -> LedgerResult<StoredTransaction> {
        let preview = self.price_bill(owner_id, request)?;
        let profile = self.require_user(owner_id).await?;
        self.check_pin(&profile, pin, &preview.provider_code).await?;
        let account_number = request.category.validate_account(&preview.account_number)?;

        let tx = self.with_fresh_reference(BILL_PAYMENT_PREFIX, |reference| {
            self.db.write(|batch| {
                debit_in(batch, &preview.wallet_id, preview.total)?;
                let mut tx = StoredTransaction::new_pending(
                    uuid::Uuid::new_v4().to_string(),
                    preview.wallet_id.clone(),
                    owner_id.to_string(),
                    TxType::BillPayment,
                    preview.amount,
                    preview.fee,
                    preview.currency.clone(),
                    reference,
                    Channel::BillPayment,
                    TxMetadata::BillPayment(BillPaymentMetadata {
                        category: preview.category,
                        provider_code: preview.provider_code.clone(),
                        provider_name: preview.provider_name.clone(),
                        plan_code: preview.plan_code.clone(),
                        plan_name: preview.plan_name.clone(),
                        account_number: account_number.clone(),
                        beneficiary_id: preview.beneficiary_id.clone(),
                        integration_status: IntegrationStatus::Pending,
                    }),
                );
                tx.mark_completed();
                batch.insert_transaction(&tx)?;
                Ok::<_, LedgerError>(tx)
            })
        })?;
        self.invalidate_history(&[&tx.wallet_id]);

        info!(
            reference = %tx.reference,
            owner_id,
            provider = %preview.provider_code,
            amount = %tx.amount,
            fee = %tx.fee,
            "Bill payment completed"
        );
        self.audit(
            AuditEvent::new(AuditEventType::BillPaymentCompleted)
                .with_user(owner_id)
                .with_resource("transaction", &tx.reference)
                .with_details(serde_json::json!({
                    "provider": preview.provider_code,
                    "category": preview.category.as_str(),
                })),
        );
        Ok(tx)
    }

    // =========================================================================
    // Beneficiaries
    // =========================================================================

    pub fn add_beneficiary(&self, owner_id: &str, new: NewBeneficiary) -> LedgerResult<Beneficiary> {
        let provider = self.bill_provider(new.category, &new.provider_code)?;
        let account_number = new.category.validate_account(&new.account_number)?;
        let nickname = match new.nickname.as_deref().map(str::trim) {
            Some(nick) if !nick.is_empty() => {
                if nick.chars().count() > MAX_NICKNAME_CHARS {
                    return Err(LedgerError::validation(format!(
                        "Nickname is limited to {MAX_NICKNAME_CHARS} characters"
                    )));
                }
                nick.to_string()
            }
            _ => format!("{} {account_number}", provider.name),
        };

        let beneficiary = Beneficiary {
            beneficiary_id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            category: new.category,
            provider_code: provider.code.clone(),
            account_number,
            nickname,
            created_at: chrono::Utc::now(),
        };
        BeneficiaryRepository::new(&self.db).create(&beneficiary)?;

        self.audit(
            AuditEvent::new(AuditEventType::BeneficiaryAdded)
                .with_user(owner_id)
                .with_resource("beneficiary", &beneficiary.beneficiary_id),
        );
        Ok(beneficiary)
    }

    pub fn list_beneficiaries(&self, owner_id: &str) -> LedgerResult<Vec<Beneficiary>> {
        BeneficiaryRepository::new(&self.db).list_by_owner(owner_id)
    }

    pub fn remove_beneficiary(&self, owner_id: &str, beneficiary_id: &str) -> LedgerResult<()> {
        let repo = BeneficiaryRepository::new(&self.db);
        repo.get(beneficiary_id)?
            .verify_owner(owner_id, &format!("Beneficiary {beneficiary_id}"))?;
        repo.delete(beneficiary_id)?;

        self.audit(
            AuditEvent::new(AuditEventType::BeneficiaryRemoved)
                .with_user(owner_id)
                .with_resource("beneficiary", beneficiary_id),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{KycState, KycStatus};
    use crate::settlement::testkit::{m, Harness, PIN};
    use crate::storage::{TransactionRepository, TxStatus};

    fn electricity(meter: &str, amount: &str) -> BillPaymentRequest {
        BillPaymentRequest {
            category: BillCategory::Electricity,
            provider_code: "IKEDC".to_string(),
            plan_code: None,
            amount: Some(m(amount)),
            destination: BillDestination::Account {
                account_number: meter.to_string(),
            },
        }
    }

    fn history_len(h: &Harness, wallet_id: &str) -> usize {
        TransactionRepository::new(h.engine.database())
            .list_by_wallet(wallet_id, None, 50)
            .unwrap()
            .transactions
            .len()
    }

    #[tokio::test]
    async fn preview_prices_plans_and_persists_nothing() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let wallet = h.fund(&alice, "NGN", "20000").await;

        let request = BillPaymentRequest {
            category: BillCategory::CableTv,
            provider_code: "dstv".to_string(),
            plan_code: Some("DSTV-COMPACT".to_string()),
            amount: Some(m("1")),
            destination: BillDestination::Account {
                account_number: "7023456789".to_string(),
            },
        };
        let preview = h.engine.initiate_bill_payment(&alice, &request).unwrap();
        assert_eq!(preview.amount, m("15700"));
        assert_eq!(preview.fee, m("50"));
        assert_eq!(preview.total, m("15750"));
        assert_eq!(preview.plan_name.as_deref(), Some("Compact"));
        assert_eq!(preview.wallet_id, wallet);

        assert_eq!(history_len(&h, &wallet), 0);
        let balance = WalletStore::new(h.engine.database()).get(&wallet).unwrap().balance;
        assert_eq!(balance, m("20000"));
    }

    #[tokio::test]
    async fn confirm_debits_amount_plus_fee_once() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let wallet = h.fund(&alice, "NGN", "20000").await;

        let tx = h
            .engine
            .confirm_bill_payment(&alice, PIN, &electricity("450 1234 5678", "5000"))
            .await
            .unwrap();
        assert!(tx.reference.starts_with("BIL"));
        assert_eq!(tx.status, TxStatus::Completed);
        assert_eq!(tx.tx_type, TxType::BillPayment);
        assert_eq!(tx.fee, m("50"));
        match &tx.metadata {
            TxMetadata::BillPayment(meta) => {
                assert_eq!(meta.account_number, "45012345678");
                assert_eq!(meta.integration_status, IntegrationStatus::Pending);
            }
            other => panic!("unexpected metadata {other:?}"),
        }

        let balance = WalletStore::new(h.engine.database()).get(&wallet).unwrap().balance;
        assert_eq!(balance, m("14950"));
        assert_eq!(history_len(&h, &wallet), 1);
    }

    #[tokio::test]
    async fn account_format_is_only_checked_at_confirm() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let wallet = h.fund(&alice, "NGN", "20000").await;
        let request = electricity("4501234567", "5000");

        assert!(h.engine.initiate_bill_payment(&alice, &request).is_ok());
        assert!(matches!(
            h.engine.confirm_bill_payment(&alice, PIN, &request).await,
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(history_len(&h, &wallet), 0);
    }

    #[tokio::test]
    async fn pin_gates_confirm_but_kyc_does_not() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let wallet = h.fund(&alice, "NGN", "20000").await;
        let request = electricity("45012345678", "1000");

        assert!(matches!(
            h.engine.confirm_bill_payment(&alice, "9999", &request).await,
            Err(LedgerError::InvalidPin)
        ));
        assert_eq!(history_len(&h, &wallet), 0);

        h.kyc
            .set_status(
                &alice,
                KycStatus {
                    has_record: true,
                    status: KycState::Pending,
                    tier: 0,
                },
            )
            .await;
        assert!(h.engine.confirm_bill_payment(&alice, PIN, &request).await.is_ok());
    }

    #[tokio::test]
    async fn balance_and_catalog_checks() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;

        assert!(matches!(
            h.engine.initiate_bill_payment(&alice, &electricity("45012345678", "1000")),
            Err(LedgerError::NotFound(_))
        ));

        h.fund(&alice, "NGN", "1000").await;
        let err = h
            .engine
            .initiate_bill_payment(&alice, &electricity("45012345678", "1000"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { required, .. } if required == m("1050")));

        let mut wrong_category = electricity("45012345678", "100");
        wrong_category.category = BillCategory::Betting;
        assert!(matches!(
            h.engine.initiate_bill_payment(&alice, &wrong_category),
            Err(LedgerError::Validation(_))
        ));

        let mut unknown = electricity("45012345678", "100");
        unknown.provider_code = "NEPA".to_string();
        assert!(matches!(
            h.engine.initiate_bill_payment(&alice, &unknown),
            Err(LedgerError::NotFound(_))
        ));

        let missing_plan = BillPaymentRequest {
            category: BillCategory::Data,
            provider_code: "MTN-DATA".to_string(),
            plan_code: None,
            amount: None,
            destination: BillDestination::Account {
                account_number: "08031234567".to_string(),
            },
        };
        assert!(matches!(
            h.engine.initiate_bill_payment(&alice, &missing_plan),
            Err(LedgerError::Validation(_))
        ));

        let mut no_amount = electricity("45012345678", "100");
        no_amount.amount = None;
        assert!(matches!(
            h.engine.initiate_bill_payment(&alice, &no_amount),
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn beneficiaries_are_owned_and_reusable() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        h.fund(&alice, "NGN", "20000").await;

        let meter = h
            .engine
            .add_beneficiary(
                &alice,
                NewBeneficiary {
                    category: BillCategory::Electricity,
                    provider_code: "ikedc".to_string(),
                    account_number: "45012345678".to_string(),
                    nickname: None,
                },
            )
            .unwrap();
        assert_eq!(meter.provider_code, "IKEDC");
        assert_eq!(meter.nickname, "Ikeja Electric 45012345678");

        let duplicate = h.engine.add_beneficiary(
            &alice,
            NewBeneficiary {
                category: BillCategory::Electricity,
                provider_code: "IKEDC".to_string(),
                account_number: "450 1234 5678".to_string(),
                nickname: Some("Home".to_string()),
            },
        );
        assert!(matches!(duplicate, Err(LedgerError::Validation(_))));
        assert_eq!(h.engine.list_beneficiaries(&alice).unwrap().len(), 1);
        assert!(h.engine.list_beneficiaries(&bob).unwrap().is_empty());

        let mut request = electricity("", "2000");
        request.destination = BillDestination::Beneficiary {
            beneficiary_id: meter.beneficiary_id.clone(),
        };
        let tx = h.engine.confirm_bill_payment(&alice, PIN, &request).await.unwrap();
        match &tx.metadata {
            TxMetadata::BillPayment(meta) => {
                assert_eq!(meta.beneficiary_id.as_deref(), Some(meter.beneficiary_id.as_str()));
            }
            other => panic!("unexpected metadata {other:?}"),
        }

        h.fund(&bob, "NGN", "20000").await;
        assert!(matches!(
            h.engine.initiate_bill_payment(&bob, &request),
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(matches!(
            h.engine.remove_beneficiary(&bob, &meter.beneficiary_id),
            Err(LedgerError::Unauthorized(_))
        ));

        h.engine.remove_beneficiary(&alice, &meter.beneficiary_id).unwrap();
        assert!(h.engine.list_beneficiaries(&alice).unwrap().is_empty());
        assert!(matches!(
            h.engine.remove_beneficiary(&alice, &meter.beneficiary_id),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn beneficiary_accounts_are_validated_on_save() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let result = h.engine.add_beneficiary(
            &alice,
            NewBeneficiary {
                category: BillCategory::Betting,
                provider_code: "BET9JA".to_string(),
                account_number: "ab".to_string(),
                nickname: None,
            },
        );
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }
}
