// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transfers and withdrawals.
//!
//! ## Channels
//!
//! | destination | tx type | settles |
//! |-------------|---------|---------|
//! | `rhionx_user` | transfer | sender debit, then recipient credit (second step) |
//! | `bank_account` | withdrawal | sender debit; rail tracked in `integration_status` |
//! | `mobile_money` | withdrawal | sender debit; rail tracked in `integration_status` |
//!
//! Crypto currencies may only go to another user. The sender is debited at
//! the custodian and the shadow wallet mirrors the result.
//!
//! ## Verification order
//!
//! ownership → pending → OTP consume → PIN → write transaction (re-check
//! pending, debit `amount + fee`, complete). The OTP is consumed before the
//! PIN is checked, so a wrong PIN burns the code and the caller has to ask
//! for a new one with [`SettlementEngine::resend_transfer_otp`].
//!
//! Crypto sources re-read the custodian account before the debit. A debit
//! the custodian refuses anyway marks the transfer `failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::crypto::mirror_in;
use super::{validate_amount, SettlementEngine};
use crate::currency;
use crate::error::{LedgerError, LedgerResult};
use crate::fees::OperationKind;
use crate::money::Money;
use crate::providers::{PaymentDestination, ProviderError, UserProfile};
use crate::reference::TRANSFER_PREFIX;
use crate::storage::repository::metadata::mask_account;
use crate::storage::repository::wallets::{debit_in, ensure_active};
use crate::storage::{
    AuditEvent, AuditEventType, Channel, DestinationSnapshot, IntegrationStatus, OtpPurpose,
    OtpStore, StoredTransaction, TransferMetadata, TxMetadata, TxType, WalletKind, WalletStore,
};

/// How an internal recipient is identified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum RecipientLookup {
    Email(String),
    UserId(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum TransferDestination {
    RhionxUser { recipient: RecipientLookup },
    BankAccount { payment_method_id: String },
    MobileMoney { payment_method_id: String },
}

impl TransferDestination {
    fn channel(&self) -> Channel {
        match self {
            TransferDestination::RhionxUser { .. } => Channel::RhionxUser,
            TransferDestination::BankAccount { .. } => Channel::BankAccount,
            TransferDestination::MobileMoney { .. } => Channel::MobileMoney,
        }
    }
}

/// Input for [`SettlementEngine::initiate_transfer`].
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub amount: Money,
    pub currency: String,
    pub destination: TransferDestination,
    pub narration: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiatedTransfer {
    pub transaction: StoredTransaction,
    pub otp_expires_at: DateTime<Utc>,
    pub otp_sent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedTransfer {
    pub transaction: StoredTransaction,
    /// The recipient's `-CR` leg for internal transfers.
    pub recipient_credit: Option<StoredTransaction>,
    /// Internal transfer whose recipient credit was queued for reconciliation.
    pub awaiting_reconciliation: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtpDispatch {
    pub reference: String,
    pub expires_at: DateTime<Utc>,
}

/// Funds the transfer is drawn from.
struct Source {
    wallet_id: String,
    available: Money,
    virtual_account_id: Option<String>,
}

const MAX_NARRATION_CHARS: usize = 140;

impl SettlementEngine {
    /// Validate a transfer, write it as `pending` and send the OTP.
    pub async fn initiate_transfer(
        &self,
        owner_id: &str,
        request: TransferRequest,
    ) -> LedgerResult<InitiatedTransfer> {
        let sender = self.require_transfer_gate(owner_id).await?;

        let currency = currency::normalize(&request.currency)?;
        validate_amount(request.amount, &currency)?;
        let is_crypto = currency::is_crypto(&currency);
        let channel = request.destination.channel();
        if is_crypto && channel != Channel::RhionxUser {
            return Err(LedgerError::validation(format!(
                "{currency} can only be sent to another user"
            )));
        }
        let narration = normalize_narration(request.narration)?;

        let fee = self
            .fees
            .compute_fee(request.amount, &currency, OperationKind::Transfer)?;
        self.fees
            .check_covers(request.amount, fee, &currency, OperationKind::Transfer)?;
        let total = request.amount.checked_add(fee)?;

        let source = self.transfer_source(owner_id, &currency, is_crypto).await?;
        if source.available < total {
            return Err(LedgerError::InsufficientFunds {
                available: source.available,
                required: total,
                currency,
            });
        }

        let destination = self
            .resolve_destination(&sender, &request.destination)
            .await?;
        if let (true, DestinationSnapshot::RhionxUser { user_id, .. }) = (is_crypto, &destination) {
            self.ensure_recipient_account(user_id, &currency).await?;
        }
        let tx_type = match channel {
            Channel::RhionxUser => TxType::Transfer,
            _ => TxType::Withdrawal,
        };
        let metadata = TransferMetadata {
            destination,
            narration,
            is_crypto,
            virtual_account_id: source.virtual_account_id.clone(),
            otp_sent: false,
            credit_status: None,
            credit_error: None,
            counterpart_tx_id: None,
            integration_status: None,
        };

        let transaction = self.with_fresh_reference(TRANSFER_PREFIX, |reference| {
            let tx = StoredTransaction::new_pending(
                uuid::Uuid::new_v4().to_string(),
                source.wallet_id.clone(),
                owner_id.to_string(),
                tx_type,
                request.amount,
                fee,
                currency.clone(),
                reference.clone(),
                channel,
                TxMetadata::Transfer(metadata.clone()),
            )
            .with_correlation(reference);
            self.db.write(|batch| batch.insert_transaction(&tx))?;
            Ok(tx)
        })?;
        self.invalidate_history(&[&transaction.wallet_id]);

        info!(
            reference = %transaction.reference,
            owner_id,
            channel = channel.as_str(),
            amount = %transaction.amount,
            fee = %transaction.fee,
            currency = %transaction.currency,
            "Transfer initiated"
        );
        self.audit(
            AuditEvent::new(AuditEventType::TransferInitiated)
                .with_user(owner_id)
                .with_resource("transaction", &transaction.reference),
        );

        let (dispatch, otp_sent) = self.issue_transfer_otp(&sender, &transaction).await?;
        let transaction = if otp_sent {
            self.flag_otp_sent(&transaction)
        } else {
            transaction
        };

        Ok(InitiatedTransfer {
            transaction,
            otp_expires_at: dispatch.expires_at,
            otp_sent,
        })
    }

    async fn transfer_source(
        &self,
        owner_id: &str,
        currency: &str,
        is_crypto: bool,
    ) -> LedgerResult<Source> {
        if is_crypto {
            let account = self.usable_account(owner_id, currency).await?;
            let wallet = self.db.write(|batch| mirror_in(batch, &account))?;
            ensure_active(&wallet)?;
            return Ok(Source {
                wallet_id: wallet.wallet_id,
                available: account.available_balance,
                virtual_account_id: Some(account.account_id),
            });
        }

        let wallet = WalletStore::new(&self.db)
            .find(owner_id, currency, WalletKind::Fiat)?
            .ok_or_else(|| LedgerError::not_found(format!("{currency} wallet")))?;
        ensure_active(&wallet)?;
        Ok(Source {
            available: wallet.available_balance(),
            wallet_id: wallet.wallet_id,
            virtual_account_id: None,
        })
    }

    /// The recipient of a crypto transfer must hold an active virtual
    /// account in that currency before anything is debited.
    async fn ensure_recipient_account(&self, recipient_id: &str, currency: &str) -> LedgerResult<()> {
        let account = self
            .providers
            .custody
            .account(recipient_id, currency)
            .await?
            .ok_or_else(|| {
                LedgerError::not_found(format!("Recipient {currency} virtual account"))
            })?;
        if !account.active {
            return Err(LedgerError::validation(format!(
                "Recipient {currency} virtual account is inactive"
            )));
        }
        Ok(())
    }

    /// Re-read the sender's custodian account right before the debit.
    async fn recheck_crypto_source(
        &self,
        owner_id: &str,
        account_id: &str,
        currency: &str,
        total: Money,
    ) -> LedgerResult<()> {
        let account = self.usable_account(owner_id, currency).await?;
        if account.account_id != account_id {
            return Err(LedgerError::validation(format!(
                "{currency} virtual account changed since the transfer was initiated"
            )));
        }
        let wallet = self.db.write(|batch| mirror_in(batch, &account))?;
        ensure_active(&wallet)?;
        if account.available_balance < total {
            return Err(LedgerError::InsufficientFunds {
                available: account.available_balance,
                required: total,
                currency: currency.to_string(),
            });
        }
        Ok(())
    }

    /// Terminal failure: the custodian refused the debit.
    fn fail_transfer(&self, tx: &StoredTransaction, reason: String) -> LedgerError {
        let marked = self.db.write(|batch| -> LedgerResult<bool> {
            let Some(mut current) = batch.transaction(&tx.tx_id)? else {
                return Ok(false);
            };
            if current.ensure_pending().is_err() {
                return Ok(false);
            }
            current.mark_failed();
            batch.update_transaction(&current)?;
            Ok(true)
        });
        match marked {
            Ok(true) => {
                self.invalidate_history(&[&tx.wallet_id]);
                warn!(reference = %tx.reference, reason = %reason, "Transfer failed at the custodian");
                self.audit(
                    AuditEvent::new(AuditEventType::TransferFailed)
                        .with_user(&tx.owner_id)
                        .with_resource("transaction", &tx.reference)
                        .failed(reason.clone()),
                );
            }
            Ok(false) => {}
            Err(e) => {
                warn!(reference = %tx.reference, error = %e, "Could not mark transfer failed");
            }
        }
        LedgerError::Provider(ProviderError::Rejected(reason))
    }

    async fn resolve_destination(
        &self,
        sender: &UserProfile,
        destination: &TransferDestination,
    ) -> LedgerResult<DestinationSnapshot> {
        match destination {
            TransferDestination::RhionxUser { recipient } => {
                let found = match recipient {
                    RecipientLookup::Email(email) => {
                        let email = email.trim();
                        if email.is_empty() {
                            return Err(LedgerError::validation("Recipient email is required"));
                        }
                        if email.eq_ignore_ascii_case(&sender.email) {
                            return Err(LedgerError::validation("Cannot transfer to yourself"));
                        }
                        self.providers.identity.find_by_email(email).await?
                    }
                    RecipientLookup::UserId(user_id) => {
                        self.providers.identity.user(user_id.trim()).await?
                    }
                };
                let recipient = found.ok_or_else(|| LedgerError::not_found("Recipient"))?;
                if recipient.user_id == sender.user_id {
                    return Err(LedgerError::validation("Cannot transfer to yourself"));
                }
                Ok(DestinationSnapshot::RhionxUser {
                    user_id: recipient.user_id,
                    email: recipient.email,
                    display_name: recipient.display_name,
                })
            }
            TransferDestination::BankAccount { payment_method_id }
            | TransferDestination::MobileMoney { payment_method_id } => {
                let resolved = self
                    .providers
                    .vault
                    .resolve(&sender.user_id, payment_method_id)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::not_found(format!("Payment method {payment_method_id}"))
                    })?;
                match (destination, resolved) {
                    (
                        TransferDestination::BankAccount { .. },
                        PaymentDestination::Bank {
                            bank_name,
                            account_number,
                            account_name,
                        },
                    ) => Ok(DestinationSnapshot::BankAccount {
                        payment_method_id: payment_method_id.clone(),
                        bank_name,
                        account_name,
                        account_number_masked: mask_account(&account_number),
                    }),
                    (
                        TransferDestination::MobileMoney { .. },
                        PaymentDestination::MobileMoney {
                            provider,
                            phone_number,
                            account_name,
                        },
                    ) => Ok(DestinationSnapshot::MobileMoney {
                        payment_method_id: payment_method_id.clone(),
                        provider,
                        account_name,
                        phone_number_masked: mask_account(&phone_number),
                    }),
                    _ => Err(LedgerError::validation(format!(
                        "Payment method {payment_method_id} does not match the {} channel",
                        destination.channel().as_str()
                    ))),
                }
            }
        }
    }

    /// Issue a fresh OTP scoped to the transfer and try to deliver it.
    async fn issue_transfer_otp(
        &self,
        sender: &UserProfile,
        transaction: &StoredTransaction,
    ) -> LedgerResult<(OtpDispatch, bool)> {
        let issued = OtpStore::new(&self.db).issue(
            &sender.user_id,
            OtpPurpose::Transfer,
            &transaction.reference,
            self.otp_ttl,
        )?;
        let dispatch = OtpDispatch {
            reference: transaction.reference.clone(),
            expires_at: issued.expires_at,
        };
        match self
            .providers
            .notifier
            .send_otp(sender, &issued.code, OtpPurpose::Transfer, &transaction.reference)
            .await
        {
            Ok(()) => Ok((dispatch, true)),
            Err(e) => {
                warn!(reference = %transaction.reference, error = %e, "Transfer OTP not delivered");
                Ok((dispatch, false))
            }
        }
    }

    fn flag_otp_sent(&self, transaction: &StoredTransaction) -> StoredTransaction {
        let updated = self.db.write(|batch| {
            let mut tx = batch.transaction(&transaction.tx_id)?.ok_or_else(|| {
                LedgerError::not_found(format!("Transaction {}", transaction.tx_id))
            })?;
            if let TxMetadata::Transfer(meta) = &mut tx.metadata {
                meta.otp_sent = true;
            }
            batch.update_transaction(&tx)?;
            Ok::<_, LedgerError>(tx)
        });
        match updated {
            Ok(tx) => tx,
            Err(e) => {
                warn!(reference = %transaction.reference, error = %e, "Could not flag OTP as sent");
                transaction.clone()
            }
        }
    }

    /// Send a new OTP for a pending transfer. Earlier codes stop working.
    pub async fn resend_transfer_otp(&self, owner_id: &str, tx_id: &str) -> LedgerResult<OtpDispatch> {
        let tx = self.owned_transaction(owner_id, tx_id)?;
        transfer_metadata(&tx)?;
        tx.ensure_pending()?;
        let sender = self.require_user(owner_id).await?;

        let (dispatch, sent) = self.issue_transfer_otp(&sender, &tx).await?;
        if !sent {
            return Err(LedgerError::Provider(ProviderError::Unavailable(
                "OTP delivery failed".to_string(),
            )));
        }
        self.flag_otp_sent(&tx);
        info!(reference = %tx.reference, owner_id, "Transfer OTP re-sent");
        Ok(dispatch)
    }

    /// Verify OTP and PIN, then debit the sender and settle.
    pub async fn verify_transfer(
        &self,
        owner_id: &str,
        tx_id: &str,
        otp: &str,
        pin: &str,
    ) -> LedgerResult<CompletedTransfer> {
        let tx = self.owned_transaction(owner_id, tx_id)?;
        let meta = transfer_metadata(&tx)?.clone();
        tx.ensure_pending()?;

        let consumed = OtpStore::new(&self.db).consume(
            owner_id,
            OtpPurpose::Transfer,
            &tx.reference,
            otp.trim(),
        )?;
        if !consumed {
            self.audit(
                AuditEvent::new(AuditEventType::InvalidOtp)
                    .with_user(owner_id)
                    .with_resource("transaction", &tx.reference)
                    .failed("OTP rejected"),
            );
            return Err(LedgerError::InvalidOrExpiredOtp);
        }

        let sender = self.require_user(owner_id).await?;
        self.check_pin(&sender, pin, &tx.reference).await?;

        let total = tx.total()?;
        let external = !matches!(meta.destination, DestinationSnapshot::RhionxUser { .. });
        let complete = |batch: &crate::storage::LedgerBatch<'_>| -> LedgerResult<StoredTransaction> {
            let mut current = batch
                .transaction(tx_id)?
                .ok_or_else(|| LedgerError::not_found(format!("Transaction {tx_id}")))?;
            current.ensure_pending()?;
            current.mark_completed();
            if external {
                if let TxMetadata::Transfer(meta) = &mut current.metadata {
                    meta.integration_status = Some(IntegrationStatus::Pending);
                }
            }
            batch.update_transaction(&current)?;
            Ok(current)
        };

        let completed = match (&meta.virtual_account_id, meta.is_crypto) {
            (Some(account_id), true) => {
                self.recheck_crypto_source(owner_id, account_id, &tx.currency, total)
                    .await?;
                let settled = self
                    .debit_custody_then(account_id, total, &tx.reference, |debited| {
                        self.db.write(|batch| {
                            mirror_in(batch, debited)?;
                            complete(batch)
                        })
                    })
                    .await;
                match settled {
                    Err(LedgerError::Provider(ProviderError::Rejected(reason))) => {
                        return Err(self.fail_transfer(&tx, reason));
                    }
                    other => other?,
                }
            }
            _ => self.db.write(|batch| {
                let done = complete(batch)?;
                debit_in(batch, &done.wallet_id, total)?;
                Ok::<_, LedgerError>(done)
            })?,
        };
        self.invalidate_history(&[&completed.wallet_id]);

        info!(
            reference = %completed.reference,
            owner_id,
            debited = %total,
            channel = completed.channel.as_str(),
            "Transfer completed"
        );
        self.audit(
            AuditEvent::new(AuditEventType::TransferCompleted)
                .with_user(owner_id)
                .with_resource("transaction", &completed.reference)
                .with_details(serde_json::json!({ "debited": total.to_string() })),
        );

        if external {
            return Ok(CompletedTransfer {
                transaction: completed,
                recipient_credit: None,
                awaiting_reconciliation: false,
            });
        }

        let recipient_credit = self.settle_recipient(&completed, &sender).await?;
        let transaction = self
            .db
            .snapshot()?
            .transaction(tx_id)?
            .unwrap_or(completed);
        Ok(CompletedTransfer {
            awaiting_reconciliation: recipient_credit.is_none(),
            transaction,
            recipient_credit,
        })
    }

    /// Record progress reported by an external rail.
    ///
    /// Applies to completed withdrawals and bill payments. Terminal rail
    /// states are final.
    pub fn update_integration_status(
        &self,
        reference: &str,
        status: IntegrationStatus,
    ) -> LedgerResult<StoredTransaction> {
        let updated = self.db.write(|batch| {
            let mut tx = batch
                .transaction_by_reference(reference)?
                .ok_or_else(|| LedgerError::not_found(format!("Transaction {reference}")))?;
            let slot = match &mut tx.metadata {
                TxMetadata::Transfer(meta) => meta.integration_status.as_mut(),
                TxMetadata::BillPayment(meta) => Some(&mut meta.integration_status),
                _ => None,
            };
            let Some(current) = slot else {
                return Err(LedgerError::validation(format!(
                    "Transaction {reference} is not tracked on an external rail"
                )));
            };
            if current.is_terminal() && *current != status {
                return Err(LedgerError::validation(format!(
                    "Rail status of {reference} is already {}",
                    current.as_str()
                )));
            }
            *current = status;
            tx.updated_at = Utc::now();
            batch.update_transaction(&tx)?;
            Ok(tx)
        })?;
        self.invalidate_history(&[&updated.wallet_id]);
        info!(reference, status = status.as_str(), "Integration status updated");
        Ok(updated)
    }
}

fn transfer_metadata(tx: &StoredTransaction) -> LedgerResult<&TransferMetadata> {
    match &tx.metadata {
        TxMetadata::Transfer(meta) => Ok(meta),
        _ => Err(LedgerError::validation(format!(
            "Transaction {} is not a transfer",
            tx.reference
        ))),
    }
}

fn normalize_narration(raw: Option<String>) -> LedgerResult<Option<String>> {
    let Some(text) = raw.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if text.chars().count() > MAX_NARRATION_CHARS {
        return Err(LedgerError::validation(format!(
            "Narration is limited to {MAX_NARRATION_CHARS} characters"
        )));
    }
    Ok(Some(text))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::providers::{CryptoBalanceProvider, IdentityProvider, KycState, KycStatus};
    use crate::settlement::testkit::{m, Harness, PIN};
    use crate::storage::{CreditStatus, ReconciliationRepository, TxStatus};

    fn to_email(amount: &str, email: &str) -> TransferRequest {
        TransferRequest {
            amount: m(amount),
            currency: "NGN".to_string(),
            destination: TransferDestination::RhionxUser {
                recipient: RecipientLookup::Email(email.to_string()),
            },
            narration: Some("rent".to_string()),
        }
    }

    fn usdt_to(amount: &str, user_id: &str) -> TransferRequest {
        TransferRequest {
            amount: m(amount),
            currency: "USDT".to_string(),
            destination: TransferDestination::RhionxUser {
                recipient: RecipientLookup::UserId(user_id.to_string()),
            },
            narration: None,
        }
    }

    async fn otp_for(h: &Harness, tx: &StoredTransaction) -> String {
        h.notifier.last_otp_for(&tx.reference).await.unwrap()
    }

    #[tokio::test]
    async fn internal_transfer_moves_amount_and_fee() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        let alice_wallet = h.fund(&alice, "NGN", "20000").await;

        let initiated = h
            .engine
            .initiate_transfer(&alice, to_email("10000", "bob@example.com"))
            .await
            .unwrap();
        let tx = initiated.transaction;
        assert!(initiated.otp_sent);
        assert_eq!(tx.status, TxStatus::Pending);
        assert_eq!(tx.fee, m("20"));
        assert_eq!(tx.tx_type, TxType::Transfer);
        assert_eq!(tx.correlation_ref.as_deref(), Some(tx.reference.as_str()));

        let otp = otp_for(&h, &tx).await;
        let done = h
            .engine
            .verify_transfer(&alice, &tx.tx_id, &otp, PIN)
            .await
            .unwrap();
        assert_eq!(done.transaction.status, TxStatus::Completed);
        assert!(!done.awaiting_reconciliation);

        let credit = done.recipient_credit.unwrap();
        assert_eq!(credit.reference, format!("{}-CR", tx.reference));
        assert_eq!(credit.owner_id, bob);
        assert_eq!(credit.amount, m("10000"));
        assert_eq!(credit.status, TxStatus::Completed);
        assert_eq!(credit.tx_type, TxType::Deposit);

        let TxMetadata::Transfer(meta) = &done.transaction.metadata else {
            panic!("transfer metadata expected");
        };
        assert_eq!(meta.credit_status, Some(CreditStatus::Completed));
        assert_eq!(meta.counterpart_tx_id.as_deref(), Some(credit.tx_id.as_str()));

        let store = WalletStore::new(h.engine.database());
        assert_eq!(store.get(&alice_wallet).unwrap().balance, m("9980"));
        assert_eq!(store.get(&credit.wallet_id).unwrap().balance, m("10000"));
    }

    #[tokio::test]
    async fn self_transfer_is_rejected_before_anything_is_written() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let wallet = h.fund(&alice, "NGN", "20000").await;

        let err = h
            .engine
            .initiate_transfer(&alice, to_email("1000", "ALICE@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let by_id = TransferRequest {
            destination: TransferDestination::RhionxUser {
                recipient: RecipientLookup::UserId(alice.clone()),
            },
            ..to_email("1000", "unused@example.com")
        };
        assert!(matches!(
            h.engine.initiate_transfer(&alice, by_id).await,
            Err(LedgerError::Validation(_))
        ));

        let history = h.engine.wallet_history(&alice, &wallet, None, 10).unwrap();
        assert!(history.transactions.is_empty());
        assert!(h.notifier.sent_otps().await.is_empty());
    }

    #[tokio::test]
    async fn gate_requires_kyc_and_pin() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        h.user("bob").await;
        h.fund(&alice, "NGN", "20000").await;

        h.kyc
            .set_status(
                &alice,
                KycStatus {
                    has_record: true,
                    status: KycState::Pending,
                    tier: 1,
                },
            )
            .await;
        let err = h
            .engine
            .initiate_transfer(&alice, to_email("1000", "bob@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::KycNotComplete { ref status } if status == "pending"));

        h.verify_kyc(&alice).await;
        h.identity.set_pin_hash(&alice, None).await;
        assert!(matches!(
            h.engine
                .initiate_transfer(&alice, to_email("1000", "bob@example.com"))
                .await,
            Err(LedgerError::PinNotSet)
        ));
    }

    #[tokio::test]
    async fn insufficient_funds_counts_the_fee() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        h.user("bob").await;
        h.fund(&alice, "NGN", "10000").await;

        let err = h
            .engine
            .initiate_transfer(&alice, to_email("10000", "bob@example.com"))
            .await
            .unwrap_err();
        match err {
            LedgerError::InsufficientFunds {
                available,
                required,
                ..
            } => {
                assert_eq!(available, m("10000"));
                assert_eq!(required, m("10020"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_source_wallet_and_unknown_recipient() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        h.user("bob").await;

        assert!(matches!(
            h.engine
                .initiate_transfer(&alice, to_email("100", "bob@example.com"))
                .await,
            Err(LedgerError::NotFound(_))
        ));

        h.fund(&alice, "NGN", "5000").await;
        assert!(matches!(
            h.engine
                .initiate_transfer(&alice, to_email("100", "nobody@example.com"))
                .await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn wrong_otp_and_reused_otp_are_rejected() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        h.user("bob").await;
        h.fund(&alice, "NGN", "20000").await;
        let tx = h
            .engine
            .initiate_transfer(&alice, to_email("1000", "bob@example.com"))
            .await
            .unwrap()
            .transaction;
        let otp = otp_for(&h, &tx).await;
        let wrong = if otp == "000000" { "111111" } else { "000000" };

        assert!(matches!(
            h.engine.verify_transfer(&alice, &tx.tx_id, wrong, PIN).await,
            Err(LedgerError::InvalidOrExpiredOtp)
        ));
        h.engine
            .verify_transfer(&alice, &tx.tx_id, &otp, PIN)
            .await
            .unwrap();
        assert!(matches!(
            h.engine.verify_transfer(&alice, &tx.tx_id, &otp, PIN).await,
            Err(LedgerError::StateConflict { .. })
        ));
    }

    #[tokio::test]
    async fn wrong_pin_burns_the_otp_until_resent() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        h.user("bob").await;
        h.fund(&alice, "NGN", "20000").await;
        let tx = h
            .engine
            .initiate_transfer(&alice, to_email("1000", "bob@example.com"))
            .await
            .unwrap()
            .transaction;
        let otp = otp_for(&h, &tx).await;

        assert!(matches!(
            h.engine.verify_transfer(&alice, &tx.tx_id, &otp, "9999").await,
            Err(LedgerError::InvalidPin)
        ));
        assert!(matches!(
            h.engine.verify_transfer(&alice, &tx.tx_id, &otp, PIN).await,
            Err(LedgerError::InvalidOrExpiredOtp)
        ));

        h.engine.resend_transfer_otp(&alice, &tx.tx_id).await.unwrap();
        let fresh = otp_for(&h, &tx).await;
        let done = h
            .engine
            .verify_transfer(&alice, &tx.tx_id, &fresh, PIN)
            .await
            .unwrap();
        assert_eq!(done.transaction.status, TxStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_verifies_settle_once() {
        let h = Arc::new(Harness::new().await);
        let alice = h.user("alice").await;
        h.user("bob").await;
        let wallet = h.fund(&alice, "NGN", "20000").await;
        let tx = h
            .engine
            .initiate_transfer(&alice, to_email("10000", "bob@example.com"))
            .await
            .unwrap()
            .transaction;
        let otp = otp_for(&h, &tx).await;

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let h = Arc::clone(&h);
                let alice = alice.clone();
                let tx_id = tx.tx_id.clone();
                let otp = otp.clone();
                tokio::spawn(async move {
                    h.engine.verify_transfer(&alice, &tx_id, &otp, PIN).await
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(LedgerError::InvalidOrExpiredOtp) | Err(LedgerError::StateConflict { .. }) => {}
                Err(other) => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(successes, 1);
        let balance = WalletStore::new(h.engine.database())
            .get(&wallet)
            .unwrap()
            .balance;
        assert_eq!(balance, m("9980"));
    }

    #[tokio::test]
    async fn verify_rechecks_the_balance() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        h.user("bob").await;
        let wallet = h.fund(&alice, "NGN", "20000").await;
        let tx = h
            .engine
            .initiate_transfer(&alice, to_email("15000", "bob@example.com"))
            .await
            .unwrap()
            .transaction;

        // Funds leave through another path while the transfer is pending.
        WalletStore::new(h.engine.database())
            .debit(&wallet, m("10000"))
            .unwrap();

        let otp = otp_for(&h, &tx).await;
        assert!(matches!(
            h.engine.verify_transfer(&alice, &tx.tx_id, &otp, PIN).await,
            Err(LedgerError::InsufficientFunds { .. })
        ));
        let still = h.engine.database().snapshot().unwrap().transaction(&tx.tx_id).unwrap().unwrap();
        assert_eq!(still.status, TxStatus::Pending);
    }

    #[tokio::test]
    async fn crypto_verify_rechecks_the_custodian_balance() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        let alice_va = h.custody.open_account(&alice, "USDT", "tron", m("100")).await;
        h.custody.open_account(&bob, "USDT", "tron", m("0")).await;
        let tx = h
            .engine
            .initiate_transfer(&alice, usdt_to("50", &bob))
            .await
            .unwrap()
            .transaction;

        // The custodian balance shrinks while the transfer is pending.
        h.custody
            .debit(&alice_va.account_id, m("80"), "ONCHAIN-OUT")
            .await
            .unwrap();

        let otp = otp_for(&h, &tx).await;
        match h.engine.verify_transfer(&alice, &tx.tx_id, &otp, PIN).await {
            Err(LedgerError::InsufficientFunds {
                available,
                required,
                currency,
            }) => {
                assert_eq!(available, m("20"));
                assert_eq!(required, m("51"));
                assert_eq!(currency, "USDT");
            }
            other => panic!("unexpected {other:?}"),
        }
        let still = h.engine.database().snapshot().unwrap().transaction(&tx.tx_id).unwrap().unwrap();
        assert_eq!(still.status, TxStatus::Pending);
        assert_eq!(h.custody.get(&alice_va.account_id).await.unwrap().account_balance, m("20"));
        assert_eq!(
            WalletStore::new(h.engine.database()).get(&tx.wallet_id).unwrap().balance,
            m("20")
        );
    }

    #[tokio::test]
    async fn inactive_crypto_wallet_cannot_send() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        let alice_va = h.custody.open_account(&alice, "USDT", "tron", m("100")).await;
        h.custody.open_account(&bob, "USDT", "tron", m("0")).await;
        let shadow = h.engine.crypto_balance(&alice, "USDT").await.unwrap().wallet;
        h.engine.deactivate_wallet(&alice, &shadow.wallet_id).unwrap();

        assert!(matches!(
            h.engine.initiate_transfer(&alice, usdt_to("50", &bob)).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(h.notifier.sent_otps().await.is_empty());

        // Deactivated after initiation: verify refuses before touching the custodian.
        h.engine.reactivate_wallet(&alice, &shadow.wallet_id).unwrap();
        let tx = h
            .engine
            .initiate_transfer(&alice, usdt_to("50", &bob))
            .await
            .unwrap()
            .transaction;
        h.engine.deactivate_wallet(&alice, &shadow.wallet_id).unwrap();
        let otp = otp_for(&h, &tx).await;
        assert!(matches!(
            h.engine.verify_transfer(&alice, &tx.tx_id, &otp, PIN).await,
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(h.custody.get(&alice_va.account_id).await.unwrap().account_balance, m("100"));
    }

    #[tokio::test]
    async fn crypto_recipient_needs_a_virtual_account() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        let alice_va = h.custody.open_account(&alice, "USDT", "tron", m("100")).await;

        assert!(matches!(
            h.engine.initiate_transfer(&alice, usdt_to("50", &bob)).await,
            Err(LedgerError::NotFound(_))
        ));

        assert!(h.notifier.sent_otps().await.is_empty());
        assert_eq!(h.custody.get(&alice_va.account_id).await.unwrap().account_balance, m("100"));
        assert!(ReconciliationRepository::new(h.engine.database())
            .list_unresolved()
            .unwrap()
            .is_empty());

        // Once bob opens an account the same transfer goes through.
        h.custody.open_account(&bob, "USDT", "tron", m("0")).await;
        assert!(h.engine.initiate_transfer(&alice, usdt_to("50", &bob)).await.is_ok());
    }

    #[tokio::test]
    async fn refused_custodian_debit_fails_the_transfer() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        let alice_va = h.custody.open_account(&alice, "USDT", "tron", m("100")).await;
        h.custody.open_account(&bob, "USDT", "tron", m("0")).await;
        let tx = h
            .engine
            .initiate_transfer(&alice, usdt_to("50", &bob))
            .await
            .unwrap()
            .transaction;

        h.custody.set_refusing_debits(true);
        let otp = otp_for(&h, &tx).await;
        assert!(matches!(
            h.engine.verify_transfer(&alice, &tx.tx_id, &otp, PIN).await,
            Err(LedgerError::Provider(ProviderError::Rejected(_)))
        ));

        let failed = h.engine.database().snapshot().unwrap().transaction(&tx.tx_id).unwrap().unwrap();
        assert_eq!(failed.status, TxStatus::Failed);
        assert_eq!(h.custody.get(&alice_va.account_id).await.unwrap().account_balance, m("100"));

        // Terminal: no retry, no receipt.
        h.custody.set_refusing_debits(false);
        assert!(matches!(
            h.engine.verify_transfer(&alice, &tx.tx_id, &otp, PIN).await,
            Err(LedgerError::StateConflict {
                status: TxStatus::Failed,
                ..
            })
        ));
        assert!(matches!(
            h.engine.get_receipt(&alice, &tx.reference),
            Err(LedgerError::StateConflict {
                status: TxStatus::Failed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn unqueued_partial_settlement_still_reports_the_debit() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        h.fund(&alice, "NGN", "20000").await;
        let tx = h
            .engine
            .initiate_transfer(&alice, to_email("1000", "bob@example.com"))
            .await
            .unwrap()
            .transaction;

        // A sender leg the store has never seen: both the credit and the
        // reconciliation write fail.
        let mut orphan = tx.clone();
        orphan.tx_id = "tx-orphan".to_string();
        orphan.reference = "TRFORPHAN".to_string();
        let sender = h.identity.user(&alice).await.unwrap().unwrap();

        let credit = h.engine.settle_recipient(&orphan, &sender).await.unwrap();
        assert!(credit.is_none());
        assert!(ReconciliationRepository::new(h.engine.database())
            .list_unresolved()
            .unwrap()
            .is_empty());
        assert!(WalletStore::new(h.engine.database())
            .find(&bob, "NGN", WalletKind::Fiat)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn failed_recipient_credit_is_reconciled_later() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        let alice_wallet = h.fund(&alice, "NGN", "20000").await;
        let bob_wallet = h.fund(&bob, "NGN", "5000").await;
        let wallets = WalletStore::new(h.engine.database());
        wallets.deactivate(&bob_wallet).unwrap();

        let tx = h
            .engine
            .initiate_transfer(&alice, to_email("10000", "bob@example.com"))
            .await
            .unwrap()
            .transaction;
        let otp = otp_for(&h, &tx).await;
        let done = h
            .engine
            .verify_transfer(&alice, &tx.tx_id, &otp, PIN)
            .await
            .unwrap();

        assert!(done.awaiting_reconciliation);
        assert!(done.recipient_credit.is_none());
        assert_eq!(done.transaction.status, TxStatus::Completed);
        let TxMetadata::Transfer(meta) = &done.transaction.metadata else {
            panic!("transfer metadata expected");
        };
        assert_eq!(meta.credit_status, Some(CreditStatus::Failed));
        assert!(meta.credit_error.is_some());
        assert_eq!(wallets.get(&alice_wallet).unwrap().balance, m("9980"));
        assert_eq!(wallets.get(&bob_wallet).unwrap().balance, m("5000"));

        let queue = ReconciliationRepository::new(h.engine.database());
        let events = queue.list_unresolved().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sender_reference, tx.reference);

        // Still inactive: the retry fails and is counted.
        let report = h.engine.reconcile_pending().await.unwrap();
        assert_eq!(report.still_failing, 1);
        assert_eq!(queue.list_unresolved().unwrap()[0].attempts, 1);

        wallets.reactivate(&bob_wallet).unwrap();
        let report = h.engine.reconcile_pending().await.unwrap();
        assert_eq!(report.resolved, 1);
        assert!(queue.list_unresolved().unwrap().is_empty());
        assert_eq!(wallets.get(&bob_wallet).unwrap().balance, m("15000"));

        // A second run has nothing left to do and credits nothing twice.
        let report = h.engine.reconcile_pending().await.unwrap();
        assert_eq!(report.attempted, 0);
        assert!(h.engine.retry_reconciliation(&events[0].event_id).await.unwrap());
        assert_eq!(wallets.get(&bob_wallet).unwrap().balance, m("15000"));

        let sender = h.engine.database().snapshot().unwrap().transaction(&tx.tx_id).unwrap().unwrap();
        let TxMetadata::Transfer(meta) = &sender.metadata else {
            panic!("transfer metadata expected");
        };
        assert_eq!(meta.credit_status, Some(CreditStatus::Completed));
    }

    #[tokio::test]
    async fn bank_withdrawal_masks_the_account_and_tracks_the_rail() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let wallet = h.fund(&alice, "NGN", "20000").await;
        h.vault
            .insert(
                &alice,
                "pm-bank",
                PaymentDestination::Bank {
                    bank_name: "GTBank".to_string(),
                    account_number: "0123456789".to_string(),
                    account_name: "Alice A".to_string(),
                },
            )
            .await;

        let request = TransferRequest {
            amount: m("5000"),
            currency: "NGN".to_string(),
            destination: TransferDestination::BankAccount {
                payment_method_id: "pm-bank".to_string(),
            },
            narration: None,
        };
        let tx = h.engine.initiate_transfer(&alice, request).await.unwrap().transaction;
        assert_eq!(tx.tx_type, TxType::Withdrawal);
        let TxMetadata::Transfer(meta) = &tx.metadata else {
            panic!("transfer metadata expected");
        };
        assert_eq!(
            meta.destination,
            DestinationSnapshot::BankAccount {
                payment_method_id: "pm-bank".to_string(),
                bank_name: "GTBank".to_string(),
                account_name: "Alice A".to_string(),
                account_number_masked: "******6789".to_string(),
            }
        );

        let otp = otp_for(&h, &tx).await;
        let done = h.engine.verify_transfer(&alice, &tx.tx_id, &otp, PIN).await.unwrap();
        assert!(done.recipient_credit.is_none());
        assert_eq!(
            WalletStore::new(h.engine.database()).get(&wallet).unwrap().balance,
            m("14980")
        );

        let updated = h
            .engine
            .update_integration_status(&tx.reference, IntegrationStatus::Completed)
            .unwrap();
        let TxMetadata::Transfer(meta) = &updated.metadata else {
            panic!("transfer metadata expected");
        };
        assert_eq!(meta.integration_status, Some(IntegrationStatus::Completed));
        assert!(matches!(
            h.engine
                .update_integration_status(&tx.reference, IntegrationStatus::Failed),
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn payment_method_must_match_the_channel() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        h.fund(&alice, "NGN", "20000").await;
        h.vault
            .insert(
                &alice,
                "pm-momo",
                PaymentDestination::MobileMoney {
                    provider: "MTN MoMo".to_string(),
                    phone_number: "08031234567".to_string(),
                    account_name: "Alice A".to_string(),
                },
            )
            .await;

        let request = TransferRequest {
            amount: m("5000"),
            currency: "NGN".to_string(),
            destination: TransferDestination::BankAccount {
                payment_method_id: "pm-momo".to_string(),
            },
            narration: None,
        };
        assert!(matches!(
            h.engine.initiate_transfer(&alice, request).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn crypto_transfer_debits_the_custodian_and_credits_the_recipient() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        let alice_va = h.custody.open_account(&alice, "USDT", "tron", m("100")).await;
        let bob_va = h.custody.open_account(&bob, "USDT", "tron", m("5")).await;

        let request = TransferRequest {
            amount: m("50"),
            currency: "USDT".to_string(),
            destination: TransferDestination::RhionxUser {
                recipient: RecipientLookup::UserId(bob.clone()),
            },
            narration: None,
        };
        let tx = h.engine.initiate_transfer(&alice, request).await.unwrap().transaction;
        assert_eq!(tx.fee, m("1"));

        let otp = otp_for(&h, &tx).await;
        let done = h.engine.verify_transfer(&alice, &tx.tx_id, &otp, PIN).await.unwrap();
        assert!(!done.awaiting_reconciliation);

        assert_eq!(h.custody.get(&alice_va.account_id).await.unwrap().account_balance, m("49"));
        assert_eq!(h.custody.get(&bob_va.account_id).await.unwrap().account_balance, m("55"));

        let wallets = WalletStore::new(h.engine.database());
        assert_eq!(wallets.get(&tx.wallet_id).unwrap().balance, m("49"));
        let credit = done.recipient_credit.unwrap();
        assert_eq!(wallets.get(&credit.wallet_id).unwrap().balance, m("55"));
        assert_eq!(wallets.get(&credit.wallet_id).unwrap().kind, WalletKind::Crypto);
    }

    #[tokio::test]
    async fn crypto_cannot_leave_to_external_rails() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        h.custody.open_account(&alice, "USDT", "tron", m("100")).await;

        let request = TransferRequest {
            amount: m("50"),
            currency: "USDT".to_string(),
            destination: TransferDestination::BankAccount {
                payment_method_id: "pm".to_string(),
            },
            narration: None,
        };
        assert!(matches!(
            h.engine.initiate_transfer(&alice, request).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn crypto_recipient_credit_failure_is_not_applied_twice() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        h.custody.open_account(&alice, "USDT", "tron", m("100")).await;
        let bob_va = h.custody.open_account(&bob, "USDT", "tron", m("0")).await;
        h.custody.set_failing_credits(true);

        let request = TransferRequest {
            amount: m("10"),
            currency: "USDT".to_string(),
            destination: TransferDestination::RhionxUser {
                recipient: RecipientLookup::UserId(bob.clone()),
            },
            narration: None,
        };
        let tx = h.engine.initiate_transfer(&alice, request).await.unwrap().transaction;
        let otp = otp_for(&h, &tx).await;
        let done = h.engine.verify_transfer(&alice, &tx.tx_id, &otp, PIN).await.unwrap();
        assert!(done.awaiting_reconciliation);

        h.custody.set_failing_credits(false);
        let report = h.engine.reconcile_pending().await.unwrap();
        assert_eq!(report.resolved, 1);
        assert_eq!(h.custody.get(&bob_va.account_id).await.unwrap().account_balance, m("10"));

        h.engine.reconcile_pending().await.unwrap();
        assert_eq!(h.custody.get(&bob_va.account_id).await.unwrap().account_balance, m("10"));
    }
}
