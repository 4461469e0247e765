// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fiat-to-fiat currency conversion.
//!
//! A conversion is two legs sharing one correlation reference:
//!
//! - debit leg `CNV...-DR`: withdrawal of `from_amount` on the source wallet
//! - credit leg `CNV...`: deposit of `to_amount` on the destination wallet,
//!   carrying the conversion fee in the destination currency
//!
//! Both legs are written `pending` by initiate and completed together by
//! confirm in one write transaction, or not at all.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use super::{validate_amount, SettlementEngine};
use crate::currency;
use crate::error::{LedgerError, LedgerResult};
use crate::fees::OperationKind;
use crate::money::Money;
use crate::reference::{self, CONVERSION_PREFIX};
use crate::storage::repository::wallets::{credit_in, debit_in, get_or_create_in};
use crate::storage::{
    AuditEvent, AuditEventType, Channel, ConversionLeg, ConversionMetadata, LedgerBatch,
    OwnershipEnforcer, StoredTransaction, TxMetadata, TxType, WalletKind, WalletStore,
};

/// Priced conversion. Nothing is persisted for a quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionQuote {
    pub from_currency: String,
    pub to_currency: String,
    pub from_amount: Money,
    pub rate: Decimal,
    pub inverse_rate: Decimal,
    pub to_amount: Money,
    /// Charged in `to_currency`.
    pub fee: Money,
    pub received_amount: Money,
}

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub from_currency: String,
    pub to_currency: String,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionLegs {
    pub correlation_ref: String,
    pub quote: ConversionQuote,
    pub debit_leg: StoredTransaction,
    pub credit_leg: StoredTransaction,
}

fn conversion_meta(tx: &StoredTransaction) -> Option<&ConversionMetadata> {
    match &tx.metadata {
        TxMetadata::Conversion(meta) => Some(meta),
        _ => None,
    }
}

/// Split correlated rows into `(debit, credit)` legs.
fn split_legs(
    correlation_ref: &str,
    rows: Vec<StoredTransaction>,
) -> LedgerResult<(StoredTransaction, StoredTransaction)> {
    let mut debit = None;
    let mut credit = None;
    for row in rows {
        match conversion_meta(&row).map(|m| m.leg) {
            Some(ConversionLeg::Debit) => debit = Some(row),
            Some(ConversionLeg::Credit) => credit = Some(row),
            None => {}
        }
    }
    match (debit, credit) {
        (Some(debit), Some(credit)) => Ok((debit, credit)),
        _ => Err(LedgerError::not_found(format!("Conversion {correlation_ref}"))),
    }
}

fn load_legs_in(
    batch: &LedgerBatch<'_>,
    correlation_ref: &str,
) -> LedgerResult<(StoredTransaction, StoredTransaction)> {
    split_legs(correlation_ref, batch.correlated(correlation_ref)?)
}

impl SettlementEngine {
    /// Price a conversion without persisting anything.
    pub async fn calculate_conversion(
        &self,
        from_currency: &str,
        to_currency: &str,
        amount: Money,
    ) -> LedgerResult<ConversionQuote> {
        let from = currency::normalize(from_currency)?;
        let to = currency::normalize(to_currency)?;
        if from == to {
            return Err(LedgerError::validation(
                "Source and destination currencies must differ",
            ));
        }
        if currency::is_crypto(&from) || currency::is_crypto(&to) {
            return Err(LedgerError::validation(
                "Only fiat-to-fiat conversions are supported",
            ));
        }
        validate_amount(amount, &from)?;

        let rate = self.providers.rates.get_rate(&from, &to).await?;
        if rate.rate <= Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "No usable exchange rate for {from}/{to}"
            )));
        }

        let to_amount = amount.checked_mul(rate.rate)?.round_to(currency::scale_of(&to));
        if !to_amount.is_positive() {
            return Err(LedgerError::validation(format!(
                "{amount} {from} converts to nothing in {to}"
            )));
        }
        let fee = self
            .fees
            .compute_fee(to_amount, &to, OperationKind::Conversion)?;
        self.fees
            .check_covers(to_amount, fee, &to, OperationKind::Conversion)?;
        let received_amount = to_amount.checked_sub(fee)?;

        Ok(ConversionQuote {
            from_currency: from,
            to_currency: to,
            from_amount: amount,
            rate: rate.rate,
            inverse_rate: rate.inverse_rate,
            to_amount,
            fee,
            received_amount,
        })
    }

    /// Write both legs as `pending`. No balance moves.
    pub async fn initiate_conversion(
        &self,
        owner_id: &str,
        request: ConversionRequest,
    ) -> LedgerResult<ConversionLegs> {
        let quote = self
            .calculate_conversion(&request.from_currency, &request.to_currency, request.amount)
            .await?;

        let source = WalletStore::new(&self.db)
            .find(owner_id, &quote.from_currency, WalletKind::Fiat)?
            .ok_or_else(|| LedgerError::not_found(format!("{} wallet", quote.from_currency)))?;
        if !source.is_active {
            return Err(LedgerError::validation(format!(
                "Wallet {} is inactive",
                source.wallet_id
            )));
        }
        let available = source.available_balance();
        if available < quote.from_amount {
            return Err(LedgerError::InsufficientFunds {
                available,
                required: quote.from_amount,
                currency: quote.from_currency.clone(),
            });
        }

        let legs = self.with_fresh_reference(CONVERSION_PREFIX, |correlation_ref| {
            self.db.write(|batch| {
                let destination =
                    get_or_create_in(batch, owner_id, &quote.to_currency, WalletKind::Fiat)?;
                let debit_id = uuid::Uuid::new_v4().to_string();
                let credit_id = uuid::Uuid::new_v4().to_string();
                let meta = |leg, counterpart_tx_id: &str| {
                    TxMetadata::Conversion(ConversionMetadata {
                        leg,
                        from_currency: quote.from_currency.clone(),
                        to_currency: quote.to_currency.clone(),
                        from_amount: quote.from_amount,
                        to_amount: quote.to_amount,
                        rate: quote.rate,
                        fee: quote.fee,
                        received_amount: quote.received_amount,
                        counterpart_tx_id: counterpart_tx_id.to_string(),
                    })
                };

                let debit_leg = StoredTransaction::new_pending(
                    debit_id.clone(),
                    source.wallet_id.clone(),
                    owner_id.to_string(),
                    TxType::Withdrawal,
                    quote.from_amount,
                    Money::ZERO,
                    quote.from_currency.clone(),
                    reference::debit_leg(&correlation_ref),
                    Channel::Conversion,
                    meta(ConversionLeg::Debit, &credit_id),
                )
                .with_correlation(&correlation_ref);
                let credit_leg = StoredTransaction::new_pending(
                    credit_id,
                    destination.wallet_id,
                    owner_id.to_string(),
                    TxType::Deposit,
                    quote.to_amount,
                    quote.fee,
                    quote.to_currency.clone(),
                    correlation_ref.clone(),
                    Channel::Conversion,
                    meta(ConversionLeg::Credit, &debit_id),
                )
                .with_correlation(&correlation_ref);

                batch.insert_transaction(&debit_leg)?;
                batch.insert_transaction(&credit_leg)?;
                Ok::<_, LedgerError>(ConversionLegs {
                    correlation_ref: correlation_ref.clone(),
                    quote: quote.clone(),
                    debit_leg,
                    credit_leg,
                })
            })
        })?;
        self.invalidate_history(&[&legs.debit_leg.wallet_id, &legs.credit_leg.wallet_id]);

        info!(
            correlation_ref = %legs.correlation_ref,
            owner_id,
            from = %quote.from_currency,
            to = %quote.to_currency,
            from_amount = %quote.from_amount,
            to_amount = %quote.to_amount,
            fee = %quote.fee,
            "Conversion initiated"
        );
        self.audit(
            AuditEvent::new(AuditEventType::ConversionInitiated)
                .with_user(owner_id)
                .with_resource("conversion", &legs.correlation_ref),
        );
        Ok(legs)
    }

    /// Complete both legs: debit `from_amount`, credit `to_amount - fee`.
    pub async fn confirm_conversion(
        &self,
        owner_id: &str,
        correlation_ref: &str,
        pin: &str,
    ) -> LedgerResult<ConversionLegs> {
        let correlation_ref = correlation_ref.trim();
        let rows = self.db.snapshot()?.correlated(correlation_ref)?;
        let (debit, credit) = split_legs(correlation_ref, rows)?;
        debit.verify_ownership(owner_id)?;
        credit.verify_ownership(owner_id)?;
        debit.ensure_pending()?;
        credit.ensure_pending()?;

        let profile = self.require_user(owner_id).await?;
        self.check_pin(&profile, pin, correlation_ref).await?;

        let legs = self.db.write(|batch| {
            let (mut debit, mut credit) = load_legs_in(batch, correlation_ref)?;
            debit.ensure_pending()?;
            credit.ensure_pending()?;
            let meta = conversion_meta(&credit)
                .cloned()
                .ok_or_else(|| LedgerError::not_found(format!("Conversion {correlation_ref}")))?;

            debit_in(batch, &debit.wallet_id, meta.from_amount)?;
            credit_in(batch, &credit.wallet_id, meta.received_amount)?;
            debit.mark_completed();
            credit.mark_completed();
            batch.update_transaction(&debit)?;
            batch.update_transaction(&credit)?;

            Ok::<_, LedgerError>(ConversionLegs {
                correlation_ref: correlation_ref.to_string(),
                quote: ConversionQuote {
                    from_currency: meta.from_currency,
                    to_currency: meta.to_currency,
                    from_amount: meta.from_amount,
                    rate: meta.rate,
                    inverse_rate: if meta.rate.is_zero() {
                        Decimal::ZERO
                    } else {
                        Decimal::ONE / meta.rate
                    },
                    to_amount: meta.to_amount,
                    fee: meta.fee,
                    received_amount: meta.received_amount,
                },
                debit_leg: debit,
                credit_leg: credit,
            })
        })?;
        self.invalidate_history(&[&legs.debit_leg.wallet_id, &legs.credit_leg.wallet_id]);

        info!(
            correlation_ref,
            owner_id,
            debited = %legs.quote.from_amount,
            credited = %legs.quote.received_amount,
            "Conversion confirmed"
        );
        self.audit(
            AuditEvent::new(AuditEventType::ConversionConfirmed)
                .with_user(owner_id)
                .with_resource("conversion", correlation_ref),
        );
        Ok(legs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::testkit::{m, Harness, PIN};
    use crate::storage::TxStatus;

    fn ngn_to_kes(amount: &str) -> ConversionRequest {
        ConversionRequest {
            from_currency: "NGN".to_string(),
            to_currency: "KES".to_string(),
            amount: m(amount),
        }
    }

    #[tokio::test]
    async fn quote_matches_the_worked_example() {
        let h = Harness::new().await;
        let quote = h
            .engine
            .calculate_conversion("ngn", "kes", m("100000"))
            .await
            .unwrap();
        assert_eq!(quote.to_amount, m("15000"));
        assert_eq!(quote.to_amount.to_string(), "15000.00");
        assert_eq!(quote.fee, m("50"));
        assert_eq!(quote.received_amount, m("14950"));
    }

    #[tokio::test]
    async fn quote_rejects_same_currency_crypto_and_unknown_pairs() {
        let h = Harness::new().await;
        for (from, to) in [("NGN", "NGN"), ("NGN", "USDT"), ("BTC", "KES")] {
            assert!(matches!(
                h.engine.calculate_conversion(from, to, m("100")).await,
                Err(LedgerError::Validation(_))
            ));
        }
        assert!(matches!(
            h.engine.calculate_conversion("NGN", "ZAR", m("100")).await,
            Err(LedgerError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn initiate_and_confirm_move_both_legs() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let ngn = h.fund(&alice, "NGN", "150000").await;

        let legs = h
            .engine
            .initiate_conversion(&alice, ngn_to_kes("100000"))
            .await
            .unwrap();
        assert!(legs.correlation_ref.starts_with("CNV"));
        assert_eq!(legs.credit_leg.reference, legs.correlation_ref);
        assert_eq!(legs.debit_leg.reference, format!("{}-DR", legs.correlation_ref));
        assert_eq!(legs.debit_leg.status, TxStatus::Pending);
        assert_eq!(legs.credit_leg.status, TxStatus::Pending);

        let wallets = WalletStore::new(h.engine.database());
        // Initiate moves nothing.
        assert_eq!(wallets.get(&ngn).unwrap().balance, m("150000"));
        assert!(wallets.get(&legs.credit_leg.wallet_id).unwrap().balance.is_zero());

        let done = h
            .engine
            .confirm_conversion(&alice, &legs.correlation_ref, PIN)
            .await
            .unwrap();
        assert_eq!(done.debit_leg.status, TxStatus::Completed);
        assert_eq!(done.credit_leg.status, TxStatus::Completed);
        assert_eq!(wallets.get(&ngn).unwrap().balance, m("50000"));
        assert_eq!(
            wallets.get(&legs.credit_leg.wallet_id).unwrap().balance,
            m("14950")
        );

        let again = h
            .engine
            .confirm_conversion(&alice, &legs.correlation_ref, PIN)
            .await
            .unwrap_err();
        assert!(matches!(
            again,
            LedgerError::StateConflict {
                status: TxStatus::Completed,
                ..
            }
        ));
        assert_eq!(wallets.get(&ngn).unwrap().balance, m("50000"));
    }

    #[tokio::test]
    async fn failed_credit_leaves_both_legs_pending() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let ngn = h.fund(&alice, "NGN", "150000").await;
        let legs = h
            .engine
            .initiate_conversion(&alice, ngn_to_kes("100000"))
            .await
            .unwrap();

        let wallets = WalletStore::new(h.engine.database());
        wallets.deactivate(&legs.credit_leg.wallet_id).unwrap();

        assert!(matches!(
            h.engine
                .confirm_conversion(&alice, &legs.correlation_ref, PIN)
                .await,
            Err(LedgerError::Validation(_))
        ));

        let snapshot = h.engine.database().snapshot().unwrap();
        for leg in snapshot.correlated(&legs.correlation_ref).unwrap() {
            assert_eq!(leg.status, TxStatus::Pending, "{}", leg.reference);
        }
        assert_eq!(wallets.get(&ngn).unwrap().balance, m("150000"));
    }

    #[tokio::test]
    async fn balance_is_prechecked_and_rechecked() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let ngn = h.fund(&alice, "NGN", "50000").await;

        assert!(matches!(
            h.engine.initiate_conversion(&alice, ngn_to_kes("100000")).await,
            Err(LedgerError::InsufficientFunds { .. })
        ));

        let legs = h
            .engine
            .initiate_conversion(&alice, ngn_to_kes("40000"))
            .await
            .unwrap();
        WalletStore::new(h.engine.database())
            .debit(&ngn, m("20000"))
            .unwrap();
        assert!(matches!(
            h.engine
                .confirm_conversion(&alice, &legs.correlation_ref, PIN)
                .await,
            Err(LedgerError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test]
    async fn only_the_owner_can_confirm() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        h.fund(&alice, "NGN", "150000").await;
        let legs = h
            .engine
            .initiate_conversion(&alice, ngn_to_kes("100000"))
            .await
            .unwrap();

        assert!(matches!(
            h.engine.confirm_conversion(&bob, &legs.correlation_ref, PIN).await,
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(matches!(
            h.engine.confirm_conversion(&alice, "CNVNOPE", PIN).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            h.engine.confirm_conversion(&alice, &legs.correlation_ref, "0000").await,
            Err(LedgerError::InvalidPin)
        ));
    }
}
