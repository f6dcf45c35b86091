// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Deposit Reconciler
//!
//! Turns payment confirmations into wallet credits.
//!
//! ## Lifecycle
//!
//! ```text
//! record_deposit_intent ──► Pending ──(success)──► Success  (wallet credited)
//!                              │
//!                              └──(failed)─────► Failed
//! ```
//!
//! Webhooks, explicit status checks and the background poller all funnel
//! into [`DepositReconciler::apply_confirmation`]. The credit and the status
//! transition commit in one store transaction, and a non-pending record is
//! returned unchanged, so duplicate or concurrent deliveries credit once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::store::LedgerStore;
use super::wallets::WalletAccessor;
use crate::error::{LedgerError, LedgerResult};
use crate::gateway::{GatewayError, PaymentGateway};
use crate::models::{
    Amount, DepositOutcome, DepositResolution, ExternalStatus, Transaction, TransactionStatus,
};
use crate::storage::StoreError;

/// Failure of a deposit flow that also talks to the payment gateway.
#[derive(Debug, thiserror::Error)]
pub enum DepositFlowError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub struct DepositReconciler {
    store: Arc<LedgerStore>,
    wallets: Arc<WalletAccessor>,
}

impl DepositReconciler {
    pub fn new(store: Arc<LedgerStore>, wallets: Arc<WalletAccessor>) -> Self {
        Self { store, wallets }
    }

    pub async fn transaction(&self, reference: &str) -> LedgerResult<Transaction> {
        let key = reference.to_string();
        self.store
            .call_with_retry(move |backend| backend.transaction(&key))
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(reference.to_string()))
    }

    pub async fn pending_for(&self, user_id: &str) -> LedgerResult<Option<Transaction>> {
        let owner = user_id.to_string();
        Ok(self
            .store
            .call_with_retry(move |backend| backend.pending_deposit_for(&owner))
            .await?)
    }

    /// All deposits still awaiting confirmation.
    pub async fn pending_deposits(&self) -> LedgerResult<Vec<Transaction>> {
        Ok(self
            .store
            .call_with_retry(|backend| backend.pending_deposits())
            .await?)
    }

    /// Create the `pending` deposit record before the payer is redirected.
    ///
    /// At most one pending deposit per user: a second attempt fails with
    /// `DepositAlreadyPending` carrying the existing reference and handle.
    pub async fn record_deposit_intent(
        &self,
        user_id: &str,
        amount: u64,
        reference: &str,
        authorization_handle: Option<String>,
    ) -> LedgerResult<Transaction> {
        let amount = Amount::new(amount)?;
        self.wallets.get_or_create(user_id).await?;
        self.store.ensure_not_held(user_id)?;

        let record = Transaction::pending_deposit(
            reference.to_string(),
            user_id.to_string(),
            amount,
            authorization_handle,
        );
        let candidate = record.clone();
        let inserted = self
            .store
            .call_with_retry(move |backend| backend.insert_pending_deposit(&candidate))
            .await;

        match inserted {
            Ok(()) => {
                info!(
                    user_id = %user_id,
                    reference = %reference,
                    amount = amount.get(),
                    "deposit intent recorded"
                );
                Ok(record)
            }
            Err(StoreError::PendingDepositExists {
                reference: existing,
                ..
            }) => {
                let pending = self.transaction(&existing).await?;
                if existing == reference {
                    // Our own insert, committed by an earlier attempt.
                    return Ok(pending);
                }
                warn!(user_id = %user_id, existing = %existing, "deposit already pending");
                Err(LedgerError::DepositAlreadyPending {
                    reference: existing,
                    authorization_handle: pending.authorization_handle,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply a payment confirmation. Idempotent per reference.
    ///
    /// `confirmed_amount` is the amount the gateway verified and is what gets
    /// credited. Unrecognised statuses are stored on the record without
    /// leaving `Pending`.
    pub async fn apply_confirmation(
        &self,
        reference: &str,
        external_status: &str,
        confirmed_amount: u64,
        paid_at: Option<DateTime<Utc>>,
    ) -> LedgerResult<DepositOutcome> {
        let existing = self.transaction(reference).await?;
        if existing.status.is_terminal() {
            info!(
                reference = %reference,
                status = %existing.status,
                reported = %external_status,
                "duplicate confirmation ignored"
            );
            return Ok(DepositOutcome::unchanged(existing));
        }

        let resolution = match ExternalStatus::parse(external_status) {
            ExternalStatus::Success => {
                let amount = Amount::new(confirmed_amount)?;
                if amount.get() != existing.amount {
                    warn!(
                        reference = %reference,
                        intended = existing.amount,
                        confirmed = amount.get(),
                        "confirmed amount differs from intent; crediting confirmed amount"
                    );
                }
                DepositResolution::Succeeded {
                    amount,
                    paid_at,
                    provider_status: external_status.to_string(),
                }
            }
            ExternalStatus::Failed => DepositResolution::Failed {
                paid_at,
                provider_status: external_status.to_string(),
            },
            ExternalStatus::Other(raw) => DepositResolution::Unrecognized {
                provider_status: raw,
            },
        };

        let owner = existing.owner_user_id.clone();
        self.store.ensure_not_held(&owner)?;
        let _guard = self.store.locks().lock(&owner).await?;

        let key = reference.to_string();
        let outcome = self
            .store
            .call_with_retry(move |backend| backend.resolve_deposit(&key, &resolution))
            .await?;

        match (outcome.transitioned, outcome.transaction.status) {
            (true, TransactionStatus::Success) => info!(
                reference = %reference,
                user_id = %owner,
                amount = outcome.transaction.amount,
                balance = ?outcome.credited_balance,
                "deposit settled"
            ),
            (true, _) => info!(reference = %reference, user_id = %owner, "deposit failed"),
            (false, TransactionStatus::Pending) => warn!(
                reference = %reference,
                provider_status = %external_status,
                "unrecognised payment status recorded; deposit stays pending"
            ),
            (false, _) => info!(reference = %reference, "confirmation raced a concurrent settlement"),
        }
        Ok(outcome)
    }

    /// Open a gateway checkout and record the pending deposit.
    ///
    /// An existing pending deposit short-circuits before the gateway is
    /// called.
    pub async fn start_deposit(
        &self,
        user_id: &str,
        payer_email: &str,
        amount: u64,
        gateway: &dyn PaymentGateway,
    ) -> Result<Transaction, DepositFlowError> {
        let amount = Amount::new(amount)?;
        self.wallets.get_or_create(user_id).await?;
        self.store.ensure_not_held(user_id)?;

        if let Some(pending) = self.pending_for(user_id).await? {
            return Err(LedgerError::DepositAlreadyPending {
                reference: pending.reference,
                authorization_handle: pending.authorization_handle,
            }
            .into());
        }

        let session = gateway.initialize_payment(amount.get(), payer_email).await?;
        Ok(self
            .record_deposit_intent(
                user_id,
                amount.get(),
                &session.reference,
                Some(session.authorization_url),
            )
            .await?)
    }

    /// Ask the gateway for the current outcome and apply it.
    pub async fn refresh_status(
        &self,
        reference: &str,
        gateway: &dyn PaymentGateway,
    ) -> Result<DepositOutcome, DepositFlowError> {
        let existing = self.transaction(reference).await?;
        if existing.status.is_terminal() {
            return Ok(DepositOutcome::unchanged(existing));
        }

        let verification = gateway.verify_payment(reference).await?;
        Ok(self
            .apply_confirmation(
                reference,
                &verification.status,
                verification.amount,
                verification.paid_at,
            )
            .await?)
    }
}
