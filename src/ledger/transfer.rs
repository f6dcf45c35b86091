// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Transfer Engine
//!
//! Moves funds between two wallets as one unit:
//!
//! 1. Resolve the recipient wallet, reject self-transfers, validate the amount.
//! 2. Lock both wallets in canonical order.
//! 3. Debit the sender (journal key `<ref>:debit`).
//! 4. Credit the recipient and append the `success` record in one store
//!    operation (journal key `<ref>:credit`).
//!
//! If step 4 fails, the credit key is settled first (a credit that did land
//! means the transfer completed), otherwise the debit is reversed. When that
//! compensation itself fails the wallets are held and the error is
//! `Irreconcilable`.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::references::{new_transfer_reference, TransferKeys};
use super::store::LedgerStore;
use super::wallets::WalletAccessor;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Amount, Transaction};
use crate::storage::{BalanceChange, Reversal};

/// Attempts at drawing an unused transfer reference.
const MAX_REFERENCE_ATTEMPTS: usize = 5;

/// Result of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub reference: String,
    pub sender_new_balance: u64,
    pub recipient_new_balance: u64,
    pub transaction: Transaction,
}

pub struct TransferEngine {
    store: Arc<LedgerStore>,
    wallets: Arc<WalletAccessor>,
}

/// The two parties of an in-flight transfer.
struct Legs<'a> {
    reference: &'a str,
    keys: &'a TransferKeys,
    sender: &'a str,
    recipient: &'a str,
    amount: Amount,
}

impl TransferEngine {
    pub fn new(store: Arc<LedgerStore>, wallets: Arc<WalletAccessor>) -> Self {
        Self { store, wallets }
    }

    pub async fn transfer(
        &self,
        sender_user_id: &str,
        recipient_wallet_id: &str,
        amount: u64,
    ) -> LedgerResult<TransferReceipt> {
        self.transfer_requested(sender_user_id, recipient_wallet_id, Amount::new(amount))
            .await
    }

    /// Transfer an amount parsed elsewhere. A rejected parse surfaces after
    /// the recipient checks, exactly where a zero amount would.
    pub async fn transfer_requested(
        &self,
        sender_user_id: &str,
        recipient_wallet_id: &str,
        amount: LedgerResult<Amount>,
    ) -> LedgerResult<TransferReceipt> {
        let recipient = self
            .wallets
            .find_by_wallet_id(recipient_wallet_id)
            .await?
            .ok_or_else(|| LedgerError::RecipientNotFound(recipient_wallet_id.to_string()))?;
        if recipient.owner_user_id == sender_user_id {
            return Err(LedgerError::SelfTransfer);
        }
        let amount = amount?;
        let recipient_user_id = recipient.owner_user_id;

        self.wallets.get_or_create(sender_user_id).await?;
        self.store.ensure_not_held(sender_user_id)?;
        self.store.ensure_not_held(&recipient_user_id)?;

        let _guards = self
            .store
            .locks()
            .lock_pair(sender_user_id, &recipient_user_id)
            .await?;
        // A compensation failure may have held a wallet while we waited.
        self.store.ensure_not_held(sender_user_id)?;
        self.store.ensure_not_held(&recipient_user_id)?;

        let reference = self.unique_reference().await?;
        let keys = TransferKeys::for_reference(&reference);
        let legs = Legs {
            reference: &reference,
            keys: &keys,
            sender: sender_user_id,
            recipient: &recipient_user_id,
            amount,
        };

        let sender_new_balance = match self
            .store
            .apply_keyed(&keys.debit, sender_user_id, BalanceChange::Debit(amount.get()))
            .await
        {
            Ok(balance) => balance,
            Err(e @ LedgerError::StoreUnavailable(_)) => {
                // The debit may or may not have landed.
                self.undo_debit(&legs, &e).await?;
                return Err(e);
            }
            Err(e) => {
                warn!(
                    sender = %sender_user_id,
                    amount = amount.get(),
                    error_kind = %e.kind(),
                    "transfer rejected"
                );
                return Err(e);
            }
        };

        let record = Transaction::completed_transfer(
            reference.clone(),
            sender_user_id.to_string(),
            recipient_user_id.clone(),
            amount,
        );
        let recipient_new_balance = match self
            .store
            .apply_keyed_with_record(
                &keys.credit,
                &recipient_user_id,
                BalanceChange::Credit(amount.get()),
                &record,
            )
            .await
        {
            Ok(balance) => balance,
            Err(e) => match self.settle_credit(&legs, &e).await? {
                Some(balance) => balance,
                None => return Err(e),
            },
        };

        info!(
            reference = %reference,
            sender = %sender_user_id,
            recipient = %recipient_user_id,
            amount = amount.get(),
            "transfer committed"
        );

        Ok(TransferReceipt {
            reference,
            sender_new_balance,
            recipient_new_balance,
            transaction: record,
        })
    }

    async fn unique_reference(&self) -> LedgerResult<String> {
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let reference = new_transfer_reference();
            let candidate = reference.clone();
            let existing = self
                .store
                .call_with_retry(move |backend| backend.transaction(&candidate))
                .await?;
            if existing.is_none() {
                return Ok(reference);
            }
            warn!(reference = %reference, "transfer reference collision, regenerating");
        }
        Err(LedgerError::DuplicateReference(
            "could not draw an unused transfer reference".to_string(),
        ))
    }

    /// Settle a failed credit leg.
    ///
    /// `Some(balance)` means the credit (and its record) had committed and
    /// the transfer is complete. `None` means the sender was refunded.
    async fn settle_credit(&self, legs: &Legs<'_>, cause: &LedgerError) -> LedgerResult<Option<u64>> {
        match self.store.settle_keyed(&legs.keys.credit).await {
            Ok(Some(entry)) => {
                warn!(reference = %legs.reference, "credit leg committed despite error; transfer complete");
                return Ok(Some(entry.balance_after));
            }
            Ok(None) => {}
            Err(e) => {
                return Err(self
                    .irreconcilable(legs, &[legs.sender, legs.recipient], cause, &e.to_string())
                    .await);
            }
        }

        self.undo_debit(legs, cause).await?;
        Ok(None)
    }

    /// Reverse (or void) the debit leg. Err is `Irreconcilable`.
    async fn undo_debit(&self, legs: &Legs<'_>, cause: &LedgerError) -> LedgerResult<()> {
        match self.store.reverse_keyed(&legs.keys.debit, &legs.keys.refund).await {
            Ok(Reversal::Reversed { balance }) => {
                warn!(
                    reference = %legs.reference,
                    sender = %legs.sender,
                    amount = legs.amount.get(),
                    sender_balance = balance,
                    error = %cause,
                    "transfer aborted, sender refunded"
                );
                Ok(())
            }
            Ok(Reversal::Voided) | Ok(Reversal::AlreadyReversed) => {
                warn!(reference = %legs.reference, error = %cause, "transfer aborted before debit applied");
                Ok(())
            }
            Err(e) => Err(self
                .irreconcilable(legs, &[legs.sender, legs.recipient], cause, &e.to_string())
                .await),
        }
    }

    async fn irreconcilable(
        &self,
        legs: &Legs<'_>,
        wallets: &[&str],
        cause: &LedgerError,
        compensation_error: &str,
    ) -> LedgerError {
        error!(
            irreconcilable = true,
            reference = %legs.reference,
            sender = %legs.sender,
            recipient = %legs.recipient,
            amount = legs.amount.get(),
            cause = %cause,
            compensation_error = %compensation_error,
            "transfer compensation failed; wallets held for operator reconciliation"
        );
        self.store.hold(wallets, legs.reference).await;
        LedgerError::Irreconcilable {
            reference: legs.reference.to_string(),
            detail: format!("compensation failed: {compensation_error}"),
        }
    }
}
