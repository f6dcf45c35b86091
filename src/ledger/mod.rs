// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Wallet Ledger Engine
//!
//! Components, leaves first:
//!
//! | Component | Responsibility |
//! |-----------|----------------|
//! | [`store::LedgerStore`] | Bounded, retried, per-wallet serialised store access |
//! | [`wallets::WalletAccessor`] | One wallet per user, created lazily |
//! | [`transfer::TransferEngine`] | Debit then credit as one unit, with compensation |
//! | [`deposits::DepositReconciler`] | Idempotent deposit confirmation |
//! | [`history::TransactionLedger`] | Newest-first history queries |
//! | [`users::UserDirectory`] | External identity → internal user id |
//!
//! [`Ledger`] owns one shared backend handle and wires the components
//! together. It is opened at startup and closed at shutdown; there is no
//! global state.

pub mod deposits;
pub mod history;
pub mod locks;
pub mod references;
pub mod retry;
pub mod store;
pub mod transfer;
pub mod users;
pub mod wallets;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tracing::info;

use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::models::{Amount, Wallet};
use crate::storage::{LedgerBackend, LedgerDb};

use deposits::DepositReconciler;
use history::TransactionLedger;
use retry::RetryPolicy;
use store::LedgerStore;
use transfer::{TransferEngine, TransferReceipt};
use users::UserDirectory;
use wallets::WalletAccessor;

pub struct Ledger {
    store: Arc<LedgerStore>,
    wallets: Arc<WalletAccessor>,
    transfers: TransferEngine,
    deposits: DepositReconciler,
    history: TransactionLedger,
    users: UserDirectory,
}

impl Ledger {
    /// Open the redb file under `config.data_dir` and build the engine.
    pub fn open(config: &LedgerConfig) -> LedgerResult<Self> {
        let db = LedgerDb::open(&config.ledger_db_path())?;
        Self::with_backend(Arc::new(db), config)
    }

    /// Build the engine around an existing backend.
    pub fn with_backend(backend: Arc<dyn LedgerBackend>, config: &LedgerConfig) -> LedgerResult<Self> {
        let store = Arc::new(LedgerStore::new(
            backend,
            config.store_timeout,
            RetryPolicy::from_settings(config.retry),
        )?);
        let wallets = Arc::new(WalletAccessor::new(store.clone()));

        Ok(Self {
            transfers: TransferEngine::new(store.clone(), wallets.clone()),
            deposits: DepositReconciler::new(store.clone(), wallets.clone()),
            history: TransactionLedger::new(store.clone(), config.history_max_limit),
            users: UserDirectory::new(store.clone()),
            wallets,
            store,
        })
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn wallets(&self) -> &WalletAccessor {
        &self.wallets
    }

    pub fn transfers(&self) -> &TransferEngine {
        &self.transfers
    }

    pub fn deposits(&self) -> &DepositReconciler {
        &self.deposits
    }

    pub fn history(&self) -> &TransactionLedger {
        &self.history
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// The user's wallet, created on first access.
    pub async fn wallet(&self, user_id: &str) -> LedgerResult<Wallet> {
        self.wallets.get_or_create(user_id).await
    }

    pub async fn transfer(
        &self,
        sender_user_id: &str,
        recipient_wallet_id: &str,
        amount: u64,
    ) -> LedgerResult<TransferReceipt> {
        self.transfers
            .transfer(sender_user_id, recipient_wallet_id, amount)
            .await
    }

    pub async fn transfer_requested(
        &self,
        sender_user_id: &str,
        recipient_wallet_id: &str,
        amount: LedgerResult<Amount>,
    ) -> LedgerResult<TransferReceipt> {
        self.transfers
            .transfer_requested(sender_user_id, recipient_wallet_id, amount)
            .await
    }

    /// Lift an irreconcilable hold after manual reconciliation.
    pub async fn release_hold(&self, user_id: &str) -> LedgerResult<bool> {
        self.store.release_hold(user_id).await
    }

    /// `(user_id, reference)` of every held wallet.
    pub fn held_wallets(&self) -> Vec<(String, String)> {
        self.store.held()
    }

    /// Wait for outstanding blocking calls, then release the store handle.
    /// The database file is closed when this returns, unless the caller
    /// kept its own handle to the backend.
    pub async fn close(self) {
        let held = self.store.held().len();
        self.store.drain().await;
        drop(self);
        info!(held_wallets = held, "ledger closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySettings;
    use crate::error::LedgerError;
    use crate::models::TransactionStatus;
    use std::time::Duration;
    use testing::FaultyBackend;

    #[tokio::test]
    async fn end_to_end_deposit_then_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::with_data_dir(dir.path());
        let ledger = Ledger::open(&config).unwrap();

        let alice = ledger.users().ensure_user("g-alice", "alice@example.com", None).await.unwrap();
        let bob = ledger.users().ensure_user("g-bob", "bob@example.com", None).await.unwrap();

        ledger
            .deposits()
            .record_deposit_intent(&alice, 1_000, "REF1", None)
            .await
            .unwrap();
        ledger
            .deposits()
            .apply_confirmation("REF1", "success", 1_000, None)
            .await
            .unwrap();

        let bob_wallet = ledger.wallet(&bob).await.unwrap();
        let receipt = ledger.transfer(&alice, &bob_wallet.wallet_id, 400).await.unwrap();
        assert_eq!(receipt.sender_new_balance, 600);
        assert_eq!(receipt.recipient_new_balance, 400);

        let alice_history = ledger.history().history(&alice, 50).await.unwrap();
        assert_eq!(alice_history.len(), 2);
        assert_eq!(alice_history[0].reference, receipt.reference);
        assert!(alice_history.iter().all(|t| t.status == TransactionStatus::Success));

        ledger.close().await;

        // State is durable across reopen.
        let reopened = Ledger::open(&config).unwrap();
        assert_eq!(reopened.store().get_balance(&alice).await.unwrap(), 600);
        assert_eq!(reopened.store().get_balance(&bob).await.unwrap(), 400);
    }

    #[tokio::test]
    async fn close_waits_for_timed_out_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LedgerConfig::with_data_dir(dir.path());
        config.store_timeout = Duration::from_millis(50);
        config.retry = RetrySettings {
            attempts: 1,
            base_delay_ms: 1,
            max_delay_ms: 1,
        };

        let faulty = Arc::new(FaultyBackend::new(LedgerDb::open(&config.ledger_db_path()).unwrap()));
        faulty.stall_reads(Duration::from_millis(300), 1);
        let ledger = Ledger::with_backend(faulty, &config).unwrap();

        let result = ledger.store().get_balance("alice").await;
        assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));

        ledger.close().await;
        assert!(Ledger::open(&config).is_ok());
    }

    #[tokio::test]
    async fn release_hold_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&LedgerConfig::with_data_dir(dir.path())).unwrap();
        ledger.store().hold(&["alice"], "TRF_1_00000000").await;
        assert_eq!(ledger.held_wallets().len(), 1);
        assert!(ledger.release_hold("alice").await.unwrap());
        assert!(ledger.held_wallets().is_empty());
        assert!(!ledger.release_hold("alice").await.unwrap());
    }
}
