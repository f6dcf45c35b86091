// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Store
//!
//! Async face of the [`LedgerBackend`]: every backend call runs on the
//! blocking pool under a timeout, retryable failures are retried with
//! backoff, and balance mutations are serialised per wallet.
//!
//! Only keyed (journal) mutations and reads go through the retry path. A
//! replayed key returns the recorded balance, so a retry after a timed-out
//! attempt cannot apply twice. A timed-out attempt keeps running on the
//! blocking pool; [`LedgerStore::drain`] waits for those stragglers.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::locks::WalletLocks;
use super::retry::RetryPolicy;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Amount, Transaction};
use crate::storage::{
    BalanceChange, JournalEntry, LedgerBackend, Reversal, StoreError, StoreResult,
};

pub struct LedgerStore {
    backend: Arc<dyn LedgerBackend>,
    locks: WalletLocks,
    retry: RetryPolicy,
    timeout: Duration,
    /// user_id → reference of the operation that could not be compensated.
    holds: DashMap<String, String>,
    blocking: TaskTracker,
}

impl LedgerStore {
    /// Wrap a backend, loading persisted holds.
    pub fn new(
        backend: Arc<dyn LedgerBackend>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> StoreResult<Self> {
        let holds = DashMap::new();
        for (user_id, reference) in backend.holds()? {
            warn!(user_id = %user_id, reference = %reference, "wallet is held pending reconciliation");
            holds.insert(user_id, reference);
        }
        Ok(Self {
            backend,
            locks: WalletLocks::new(timeout),
            retry,
            timeout,
            holds,
            blocking: TaskTracker::new(),
        })
    }

    pub fn locks(&self) -> &WalletLocks {
        &self.locks
    }

    // =========================================================================
    // Bounded backend calls
    // =========================================================================

    /// One backend call on the blocking pool, bounded by the store timeout.
    pub async fn call<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&dyn LedgerBackend) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let backend = self.backend.clone();
        let task = self.blocking.spawn_blocking(move || op(backend.as_ref()));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(StoreError::Worker(join_error.to_string())),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    /// Like [`call`](Self::call), retrying transient failures.
    ///
    /// `op` must be a read or a keyed mutation.
    pub async fn call_with_retry<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: Fn(&dyn LedgerBackend) -> StoreResult<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        self.retry
            .retry_if(
                |attempt| {
                    let op = op.clone();
                    if attempt > 0 {
                        warn!(attempt, "retrying ledger store call");
                    }
                    self.call(move |backend| (*op)(backend))
                },
                StoreError::is_transient,
            )
            .await
    }

    // =========================================================================
    // Balance contract
    // =========================================================================

    /// Current balance of the user's wallet.
    pub async fn get_balance(&self, user_id: &str) -> LedgerResult<u64> {
        let owner = user_id.to_string();
        let wallet = self
            .call_with_retry(move |backend| backend.wallet_by_user(&owner))
            .await?;
        wallet
            .map(|w| w.balance)
            .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))
    }

    /// Standalone credit under the wallet lock.
    pub async fn credit(&self, user_id: &str, amount: u64) -> LedgerResult<u64> {
        let amount = Amount::new(amount)?;
        self.adjust(user_id, BalanceChange::Credit(amount.get())).await
    }

    /// Standalone debit under the wallet lock. Never lets the balance go negative.
    pub async fn debit(&self, user_id: &str, amount: u64) -> LedgerResult<u64> {
        let amount = Amount::new(amount)?;
        self.adjust(user_id, BalanceChange::Debit(amount.get())).await
    }

    async fn adjust(&self, user_id: &str, change: BalanceChange) -> LedgerResult<u64> {
        self.ensure_not_held(user_id)?;
        let _guard = self.locks.lock(user_id).await?;
        let key = format!("adj_{}", Uuid::new_v4().simple());
        match self.apply_keyed(&key, user_id, change).await {
            Err(cause @ LedgerError::StoreUnavailable(_)) => {
                self.settle_adjustment(&key, user_id, cause).await
            }
            other => other,
        }
    }

    /// A failed attempt may still commit later. Settle the key so that
    /// `StoreUnavailable` always means the change will never land.
    async fn settle_adjustment(
        &self,
        key: &str,
        user_id: &str,
        cause: LedgerError,
    ) -> LedgerResult<u64> {
        match self.settle_keyed(key).await {
            Ok(Some(entry)) => {
                warn!(user_id = %user_id, key = %key, "balance change committed despite error");
                Ok(entry.balance_after)
            }
            Ok(None) => Err(cause),
            Err(e) => {
                error!(
                    irreconcilable = true,
                    user_id = %user_id,
                    key = %key,
                    cause = %cause,
                    error = %e,
                    "could not settle balance change; wallet held for operator reconciliation"
                );
                self.hold(&[user_id], key).await;
                Err(LedgerError::Irreconcilable {
                    reference: key.to_string(),
                    detail: format!("could not settle balance change: {e}"),
                })
            }
        }
    }

    // =========================================================================
    // Keyed mutations (caller holds the wallet locks)
    // =========================================================================

    pub async fn apply_keyed(
        &self,
        key: &str,
        user_id: &str,
        change: BalanceChange,
    ) -> LedgerResult<u64> {
        let (key, owner) = (key.to_string(), user_id.to_string());
        Ok(self
            .call_with_retry(move |backend| backend.apply_entry(&key, &owner, change))
            .await?)
    }

    pub async fn apply_keyed_with_record(
        &self,
        key: &str,
        user_id: &str,
        change: BalanceChange,
        record: &Transaction,
    ) -> LedgerResult<u64> {
        let (key, owner, record) = (key.to_string(), user_id.to_string(), record.clone());
        Ok(self
            .call_with_retry(move |backend| {
                backend.apply_entry_with_record(&key, &owner, change, &record)
            })
            .await?)
    }

    /// Undo `key` (or void it if it never applied), retrying transient failures.
    pub async fn reverse_keyed(&self, key: &str, reversal_key: &str) -> StoreResult<Reversal> {
        let (key, reversal_key) = (key.to_string(), reversal_key.to_string());
        self.call_with_retry(move |backend| backend.reverse_entry(&key, &reversal_key))
            .await
    }

    /// Settle an unknown outcome: the applied entry, or `None` once voided.
    pub async fn settle_keyed(&self, key: &str) -> StoreResult<Option<JournalEntry>> {
        let key = key.to_string();
        self.call_with_retry(move |backend| backend.void_unless_applied(&key))
            .await
    }

    // =========================================================================
    // Operator holds
    // =========================================================================

    pub fn is_held(&self, user_id: &str) -> bool {
        self.holds.contains_key(user_id)
    }

    pub fn ensure_not_held(&self, user_id: &str) -> LedgerResult<()> {
        match self.holds.get(user_id) {
            Some(reference) => Err(LedgerError::Irreconcilable {
                reference: reference.value().clone(),
                detail: format!("wallet of {user_id} is held for operator reconciliation"),
            }),
            None => Ok(()),
        }
    }

    /// Hold wallets after a failed compensation. Takes effect in memory
    /// immediately; persistence is best effort.
    pub async fn hold(&self, user_ids: &[&str], reference: &str) {
        for user_id in user_ids {
            self.holds.insert(user_id.to_string(), reference.to_string());
            let (owner, reason) = (user_id.to_string(), reference.to_string());
            if let Err(e) = self
                .call_with_retry(move |backend| backend.put_hold(&owner, &reason))
                .await
            {
                error!(
                    user_id = %user_id,
                    reference = %reference,
                    error = %e,
                    irreconcilable = true,
                    "failed to persist wallet hold"
                );
            }
        }
    }

    /// Lift a hold. Returns whether the wallet was held.
    pub async fn release_hold(&self, user_id: &str) -> LedgerResult<bool> {
        let owner = user_id.to_string();
        let persisted = self
            .call_with_retry(move |backend| backend.release_hold(&owner))
            .await?;
        let in_memory = self.holds.remove(user_id).is_some();
        if persisted || in_memory {
            info!(user_id = %user_id, "wallet hold released");
        }
        Ok(persisted || in_memory)
    }

    /// Wait for every blocking call still running, timed-out ones included.
    pub async fn drain(&self) {
        self.blocking.close();
        self.blocking.wait().await;
    }

    pub fn held(&self) -> Vec<(String, String)> {
        let mut held: Vec<_> = self
            .holds
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        held.sort();
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{FaultyBackend, Fault};
    use crate::models::Wallet;
    use crate::storage::LedgerDb;

    fn store_with(backend: Arc<dyn LedgerBackend>) -> LedgerStore {
        LedgerStore::new(
            backend,
            Duration::from_secs(2),
            RetryPolicy::new(3, 1, 5),
        )
        .unwrap()
    }

    fn temp_store() -> (LedgerStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(&dir.path().join("ledger.redb")).unwrap();
        db.insert_wallet(&Wallet::new("w-alice".into(), "alice".into())).unwrap();
        (store_with(Arc::new(db)), dir)
    }

    #[tokio::test]
    async fn zero_amounts_are_invalid() {
        let (store, _dir) = temp_store();
        assert!(matches!(store.credit("alice", 0).await, Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(store.debit("alice", 0).await, Err(LedgerError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn debit_beyond_balance_fails() {
        let (store, _dir) = temp_store();
        store.credit("alice", 100).await.unwrap();
        let result = store.debit("alice", 101).await;
        assert!(matches!(result, Err(LedgerError::InsufficientFunds { available: 100, requested: 101 })));
        assert_eq!(store.get_balance("alice").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn unknown_wallet_balance() {
        let (store, _dir) = temp_store();
        assert!(matches!(store.get_balance("nobody").await, Err(LedgerError::WalletNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_mutations_conserve_balance() {
        let (store, _dir) = temp_store();
        let store = Arc::new(store);
        store.credit("alice", 1_000).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..40u64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    store.credit("alice", 10).await.map(|_| 10i64)
                } else {
                    store.debit("alice", 30).await.map(|_| -30i64)
                }
            }));
        }

        let mut expected: i64 = 1_000;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(delta) => expected += delta,
                Err(LedgerError::InsufficientFunds { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        let balance = store.get_balance("alice").await.unwrap();
        assert_eq!(balance as i64, expected);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_without_double_apply() {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(&dir.path().join("ledger.redb")).unwrap();
        db.insert_wallet(&Wallet::new("w-alice".into(), "alice".into())).unwrap();
        let faulty = Arc::new(FaultyBackend::new(db));
        // First attempt commits but reports failure, as a timed-out call would.
        faulty.fail_next_apply(Fault::AfterCommit);
        let store = store_with(faulty.clone());

        assert_eq!(store.credit("alice", 250).await.unwrap(), 250);
        assert_eq!(store.get_balance("alice").await.unwrap(), 250);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(&dir.path().join("ledger.redb")).unwrap();
        db.insert_wallet(&Wallet::new("w-alice".into(), "alice".into())).unwrap();
        let faulty = Arc::new(FaultyBackend::new(db));
        faulty.fail_applies(Fault::BeforeCommit, 10);
        let store = store_with(faulty.clone());

        let result = store.credit("alice", 250).await;
        assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));
        assert!(result.unwrap_err().is_retryable());
    }

    fn slow_store() -> (LedgerStore, Arc<FaultyBackend>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(&dir.path().join("ledger.redb")).unwrap();
        db.insert_wallet(&Wallet::new("w-alice".into(), "alice".into())).unwrap();
        let faulty = Arc::new(FaultyBackend::new(db));
        let store = LedgerStore::new(
            faulty.clone(),
            Duration::from_millis(50),
            RetryPolicy::new(2, 1, 5),
        )
        .unwrap();
        (store, faulty, dir)
    }

    #[tokio::test]
    async fn stalled_read_times_out_as_retryable() {
        let (store, faulty, _dir) = slow_store();
        faulty.stall_reads(Duration::from_millis(300), 3);

        let raw = store.call(|backend| backend.wallet_by_user("alice")).await;
        assert!(matches!(raw, Err(StoreError::Timeout(_))));

        let result = store.get_balance("alice").await;
        assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));
        assert!(result.unwrap_err().is_retryable());

        store.drain().await;
        assert_eq!(store.get_balance("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stalled_keyed_mutation_lands_once() {
        let (store, faulty, _dir) = slow_store();
        faulty.stall_applies(Duration::from_millis(300), 2);

        let result = store.apply_keyed("k1", "alice", BalanceChange::Credit(100)).await;
        assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));
        assert!(result.unwrap_err().is_retryable());

        // Both timed-out attempts finish late; the key applies once.
        store.drain().await;
        assert_eq!(store.get_balance("alice").await.unwrap(), 100);
        assert_eq!(
            store.apply_keyed("k1", "alice", BalanceChange::Credit(100)).await.unwrap(),
            100
        );
    }

    #[tokio::test]
    async fn timed_out_credit_never_applies_after_failure() {
        let (store, faulty, _dir) = slow_store();
        faulty.stall_applies(Duration::from_millis(300), 2);

        let result = store.credit("alice", 100).await;
        assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));

        store.drain().await;
        assert_eq!(store.get_balance("alice").await.unwrap(), 0);

        // The caller retries as told; the money lands exactly once.
        assert_eq!(store.credit("alice", 100).await.unwrap(), 100);
        assert_eq!(store.get_balance("alice").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn credit_committed_behind_a_lost_ack_is_reported() {
        let (store, faulty, _dir) = slow_store();
        faulty.fail_applies(Fault::AfterCommit, 2);

        // Every attempt commits (replaying the same key) but reports failure.
        assert_eq!(store.credit("alice", 100).await.unwrap(), 100);
        assert_eq!(store.get_balance("alice").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn held_wallet_rejects_mutations_until_released() {
        let (store, _dir) = temp_store();
        store.hold(&["alice"], "TRF_1_deadbeef").await;

        let result = store.credit("alice", 10).await;
        assert!(matches!(result, Err(LedgerError::Irreconcilable { .. })));
        assert_eq!(store.held(), vec![("alice".to_string(), "TRF_1_deadbeef".to_string())]);

        assert!(store.release_hold("alice").await.unwrap());
        assert_eq!(store.credit("alice", 10).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn holds_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.redb");
        {
            let db = LedgerDb::open(&path).unwrap();
            db.put_hold("alice", "TRF_9_cafebabe").unwrap();
        }
        let store = store_with(Arc::new(LedgerDb::open(&path).unwrap()));
        assert!(store.is_held("alice"));
    }
}
