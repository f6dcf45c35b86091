// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet accessor: one wallet per user, created lazily.

use std::sync::Arc;

use tracing::{info, warn};

use super::references::new_wallet_id;
use super::store::LedgerStore;
use crate::error::{LedgerError, LedgerResult};
use crate::models::Wallet;
use crate::storage::StoreError;

/// Attempts at inserting a new wallet before giving up.
const MAX_CREATE_ATTEMPTS: usize = 5;

pub struct WalletAccessor {
    store: Arc<LedgerStore>,
}

impl WalletAccessor {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn find_by_user(&self, user_id: &str) -> LedgerResult<Option<Wallet>> {
        let owner = user_id.to_string();
        Ok(self
            .store
            .call_with_retry(move |backend| backend.wallet_by_user(&owner))
            .await?)
    }

    pub async fn find_by_wallet_id(&self, wallet_id: &str) -> LedgerResult<Option<Wallet>> {
        let wallet_id = wallet_id.to_string();
        Ok(self
            .store
            .call_with_retry(move |backend| backend.wallet_by_id(&wallet_id))
            .await?)
    }

    /// Return the user's wallet, creating a zero-balance one on first access.
    ///
    /// Concurrent first calls converge on the single stored wallet: the losing
    /// insert sees `WalletExists` and reads the winner back.
    pub async fn get_or_create(&self, user_id: &str) -> LedgerResult<Wallet> {
        if let Some(wallet) = self.find_by_user(user_id).await? {
            return Ok(wallet);
        }

        let mut last_error = None;
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let wallet = Wallet::new(new_wallet_id(), user_id.to_string());
            let candidate = wallet.clone();
            match self
                .store
                .call(move |backend| backend.insert_wallet(&candidate))
                .await
            {
                Ok(()) => {
                    info!(user_id = %user_id, wallet_id = %wallet.wallet_id, "wallet created");
                    return Ok(wallet);
                }
                Err(StoreError::WalletExists(_)) => {
                    return self
                        .find_by_user(user_id)
                        .await?
                        .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()));
                }
                Err(StoreError::WalletIdTaken(wallet_id)) => {
                    warn!(wallet_id = %wallet_id, "wallet id collision, regenerating");
                }
                Err(e) if e.is_transient() => {
                    // The insert may have committed before the failure surfaced.
                    if let Some(wallet) = self.find_by_user(user_id).await? {
                        return Ok(wallet);
                    }
                    warn!(user_id = %user_id, error = %e, "wallet creation failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(match last_error {
            Some(e) => e.into(),
            None => LedgerError::StoreUnavailable("could not allocate a wallet id".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::retry::RetryPolicy;
    use crate::storage::LedgerDb;
    use std::collections::HashSet;
    use std::time::Duration;

    fn accessor() -> (WalletAccessor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(&dir.path().join("ledger.redb")).unwrap();
        let store = LedgerStore::new(Arc::new(db), Duration::from_secs(2), RetryPolicy::once()).unwrap();
        (WalletAccessor::new(Arc::new(store)), dir)
    }

    #[tokio::test]
    async fn creates_once_and_returns_same_wallet() {
        let (wallets, _dir) = accessor();
        let first = wallets.get_or_create("alice").await.unwrap();
        let second = wallets.get_or_create("alice").await.unwrap();
        assert_eq!(first.wallet_id, second.wallet_id);
        assert_eq!(first.balance, 0);
        assert!(first.wallet_id.len() >= 20);

        let by_id = wallets.find_by_wallet_id(&first.wallet_id).await.unwrap().unwrap();
        assert_eq!(by_id.owner_user_id, "alice");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_first_access_creates_one_wallet() {
        let (wallets, _dir) = accessor();
        let wallets = Arc::new(wallets);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let wallets = wallets.clone();
            handles.push(tokio::spawn(async move {
                wallets.get_or_create("alice").await.unwrap().wallet_id
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn distinct_users_get_distinct_wallets() {
        let (wallets, _dir) = accessor();
        let a = wallets.get_or_create("alice").await.unwrap();
        let b = wallets.get_or_create("bob").await.unwrap();
        assert_ne!(a.wallet_id, b.wallet_id);
        assert!(wallets.find_by_wallet_id("missing").await.unwrap().is_none());
    }
}
