// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-wallet mutual exclusion.
//!
//! Wallets are keyed by owner user id (1:1 with wallet). Operations on
//! different wallets never contend. Two-wallet operations acquire in sorted
//! key order so opposite-direction transfers cannot deadlock. Every wait is
//! bounded.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::storage::StoreError;

/// Held lock on one wallet; released on drop.
pub type WalletGuard = OwnedMutexGuard<()>;

pub struct WalletLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
    wait: Duration,
}

impl WalletLocks {
    pub fn new(wait: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            wait,
        }
    }

    fn handle(&self, user_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(user_id) {
            return lock.clone();
        }
        self.locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock one wallet, waiting at most the configured bound.
    pub async fn lock(&self, user_id: &str) -> Result<WalletGuard, StoreError> {
        let lock = self.handle(user_id);
        match tokio::time::timeout(self.wait, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                warn!(user_id = %user_id, wait_ms = self.wait.as_millis() as u64, "wallet lock wait expired");
                Err(StoreError::LockTimeout(user_id.to_string()))
            }
        }
    }

    /// Lock two distinct wallets in canonical order.
    ///
    /// Guards come back as `(first, second)` matching the argument order.
    pub async fn lock_pair(
        &self,
        first: &str,
        second: &str,
    ) -> Result<(WalletGuard, WalletGuard), StoreError> {
        if first <= second {
            let a = self.lock(first).await?;
            let b = self.lock(second).await?;
            Ok((a, b))
        } else {
            let b = self.lock(second).await?;
            let a = self.lock(first).await?;
            Ok((a, b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disjoint_wallets_do_not_block() {
        let locks = WalletLocks::new(Duration::from_millis(50));
        let _alice = locks.lock("alice").await.unwrap();
        assert!(locks.lock("bob").await.is_ok());
    }

    #[tokio::test]
    async fn same_wallet_wait_is_bounded() {
        let locks = WalletLocks::new(Duration::from_millis(20));
        let _held = locks.lock("alice").await.unwrap();
        let second = locks.lock("alice").await;
        assert!(matches!(second, Err(StoreError::LockTimeout(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn opposite_pairs_do_not_deadlock() {
        let locks = Arc::new(WalletLocks::new(Duration::from_secs(5)));
        let mut handles = Vec::new();
        for i in 0..50 {
            let locks = locks.clone();
            handles.push(tokio::spawn(async move {
                let (a, b) = if i % 2 == 0 { ("alice", "bob") } else { ("bob", "alice") };
                let _guards = locks.lock_pair(a, b).await.unwrap();
                tokio::task::yield_now().await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
