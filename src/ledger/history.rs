// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read-only transaction history.

use std::sync::Arc;

use super::store::LedgerStore;
use crate::error::LedgerResult;
use crate::models::Transaction;

pub struct TransactionLedger {
    store: Arc<LedgerStore>,
    max_limit: usize,
}

impl TransactionLedger {
    pub fn new(store: Arc<LedgerStore>, max_limit: usize) -> Self {
        Self {
            store,
            max_limit: max_limit.max(1),
        }
    }

    /// Newest-first transactions where `user_id` is initiator or
    /// counterparty. `limit` is capped at the configured maximum.
    pub async fn history(&self, user_id: &str, limit: usize) -> LedgerResult<Vec<Transaction>> {
        let limit = limit.min(self.max_limit);
        let owner = user_id.to_string();
        Ok(self
            .store
            .call_with_retry(move |backend| backend.history(&owner, limit))
            .await?)
    }
}
