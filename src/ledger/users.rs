// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity mapping: external identity provider id → internal user id.

use std::sync::Arc;

use tracing::debug;

use super::store::LedgerStore;
use crate::error::LedgerResult;
use crate::models::UserRecord;

pub struct UserDirectory {
    store: Arc<LedgerStore>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl UserDirectory {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Upsert the user keyed by `external_id` and return the stable internal id.
    ///
    /// Email and display name are refreshed on every call.
    pub async fn ensure_user(
        &self,
        external_id: &str,
        email: &str,
        display_name: Option<&str>,
    ) -> LedgerResult<String> {
        Ok(self.ensure_user_record(external_id, email, display_name).await?.user_id)
    }

    pub async fn ensure_user_record(
        &self,
        external_id: &str,
        email: &str,
        display_name: Option<&str>,
    ) -> LedgerResult<UserRecord> {
        let external_id = external_id.trim().to_string();
        let email = normalize_email(email);
        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let record = self
            .store
            .call_with_retry(move |backend| {
                backend.upsert_user(&external_id, &email, display_name.as_deref())
            })
            .await?;
        debug!(user_id = %record.user_id, "user ensured");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::retry::RetryPolicy;
    use crate::storage::LedgerDb;
    use std::time::Duration;

    fn directory() -> (UserDirectory, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDb::open(&dir.path().join("ledger.redb")).unwrap();
        let store = LedgerStore::new(Arc::new(db), Duration::from_secs(2), RetryPolicy::once()).unwrap();
        (UserDirectory::new(Arc::new(store)), dir)
    }

    #[tokio::test]
    async fn same_external_id_maps_to_same_user() {
        let (users, _dir) = directory();
        let first = users.ensure_user("google-1", " Ada@Example.com ", Some("Ada")).await.unwrap();
        let second = users.ensure_user("google-1", "ada@example.com", None).await.unwrap();
        assert_eq!(first, second);

        let other = users.ensure_user("google-2", "bob@example.com", None).await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn email_is_normalized() {
        let (users, _dir) = directory();
        let record = users
            .ensure_user_record("google-1", " Ada@Example.COM ", Some("  "))
            .await
            .unwrap();
        assert_eq!(record.email, "ada@example.com");
        assert!(record.display_name.is_none());
    }
}
