// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Storage Module
//!
//! Durable keyed storage of wallets, transactions and the balance journal.
//!
//! ## Backend Seam
//!
//! The engine talks to storage only through [`LedgerBackend`]. The production
//! implementation is [`LedgerDb`] (redb, pure Rust, ACID). Every method is a
//! single redb write or read transaction, so each one is atomic on its own.
//!
//! ## Balance Journal
//!
//! Balances change only through keyed journal entries:
//!
//! - `apply_entry(key, ...)` validates and applies a change, recording the
//!   outcome under `key`. Applying the same key again returns the recorded
//!   balance and changes nothing.
//! - `reverse_entry(key, reversal_key)` applies the inverse of an entry, or,
//!   if `key` never applied, voids it so a late attempt becomes a no-op.
//! - `void_unless_applied(key)` settles an unknown outcome without undoing it.
//!
//! This makes every mutation safe to retry after a timeout.

pub mod ledger_db;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DepositOutcome, DepositResolution, Transaction, UserRecord, Wallet};

pub use ledger_db::LedgerDb;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("no wallet for user {0}")]
    WalletNotFound(String),

    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error("insufficient funds: balance {available}, requested {requested}")]
    InsufficientFunds { available: u64, requested: u64 },

    #[error("credit would overflow balance of {0}")]
    BalanceOverflow(String),

    #[error("user {0} already owns a wallet")]
    WalletExists(String),

    #[error("wallet id {0} already taken")]
    WalletIdTaken(String),

    #[error("reference {0} already exists")]
    ReferenceTaken(String),

    #[error("user {user_id} already has pending deposit {reference}")]
    PendingDepositExists { user_id: String, reference: String },

    #[error("journal entry {0} was voided")]
    EntryVoided(String),

    #[error("journal entry {0} replayed with different parameters")]
    EntryConflict(String),

    #[error("journal entry {0} not found")]
    EntryNotFound(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("timed out waiting for wallet lock of {0}")]
    LockTimeout(String),

    #[error("store worker failed: {0}")]
    Worker(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Failures that may succeed on retry. Domain rejections never are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Redb(_)
                | StoreError::RedbDatabase(_)
                | StoreError::RedbTransaction(_)
                | StoreError::RedbTable(_)
                | StoreError::RedbStorage(_)
                | StoreError::RedbCommit(_)
                | StoreError::Timeout(_)
                | StoreError::LockTimeout(_)
                | StoreError::Worker(_)
                | StoreError::Unavailable(_)
        )
    }
}

// =============================================================================
// Journal Types
// =============================================================================

/// Direction and size of a balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "direction", content = "amount", rename_all = "lowercase")]
pub enum BalanceChange {
    Credit(u64),
    Debit(u64),
}

impl BalanceChange {
    /// Apply to a balance, refusing to go negative or overflow.
    pub fn apply_to(self, user_id: &str, balance: u64) -> StoreResult<u64> {
        match self {
            BalanceChange::Credit(amount) => balance
                .checked_add(amount)
                .ok_or_else(|| StoreError::BalanceOverflow(user_id.to_string())),
            BalanceChange::Debit(amount) => {
                if amount > balance {
                    return Err(StoreError::InsufficientFunds {
                        available: balance,
                        requested: amount,
                    });
                }
                Ok(balance - amount)
            }
        }
    }

    pub fn inverse(self) -> Self {
        match self {
            BalanceChange::Credit(amount) => BalanceChange::Debit(amount),
            BalanceChange::Debit(amount) => BalanceChange::Credit(amount),
        }
    }
}

/// One applied balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub key: String,
    pub user_id: String,
    pub change: BalanceChange,
    pub balance_after: u64,
    pub recorded_at: DateTime<Utc>,
    /// Key of the entry that reversed this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversed_by: Option<String>,
}

/// Result of [`LedgerBackend::reverse_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reversal {
    /// The entry had applied and is now undone; `balance` is the new balance.
    Reversed { balance: u64 },
    /// The entry was already reversed by an earlier call.
    AlreadyReversed,
    /// The entry never applied; its key is now void.
    Voided,
}

// =============================================================================
// Backend Trait
// =============================================================================

/// Synchronous storage contract consumed by the ledger engine.
///
/// Implementations must make every method atomic. Callers run them on the
/// blocking pool, so they may block.
pub trait LedgerBackend: Send + Sync {
    // --- wallets ---

    fn wallet_by_user(&self, user_id: &str) -> StoreResult<Option<Wallet>>;

    fn wallet_by_id(&self, wallet_id: &str) -> StoreResult<Option<Wallet>>;

    /// Insert a wallet, enforcing uniqueness of owner and wallet id.
    fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<()>;

    // --- balance journal ---

    fn apply_entry(&self, key: &str, user_id: &str, change: BalanceChange) -> StoreResult<u64>;

    /// `apply_entry` plus appending `record` to the transaction ledger, as one
    /// atomic unit.
    fn apply_entry_with_record(
        &self,
        key: &str,
        user_id: &str,
        change: BalanceChange,
        record: &Transaction,
    ) -> StoreResult<u64>;

    fn reverse_entry(&self, key: &str, reversal_key: &str) -> StoreResult<Reversal>;

    /// Return the entry recorded under `key`, or void `key` if there is none.
    fn void_unless_applied(&self, key: &str) -> StoreResult<Option<JournalEntry>>;

    fn journal_entry(&self, key: &str) -> StoreResult<Option<JournalEntry>>;

    // --- transactions ---

    fn transaction(&self, reference: &str) -> StoreResult<Option<Transaction>>;

    /// Insert a pending deposit, enforcing one pending deposit per user.
    fn insert_pending_deposit(&self, record: &Transaction) -> StoreResult<()>;

    fn pending_deposit_for(&self, user_id: &str) -> StoreResult<Option<Transaction>>;

    fn pending_deposits(&self) -> StoreResult<Vec<Transaction>>;

    /// Resolve a pending deposit. Crediting and the status transition commit
    /// together; a non-pending record is returned unchanged.
    fn resolve_deposit(
        &self,
        reference: &str,
        resolution: &DepositResolution,
    ) -> StoreResult<DepositOutcome>;

    /// Newest-first transactions where `user_id` is either side.
    fn history(&self, user_id: &str, limit: usize) -> StoreResult<Vec<Transaction>>;

    // --- users ---

    fn upsert_user(
        &self,
        external_id: &str,
        email: &str,
        display_name: Option<&str>,
    ) -> StoreResult<UserRecord>;

    // --- operator holds ---

    fn put_hold(&self, user_id: &str, reason: &str) -> StoreResult<()>;

    fn release_hold(&self, user_id: &str) -> StoreResult<bool>;

    fn holds(&self) -> StoreResult<Vec<(String, String)>>;
}
