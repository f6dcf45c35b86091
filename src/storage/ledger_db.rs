// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ledger database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `wallets`: owner user_id → serialized Wallet
//! - `wallet_owners`: wallet_id → owner user_id (wallet id uniqueness)
//! - `transactions`: reference → serialized Transaction
//! - `user_tx_index`: composite key (user_id|!timestamp|reference) → role
//! - `pending_deposits`: user_id → reference of the one pending deposit
//! - `entries`: entry key → serialized JournalEntry
//! - `voided_entries`: entry key → voided-at (unix micros)
//! - `users`: external_id → serialized UserRecord
//! - `held_wallets`: user_id → hold reason

use std::path::Path;

use chrono::Utc;
use redb::{
    Database, ReadableDatabase, ReadableTable, Table, TableDefinition, WriteTransaction,
};
use serde::{de::DeserializeOwned, Serialize};

use super::{BalanceChange, JournalEntry, LedgerBackend, Reversal, StoreError, StoreResult};
use crate::models::{
    DepositOutcome, DepositResolution, Transaction, UserRecord, Wallet,
};

// =============================================================================
// Table Definitions
// =============================================================================

const WALLETS: TableDefinition<&str, &[u8]> = TableDefinition::new("wallets");

const WALLET_OWNERS: TableDefinition<&str, &str> = TableDefinition::new("wallet_owners");

const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

/// Key format: `user_id|!timestamp_be|reference` for newest-first range scans.
const USER_TX_INDEX: TableDefinition<&[u8], &str> = TableDefinition::new("user_tx_index");

const PENDING_DEPOSITS: TableDefinition<&str, &str> = TableDefinition::new("pending_deposits");

const JOURNAL: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

const VOIDED_ENTRIES: TableDefinition<&str, i64> = TableDefinition::new("voided_entries");

const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

const HELD_WALLETS: TableDefinition<&str, &str> = TableDefinition::new("held_wallets");

const ROLE_INITIATOR: &str = "initiator";
const ROLE_COUNTERPARTY: &str = "counterparty";

// =============================================================================
// Key / Codec Helpers
// =============================================================================

/// Build a composite key for the user_tx_index table.
///
/// The inverted timestamp ensures newest-first ordering when scanning forward.
fn make_index_key(user_id: &str, timestamp_micros: i64, reference: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_id.len() + 1 + 8 + 1 + reference.len());
    key.extend_from_slice(user_id.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&(!timestamp_micros as u64).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(reference.as_bytes());
    key
}

fn make_prefix(user_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(user_id.len() + 1);
    prefix.extend_from_slice(user_id.as_bytes());
    prefix.push(b'|');
    prefix
}

/// Upper bound for a prefix scan: the separator byte incremented.
fn make_prefix_end(user_id: &str) -> Vec<u8> {
    let mut end = Vec::with_capacity(user_id.len() + 1);
    end.extend_from_slice(user_id.as_bytes());
    end.push(b'|' + 1);
    end
}

/// Extract the reference portion of an index key (after the 8 timestamp bytes).
fn reference_from_index_key(key: &[u8], prefix_len: usize) -> Option<String> {
    let start = prefix_len + 8 + 1;
    key.get(start..)
        .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
}

fn deposit_entry_key(reference: &str) -> String {
    format!("{reference}:deposit")
}

fn get_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StoreResult<Option<T>> {
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

fn put_json<T: Serialize>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    table.insert(key, bytes.as_slice())?;
    Ok(())
}

// =============================================================================
// In-transaction building blocks
// =============================================================================

/// Apply a keyed balance change inside an open write transaction.
///
/// Returns the balance after the entry and whether it was a replay.
fn apply_in(
    txn: &WriteTransaction,
    key: &str,
    user_id: &str,
    change: BalanceChange,
) -> StoreResult<(u64, bool)> {
    {
        let voided = txn.open_table(VOIDED_ENTRIES)?;
        if voided.get(key)?.is_some() {
            return Err(StoreError::EntryVoided(key.to_string()));
        }
    }

    let mut journal = txn.open_table(JOURNAL)?;
    if let Some(existing) = get_json::<JournalEntry>(&journal, key)? {
        if existing.user_id != user_id || existing.change != change {
            return Err(StoreError::EntryConflict(key.to_string()));
        }
        return Ok((existing.balance_after, true));
    }

    let mut wallets = txn.open_table(WALLETS)?;
    let mut wallet: Wallet = get_json(&wallets, user_id)?
        .ok_or_else(|| StoreError::WalletNotFound(user_id.to_string()))?;

    let now = Utc::now();
    wallet.balance = change.apply_to(user_id, wallet.balance)?;
    wallet.updated_at = now;
    put_json(&mut wallets, user_id, &wallet)?;

    let entry = JournalEntry {
        key: key.to_string(),
        user_id: user_id.to_string(),
        change,
        balance_after: wallet.balance,
        recorded_at: now,
        reversed_by: None,
    };
    put_json(&mut journal, key, &entry)?;

    Ok((wallet.balance, false))
}

/// Append a new transaction record and its history index entries.
fn insert_record_in(txn: &WriteTransaction, record: &Transaction) -> StoreResult<()> {
    let mut transactions = txn.open_table(TRANSACTIONS)?;
    if transactions.get(record.reference.as_str())?.is_some() {
        return Err(StoreError::ReferenceTaken(record.reference.clone()));
    }
    put_json(&mut transactions, &record.reference, record)?;

    let timestamp = record.created_at.timestamp_micros();
    let mut index = txn.open_table(USER_TX_INDEX)?;
    let key = make_index_key(&record.owner_user_id, timestamp, &record.reference);
    index.insert(key.as_slice(), ROLE_INITIATOR)?;
    if let Some(counterparty) = record.counterparty_user_id.as_deref() {
        let key = make_index_key(counterparty, timestamp, &record.reference);
        index.insert(key.as_slice(), ROLE_COUNTERPARTY)?;
    }
    Ok(())
}

// =============================================================================
// LedgerDb
// =============================================================================

/// Embedded ACID ledger database.
pub struct LedgerDb {
    db: Database,
}

impl LedgerDb {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("cannot create {}: {e}", parent.display())))?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(WALLETS)?;
            let _ = write_txn.open_table(WALLET_OWNERS)?;
            let _ = write_txn.open_table(TRANSACTIONS)?;
            let _ = write_txn.open_table(USER_TX_INDEX)?;
            let _ = write_txn.open_table(PENDING_DEPOSITS)?;
            let _ = write_txn.open_table(JOURNAL)?;
            let _ = write_txn.open_table(VOIDED_ENTRIES)?;
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(HELD_WALLETS)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "ledger database opened");
        Ok(Self { db })
    }
}

impl LedgerBackend for LedgerDb {
    // =========================================================================
    // Wallets
    // =========================================================================

    fn wallet_by_user(&self, user_id: &str) -> StoreResult<Option<Wallet>> {
        let read_txn = self.db.begin_read()?;
        let wallets = read_txn.open_table(WALLETS)?;
        get_json(&wallets, user_id)
    }

    fn wallet_by_id(&self, wallet_id: &str) -> StoreResult<Option<Wallet>> {
        let read_txn = self.db.begin_read()?;
        let owners = read_txn.open_table(WALLET_OWNERS)?;
        let owner = match owners.get(wallet_id)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        let wallets = read_txn.open_table(WALLETS)?;
        get_json(&wallets, &owner)
    }

    fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut wallets = write_txn.open_table(WALLETS)?;
            if wallets.get(wallet.owner_user_id.as_str())?.is_some() {
                return Err(StoreError::WalletExists(wallet.owner_user_id.clone()));
            }
            let mut owners = write_txn.open_table(WALLET_OWNERS)?;
            if owners.get(wallet.wallet_id.as_str())?.is_some() {
                return Err(StoreError::WalletIdTaken(wallet.wallet_id.clone()));
            }
            put_json(&mut wallets, &wallet.owner_user_id, wallet)?;
            owners.insert(wallet.wallet_id.as_str(), wallet.owner_user_id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // Balance journal
    // =========================================================================

    fn apply_entry(&self, key: &str, user_id: &str, change: BalanceChange) -> StoreResult<u64> {
        let write_txn = self.db.begin_write()?;
        let (balance, _) = apply_in(&write_txn, key, user_id, change)?;
        write_txn.commit()?;
        Ok(balance)
    }

    fn apply_entry_with_record(
        &self,
        key: &str,
        user_id: &str,
        change: BalanceChange,
        record: &Transaction,
    ) -> StoreResult<u64> {
        let write_txn = self.db.begin_write()?;
        let (balance, replayed) = apply_in(&write_txn, key, user_id, change)?;
        if !replayed {
            insert_record_in(&write_txn, record)?;
        }
        write_txn.commit()?;
        Ok(balance)
    }

    fn reverse_entry(&self, key: &str, reversal_key: &str) -> StoreResult<Reversal> {
        let write_txn = self.db.begin_write()?;
        let existing = {
            let journal = write_txn.open_table(JOURNAL)?;
            get_json::<JournalEntry>(&journal, key)?
        };

        let outcome = match existing {
            Some(entry) if entry.reversed_by.is_some() => Reversal::AlreadyReversed,
            Some(mut entry) => {
                let (balance, _) =
                    apply_in(&write_txn, reversal_key, &entry.user_id, entry.change.inverse())?;
                entry.reversed_by = Some(reversal_key.to_string());
                let mut journal = write_txn.open_table(JOURNAL)?;
                put_json(&mut journal, key, &entry)?;
                Reversal::Reversed { balance }
            }
            None => {
                let mut voided = write_txn.open_table(VOIDED_ENTRIES)?;
                voided.insert(key, Utc::now().timestamp_micros())?;
                Reversal::Voided
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    fn void_unless_applied(&self, key: &str) -> StoreResult<Option<JournalEntry>> {
        let write_txn = self.db.begin_write()?;
        let existing = {
            let journal = write_txn.open_table(JOURNAL)?;
            get_json::<JournalEntry>(&journal, key)?
        };
        if existing.is_none() {
            let mut voided = write_txn.open_table(VOIDED_ENTRIES)?;
            voided.insert(key, Utc::now().timestamp_micros())?;
        }
        write_txn.commit()?;
        Ok(existing)
    }

    fn journal_entry(&self, key: &str) -> StoreResult<Option<JournalEntry>> {
        let read_txn = self.db.begin_read()?;
        let journal = read_txn.open_table(JOURNAL)?;
        get_json(&journal, key)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    fn transaction(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        let read_txn = self.db.begin_read()?;
        let transactions = read_txn.open_table(TRANSACTIONS)?;
        get_json(&transactions, reference)
    }

    fn insert_pending_deposit(&self, record: &Transaction) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let pending = write_txn.open_table(PENDING_DEPOSITS)?;
            let existing = pending
                .get(record.owner_user_id.as_str())?
                .map(|value| value.value().to_string());
            if let Some(existing) = existing {
                return Err(StoreError::PendingDepositExists {
                    user_id: record.owner_user_id.clone(),
                    reference: existing,
                });
            }
        }
        insert_record_in(&write_txn, record)?;
        {
            let mut pending = write_txn.open_table(PENDING_DEPOSITS)?;
            pending.insert(record.owner_user_id.as_str(), record.reference.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn pending_deposit_for(&self, user_id: &str) -> StoreResult<Option<Transaction>> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(PENDING_DEPOSITS)?;
        let reference = match pending.get(user_id)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        let transactions = read_txn.open_table(TRANSACTIONS)?;
        get_json(&transactions, &reference)
    }

    fn pending_deposits(&self) -> StoreResult<Vec<Transaction>> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(PENDING_DEPOSITS)?;
        let transactions = read_txn.open_table(TRANSACTIONS)?;

        let mut records = Vec::new();
        for item in pending.iter()? {
            let (_, reference) = item?;
            if let Some(record) = get_json::<Transaction>(&transactions, reference.value())? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn resolve_deposit(
        &self,
        reference: &str,
        resolution: &DepositResolution,
    ) -> StoreResult<DepositOutcome> {
        let write_txn = self.db.begin_write()?;
        let mut record: Transaction = {
            let transactions = write_txn.open_table(TRANSACTIONS)?;
            get_json(&transactions, reference)?
        }
        .ok_or_else(|| StoreError::TransactionNotFound(reference.to_string()))?;

        if record.status.is_terminal() {
            // Nothing written; dropping the transaction aborts it.
            return Ok(DepositOutcome::unchanged(record));
        }

        let mut credited_balance = None;
        let transitioned = match resolution {
            DepositResolution::Succeeded {
                amount,
                paid_at,
                provider_status,
            } => {
                let (balance, _) = apply_in(
                    &write_txn,
                    &deposit_entry_key(reference),
                    &record.owner_user_id,
                    BalanceChange::Credit(amount.get()),
                )?;
                record.mark_success(*paid_at, provider_status.clone());
                credited_balance = Some(balance);
                true
            }
            DepositResolution::Failed {
                paid_at,
                provider_status,
            } => {
                record.mark_failed(*paid_at, provider_status.clone());
                true
            }
            DepositResolution::Unrecognized { provider_status } => {
                record.note_provider_status(provider_status.clone());
                false
            }
        };

        {
            let mut transactions = write_txn.open_table(TRANSACTIONS)?;
            put_json(&mut transactions, reference, &record)?;
        }
        if transitioned {
            let mut pending = write_txn.open_table(PENDING_DEPOSITS)?;
            let is_current = pending
                .get(record.owner_user_id.as_str())?
                .map(|value| value.value() == reference)
                .unwrap_or(false);
            if is_current {
                pending.remove(record.owner_user_id.as_str())?;
            }
        }
        write_txn.commit()?;

        Ok(DepositOutcome {
            transaction: record,
            credited_balance,
            transitioned,
        })
    }

    fn history(&self, user_id: &str, limit: usize) -> StoreResult<Vec<Transaction>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(USER_TX_INDEX)?;
        let transactions = read_txn.open_table(TRANSACTIONS)?;

        let prefix = make_prefix(user_id);
        let prefix_end = make_prefix_end(user_id);

        let mut results = Vec::with_capacity(limit);
        if limit == 0 {
            return Ok(results);
        }

        for entry in index.range(prefix.as_slice()..prefix_end.as_slice())? {
            let (key, _role) = entry?;
            let Some(reference) = reference_from_index_key(key.value(), prefix.len()) else {
                continue;
            };
            if let Some(record) = get_json::<Transaction>(&transactions, &reference)? {
                results.push(record);
            }
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    // =========================================================================
    // Users
    // =========================================================================

    fn upsert_user(
        &self,
        external_id: &str,
        email: &str,
        display_name: Option<&str>,
    ) -> StoreResult<UserRecord> {
        let write_txn = self.db.begin_write()?;
        let record = {
            let mut users = write_txn.open_table(USERS)?;
            let now = Utc::now();
            let record = match get_json::<UserRecord>(&users, external_id)? {
                Some(mut existing) => {
                    existing.email = email.to_string();
                    if let Some(name) = display_name {
                        existing.display_name = Some(name.to_string());
                    }
                    existing.updated_at = now;
                    existing
                }
                None => UserRecord {
                    user_id: uuid::Uuid::new_v4().to_string(),
                    external_id: external_id.to_string(),
                    email: email.to_string(),
                    display_name: display_name.map(str::to_string),
                    created_at: now,
                    updated_at: now,
                },
            };
            put_json(&mut users, external_id, &record)?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    // =========================================================================
    // Operator holds
    // =========================================================================

    fn put_hold(&self, user_id: &str, reason: &str) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut holds = write_txn.open_table(HELD_WALLETS)?;
            holds.insert(user_id, reason)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn release_hold(&self, user_id: &str) -> StoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut holds = write_txn.open_table(HELD_WALLETS)?;
            let removed = holds.remove(user_id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn holds(&self) -> StoreResult<Vec<(String, String)>> {
        let read_txn = self.db.begin_read()?;
        let holds = read_txn.open_table(HELD_WALLETS)?;
        let mut out = Vec::new();
        for item in holds.iter()? {
            let (user_id, reason) = item?;
            out.push((user_id.value().to_string(), reason.value().to_string()));
        }
        Ok(out)
    }
}

// =============================================================================
// Tests
// =============================================================================
