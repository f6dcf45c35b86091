// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Test doubles: a fault-injecting backend and a scripted payment gateway.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::gateway::{GatewayError, PaymentGateway, PaymentSession, PaymentVerification};
use crate::models::{DepositOutcome, DepositResolution, Transaction, UserRecord, Wallet};
use crate::storage::{
    BalanceChange, JournalEntry, LedgerBackend, LedgerDb, Reversal, StoreError, StoreResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail without touching storage.
    BeforeCommit,
    /// Perform the operation, then report failure (a lost acknowledgement).
    AfterCommit,
    /// Block the calling thread, then perform the operation.
    Stall(Duration),
}

#[derive(Debug)]
struct Rule {
    key_contains: Option<String>,
    fault: Fault,
    remaining: usize,
}

#[derive(Default)]
struct Rules(Mutex<Vec<Rule>>);

impl Rules {
    fn push(&self, key_contains: Option<&str>, fault: Fault, times: usize) {
        self.0.lock().unwrap().push(Rule {
            key_contains: key_contains.map(str::to_string),
            fault,
            remaining: times,
        });
    }

    fn take(&self, key: &str) -> Option<Fault> {
        let mut rules = self.0.lock().unwrap();
        let rule = rules.iter_mut().find(|rule| {
            rule.remaining > 0
                && rule
                    .key_contains
                    .as_deref()
                    .map(|needle| key.contains(needle))
                    .unwrap_or(true)
        })?;
        rule.remaining -= 1;
        Some(rule.fault)
    }
}

fn injected() -> StoreError {
    StoreError::Unavailable("injected fault".to_string())
}

fn run<T>(fault: Option<Fault>, op: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
    match fault {
        None => op(),
        Some(Fault::BeforeCommit) => Err(injected()),
        Some(Fault::AfterCommit) => {
            op()?;
            Err(injected())
        }
        Some(Fault::Stall(delay)) => {
            std::thread::sleep(delay);
            op()
        }
    }
}

/// Wraps [`LedgerDb`] and fails selected calls.
pub struct FaultyBackend {
    inner: LedgerDb,
    reads: Rules,
    applies: Rules,
    reversals: Rules,
    resolutions: Rules,
}

impl FaultyBackend {
    pub fn new(inner: LedgerDb) -> Self {
        Self {
            inner,
            reads: Rules::default(),
            applies: Rules::default(),
            reversals: Rules::default(),
            resolutions: Rules::default(),
        }
    }

    /// Stall wallet lookups by user id.
    pub fn stall_reads(&self, delay: Duration, times: usize) {
        self.reads.push(None, Fault::Stall(delay), times);
    }

    pub fn stall_applies(&self, delay: Duration, times: usize) {
        self.applies.push(None, Fault::Stall(delay), times);
    }

    pub fn fail_next_apply(&self, fault: Fault) {
        self.applies.push(None, fault, 1);
    }

    pub fn fail_applies(&self, fault: Fault, times: usize) {
        self.applies.push(None, fault, times);
    }

    /// Fail applies whose entry key contains `needle`.
    pub fn fail_applies_matching(&self, needle: &str, fault: Fault, times: usize) {
        self.applies.push(Some(needle), fault, times);
    }

    pub fn fail_reversals_matching(&self, needle: &str, times: usize) {
        self.reversals.push(Some(needle), Fault::BeforeCommit, times);
    }

    pub fn fail_resolutions(&self, fault: Fault, times: usize) {
        self.resolutions.push(None, fault, times);
    }
}

impl LedgerBackend for FaultyBackend {
    fn wallet_by_user(&self, user_id: &str) -> StoreResult<Option<Wallet>> {
        run(self.reads.take(user_id), || self.inner.wallet_by_user(user_id))
    }

    fn wallet_by_id(&self, wallet_id: &str) -> StoreResult<Option<Wallet>> {
        self.inner.wallet_by_id(wallet_id)
    }

    fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<()> {
        self.inner.insert_wallet(wallet)
    }

    fn apply_entry(&self, key: &str, user_id: &str, change: BalanceChange) -> StoreResult<u64> {
        run(self.applies.take(key), || self.inner.apply_entry(key, user_id, change))
    }

    fn apply_entry_with_record(
        &self,
        key: &str,
        user_id: &str,
        change: BalanceChange,
        record: &Transaction,
    ) -> StoreResult<u64> {
        run(self.applies.take(key), || {
            self.inner.apply_entry_with_record(key, user_id, change, record)
        })
    }

    fn reverse_entry(&self, key: &str, reversal_key: &str) -> StoreResult<Reversal> {
        run(self.reversals.take(key), || self.inner.reverse_entry(key, reversal_key))
    }

    fn void_unless_applied(&self, key: &str) -> StoreResult<Option<JournalEntry>> {
        run(self.reversals.take(key), || self.inner.void_unless_applied(key))
    }

    fn journal_entry(&self, key: &str) -> StoreResult<Option<JournalEntry>> {
        self.inner.journal_entry(key)
    }

    fn transaction(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        self.inner.transaction(reference)
    }

    fn insert_pending_deposit(&self, record: &Transaction) -> StoreResult<()> {
        self.inner.insert_pending_deposit(record)
    }

    fn pending_deposit_for(&self, user_id: &str) -> StoreResult<Option<Transaction>> {
        self.inner.pending_deposit_for(user_id)
    }

    fn pending_deposits(&self) -> StoreResult<Vec<Transaction>> {
        self.inner.pending_deposits()
    }

    fn resolve_deposit(
        &self,
        reference: &str,
        resolution: &DepositResolution,
    ) -> StoreResult<DepositOutcome> {
        run(self.resolutions.take(reference), || {
            self.inner.resolve_deposit(reference, resolution)
        })
    }

    fn history(&self, user_id: &str, limit: usize) -> StoreResult<Vec<Transaction>> {
        self.inner.history(user_id, limit)
    }

    fn upsert_user(
        &self,
        external_id: &str,
        email: &str,
        display_name: Option<&str>,
    ) -> StoreResult<UserRecord> {
        self.inner.upsert_user(external_id, email, display_name)
    }

    fn put_hold(&self, user_id: &str, reason: &str) -> StoreResult<()> {
        self.inner.put_hold(user_id, reason)
    }

    fn release_hold(&self, user_id: &str) -> StoreResult<bool> {
        self.inner.release_hold(user_id)
    }

    fn holds(&self) -> StoreResult<Vec<(String, String)>> {
        self.inner.holds()
    }
}

/// Scripted gateway: hands out sequential references and answers
/// verification from a table.
#[derive(Default)]
pub struct StubGateway {
    pub initialized: Mutex<Vec<(u64, String)>>,
    verifications: Mutex<Vec<(String, PaymentVerification)>>,
    pub fail_initialize: Mutex<bool>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_verification(&self, reference: &str, status: &str, amount: u64, paid_at: Option<DateTime<Utc>>) {
        let mut table = self.verifications.lock().unwrap();
        table.retain(|(r, _)| r != reference);
        table.push((
            reference.to_string(),
            PaymentVerification {
                status: status.to_string(),
                amount,
                paid_at,
            },
        ));
    }

    pub fn initialize_count(&self) -> usize {
        self.initialized.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn initialize_payment(
        &self,
        amount: u64,
        payer_email: &str,
    ) -> Result<PaymentSession, GatewayError> {
        if *self.fail_initialize.lock().unwrap() {
            return Err(GatewayError::Api("stub initialize failure".to_string()));
        }
        let mut initialized = self.initialized.lock().unwrap();
        initialized.push((amount, payer_email.to_string()));
        let reference = format!("STUB_{}", initialized.len());
        Ok(PaymentSession {
            authorization_url: format!("https://checkout.stub/{reference}"),
            reference,
        })
    }

    async fn verify_payment(&self, reference: &str) -> Result<PaymentVerification, GatewayError> {
        self.verifications
            .lock()
            .unwrap()
            .iter()
            .find(|(r, _)| r == reference)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| GatewayError::NotFound(reference.to_string()))
    }
}
