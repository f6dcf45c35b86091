// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Data Models
//!
//! Typed entities persisted by the ledger store and returned by the engine.
//!
//! ## Money
//!
//! All amounts and balances are `u64` counts of the smallest currency unit
//! (kobo, cents). There is no floating point anywhere in the balance path.
//! [`Amount`] is the validated, strictly positive form accepted by every
//! mutating operation.
//!
//! ## Model Categories
//!
//! - **Wallet**: one per user, addressed by an opaque wallet id
//! - **Transaction**: one ledger-affecting event, keyed by its reference
//! - **UserRecord**: internal identity mapped from the identity provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

// =============================================================================
// Amount
// =============================================================================

/// A strictly positive amount in the smallest currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    /// Validate a raw amount. Zero is rejected with `InvalidAmount`.
    pub fn new(value: u64) -> Result<Self, LedgerError> {
        if value == 0 {
            return Err(LedgerError::InvalidAmount(
                "amount must be a positive integer".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value <= 0 {
            return Err(LedgerError::InvalidAmount(
                "amount must be a positive integer".to_string(),
            ));
        }
        Amount::new(value as u64)
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Wallet
// =============================================================================

/// Per-user balance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Opaque wallet identifier, used as the transfer address.
    pub wallet_id: String,
    /// Internal id of the owning user (exactly one wallet per user).
    pub owner_user_id: String,
    /// Current balance in the smallest currency unit.
    pub balance: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// A fresh zero-balance wallet.
    pub fn new(wallet_id: String, owner_user_id: String) -> Self {
        let now = Utc::now();
        Self {
            wallet_id,
            owner_user_id,
            balance: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Kind of ledger-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Transfer,
    /// Reserved for payouts; no flow creates it yet.
    Withdrawal,
}

/// Transaction lifecycle status.
///
/// `Pending` moves to `Success` or `Failed` exactly once; terminal states
/// never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Success => write!(f, "success"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Stored transaction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Globally unique reference (idempotency and gateway correlation key).
    pub reference: String,
    pub kind: TransactionKind,
    /// Positive amount in the smallest currency unit.
    pub amount: u64,
    pub status: TransactionStatus,
    /// Initiating user.
    pub owner_user_id: String,
    /// Receiving user, for transfers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_user_id: Option<String>,
    /// External authorization handle (payment page URL) for deposits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_handle: Option<String>,
    /// Last raw status string reported by the payment gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A deposit awaiting gateway confirmation.
    pub fn pending_deposit(
        reference: String,
        owner_user_id: String,
        amount: Amount,
        authorization_handle: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            reference,
            kind: TransactionKind::Deposit,
            amount: amount.get(),
            status: TransactionStatus::Pending,
            owner_user_id,
            counterparty_user_id: None,
            authorization_handle,
            provider_status: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A transfer; both legs are applied synchronously so it is born `Success`.
    pub fn completed_transfer(
        reference: String,
        sender_user_id: String,
        recipient_user_id: String,
        amount: Amount,
    ) -> Self {
        let now = Utc::now();
        Self {
            reference,
            kind: TransactionKind::Transfer,
            amount: amount.get(),
            status: TransactionStatus::Success,
            owner_user_id: sender_user_id,
            counterparty_user_id: Some(recipient_user_id),
            authorization_handle: None,
            provider_status: None,
            paid_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_success(&mut self, paid_at: Option<DateTime<Utc>>, provider_status: String) {
        self.status = TransactionStatus::Success;
        self.paid_at = paid_at.or_else(|| Some(Utc::now()));
        self.provider_status = Some(provider_status);
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, paid_at: Option<DateTime<Utc>>, provider_status: String) {
        self.status = TransactionStatus::Failed;
        self.paid_at = paid_at;
        self.provider_status = Some(provider_status);
        self.updated_at = Utc::now();
    }

    /// Record an unrecognised gateway status without leaving `Pending`.
    pub fn note_provider_status(&mut self, provider_status: String) {
        self.provider_status = Some(provider_status);
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Gateway status
// =============================================================================

/// Interpretation of a payment gateway status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalStatus {
    Success,
    Failed,
    /// Anything else, kept verbatim.
    Other(String),
}

impl ExternalStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => ExternalStatus::Success,
            "failed" | "abandoned" | "reversed" => ExternalStatus::Failed,
            _ => ExternalStatus::Other(raw.to_string()),
        }
    }
}

/// How a pending deposit should be resolved by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositResolution {
    /// Credit `amount` and transition to `Success`.
    Succeeded {
        amount: Amount,
        paid_at: Option<DateTime<Utc>>,
        provider_status: String,
    },
    /// Transition to `Failed` without crediting.
    Failed {
        paid_at: Option<DateTime<Utc>>,
        provider_status: String,
    },
    /// Keep `Pending`, remember the raw status.
    Unrecognized { provider_status: String },
}

/// Result of applying a confirmation to a deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositOutcome {
    /// The transaction after the call (unchanged if it was already terminal).
    pub transaction: Transaction,
    /// New wallet balance when this call credited the wallet.
    pub credited_balance: Option<u64>,
    /// Whether this call moved the transaction out of `Pending`.
    pub transitioned: bool,
}

impl DepositOutcome {
    pub fn unchanged(transaction: Transaction) -> Self {
        Self {
            transaction,
            credited_balance: None,
            transitioned: false,
        }
    }
}

// =============================================================================
// Users
// =============================================================================

/// Internal user record keyed by the identity provider's external id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable internal id; owns the wallet.
    pub user_id: String,
    pub external_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
