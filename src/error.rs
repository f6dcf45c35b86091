// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy for the ledger engine and its HTTP boundary.
//!
//! [`LedgerError`] is what every engine operation returns. Each variant maps
//! to a stable [`ErrorKind`] code. [`ApiError`] is the boundary form: status,
//! code and a human message, with no internal detail for store failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::storage::StoreError;

/// Machine-readable error kind exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidAmount,
    InsufficientFunds,
    RecipientNotFound,
    SelfTransfer,
    DepositAlreadyPending,
    TransactionNotFound,
    WalletNotFound,
    DuplicateReference,
    StoreUnavailable,
    Irreconcilable,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidAmount => "invalid_amount",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::RecipientNotFound => "recipient_not_found",
            ErrorKind::SelfTransfer => "self_transfer",
            ErrorKind::DepositAlreadyPending => "deposit_already_pending",
            ErrorKind::TransactionNotFound => "transaction_not_found",
            ErrorKind::WalletNotFound => "wallet_not_found",
            ErrorKind::DuplicateReference => "duplicate_reference",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::Irreconcilable => "irreconcilable",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain error returned by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient funds: balance {available}, requested {requested}")]
    InsufficientFunds { available: u64, requested: u64 },

    #[error("recipient wallet {0} not found")]
    RecipientNotFound(String),

    #[error("cannot transfer to your own wallet")]
    SelfTransfer,

    #[error("deposit {reference} is already pending")]
    DepositAlreadyPending {
        reference: String,
        authorization_handle: Option<String>,
    },

    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error("no wallet for user {0}")]
    WalletNotFound(String),

    #[error("reference {0} is already in use")]
    DuplicateReference(String),

    /// Transient; the caller may retry.
    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(String),

    /// Compensation failed; the affected wallets are held for an operator.
    #[error("irreconcilable ledger state for {reference}: {detail}")]
    Irreconcilable { reference: String, detail: String },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount(_) => ErrorKind::InvalidAmount,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::RecipientNotFound(_) => ErrorKind::RecipientNotFound,
            LedgerError::SelfTransfer => ErrorKind::SelfTransfer,
            LedgerError::DepositAlreadyPending { .. } => ErrorKind::DepositAlreadyPending,
            LedgerError::TransactionNotFound(_) => ErrorKind::TransactionNotFound,
            LedgerError::WalletNotFound(_) => ErrorKind::WalletNotFound,
            LedgerError::DuplicateReference(_) => ErrorKind::DuplicateReference,
            LedgerError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            LedgerError::Irreconcilable { .. } => ErrorKind::Irreconcilable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StoreUnavailable(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::InsufficientFunds {
                available,
                requested,
            } => LedgerError::InsufficientFunds {
                available,
                requested,
            },
            StoreError::BalanceOverflow(user_id) => {
                LedgerError::InvalidAmount(format!("credit would overflow balance of {user_id}"))
            }
            StoreError::WalletNotFound(user_id) => LedgerError::WalletNotFound(user_id),
            StoreError::TransactionNotFound(reference) => {
                LedgerError::TransactionNotFound(reference)
            }
            StoreError::ReferenceTaken(reference) => LedgerError::DuplicateReference(reference),
            StoreError::PendingDepositExists { reference, .. } => {
                LedgerError::DepositAlreadyPending {
                    reference,
                    authorization_handle: None,
                }
            }
            other => LedgerError::StoreUnavailable(other.to_string()),
        }
    }
}

// =============================================================================
// HTTP boundary error
// =============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error_code: &'static str,
    pub message: String,
    /// Extra fields merged into the body (e.g. the pending deposit handle).
    pub details: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    error_code: &'static str,
    #[serde(flatten)]
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_code,
            message: message.into(),
            details: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn invalid_signature() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "invalid_signature",
            "Invalid webhook signature",
        )
    }

    pub fn gateway_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "gateway_unavailable", message)
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<LedgerError> for ApiError {
    fn from(error: LedgerError) -> Self {
        let code = error.kind().as_str();
        match error {
            LedgerError::InvalidAmount(message) => {
                ApiError::new(StatusCode::BAD_REQUEST, code, message)
            }
            LedgerError::InsufficientFunds { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, code, "Insufficient balance")
            }
            LedgerError::RecipientNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, code, "Recipient wallet not found")
            }
            LedgerError::SelfTransfer => ApiError::new(
                StatusCode::BAD_REQUEST,
                code,
                "Cannot transfer to your own wallet",
            ),
            LedgerError::DepositAlreadyPending {
                reference,
                authorization_handle,
            } => ApiError::new(
                StatusCode::CONFLICT,
                code,
                "You already have a pending deposit. Complete it or wait for it to expire.",
            )
            .with_details(serde_json::json!({
                "reference": reference,
                "authorization_url": authorization_handle,
            })),
            LedgerError::TransactionNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, code, "Transaction not found")
            }
            LedgerError::WalletNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, code, "Wallet not found")
            }
            LedgerError::DuplicateReference(_) => {
                ApiError::new(StatusCode::CONFLICT, code, "Reference already in use")
            }
            LedgerError::StoreUnavailable(detail) => {
                tracing::warn!(error = %detail, "ledger store unavailable");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    code,
                    "Ledger temporarily unavailable, retry later",
                )
            }
            LedgerError::Irreconcilable { reference, .. } => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                "Operation could not be completed; support has been notified",
            )
            .with_details(serde_json::json!({ "reference": reference })),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.error_code,
            details: self.details,
        });
        (self.status, body).into_response()
    }
}
