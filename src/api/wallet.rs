// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet endpoints: deposits, gateway webhook, balance, transfers and history.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::caller::{Caller, Scope};
use crate::error::{ApiError, LedgerError, LedgerResult};
use crate::gateway::{webhook, GatewayError};
use crate::ledger::deposits::DepositFlowError;
use crate::models::{Amount, Transaction, TransactionKind, TransactionStatus};
use crate::state::AppState;

impl From<DepositFlowError> for ApiError {
    fn from(error: DepositFlowError) -> Self {
        match error {
            DepositFlowError::Ledger(e) => e.into(),
            DepositFlowError::Gateway(e) => e.into(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        warn!(error = %error, "payment gateway call failed");
        ApiError::gateway_unavailable("Payment provider request failed")
    }
}

/// Largest float that still holds every integer below it exactly (2^53).
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// Amount in the smallest currency unit. `5000.0` counts as an integer.
fn requested_amount(value: &Value) -> LedgerResult<Amount> {
    if let Some(whole) = value.as_u64() {
        return Amount::new(whole);
    }
    let whole = value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() <= MAX_EXACT_FLOAT)
            .map(|f| f as i64)
    });
    match whole {
        Some(whole) => Amount::try_from(whole),
        None => Err(LedgerError::InvalidAmount(
            "Amount must be an integer in the smallest currency unit (e.g. kobo)".to_string(),
        )),
    }
}

// =============================================================================
// Deposits
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    #[serde(default)]
    pub amount: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct DepositResponse {
    pub reference: String,
    pub authorization_url: Option<String>,
}

/// `POST /v1/wallet/deposit`
pub async fn deposit(
    caller: Caller,
    State(state): State<AppState>,
    Json(request): Json<DepositRequest>,
) -> Result<(StatusCode, Json<DepositResponse>), ApiError> {
    caller.require(Scope::Deposit)?;

    let min = state.min_deposit_amount;
    let amount = requested_amount(&request.amount.unwrap_or(Value::Null))?.get();
    if amount < min {
        return Err(LedgerError::InvalidAmount(format!("Amount must be at least {min}.")).into());
    }

    let gateway = state
        .gateway()
        .ok_or_else(|| ApiError::gateway_unavailable("Payment provider is not configured"))?;

    let record = state
        .ledger
        .deposits()
        .start_deposit(&caller.user_id, &caller.email, amount, gateway)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(DepositResponse {
            reference: record.reference,
            authorization_url: record.authorization_handle,
        }),
    ))
}

/// `POST /v1/wallet/paystack/webhook`
///
/// Signature is checked on the raw body before anything is parsed.
pub async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let secret = state.webhook_secret.as_deref().ok_or_else(|| {
        warn!("webhook received but no webhook secret is configured");
        ApiError::invalid_signature()
    })?;
    let signature = headers
        .get(webhook::SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if !webhook::verify_signature(secret, &body, signature) {
        warn!("invalid webhook signature");
        return Err(ApiError::invalid_signature());
    }

    let event = webhook::parse_event(&body)
        .map_err(|e| ApiError::bad_request(format!("Malformed webhook payload: {e}")))?;
    info!(
        event = %event.event,
        reference = %event.reference,
        status = %event.status,
        "webhook received"
    );

    state
        .ledger
        .deposits()
        .apply_confirmation(&event.reference, &event.status, event.amount, event.paid_at)
        .await?;

    Ok(Json(serde_json::json!({ "status": true })))
}

#[derive(Debug, Serialize)]
pub struct DepositStatusResponse {
    pub reference: String,
    pub status: TransactionStatus,
    pub amount: u64,
    pub paid_at: Option<DateTime<Utc>>,
}

/// `GET /v1/wallet/paystack/{reference}/status`
///
/// Re-verifies a pending deposit with the gateway before answering.
pub async fn deposit_status(
    caller: Caller,
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<DepositStatusResponse>, ApiError> {
    caller.require(Scope::Read)?;

    let deposits = state.ledger.deposits();
    let record = deposits.transaction(&reference).await?;
    if record.kind != TransactionKind::Deposit || record.owner_user_id != caller.user_id {
        return Err(LedgerError::TransactionNotFound(reference).into());
    }

    let record = match state.gateway() {
        Some(gateway) if !record.status.is_terminal() => {
            deposits.refresh_status(&reference, gateway).await?.transaction
        }
        _ => record,
    };

    Ok(Json(DepositStatusResponse {
        reference: record.reference,
        status: record.status,
        amount: record.amount,
        paid_at: record.paid_at,
    }))
}

// =============================================================================
// Balance and transfers
// =============================================================================

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: u64,
    pub wallet_id: String,
}

/// `GET /v1/wallet/balance`
pub async fn balance(
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<BalanceResponse>, ApiError> {
    caller.require(Scope::Read)?;
    let wallet = state.ledger.wallet(&caller.user_id).await?;
    Ok(Json(BalanceResponse {
        balance: wallet.balance,
        wallet_id: wallet.wallet_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    #[serde(default, alias = "wallet_number", alias = "recipient_wallet_id")]
    pub wallet_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub reference: String,
    pub new_balance: u64,
}

/// `POST /v1/wallet/transfer`
pub async fn transfer(
    caller: Caller,
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    caller.require(Scope::Transfer)?;

    let Some(wallet_id) = request.wallet_id.filter(|id| !id.trim().is_empty()) else {
        return Err(ApiError::bad_request("wallet_id is required"));
    };
    // Checked by the engine, after the recipient lookup.
    let amount = requested_amount(&request.amount.unwrap_or(Value::Null));

    let receipt = state
        .ledger
        .transfer_requested(&caller.user_id, wallet_id.trim(), amount)
        .await?;

    Ok(Json(TransferResponse {
        status: "success",
        message: "Transfer completed",
        reference: receipt.reference,
        new_balance: receipt.sender_new_balance,
    }))
}

// =============================================================================
// History
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub reference: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: u64,
    pub status: TransactionStatus,
    /// `debit` when the caller paid, `credit` when the caller received.
    pub direction: &'static str,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TransactionView {
    fn for_user(record: Transaction, user_id: &str) -> Self {
        let direction = match record.kind {
            TransactionKind::Deposit => "credit",
            TransactionKind::Withdrawal => "debit",
            TransactionKind::Transfer if record.owner_user_id == user_id => "debit",
            TransactionKind::Transfer => "credit",
        };
        Self {
            reference: record.reference,
            kind: record.kind,
            amount: record.amount,
            status: record.status,
            direction,
            paid_at: record.paid_at,
            created_at: record.created_at,
        }
    }
}

/// `GET /v1/wallet/transactions?limit=`
///
/// A missing, zero or unparsable limit falls back to the default page size.
pub async fn transactions(
    caller: Caller,
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<TransactionView>>, ApiError> {
    caller.require(Scope::Read)?;
    let limit = query
        .limit
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(state.history_default_limit);

    let records = state.ledger.history().history(&caller.user_id, limit).await?;
    Ok(Json(
        records
            .into_iter()
            .map(|record| TransactionView::for_user(record, &caller.user_id))
            .collect(),
    ))
}
