// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Payment Gateway
//!
//! The ledger only needs two calls from a payment provider: open a checkout
//! session for a deposit and verify its outcome. Inbound confirmation events
//! are authenticated by [`webhook::verify_signature`] before they reach the
//! ledger.

pub mod paystack;
pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use crate::models::ExternalStatus;
pub use paystack::PaystackClient;

/// A checkout session opened with the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    pub reference: String,
    /// Where the payer completes the payment.
    pub authorization_url: String,
}

/// Provider-side view of a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    /// Raw provider status (see [`ExternalStatus::parse`]).
    pub status: String,
    /// Amount the provider actually collected, in the smallest unit.
    pub amount: u64,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment gateway configuration missing: {0}")]
    MissingConfig(String),

    #[error("invalid payment gateway base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("payment gateway request failed: {0}")]
    Request(String),

    #[error("payment gateway response was invalid: {0}")]
    InvalidResponse(String),

    #[error("payment gateway rejected the request: {0}")]
    Api(String),

    #[error("payment {0} unknown to the gateway")]
    NotFound(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a checkout for `amount` (smallest unit) paid by `payer_email`.
    async fn initialize_payment(
        &self,
        amount: u64,
        payer_email: &str,
    ) -> Result<PaymentSession, GatewayError>;

    async fn verify_payment(&self, reference: &str) -> Result<PaymentVerification, GatewayError>;
}
