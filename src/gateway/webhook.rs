// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Inbound payment events.
//!
//! The provider signs the raw request body with HMAC-SHA512 under the
//! shared secret and sends the hex digest in `x-paystack-signature`.
//! Verification must run on the exact bytes received, before parsing.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;

/// Header carrying the hex HMAC of the body.
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

type HmacSha512 = Hmac<Sha512>;

/// Constant-time check of `signature_hex` against HMAC-SHA512(secret, body).
pub fn verify_signature(secret: &str, raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

/// Hex HMAC-SHA512 of a body, as the provider computes it.
pub fn sign(secret: &str, raw_body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// A verified confirmation event, reduced to what the ledger consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationEvent {
    /// Event name, e.g. `charge.success`.
    pub event: String,
    pub reference: String,
    pub status: String,
    pub amount: u64,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    event: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    reference: String,
    status: String,
    amount: u64,
    #[serde(default, alias = "paidAt")]
    paid_at: Option<DateTime<Utc>>,
}

pub fn parse_event(raw_body: &[u8]) -> Result<ConfirmationEvent, serde_json::Error> {
    let raw: RawEvent = serde_json::from_slice(raw_body)?;
    Ok(ConfirmationEvent {
        event: raw.event,
        reference: raw.data.reference,
        status: raw.data.status,
        amount: raw.data.amount,
        paid_at: raw.data.paid_at,
    })
}
