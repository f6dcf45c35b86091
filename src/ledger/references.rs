// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identifier generation and journal entry keys.

use chrono::Utc;
use uuid::Uuid;

/// Opaque wallet identifier: 32 random lowercase alphanumerics.
pub fn new_wallet_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn random_suffix() -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(8);
    hex
}

/// `TRF_<unix millis>_<8 hex>`.
pub fn new_transfer_reference() -> String {
    format!("TRF_{}_{}", Utc::now().timestamp_millis(), random_suffix())
}

/// `DEP_<unix millis>_<8 hex>`.
pub fn new_deposit_reference() -> String {
    format!("DEP_{}_{}", Utc::now().timestamp_millis(), random_suffix())
}

/// Keys of the journal entries making up one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferKeys {
    pub debit: String,
    pub refund: String,
    pub credit: String,
}

impl TransferKeys {
    pub fn for_reference(reference: &str) -> Self {
        Self {
            debit: format!("{reference}:debit"),
            refund: format!("{reference}:refund"),
            credit: format!("{reference}:credit"),
        }
    }
}
