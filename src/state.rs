// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::config::LedgerConfig;
use crate::gateway::PaymentGateway;
use crate::ledger::Ledger;

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    /// `None` when no gateway credentials are configured; deposit routes
    /// then answer `gateway_unavailable`.
    pub gateway: Option<Arc<dyn PaymentGateway>>,
    pub webhook_secret: Option<String>,
    pub min_deposit_amount: u64,
    pub history_default_limit: usize,
}

impl AppState {
    pub fn new(
        ledger: Arc<Ledger>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            webhook_secret: config.paystack.webhook_secret.clone(),
            min_deposit_amount: config.min_deposit_amount,
            history_default_limit: config.history_default_limit,
        }
    }

    pub fn gateway(&self) -> Option<&dyn PaymentGateway> {
        self.gateway.as_deref()
    }
}
