// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custodial Ledger - Wallet Ledger Engine
//!
//! Per-user wallet balances, deposits confirmed through a payment gateway,
//! and wallet-to-wallet transfers. The engine guarantees that money is never
//! created, destroyed or duplicated under concurrent requests, webhook
//! retries and partial store failures.
//!
//! ## Modules
//!
//! - `ledger` - Wallet ledger engine and its `Ledger` lifecycle handle
//! - `storage` - Durable keyed journal on redb
//! - `gateway` - Payment gateway client and webhook verification
//! - `poller` - Background verification of pending deposits
//! - `api` - Thin HTTP boundary (Axum)
//!
//! ## Embedding
//!
//! ```rust,ignore
//! let config = LedgerConfig::from_env();
//! logging::init(config.log_format);
//! let ledger = Arc::new(Ledger::open(&config)?);
//! let gateway: Option<Arc<dyn PaymentGateway>> = PaystackClient::from_settings(&config.paystack)
//!     .ok()
//!     .map(|client| Arc::new(client) as _);
//! let app = api::router(AppState::new(ledger.clone(), gateway, &config));
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod poller;
pub mod state;
pub mod storage;
