// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

pub mod caller;
pub mod wallet;

pub use caller::{Caller, Scope};

pub fn router(state: AppState) -> Router {
    let wallet_routes = Router::new()
        .route("/deposit", post(wallet::deposit))
        .route("/paystack/webhook", post(wallet::paystack_webhook))
        .route("/paystack/{reference}/status", get(wallet::deposit_status))
        .route("/balance", get(wallet::balance))
        .route("/transfer", post(wallet::transfer))
        .route("/transactions", get(wallet::transactions))
        .with_state(state);

    Router::new()
        .nest("/v1/wallet", wallet_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
