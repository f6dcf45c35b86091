// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Caller context supplied by the upstream authorization layer.
//!
//! Authentication happens before the router. Whatever authenticates the
//! request (session token, API key) inserts a [`Caller`] into the request
//! extensions; handlers extract it and check scopes, nothing more.
//!
//! ```rust,ignore
//! async fn handler(caller: Caller) -> Result<Json<Value>, ApiError> {
//!     caller.require(Scope::Read)?;
//! }
//! ```

use std::collections::BTreeSet;

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::Deserialize;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Deposit,
    Transfer,
    Read,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Transfer => "transfer",
            Self::Read => "read",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub email: String,
    pub scopes: BTreeSet<Scope>,
}

impl Caller {
    pub fn new(
        user_id: impl Into<String>,
        email: impl Into<String>,
        scopes: impl IntoIterator<Item = Scope>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            scopes: scopes.into_iter().collect(),
        }
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }

    pub fn require(&self, scope: Scope) -> Result<(), ApiError> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Missing required permission: {}",
                scope.as_str()
            )))
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    #[tokio::test]
    async fn missing_caller_is_unauthorized() {
        let (mut parts, _) = Request::new(()).into_parts();
        let err = Caller::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn caller_from_extensions() {
        let mut request = Request::new(());
        request
            .extensions_mut()
            .insert(Caller::new("alice", "alice@example.com", [Scope::Read]));
        let (mut parts, _) = request.into_parts();

        let caller = Caller::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(caller.user_id, "alice");
        assert!(caller.require(Scope::Read).is_ok());
        assert_eq!(
            caller.require(Scope::Transfer).unwrap_err().status,
            StatusCode::FORBIDDEN
        );
    }
}
