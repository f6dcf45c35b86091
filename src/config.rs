// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! by the ledger. Configuration is loaded from the environment once at
//! startup by [`LedgerConfig::from_env`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding `ledger.redb` | `/data` |
//! | `STORE_TIMEOUT_MS` | Bound on one store operation or lock wait | `5000` |
//! | `STORE_RETRY_ATTEMPTS` | Attempts for retryable store failures | `3` |
//! | `STORE_RETRY_BASE_DELAY_MS` | First backoff delay | `50` |
//! | `STORE_RETRY_MAX_DELAY_MS` | Backoff ceiling | `1000` |
//! | `HISTORY_MAX_LIMIT` | Cap on history page size | `100` |
//! | `HISTORY_DEFAULT_LIMIT` | Page size when none is given | `50` |
//! | `MIN_DEPOSIT_AMOUNT` | Minimum deposit accepted over HTTP | `100` |
//! | `DEPOSIT_POLL_INTERVAL_SECS` | Pending deposit sweep interval | `30` |
//! | `PAYSTACK_SECRET_KEY` | Gateway API secret | Required for deposits |
//! | `PAYSTACK_WEBHOOK_SECRET` | Webhook HMAC secret | `PAYSTACK_SECRET_KEY` |
//! | `PAYSTACK_BASE_URL` | Gateway base URL | `https://api.paystack.co` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//!
//! Malformed numeric values fall back to the default with a warning.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::logging::LogFormat;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const STORE_TIMEOUT_MS_ENV: &str = "STORE_TIMEOUT_MS";
pub const STORE_RETRY_ATTEMPTS_ENV: &str = "STORE_RETRY_ATTEMPTS";
pub const STORE_RETRY_BASE_DELAY_MS_ENV: &str = "STORE_RETRY_BASE_DELAY_MS";
pub const STORE_RETRY_MAX_DELAY_MS_ENV: &str = "STORE_RETRY_MAX_DELAY_MS";
pub const HISTORY_MAX_LIMIT_ENV: &str = "HISTORY_MAX_LIMIT";
pub const HISTORY_DEFAULT_LIMIT_ENV: &str = "HISTORY_DEFAULT_LIMIT";
pub const MIN_DEPOSIT_AMOUNT_ENV: &str = "MIN_DEPOSIT_AMOUNT";
pub const DEPOSIT_POLL_INTERVAL_SECS_ENV: &str = "DEPOSIT_POLL_INTERVAL_SECS";
pub const PAYSTACK_SECRET_KEY_ENV: &str = "PAYSTACK_SECRET_KEY";
pub const PAYSTACK_WEBHOOK_SECRET_ENV: &str = "PAYSTACK_WEBHOOK_SECRET";
pub const PAYSTACK_BASE_URL_ENV: &str = "PAYSTACK_BASE_URL";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "/data";

/// File name of the ledger database inside the data directory.
pub const LEDGER_DB_FILE: &str = "ledger.redb";

pub const DEFAULT_PAYSTACK_BASE_URL: &str = "https://api.paystack.co";

/// Backoff settings for retryable store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
        }
    }
}

/// Payment gateway credentials.
#[derive(Clone, Default)]
pub struct PaystackSettings {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub base_url: String,
}

impl std::fmt::Debug for PaystackSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaystackSettings")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Ledger configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub data_dir: PathBuf,
    pub store_timeout: Duration,
    pub retry: RetrySettings,
    pub history_max_limit: usize,
    pub history_default_limit: usize,
    pub min_deposit_amount: u64,
    pub deposit_poll_interval: Duration,
    pub paystack: PaystackSettings,
    pub log_format: LogFormat,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            store_timeout: Duration::from_millis(5_000),
            retry: RetrySettings::default(),
            history_max_limit: 100,
            history_default_limit: 50,
            min_deposit_amount: 100,
            deposit_poll_interval: Duration::from_secs(30),
            paystack: PaystackSettings {
                secret_key: None,
                webhook_secret: None,
                base_url: DEFAULT_PAYSTACK_BASE_URL.to_string(),
            },
            log_format: LogFormat::Pretty,
        }
    }
}

impl LedgerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let secret_key = non_empty(PAYSTACK_SECRET_KEY_ENV);
        let webhook_secret = non_empty(PAYSTACK_WEBHOOK_SECRET_ENV).or_else(|| secret_key.clone());

        let mut history_default_limit =
            parse_or(&lookup, HISTORY_DEFAULT_LIMIT_ENV, defaults.history_default_limit);
        let history_max_limit =
            parse_or(&lookup, HISTORY_MAX_LIMIT_ENV, defaults.history_max_limit).max(1);
        if history_default_limit > history_max_limit {
            history_default_limit = history_max_limit;
        }

        Self {
            data_dir: non_empty(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            store_timeout: Duration::from_millis(
                parse_or(&lookup, STORE_TIMEOUT_MS_ENV, 5_000u64).max(1),
            ),
            retry: RetrySettings {
                attempts: parse_or(&lookup, STORE_RETRY_ATTEMPTS_ENV, defaults.retry.attempts),
                base_delay_ms: parse_or(
                    &lookup,
                    STORE_RETRY_BASE_DELAY_MS_ENV,
                    defaults.retry.base_delay_ms,
                ),
                max_delay_ms: parse_or(
                    &lookup,
                    STORE_RETRY_MAX_DELAY_MS_ENV,
                    defaults.retry.max_delay_ms,
                ),
            },
            history_max_limit,
            history_default_limit,
            min_deposit_amount: parse_or(&lookup, MIN_DEPOSIT_AMOUNT_ENV, defaults.min_deposit_amount),
            deposit_poll_interval: Duration::from_secs(
                parse_or(&lookup, DEPOSIT_POLL_INTERVAL_SECS_ENV, 30u64).max(1),
            ),
            paystack: PaystackSettings {
                secret_key,
                webhook_secret,
                base_url: non_empty(PAYSTACK_BASE_URL_ENV)
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.paystack.base_url),
            },
            log_format: lookup(LOG_FORMAT_ENV)
                .map(|v| LogFormat::from_env_value(&v))
                .unwrap_or(defaults.log_format),
        }
    }

    /// Path of the redb file.
    pub fn ledger_db_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_DB_FILE)
    }

    /// Defaults rooted at `data_dir`, for embedding and tests.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match lookup(name) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    variable = name,
                    value = %raw,
                    default = %default,
                    "Malformed configuration value, using default"
                );
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = LedgerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.store_timeout, Duration::from_millis(5_000));
        assert_eq!(config.history_max_limit, 100);
        assert_eq!(config.history_default_limit, 50);
        assert_eq!(config.min_deposit_amount, 100);
        assert_eq!(config.paystack.base_url, DEFAULT_PAYSTACK_BASE_URL);
        assert!(config.paystack.secret_key.is_none());
        assert_eq!(config.ledger_db_path(), PathBuf::from("/data/ledger.redb"));
    }

    #[test]
    fn malformed_numbers_fall_back() {
        let config = LedgerConfig::from_lookup(lookup(&[
            (STORE_TIMEOUT_MS_ENV, "soon"),
            (HISTORY_MAX_LIMIT_ENV, "-4"),
            (STORE_RETRY_ATTEMPTS_ENV, "7"),
        ]));
        assert_eq!(config.store_timeout, Duration::from_millis(5_000));
        assert_eq!(config.history_max_limit, 100);
        assert_eq!(config.retry.attempts, 7);
    }

    #[test]
    fn webhook_secret_falls_back_to_api_secret() {
        let config = LedgerConfig::from_lookup(lookup(&[(PAYSTACK_SECRET_KEY_ENV, "sk_test_1")]));
        assert_eq!(config.paystack.webhook_secret.as_deref(), Some("sk_test_1"));

        let config = LedgerConfig::from_lookup(lookup(&[
            (PAYSTACK_SECRET_KEY_ENV, "sk_test_1"),
            (PAYSTACK_WEBHOOK_SECRET_ENV, "whsec"),
        ]));
        assert_eq!(config.paystack.webhook_secret.as_deref(), Some("whsec"));
    }

    #[test]
    fn default_limit_never_exceeds_cap() {
        let config = LedgerConfig::from_lookup(lookup(&[
            (HISTORY_MAX_LIMIT_ENV, "20"),
            (HISTORY_DEFAULT_LIMIT_ENV, "50"),
        ]));
        assert_eq!(config.history_default_limit, 20);
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let config = LedgerConfig::from_lookup(lookup(&[(PAYSTACK_SECRET_KEY_ENV, "sk_live_secret")]));
        assert!(!format!("{config:?}").contains("sk_live_secret"));
    }
}
