// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Paystack REST client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{GatewayError, PaymentGateway, PaymentSession, PaymentVerification};
use crate::config::{PaystackSettings, PAYSTACK_SECRET_KEY_ENV};
use crate::ledger::references::new_deposit_reference;

#[derive(Debug, Clone)]
pub struct PaystackClient {
    base_url: String,
    secret_key: String,
    http: Client,
}

/// Paystack wraps every payload as `{status, message, data}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: u64,
    #[serde(default)]
    paid_at: Option<DateTime<Utc>>,
}

impl PaystackClient {
    pub fn is_configured(settings: &PaystackSettings) -> bool {
        settings
            .secret_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn from_settings(settings: &PaystackSettings) -> Result<Self, GatewayError> {
        let secret_key = settings
            .secret_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| GatewayError::MissingConfig(PAYSTACK_SECRET_KEY_ENV.to_string()))?;

        let base_url: url::Url = settings
            .base_url
            .parse()
            .map_err(|e: url::ParseError| GatewayError::InvalidBaseUrl(e.to_string()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(GatewayError::InvalidBaseUrl(format!(
                "unsupported scheme {}",
                base_url.scheme()
            )));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| GatewayError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            secret_key,
            http,
        })
    }

    pub fn from_env() -> Result<Self, GatewayError> {
        Self::from_settings(&crate::config::LedgerConfig::from_env().paystack)
    }

    async fn read_envelope<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
        reference: &str,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(reference.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("{what} returned {status}: {body}")));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("{what} invalid JSON: {e}")))?;
        if !envelope.status {
            return Err(GatewayError::Api(format!("{what}: {}", envelope.message)));
        }
        envelope
            .data
            .ok_or_else(|| GatewayError::InvalidResponse(format!("{what} response had no data")))
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    async fn initialize_payment(
        &self,
        amount: u64,
        payer_email: &str,
    ) -> Result<PaymentSession, GatewayError> {
        let reference = new_deposit_reference();
        let payload = json!({
            "email": payer_email,
            "amount": amount,
            "reference": reference,
        });

        let response = self
            .http
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Request(format!("initialize failed: {e}")))?;

        let data: InitializeData = Self::read_envelope(response, "initialize", &reference).await?;
        info!(reference = %data.reference, amount, "payment session opened");

        Ok(PaymentSession {
            reference: data.reference,
            authorization_url: data.authorization_url,
        })
    }

    async fn verify_payment(&self, reference: &str) -> Result<PaymentVerification, GatewayError> {
        let response = self
            .http
            .get(format!("{}/transaction/verify/{reference}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Request(format!("verify {reference} failed: {e}")))?;

        let data: VerifyData = Self::read_envelope(response, "verify", reference).await?;
        Ok(PaymentVerification {
            status: data.status,
            amount: data.amount,
            paid_at: data.paid_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(secret: Option<&str>) -> PaystackSettings {
        PaystackSettings {
            secret_key: secret.map(str::to_string),
            webhook_secret: None,
            base_url: "https://api.paystack.co/".to_string(),
        }
    }

    #[test]
    fn requires_secret_key() {
        assert!(!PaystackClient::is_configured(&settings(None)));
        assert!(!PaystackClient::is_configured(&settings(Some("  "))));
        assert!(matches!(
            PaystackClient::from_settings(&settings(None)),
            Err(GatewayError::MissingConfig(_))
        ));

        let client = PaystackClient::from_settings(&settings(Some("sk_test_x"))).unwrap();
        assert_eq!(client.base_url, "https://api.paystack.co");
    }

    #[test]
    fn rejects_malformed_base_url() {
        let mut bad = settings(Some("sk_test_x"));
        bad.base_url = "not a url".to_string();
        assert!(matches!(
            PaystackClient::from_settings(&bad),
            Err(GatewayError::InvalidBaseUrl(_))
        ));

        bad.base_url = "ftp://api.paystack.co".to_string();
        assert!(matches!(
            PaystackClient::from_settings(&bad),
            Err(GatewayError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn verify_payload_decodes() {
        let raw = r#"{
            "status": true,
            "message": "Verification successful",
            "data": {
                "reference": "DEP_1_abcd",
                "status": "success",
                "amount": 5000,
                "paid_at": "2023-10-27T10:30:00.000Z"
            }
        }"#;
        let envelope: Envelope<VerifyData> = serde_json::from_str(raw).unwrap();
        let data = envelope.data.unwrap();
        assert_eq!(data.status, "success");
        assert_eq!(data.amount, 5000);
        assert!(data.paid_at.is_some());
    }

    #[test]
    fn abandoned_payment_has_no_paid_at() {
        let raw = r#"{"status": true, "message": "ok",
            "data": {"status": "abandoned", "amount": 5000, "paid_at": null}}"#;
        let envelope: Envelope<VerifyData> = serde_json::from_str(raw).unwrap();
        assert!(envelope.data.unwrap().paid_at.is_none());
    }
}
