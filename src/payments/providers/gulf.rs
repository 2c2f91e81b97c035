//! Gulf-region gateway adapter
//!
//! Single-phase flow: one charge-creation call with the generic "all
//! payment sources" selector returns a hosted redirect URL; the outcome
//! arrives via webhook signed with HMAC-SHA256 over the raw body. Amounts
//! cross the wire as decimal strings. Metadata passes through the
//! charge's metadata map verbatim.

use crate::error::{AppError, AppResult, ExternalError};
use crate::payments::providers::{
    decimal_to_minor, error_from_status, error_from_transport, minor_to_decimal,
};
use crate::payments::signature;
use crate::payments::traits::ProviderAdapter;
use crate::payments::types::{
    CheckoutParams, CheckoutSession, Confirmation, ConfirmationStatus, Provider, RefundReceipt,
    WebhookEvent,
};
use async_trait::async_trait;
use http::HeaderMap;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

pub const SIGNATURE_HEADER: &str = "x-gulf-signature";

/// Charge source accepting every enabled payment method
const SOURCE_ALL: &str = "src_all";

#[derive(Debug, Clone)]
pub struct GulfConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub return_url: String,
    pub timeout_secs: u64,
}

impl GulfConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let secret_key = std::env::var("GULF_SECRET_KEY")
            .map_err(|_| AppError::configuration("GULF_SECRET_KEY environment variable is required"))?;
        let webhook_secret = std::env::var("GULF_WEBHOOK_SECRET").map_err(|_| {
            AppError::configuration("GULF_WEBHOOK_SECRET environment variable is required")
        })?;
        let base_url = std::env::var("GULF_BASE_URL")
            .unwrap_or_else(|_| "https://api.gulfgateway.example".to_string());
        let return_url = std::env::var("CHECKOUT_RETURN_URL")
            .map_err(|_| AppError::configuration("CHECKOUT_RETURN_URL environment variable is required"))?;
        let timeout_secs = std::env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            secret_key,
            webhook_secret,
            base_url,
            return_url,
            timeout_secs,
        })
    }
}

pub struct GulfAdapter {
    config: GulfConfig,
    client: Client,
}

impl GulfAdapter {
    pub fn new(config: GulfConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self::new(GulfConfig::from_env()?))
    }

    async fn request<T>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.config.base_url, endpoint);
        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", self.config.secret_key))
            .header("Content-Type", "application/json");

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| error_from_transport(Provider::Gulf, e))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(error_from_status(Provider::Gulf, status, &text));
        }

        serde_json::from_str(&text).map_err(|e| {
            AppError::external(ExternalError::ProviderRejected {
                provider: Provider::Gulf,
                message: format!("invalid response format: {}", e),
            })
        })
    }

    /// Only statuses the gateway documents as terminal declines map to
    /// `Failed`; `INITIATED`/`IN_PROGRESS`/`AUTHORIZED` and anything the
    /// gateway adds later count as still in flight.
    fn map_charge_status(status: &str) -> ConfirmationStatus {
        match status {
            "CAPTURED" => ConfirmationStatus::Succeeded,
            "DECLINED" | "FAILED" | "CANCELLED" | "ABANDONED" | "EXPIRED" | "RESTRICTED"
            | "VOID" | "TIMEDOUT" => ConfirmationStatus::Failed,
            _ => ConfirmationStatus::Pending,
        }
    }
}

#[async_trait]
impl ProviderAdapter for GulfAdapter {
    fn provider(&self) -> Provider {
        Provider::Gulf
    }

    async fn create_checkout(&self, params: CheckoutParams) -> AppResult<CheckoutSession> {
        info!(
            amount = params.charge_amount,
            currency = %params.currency,
            "creating gulf gateway charge"
        );

        let (first_name, last_name) = match params.buyer.name.split_once(' ') {
            Some((first, rest)) => (first.to_string(), rest.to_string()),
            None => (params.buyer.name.clone(), String::new()),
        };

        let payload = serde_json::json!({
            "amount": minor_to_decimal(params.charge_amount),
            "currency": params.currency,
            "source": { "id": SOURCE_ALL },
            "customer": {
                "first_name": first_name,
                "last_name": last_name,
                "email": params.buyer.email,
            },
            "description": params.description,
            "metadata": params.metadata.to_json(),
            "redirect": { "url": self.config.return_url },
        });

        let charge: ChargeResponse = self
            .request(reqwest::Method::POST, "/v2/charges", Some(&payload))
            .await?;

        let redirect_url = charge.transaction.and_then(|t| t.url).ok_or_else(|| {
            AppError::external(ExternalError::ProviderRejected {
                provider: Provider::Gulf,
                message: "charge response carried no redirect url".to_string(),
            })
        })?;

        info!(charge_id = %charge.id, "gulf gateway charge created");

        Ok(CheckoutSession {
            redirect_url,
            provider_session_ref: charge.id,
        })
    }

    async fn retrieve_confirmation(&self, session_ref: &str) -> AppResult<Confirmation> {
        let charge: ChargeResponse = self
            .request(
                reqwest::Method::GET,
                &format!("/v2/charges/{}", session_ref),
                None,
            )
            .await?;

        Ok(Confirmation {
            status: Self::map_charge_status(&charge.status),
            provider_transaction_id: charge.id,
            paid_amount: decimal_to_minor(&charge.amount).map_err(|message| {
                AppError::external(ExternalError::ProviderRejected {
                    provider: Provider::Gulf,
                    message,
                })
            })?,
            currency: charge.currency,
            payer_identity: charge.customer.and_then(|c| c.email),
        })
    }

    async fn create_refund(
        &self,
        provider_transaction_id: &str,
        amount: Option<i64>,
    ) -> AppResult<RefundReceipt> {
        let mut payload = serde_json::json!({
            "charge_id": provider_transaction_id,
            "reason": "requested_by_customer",
        });
        if let Some(amount) = amount {
            payload["amount"] = serde_json::Value::from(minor_to_decimal(amount));
        }

        let refund: RefundResponse = self
            .request(reqwest::Method::POST, "/v2/refunds", Some(&payload))
            .await?;

        info!(refund_id = %refund.id, status = %refund.status, "gulf gateway refund issued");

        Ok(RefundReceipt {
            refund_id: refund.id,
            status: refund.status,
        })
    }

    fn verify_webhook(&self, body: &[u8], headers: &HeaderMap) -> AppResult<()> {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if signature::verify_sha256(self.config.webhook_secret.as_bytes(), body, provided) {
            Ok(())
        } else {
            Err(AppError::external(ExternalError::InvalidSignature {
                provider: Provider::Gulf,
                payload_hash: signature::payload_hash(body),
            }))
        }
    }

    fn parse_webhook(&self, body: &[u8]) -> AppResult<WebhookEvent> {
        let charge: ChargeResponse = serde_json::from_slice(body).map_err(|e| {
            AppError::external(ExternalError::ProviderRejected {
                provider: Provider::Gulf,
                message: format!("unparseable webhook payload: {}", e),
            })
        })?;

        let paid_amount = decimal_to_minor(&charge.amount).map_err(|message| {
            AppError::external(ExternalError::ProviderRejected {
                provider: Provider::Gulf,
                message,
            })
        })?;

        let event = if charge.status == "REFUNDED" {
            WebhookEvent::Refunded {
                provider_transaction_id: charge.id,
            }
        } else {
            match Self::map_charge_status(&charge.status) {
                ConfirmationStatus::Succeeded => WebhookEvent::Succeeded {
                    provider_transaction_id: charge.id.clone(),
                    session_ref: charge.id,
                    paid_amount,
                    currency: charge.currency,
                },
                ConfirmationStatus::Failed => WebhookEvent::Failed {
                    provider_transaction_id: charge.id.clone(),
                    session_ref: charge.id,
                    reason: charge.response_message,
                },
                // In-flight notification; the terminal webhook follows
                ConfirmationStatus::Pending => WebhookEvent::Ignored {
                    provider_transaction_id: charge.id,
                    event: charge.status,
                },
            }
        };
        Ok(event)
    }
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    id: String,
    status: String,
    amount: String,
    currency: String,
    #[serde(default)]
    transaction: Option<TransactionBlock>,
    #[serde(default)]
    customer: Option<CustomerBlock>,
    #[serde(default)]
    response_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionBlock {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerBlock {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signature::hmac_sha256_hex;

    fn test_adapter() -> GulfAdapter {
        GulfAdapter::new(GulfConfig {
            secret_key: "sk_gulf_test".to_string(),
            webhook_secret: "whsec_gulf".to_string(),
            base_url: "https://api.gulfgateway.example".to_string(),
            return_url: "https://courses.example.com/return".to_string(),
            timeout_secs: 10,
        })
    }

    #[test]
    fn captured_charge_parses_to_succeeded() {
        let adapter = test_adapter();
        let body = br#"{"id":"chg_1","status":"CAPTURED","amount":"150.00","currency":"SAR"}"#;
        match adapter.parse_webhook(body).unwrap() {
            WebhookEvent::Succeeded {
                provider_transaction_id,
                paid_amount,
                currency,
                ..
            } => {
                assert_eq!(provider_transaction_id, "chg_1");
                assert_eq!(paid_amount, 15000);
                assert_eq!(currency, "SAR");
            }
            other => panic!("expected Succeeded, got {:?}", other),
        }
    }

    #[test]
    fn declined_charge_parses_to_failed() {
        let adapter = test_adapter();
        let body = br#"{"id":"chg_2","status":"DECLINED","amount":"150.00","currency":"SAR","response_message":"insufficient funds"}"#;
        match adapter.parse_webhook(body).unwrap() {
            WebhookEvent::Failed { reason, .. } => {
                assert_eq!(reason.as_deref(), Some("insufficient funds"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn in_progress_charge_parses_to_ignored() {
        let adapter = test_adapter();
        let body = br#"{"id":"chg_9","status":"IN_PROGRESS","amount":"150.00","currency":"SAR"}"#;
        match adapter.parse_webhook(body).unwrap() {
            WebhookEvent::Ignored {
                provider_transaction_id,
                event,
            } => {
                assert_eq!(provider_transaction_id, "chg_9");
                assert_eq!(event, "IN_PROGRESS");
            }
            other => panic!("expected Ignored, got {:?}", other),
        }
    }

    #[test]
    fn unknown_charge_status_parses_to_ignored() {
        let adapter = test_adapter();
        let body = br#"{"id":"chg_10","status":"UNDER_REVIEW","amount":"150.00","currency":"SAR"}"#;
        assert!(matches!(
            adapter.parse_webhook(body).unwrap(),
            WebhookEvent::Ignored { .. }
        ));
    }

    #[test]
    fn signature_is_enforced() {
        let adapter = test_adapter();
        let body = br#"{"id":"chg_1","status":"CAPTURED","amount":"150.00","currency":"SAR"}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            hmac_sha256_hex(b"whsec_gulf", body).parse().unwrap(),
        );
        assert!(adapter.verify_webhook(body, &headers).is_ok());

        headers.insert(SIGNATURE_HEADER, "deadbeef".parse().unwrap());
        assert!(adapter.verify_webhook(body, &headers).is_err());
    }

    #[test]
    fn charge_status_mapping() {
        assert_eq!(
            GulfAdapter::map_charge_status("CAPTURED"),
            ConfirmationStatus::Succeeded
        );
        assert_eq!(
            GulfAdapter::map_charge_status("INITIATED"),
            ConfirmationStatus::Pending
        );
        assert_eq!(
            GulfAdapter::map_charge_status("DECLINED"),
            ConfirmationStatus::Failed
        );
    }
}
