//! Card processor adapter
//!
//! Single synchronous call creates a hosted checkout session; the buyer is
//! redirected to the session URL and confirmation arrives via webhook. The
//! webhook carries the session id, which maps 1:1 to a purchase, and is
//! signed with HMAC-SHA256 over the raw request body.

use crate::error::{AppError, AppResult, ExternalError};
use crate::payments::providers::{error_from_status, error_from_transport};
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

pub const SIGNATURE_HEADER: &str = "x-card-signature";

/// Card processor configuration
#[derive(Debug, Clone)]
pub struct CardConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    /// Where the processor sends the buyer after payment
    pub return_url: String,
    pub timeout_secs: u64,
}

impl CardConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let secret_key = std::env::var("CARD_SECRET_KEY")
            .map_err(|_| AppError::configuration("CARD_SECRET_KEY environment variable is required"))?;
        let webhook_secret = std::env::var("CARD_WEBHOOK_SECRET").map_err(|_| {
            AppError::configuration("CARD_WEBHOOK_SECRET environment variable is required")
        })?;
        let base_url = std::env::var("CARD_BASE_URL")
            .unwrap_or_else(|_| "https://api.cardprocessor.example".to_string());
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

pub struct CardAdapter {
    config: CardConfig,
    client: Client,
}

impl CardAdapter {
    pub fn new(config: CardConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self::new(CardConfig::from_env()?))
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
            .map_err(|e| error_from_transport(Provider::Card, e))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(error_from_status(Provider::Card, status, &text));
        }

        serde_json::from_str(&text).map_err(|e| {
            AppError::external(ExternalError::ProviderRejected {
                provider: Provider::Card,
                message: format!("invalid response format: {}", e),
            })
        })
    }
}

#[async_trait]
impl ProviderAdapter for CardAdapter {
    fn provider(&self) -> Provider {
        Provider::Card
    }

    async fn create_checkout(&self, params: CheckoutParams) -> AppResult<CheckoutSession> {
        info!(
            amount = params.charge_amount,
            currency = %params.currency,
            "creating card checkout session"
        );

        let payload = serde_json::json!({
            "amount": params.charge_amount,
            "currency": params.currency,
            "customer_email": params.buyer.email,
            "description": params.description,
            "metadata": params.metadata.to_json(),
            "success_url": self.config.return_url,
            "cancel_url": self.config.return_url,
        });

        let session: SessionResponse = self
            .request(reqwest::Method::POST, "/v1/checkout/sessions", Some(&payload))
            .await?;

        info!(session_id = %session.id, "card checkout session created");

        Ok(CheckoutSession {
            redirect_url: session.url,
            provider_session_ref: session.id,
        })
    }

    async fn retrieve_confirmation(&self, session_ref: &str) -> AppResult<Confirmation> {
        let session: SessionDetailResponse = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/checkout/sessions/{}", session_ref),
                None,
            )
            .await?;

        let status = match session.status.as_str() {
            "complete" => ConfirmationStatus::Succeeded,
            "open" => ConfirmationStatus::Pending,
            _ => ConfirmationStatus::Failed,
        };

        Ok(Confirmation {
            status,
            provider_transaction_id: session.payment_id.unwrap_or_else(|| session.id.clone()),
            paid_amount: session.amount_total,
            currency: session.currency,
            payer_identity: session.customer_email,
        })
    }

    async fn create_refund(
        &self,
        provider_transaction_id: &str,
        amount: Option<i64>,
    ) -> AppResult<RefundReceipt> {
        let mut payload = serde_json::json!({
            "payment_id": provider_transaction_id,
        });
        if let Some(amount) = amount {
            payload["amount"] = serde_json::Value::from(amount);
        }

        let refund: RefundResponse = self
            .request(reqwest::Method::POST, "/v1/refunds", Some(&payload))
            .await?;

        info!(refund_id = %refund.id, status = %refund.status, "card refund issued");

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
                provider: Provider::Card,
                payload_hash: signature::payload_hash(body),
            }))
        }
    }

    fn parse_webhook(&self, body: &[u8]) -> AppResult<WebhookEvent> {
        let payload: WebhookPayload = serde_json::from_slice(body).map_err(|e| {
            AppError::external(ExternalError::ProviderRejected {
                provider: Provider::Card,
                message: format!("unparseable webhook payload: {}", e),
            })
        })?;

        let event = match payload.event_type.as_str() {
            "checkout.session.completed" => WebhookEvent::Succeeded {
                provider_transaction_id: payload.data.payment_id.unwrap_or_default(),
                session_ref: payload.data.session_id,
                paid_amount: payload.data.amount,
                currency: payload.data.currency,
            },
            "charge.refunded" => WebhookEvent::Refunded {
                provider_transaction_id: payload.data.payment_id.unwrap_or_default(),
            },
            "checkout.session.failed" | "checkout.session.expired" | "charge.failed" => {
                WebhookEvent::Failed {
                    provider_transaction_id: payload.data.payment_id.unwrap_or_default(),
                    session_ref: payload.data.session_id,
                    reason: payload.data.failure_reason,
                }
            }
            // Informational events must not move the ledger
            other => WebhookEvent::Ignored {
                provider_transaction_id: payload.data.payment_id.unwrap_or_default(),
                event: other.to_string(),
            },
        };
        Ok(event)
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct SessionDetailResponse {
    id: String,
    #[serde(default)]
    payment_id: Option<String>,
    status: String,
    amount_total: i64,
    currency: String,
    #[serde(default)]
    customer_email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    session_id: String,
    #[serde(default)]
    payment_id: Option<String>,
    amount: i64,
    currency: String,
    #[serde(default)]
    failure_reason: Option<String>,
}
