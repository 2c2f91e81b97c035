//! PayPal adapter
//!
//! Two-phase flow: create an order (buyer is redirected to the approval
//! link), then an explicit capture after the redirect-back finalizes the
//! charge. Auth is OAuth2 client-credentials; the bearer token is cached
//! with single-flight refresh, and a 401 mid-call invalidates the cache
//! and retries the call once.
//!
//! PayPal has no pass-through metadata map, so the canonical checkout
//! metadata rides in the purchase unit's `custom_id` as a merchant ref.

use crate::error::{AppError, AppErrorKind, AppResult, ExternalError};
use crate::payments::providers::{
    decimal_to_minor, error_from_status, error_from_transport, minor_to_decimal,
};
use crate::payments::signature;
use crate::payments::token_cache::{FetchedToken, TokenCache};
use crate::payments::traits::ProviderAdapter;
use crate::payments::types::{
    CheckoutParams, CheckoutSession, Confirmation, ConfirmationStatus, Provider, RefundReceipt,
    WebhookEvent,
};
use async_trait::async_trait;
use base64::Engine;
use http::HeaderMap;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

pub const SIGNATURE_HEADER: &str = "paypal-transmission-sig";

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_secret: String,
    /// "sandbox" or "live"
    pub mode: String,
    pub base_url: String,
    pub return_url: String,
    /// Currency used when a partial refund needs an explicit amount
    pub currency: String,
    pub timeout_secs: u64,
}

impl PaypalConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let client_id = std::env::var("PAYPAL_CLIENT_ID")
            .map_err(|_| AppError::configuration("PAYPAL_CLIENT_ID environment variable is required"))?;
        let client_secret = std::env::var("PAYPAL_CLIENT_SECRET").map_err(|_| {
            AppError::configuration("PAYPAL_CLIENT_SECRET environment variable is required")
        })?;
        let webhook_secret = std::env::var("PAYPAL_WEBHOOK_SECRET").map_err(|_| {
            AppError::configuration("PAYPAL_WEBHOOK_SECRET environment variable is required")
        })?;
        let mode = std::env::var("PAYPAL_MODE").unwrap_or_else(|_| "sandbox".to_string());
        let base_url = std::env::var("PAYPAL_BASE_URL").unwrap_or_else(|_| {
            if mode == "live" {
                "https://api-m.paypal.com".to_string()
            } else {
                "https://api-m.sandbox.paypal.com".to_string()
            }
        });
        let return_url = std::env::var("CHECKOUT_RETURN_URL")
            .map_err(|_| AppError::configuration("CHECKOUT_RETURN_URL environment variable is required"))?;
        let currency = std::env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "USD".to_string());
        let timeout_secs = std::env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            client_id,
            client_secret,
            webhook_secret,
            mode,
            base_url,
            return_url,
            currency,
            timeout_secs,
        })
    }
}

pub struct PaypalAdapter {
    config: PaypalConfig,
    client: Client,
    token_cache: TokenCache,
}

impl PaypalAdapter {
    pub fn new(config: PaypalConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            client,
            token_cache: TokenCache::new(),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self::new(PaypalConfig::from_env()?))
    }

    async fn fetch_token(&self) -> AppResult<FetchedToken> {
        let basic = base64::engine::general_purpose::STANDARD.encode(format!(
            "{}:{}",
            self.config.client_id, self.config.client_secret
        ));

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.config.base_url))
            .header("Authorization", format!("Basic {}", basic))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| error_from_transport(Provider::Paypal, e))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(error_from_status(Provider::Paypal, status, &text));
        }

        let token: TokenResponse = serde_json::from_str(&text).map_err(|e| {
            AppError::external(ExternalError::ProviderRejected {
                provider: Provider::Paypal,
                message: format!("invalid token response: {}", e),
            })
        })?;

        Ok(FetchedToken {
            token: token.access_token,
            expires_in_secs: token.expires_in,
        })
    }

    async fn bearer_token(&self) -> AppResult<String> {
        self.token_cache.get_or_fetch(|| self.fetch_token()).await
    }

    async fn request_once<T>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let token = self.bearer_token().await?;
        let url = format!("{}{}", self.config.base_url, endpoint);
        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/json");

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| error_from_transport(Provider::Paypal, e))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(error_from_status(Provider::Paypal, status, &text));
        }

        serde_json::from_str(&text).map_err(|e| {
            AppError::external(ExternalError::ProviderRejected {
                provider: Provider::Paypal,
                message: format!("invalid response format: {}", e),
            })
        })
    }

    /// Authenticated request with a single transparent retry when the
    /// cached token has been revoked ahead of its reported expiry.
    async fn request<T>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        match self.request_once(method.clone(), endpoint, body).await {
            Err(err) if matches!(err.kind, AppErrorKind::External(ExternalError::AuthExpired { .. })) => {
                warn!("paypal token rejected, refreshing and retrying once");
                self.token_cache.invalidate().await;
                self.request_once(method, endpoint, body).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl ProviderAdapter for PaypalAdapter {
    fn provider(&self) -> Provider {
        Provider::Paypal
    }

    async fn create_checkout(&self, params: CheckoutParams) -> AppResult<CheckoutSession> {
        info!(
            amount = params.charge_amount,
            currency = %params.currency,
            "creating paypal order"
        );

        let payload = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": params.currency,
                    "value": minor_to_decimal(params.charge_amount),
                },
                "description": params.description,
                "custom_id": params.metadata.to_merchant_ref(),
            }],
            "application_context": {
                "return_url": self.config.return_url,
                "cancel_url": self.config.return_url,
                "user_action": "PAY_NOW",
            },
        });

        let order: OrderResponse = self
            .request(reqwest::Method::POST, "/v2/checkout/orders", Some(&payload))
            .await?;

        let approve = order
            .links
            .iter()
            .find(|link| link.rel == "approve")
            .map(|link| link.href.clone())
            .ok_or_else(|| {
                AppError::external(ExternalError::ProviderRejected {
                    provider: Provider::Paypal,
                    message: "order response carried no approval link".to_string(),
                })
            })?;

        info!(order_id = %order.id, "paypal order created");

        Ok(CheckoutSession {
            redirect_url: approve,
            provider_session_ref: order.id,
        })
    }

    /// Captures the approved order; this is the PayPal "second phase".
    async fn retrieve_confirmation(&self, session_ref: &str) -> AppResult<Confirmation> {
        let capture: CaptureResponse = self
            .request(
                reqwest::Method::POST,
                &format!("/v2/checkout/orders/{}/capture", session_ref),
                Some(&serde_json::json!({})),
            )
            .await?;

        let detail = capture
            .purchase_units
            .first()
            .and_then(|unit| unit.payments.captures.first());

        let (tx_id, paid_amount, currency) = match detail {
            Some(c) => (
                c.id.clone(),
                decimal_to_minor(&c.amount.value).map_err(|message| {
                    AppError::external(ExternalError::ProviderRejected {
                        provider: Provider::Paypal,
                        message,
                    })
                })?,
                c.amount.currency_code.clone(),
            ),
            None => (session_ref.to_string(), 0, String::new()),
        };

        let status = match capture.status.as_str() {
            "COMPLETED" => ConfirmationStatus::Succeeded,
            "APPROVED" | "CREATED" | "SAVED" | "PAYER_ACTION_REQUIRED" => ConfirmationStatus::Pending,
            _ => ConfirmationStatus::Failed,
        };

        Ok(Confirmation {
            status,
            provider_transaction_id: tx_id,
            paid_amount,
            currency,
            payer_identity: capture.payer.and_then(|p| p.email_address),
        })
    }

    async fn create_refund(
        &self,
        provider_transaction_id: &str,
        amount: Option<i64>,
    ) -> AppResult<RefundReceipt> {
        let payload = match amount {
            Some(amount) => serde_json::json!({
                "amount": {
                    "value": minor_to_decimal(amount),
                    "currency_code": self.config.currency,
                },
            }),
            None => serde_json::json!({}),
        };

        let refund: RefundResponse = self
            .request(
                reqwest::Method::POST,
                &format!("/v2/payments/captures/{}/refund", provider_transaction_id),
                Some(&payload),
            )
            .await?;

        info!(refund_id = %refund.id, status = %refund.status, "paypal refund issued");

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
                provider: Provider::Paypal,
                payload_hash: signature::payload_hash(body),
            }))
        }
    }

    fn parse_webhook(&self, body: &[u8]) -> AppResult<WebhookEvent> {
        let event: WebhookPayload = serde_json::from_slice(body).map_err(|e| {
            AppError::external(ExternalError::ProviderRejected {
                provider: Provider::Paypal,
                message: format!("unparseable webhook payload: {}", e),
            })
        })?;

        let tx_id = event.resource.id.clone().unwrap_or_default();
        let order_id = event
            .resource
            .supplementary_data
            .as_ref()
            .and_then(|s| s.related_ids.as_ref())
            .and_then(|r| r.order_id.clone())
            .unwrap_or_else(|| tx_id.clone());

        let parsed = match event.event_type.as_str() {
            "PAYMENT.CAPTURE.COMPLETED" => {
                let amount = event
                    .resource
                    .amount
                    .as_ref()
                    .map(|a| decimal_to_minor(&a.value))
                    .transpose()
                    .map_err(|message| {
                        AppError::external(ExternalError::ProviderRejected {
                            provider: Provider::Paypal,
                            message,
                        })
                    })?
                    .unwrap_or(0);
                WebhookEvent::Succeeded {
                    provider_transaction_id: tx_id,
                    session_ref: order_id,
                    paid_amount: amount,
                    currency: event
                        .resource
                        .amount
                        .map(|a| a.currency_code)
                        .unwrap_or_default(),
                }
            }
            "PAYMENT.CAPTURE.REFUNDED" => WebhookEvent::Refunded {
                provider_transaction_id: tx_id,
            },
            "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" | "CHECKOUT.ORDER.VOIDED" => {
                WebhookEvent::Failed {
                    provider_transaction_id: tx_id,
                    session_ref: order_id,
                    reason: Some(event.event_type),
                }
            }
            // Approval and in-progress notifications carry no outcome
            _ => WebhookEvent::Ignored {
                provider_transaction_id: tx_id,
                event: event.event_type,
            },
        };
        Ok(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: i64,
}

fn default_expiry() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    links: Vec<LinkDescription>,
}

#[derive(Debug, Deserialize)]
struct LinkDescription {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    status: String,
    #[serde(default)]
    purchase_units: Vec<CapturedUnit>,
    #[serde(default)]
    payer: Option<Payer>,
}

#[derive(Debug, Deserialize)]
struct CapturedUnit {
    payments: CapturedPayments,
}

#[derive(Debug, Deserialize)]
struct CapturedPayments {
    captures: Vec<CaptureDetail>,
}

#[derive(Debug, Deserialize)]
struct CaptureDetail {
    id: String,
    amount: MoneyValue,
}

#[derive(Debug, Deserialize)]
struct MoneyValue {
    value: String,
    currency_code: String,
}

#[derive(Debug, Deserialize)]
struct Payer {
    #[serde(default)]
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    event_type: String,
    resource: WebhookResource,
}

#[derive(Debug, Deserialize)]
struct WebhookResource {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    amount: Option<MoneyValue>,
    #[serde(default)]
    supplementary_data: Option<SupplementaryData>,
}

#[derive(Debug, Deserialize)]
struct SupplementaryData {
    #[serde(default)]
    related_ids: Option<RelatedIds>,
}

#[derive(Debug, Deserialize)]
struct RelatedIds {
    #[serde(default)]
    order_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signature::hmac_sha256_hex;

    fn test_adapter() -> PaypalAdapter {
        PaypalAdapter::new(PaypalConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            webhook_secret: "whsec_pp".to_string(),
            mode: "sandbox".to_string(),
            base_url: "https://api-m.sandbox.paypal.com".to_string(),
            return_url: "https://courses.example.com/return".to_string(),
            currency: "USD".to_string(),
            timeout_secs: 10,
        })
    }

    #[test]
    fn capture_completed_parses_to_succeeded() {
        let adapter = test_adapter();
        let body = br#"{
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {
                "id": "CAP-1",
                "amount": {"value": "150.00", "currency_code": "USD"},
                "supplementary_data": {"related_ids": {"order_id": "ORD-1"}}
            }
        }"#;
        match adapter.parse_webhook(body).unwrap() {
            WebhookEvent::Succeeded {
                provider_transaction_id,
                session_ref,
                paid_amount,
                currency,
            } => {
                assert_eq!(provider_transaction_id, "CAP-1");
                assert_eq!(session_ref, "ORD-1");
                assert_eq!(paid_amount, 15000);
                assert_eq!(currency, "USD");
            }
            other => panic!("expected Succeeded, got {:?}", other),
        }
    }

    #[test]
    fn denied_capture_parses_to_failed() {
        let adapter = test_adapter();
        let body = br#"{"event_type": "PAYMENT.CAPTURE.DENIED", "resource": {"id": "CAP-2"}}"#;
        match adapter.parse_webhook(body).unwrap() {
            WebhookEvent::Failed { reason, .. } => {
                assert_eq!(reason.as_deref(), Some("PAYMENT.CAPTURE.DENIED"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn pending_capture_parses_to_ignored() {
        let adapter = test_adapter();
        let body = br#"{"event_type": "PAYMENT.CAPTURE.PENDING", "resource": {"id": "CAP-3"}}"#;
        match adapter.parse_webhook(body).unwrap() {
            WebhookEvent::Ignored {
                provider_transaction_id,
                event,
            } => {
                assert_eq!(provider_transaction_id, "CAP-3");
                assert_eq!(event, "PAYMENT.CAPTURE.PENDING");
            }
            other => panic!("expected Ignored, got {:?}", other),
        }
    }

    #[test]
    fn order_approval_parses_to_ignored() {
        let adapter = test_adapter();
        let body = br#"{"event_type": "CHECKOUT.ORDER.APPROVED", "resource": {"id": "ORD-4"}}"#;
        assert!(matches!(
            adapter.parse_webhook(body).unwrap(),
            WebhookEvent::Ignored { .. }
        ));
    }

    #[test]
    fn webhook_signature_is_enforced() {
        let adapter = test_adapter();
        let body = br#"{"event_type":"PAYMENT.CAPTURE.COMPLETED","resource":{}}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            hmac_sha256_hex(b"whsec_pp", body).parse().unwrap(),
        );
        assert!(adapter.verify_webhook(body, &headers).is_ok());

        headers.insert(SIGNATURE_HEADER, "deadbeef".parse().unwrap());
        assert!(adapter.verify_webhook(body, &headers).is_err());
    }
}
