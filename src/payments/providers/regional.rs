//! Regional card/wallet gateway adapter
//!
//! Three-phase checkout: obtain a short-lived auth token, register an
//! order resource, then request a payment key bound to that order. The
//! payment key parametrizes a hosted iframe URL, which is the redirect
//! target. The gateway demands a full billing address even for digital
//! goods; fields we cannot supply are sent as the documented placeholder
//! `"NA"` because omitting them rejects the request outright.
//!
//! Webhooks are signed with HMAC-SHA512 over a fixed, ordered
//! concatenation of payload fields, not the raw body. Field order and the
//! inclusion list are the gateway's contract; changing either changes the
//! digest.

use crate::error::{AppError, AppErrorKind, AppResult, ExternalError};
use crate::payments::providers::{error_from_status, error_from_transport};
use crate::payments::signature;
use crate::payments::token_cache::{FetchedToken, TokenCache};
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
use tracing::{info, warn};

pub const SIGNATURE_HEADER: &str = "x-gateway-hmac";

/// Placeholder for billing fields the gateway requires but a digital
/// purchase has no value for
const BILLING_PLACEHOLDER: &str = "NA";

/// Auth tokens are valid for an hour; the gateway does not report a TTL
const AUTH_TOKEN_TTL_SECS: i64 = 3600;

/// Ordered field list for the webhook HMAC canonical string. The digest is
/// computed over the values of exactly these fields, in exactly this
/// order.
const HMAC_FIELDS: [&str; 20] = [
    "amount_cents",
    "created_at",
    "currency",
    "error_occured",
    "has_parent_transaction",
    "id",
    "integration_id",
    "is_3d_secure",
    "is_auth",
    "is_capture",
    "is_refunded",
    "is_standalone_payment",
    "is_voided",
    "order.id",
    "owner",
    "pending",
    "source_data.pan",
    "source_data.sub_type",
    "source_data.type",
    "success",
];

#[derive(Debug, Clone)]
pub struct RegionalConfig {
    pub api_key: String,
    pub hmac_secret: String,
    /// Payment integration the key requests are bound to
    pub integration_id: String,
    /// Hosted iframe the payment key parametrizes
    pub iframe_id: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl RegionalConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let api_key = std::env::var("REGIONAL_API_KEY")
            .map_err(|_| AppError::configuration("REGIONAL_API_KEY environment variable is required"))?;
        let hmac_secret = std::env::var("REGIONAL_HMAC_SECRET").map_err(|_| {
            AppError::configuration("REGIONAL_HMAC_SECRET environment variable is required")
        })?;
        let integration_id = std::env::var("REGIONAL_INTEGRATION_ID").map_err(|_| {
            AppError::configuration("REGIONAL_INTEGRATION_ID environment variable is required")
        })?;
        let iframe_id = std::env::var("REGIONAL_IFRAME_ID").map_err(|_| {
            AppError::configuration("REGIONAL_IFRAME_ID environment variable is required")
        })?;
        let base_url = std::env::var("REGIONAL_BASE_URL")
            .unwrap_or_else(|_| "https://accept.regionalgateway.example".to_string());
        let timeout_secs = std::env::var("PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            api_key,
            hmac_secret,
            integration_id,
            iframe_id,
            base_url,
            timeout_secs,
        })
    }
}

pub struct RegionalAdapter {
    config: RegionalConfig,
    client: Client,
    token_cache: TokenCache,
}

impl RegionalAdapter {
    pub fn new(config: RegionalConfig) -> Self {
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
        Ok(Self::new(RegionalConfig::from_env()?))
    }

    async fn post<T>(&self, endpoint: &str, payload: &serde_json::Value) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.config.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| error_from_transport(Provider::Regional, e))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(error_from_status(Provider::Regional, status, &text));
        }

        serde_json::from_str(&text).map_err(|e| {
            AppError::external(ExternalError::ProviderRejected {
                provider: Provider::Regional,
                message: format!("invalid response format: {}", e),
            })
        })
    }

    /// Phase 1: short-lived auth token, cached with single-flight refresh
    async fn auth_token(&self) -> AppResult<String> {
        self.token_cache
            .get_or_fetch(|| async {
                let payload = serde_json::json!({ "api_key": self.config.api_key });
                let auth: AuthResponse = self.post("/api/auth/tokens", &payload).await?;
                Ok(FetchedToken {
                    token: auth.token,
                    expires_in_secs: AUTH_TOKEN_TTL_SECS,
                })
            })
            .await
    }

    /// Token-bearing request with a single transparent retry when the
    /// gateway revokes the cached token before its fixed lifetime ends.
    /// `build` rebuilds the payload so the retry carries the fresh token.
    async fn authed_post<T, F>(&self, endpoint: &str, build: F) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
        F: Fn(&str) -> serde_json::Value,
    {
        let token = self.auth_token().await?;
        match self.post(endpoint, &build(&token)).await {
            Err(err)
                if matches!(
                    err.kind,
                    AppErrorKind::External(ExternalError::AuthExpired { .. })
                ) =>
            {
                warn!("regional gateway token rejected, refreshing and retrying once");
                self.token_cache.invalidate().await;
                let token = self.auth_token().await?;
                self.post(endpoint, &build(&token)).await
            }
            other => other,
        }
    }

    /// Billing block the order and payment-key calls insist on. Real
    /// values where we have them, the placeholder everywhere else.
    fn billing_data(params: &CheckoutParams) -> serde_json::Value {
        let (first_name, last_name) = match params.buyer.name.split_once(' ') {
            Some((first, rest)) => (first.to_string(), rest.to_string()),
            None => (params.buyer.name.clone(), BILLING_PLACEHOLDER.to_string()),
        };

        serde_json::json!({
            "first_name": first_name,
            "last_name": last_name,
            "email": params.buyer.email,
            "phone_number": params.buyer.phone.clone().unwrap_or_else(|| BILLING_PLACEHOLDER.to_string()),
            "street": BILLING_PLACEHOLDER,
            "building": BILLING_PLACEHOLDER,
            "floor": BILLING_PLACEHOLDER,
            "apartment": BILLING_PLACEHOLDER,
            "city": BILLING_PLACEHOLDER,
            "state": BILLING_PLACEHOLDER,
            "country": BILLING_PLACEHOLDER,
            "postal_code": BILLING_PLACEHOLDER,
            "shipping_method": BILLING_PLACEHOLDER,
        })
    }

    /// Build the canonical string the webhook HMAC covers. Missing fields
    /// contribute an empty string; booleans render as `true`/`false`.
    fn canonical_string(payload: &serde_json::Value) -> String {
        let obj = payload.get("obj").unwrap_or(payload);
        let mut canonical = String::new();
        for field in HMAC_FIELDS {
            let mut value = obj;
            for part in field.split('.') {
                value = value.get(part).unwrap_or(&serde_json::Value::Null);
            }
            match value {
                serde_json::Value::Null => {}
                serde_json::Value::String(s) => canonical.push_str(s),
                serde_json::Value::Bool(b) => {
                    canonical.push_str(if *b { "true" } else { "false" })
                }
                other => canonical.push_str(&other.to_string()),
            }
        }
        canonical
    }
}

#[async_trait]
impl ProviderAdapter for RegionalAdapter {
    fn provider(&self) -> Provider {
        Provider::Regional
    }

    async fn create_checkout(&self, params: CheckoutParams) -> AppResult<CheckoutSession> {
        info!(
            amount = params.charge_amount,
            currency = %params.currency,
            "creating regional gateway order"
        );

        // Phase 2: register the order; the metadata travels in the
        // merchant order id because the gateway has no metadata map
        let order: OrderResponse = self
            .authed_post("/api/ecommerce/orders", |token| {
                serde_json::json!({
                    "auth_token": token,
                    "delivery_needed": false,
                    "amount_cents": params.charge_amount,
                    "currency": params.currency,
                    "merchant_order_id": params.metadata.to_merchant_ref(),
                    "items": [{
                        "name": params.description,
                        "amount_cents": params.charge_amount,
                        "quantity": 1,
                    }],
                })
            })
            .await?;

        // Phase 3: payment key bound to the order
        let key: PaymentKeyResponse = self
            .authed_post("/api/acceptance/payment_keys", |token| {
                serde_json::json!({
                    "auth_token": token,
                    "amount_cents": params.charge_amount,
                    "currency": params.currency,
                    "order_id": order.id,
                    "integration_id": self.config.integration_id,
                    "expiration": 3600,
                    "billing_data": Self::billing_data(&params),
                })
            })
            .await?;

        info!(order_id = order.id, "regional gateway order created");

        Ok(CheckoutSession {
            redirect_url: format!(
                "{}/api/acceptance/iframes/{}?payment_token={}",
                self.config.base_url, self.config.iframe_id, key.token
            ),
            provider_session_ref: order.id.to_string(),
        })
    }

    async fn retrieve_confirmation(&self, session_ref: &str) -> AppResult<Confirmation> {
        let inquiry: OrderInquiryResponse = self
            .authed_post("/api/ecommerce/orders/transaction_inquiry", |token| {
                serde_json::json!({
                    "auth_token": token,
                    "order_id": session_ref,
                })
            })
            .await?;

        let status = if inquiry.success && !inquiry.pending {
            ConfirmationStatus::Succeeded
        } else if inquiry.pending {
            ConfirmationStatus::Pending
        } else {
            ConfirmationStatus::Failed
        };

        Ok(Confirmation {
            status,
            provider_transaction_id: inquiry.id.to_string(),
            paid_amount: inquiry.amount_cents,
            currency: inquiry.currency,
            payer_identity: None,
        })
    }

    async fn create_refund(
        &self,
        provider_transaction_id: &str,
        amount: Option<i64>,
    ) -> AppResult<RefundReceipt> {
        let refund: RefundResponse = self
            .authed_post("/api/acceptance/void_refund/refund", |token| {
                let mut payload = serde_json::json!({
                    "auth_token": token,
                    "transaction_id": provider_transaction_id,
                });
                if let Some(amount) = amount {
                    payload["amount_cents"] = serde_json::Value::from(amount);
                }
                payload
            })
            .await?;

        info!(refund_id = refund.id, "regional gateway refund issued");

        Ok(RefundReceipt {
            refund_id: refund.id.to_string(),
            status: if refund.success { "succeeded" } else { "failed" }.to_string(),
        })
    }

    fn verify_webhook(&self, body: &[u8], headers: &HeaderMap) -> AppResult<()> {
        let reject = || {
            AppError::external(ExternalError::InvalidSignature {
                provider: Provider::Regional,
                payload_hash: signature::payload_hash(body),
            })
        };

        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let payload: serde_json::Value = serde_json::from_slice(body).map_err(|_| reject())?;
        let canonical = Self::canonical_string(&payload);

        if signature::verify_sha512(
            self.config.hmac_secret.as_bytes(),
            canonical.as_bytes(),
            provided,
        ) {
            Ok(())
        } else {
            Err(reject())
        }
    }

    fn parse_webhook(&self, body: &[u8]) -> AppResult<WebhookEvent> {
        let payload: WebhookPayload = serde_json::from_slice(body).map_err(|e| {
            AppError::external(ExternalError::ProviderRejected {
                provider: Provider::Regional,
                message: format!("unparseable webhook payload: {}", e),
            })
        })?;

        let obj = payload.obj;
        let event = if obj.is_refunded {
            WebhookEvent::Refunded {
                provider_transaction_id: obj.id.to_string(),
            }
        } else if obj.success {
            WebhookEvent::Succeeded {
                provider_transaction_id: obj.id.to_string(),
                session_ref: obj.order.id.to_string(),
                paid_amount: obj.amount_cents,
                currency: obj.currency,
            }
        } else if obj.pending {
            // Still in flight; the terminal callback follows
            WebhookEvent::Ignored {
                provider_transaction_id: obj.id.to_string(),
                event: "pending".to_string(),
            }
        } else {
            WebhookEvent::Failed {
                provider_transaction_id: obj.id.to_string(),
                session_ref: obj.order.id.to_string(),
                reason: obj.data_message,
            }
        };
        Ok(event)
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct PaymentKeyResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct OrderInquiryResponse {
    id: i64,
    amount_cents: i64,
    currency: String,
    success: bool,
    pending: bool,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: i64,
    success: bool,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    obj: WebhookTransaction,
}

#[derive(Debug, Deserialize)]
struct WebhookTransaction {
    id: i64,
    amount_cents: i64,
    currency: String,
    success: bool,
    is_refunded: bool,
    #[serde(default)]
    pending: bool,
    order: WebhookOrder,
    #[serde(rename = "data.message", default)]
    data_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookOrder {
    id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signature::hmac_sha512_hex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Minimal gateway stand-in: serves the canned responses in order, one
    /// connection each, and counts how many requests arrived.
    async fn spawn_gateway(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicU32>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {} Status\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}", addr), hits)
    }

    fn adapter_against(base_url: String) -> RegionalAdapter {
        RegionalAdapter::new(RegionalConfig {
            api_key: "ak_test".to_string(),
            hmac_secret: "hmac_test".to_string(),
            integration_id: "12345".to_string(),
            iframe_id: "67890".to_string(),
            base_url,
            timeout_secs: 5,
        })
    }

    #[tokio::test]
    async fn revoked_token_refreshes_and_retries_once() {
        let (base_url, hits) = spawn_gateway(vec![
            (200, r#"{"token":"tok_1"}"#),
            (401, r#"{"message":"token expired"}"#),
            (200, r#"{"token":"tok_2"}"#),
            (
                200,
                r#"{"id":9001,"amount_cents":15000,"currency":"EGP","success":true,"pending":false}"#,
            ),
        ])
        .await;
        let adapter = adapter_against(base_url);

        let confirmation = adapter.retrieve_confirmation("777").await.unwrap();
        assert_eq!(confirmation.status, ConfirmationStatus::Succeeded);
        assert_eq!(confirmation.provider_transaction_id, "9001");
        // auth, rejected call, fresh auth, retried call
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn auth_retry_happens_at_most_once() {
        let (base_url, hits) = spawn_gateway(vec![
            (200, r#"{"token":"tok_1"}"#),
            (401, r#"{"message":"token expired"}"#),
            (200, r#"{"token":"tok_2"}"#),
            (401, r#"{"message":"token expired"}"#),
        ])
        .await;
        let adapter = adapter_against(base_url);

        let err = adapter.retrieve_confirmation("777").await.unwrap_err();
        assert!(matches!(
            err.kind,
            AppErrorKind::External(ExternalError::AuthExpired { .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    fn test_adapter() -> RegionalAdapter {
        RegionalAdapter::new(RegionalConfig {
            api_key: "ak_test".to_string(),
            hmac_secret: "hmac_test".to_string(),
            integration_id: "12345".to_string(),
            iframe_id: "67890".to_string(),
            base_url: "https://accept.regionalgateway.example".to_string(),
            timeout_secs: 10,
        })
    }

    fn sample_webhook() -> serde_json::Value {
        serde_json::json!({
            "obj": {
                "id": 9001,
                "amount_cents": 15000,
                "created_at": "2026-01-15T10:00:00",
                "currency": "EGP",
                "error_occured": false,
                "has_parent_transaction": false,
                "integration_id": 12345,
                "is_3d_secure": true,
                "is_auth": false,
                "is_capture": false,
                "is_refunded": false,
                "is_standalone_payment": true,
                "is_voided": false,
                "order": {"id": 777},
                "owner": 42,
                "pending": false,
                "source_data": {"pan": "1234", "sub_type": "MasterCard", "type": "card"},
                "success": true
            }
        })
    }

    fn sign(payload: &serde_json::Value, secret: &str) -> String {
        hmac_sha512_hex(
            secret.as_bytes(),
            RegionalAdapter::canonical_string(payload).as_bytes(),
        )
    }

    #[test]
    fn canonical_string_follows_field_order() {
        let payload = sample_webhook();
        let canonical = RegionalAdapter::canonical_string(&payload);
        // amount_cents, created_at, currency lead the concatenation
        assert!(canonical.starts_with("150002026-01-15T10:00:00EGP"));
        // success is the final field
        assert!(canonical.ends_with("cardtrue"));
    }

    #[test]
    fn reordering_fields_changes_nothing_but_values_do() {
        let payload = sample_webhook();
        let baseline = RegionalAdapter::canonical_string(&payload);

        // JSON key order is irrelevant; the field list imposes the order
        let mut reordered = sample_webhook();
        reordered["obj"]["zzz_extra"] = serde_json::Value::from("ignored");
        assert_eq!(RegionalAdapter::canonical_string(&reordered), baseline);

        let mut tampered = sample_webhook();
        tampered["obj"]["amount_cents"] = serde_json::Value::from(1);
        assert_ne!(RegionalAdapter::canonical_string(&tampered), baseline);
    }

    #[test]
    fn valid_hmac_accepted() {
        let adapter = test_adapter();
        let payload = sample_webhook();
        let body = serde_json::to_vec(&payload).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            sign(&payload, "hmac_test").parse().unwrap(),
        );
        assert!(adapter.verify_webhook(&body, &headers).is_ok());
    }

    #[test]
    fn tampered_amount_rejected() {
        let adapter = test_adapter();
        let payload = sample_webhook();
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            sign(&payload, "hmac_test").parse().unwrap(),
        );

        let mut tampered = sample_webhook();
        tampered["obj"]["amount_cents"] = serde_json::Value::from(1);
        let body = serde_json::to_vec(&tampered).unwrap();
        assert!(adapter.verify_webhook(&body, &headers).is_err());
    }

    #[test]
    fn successful_webhook_parses_to_succeeded() {
        let adapter = test_adapter();
        let body = serde_json::to_vec(&sample_webhook()).unwrap();
        match adapter.parse_webhook(&body).unwrap() {
            WebhookEvent::Succeeded {
                provider_transaction_id,
                session_ref,
                paid_amount,
                ..
            } => {
                assert_eq!(provider_transaction_id, "9001");
                assert_eq!(session_ref, "777");
                assert_eq!(paid_amount, 15000);
            }
            other => panic!("expected Succeeded, got {:?}", other),
        }
    }

    #[test]
    fn declined_webhook_parses_to_failed() {
        let adapter = test_adapter();
        let mut payload = sample_webhook();
        payload["obj"]["success"] = serde_json::Value::from(false);
        let body = serde_json::to_vec(&payload).unwrap();
        assert!(matches!(
            adapter.parse_webhook(&body).unwrap(),
            WebhookEvent::Failed { .. }
        ));
    }

    #[test]
    fn pending_webhook_parses_to_ignored() {
        let adapter = test_adapter();
        let mut payload = sample_webhook();
        payload["obj"]["success"] = serde_json::Value::from(false);
        payload["obj"]["pending"] = serde_json::Value::from(true);
        let body = serde_json::to_vec(&payload).unwrap();
        assert!(matches!(
            adapter.parse_webhook(&body).unwrap(),
            WebhookEvent::Ignored { .. }
        ));
    }

    #[test]
    fn billing_placeholders_fill_unknown_fields() {
        use crate::payments::types::{BuyerInfo, CheckoutMetadata};
        let params = CheckoutParams {
            charge_amount: 15000,
            currency: "EGP".to_string(),
            buyer: BuyerInfo {
                email: "student@example.com".to_string(),
                name: "Ada Lovelace".to_string(),
                phone: None,
            },
            description: "Course purchase".to_string(),
            metadata: CheckoutMetadata {
                user_id: uuid::Uuid::new_v4(),
                course_id: uuid::Uuid::new_v4(),
                instructor_share: 12000,
                coupon_id: None,
            },
        };
        let billing = RegionalAdapter::billing_data(&params);
        assert_eq!(billing["first_name"], "Ada");
        assert_eq!(billing["last_name"], "Lovelace");
        assert_eq!(billing["phone_number"], "NA");
        assert_eq!(billing["city"], "NA");
        assert_eq!(billing["postal_code"], "NA");
    }
}
