//! Provider adapter trait
//!
//! Defines the common interface every payment provider implements. The
//! checkout orchestrator and the webhook dispatcher only ever talk to this
//! trait; provider quirks (two-phase capture, mandatory billing fields,
//! metadata transport) stay inside each implementation.

use crate::error::AppResult;
use crate::payments::types::{
    CheckoutParams, CheckoutSession, Confirmation, Provider, RefundReceipt, WebhookEvent,
};
use async_trait::async_trait;
use http::HeaderMap;

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter fronts
    fn provider(&self) -> Provider;

    /// Create a provider-side checkout session.
    ///
    /// Returns the redirect target for the buyer and the provider's handle
    /// for the session. Never retried internally: a duplicate call could
    /// create a duplicate provider-side session.
    async fn create_checkout(&self, params: CheckoutParams) -> AppResult<CheckoutSession>;

    /// Fetch (or finalize, for two-phase providers) the outcome of a
    /// previously created session. Idempotent at the provider; safe to
    /// retry on `ProviderUnavailable`.
    async fn retrieve_confirmation(&self, session_ref: &str) -> AppResult<Confirmation>;

    /// Issue a refund against a settled transaction. Partial when `amount`
    /// is given, full otherwise.
    async fn create_refund(
        &self,
        provider_transaction_id: &str,
        amount: Option<i64>,
    ) -> AppResult<RefundReceipt>;

    /// Verify an inbound webhook against this provider's signing scheme.
    ///
    /// Must be called before `parse_webhook`; a payload that fails here is
    /// never allowed to touch the ledger.
    fn verify_webhook(&self, body: &[u8], headers: &HeaderMap) -> AppResult<()>;

    /// Map the provider's native payload into a canonical event.
    fn parse_webhook(&self, body: &[u8]) -> AppResult<WebhookEvent>;
}
