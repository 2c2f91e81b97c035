//! Provider adapter registry
//!
//! Maps the provider enum to its adapter. Callers resolve once and work
//! against the trait; there is no central dispatch switch anywhere else.

use crate::error::{AppError, ExternalError};
use crate::payments::traits::ProviderAdapter;
use crate::payments::types::Provider;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    /// Resolve the adapter for a provider. A provider with no registered
    /// adapter (disabled in config) reports as unavailable.
    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderAdapter>, AppError> {
        self.adapters.get(&provider).cloned().ok_or_else(|| {
            AppError::external(ExternalError::ProviderUnavailable {
                provider,
                message: "provider not configured".to_string(),
            })
        })
    }

    pub fn registered(&self) -> Vec<Provider> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::payments::types::{
        CheckoutParams, CheckoutSession, Confirmation, RefundReceipt, WebhookEvent,
    };
    use async_trait::async_trait;
    use http::HeaderMap;

    struct StubAdapter(Provider);

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn provider(&self) -> Provider {
            self.0
        }

        async fn create_checkout(&self, _params: CheckoutParams) -> AppResult<CheckoutSession> {
            unimplemented!()
        }

        async fn retrieve_confirmation(&self, _session_ref: &str) -> AppResult<Confirmation> {
            unimplemented!()
        }

        async fn create_refund(
            &self,
            _provider_transaction_id: &str,
            _amount: Option<i64>,
        ) -> AppResult<RefundReceipt> {
            unimplemented!()
        }

        fn verify_webhook(&self, _body: &[u8], _headers: &HeaderMap) -> AppResult<()> {
            Ok(())
        }

        fn parse_webhook(&self, _body: &[u8]) -> AppResult<WebhookEvent> {
            unimplemented!()
        }
    }

    #[test]
    fn resolves_registered_adapter() {
        let registry = ProviderRegistry::new().register(Arc::new(StubAdapter(Provider::Card)));
        assert!(registry.get(Provider::Card).is_ok());
    }

    #[test]
    fn unregistered_provider_is_unavailable() {
        let registry = ProviderRegistry::new().register(Arc::new(StubAdapter(Provider::Card)));
        let err = registry.get(Provider::Gulf).err().unwrap();
        assert!(err.is_retryable());
    }
}
