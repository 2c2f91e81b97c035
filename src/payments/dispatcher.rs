//! Webhook dispatcher
//!
//! Receives provider callbacks, verifies the signature, maps the payload
//! into a canonical event and applies it to the purchase ledger. Nothing
//! from an unverified payload ever touches state. Duplicate deliveries
//! (every provider retries) resolve to a no-op replay, not a second
//! completion.

use crate::database::coupon_repository::CouponRepository;
use crate::database::purchase_repository::{Purchase, PurchaseRepository, PurchaseStatus};
use crate::error::{AppError, AppResult, DomainError};
use crate::payments::registry::ProviderRegistry;
use crate::payments::types::{Provider, WebhookEvent};
use crate::payments::EnrollmentNotifier;
use http::HeaderMap;
use std::sync::Arc;
use tracing::{info, warn};

/// How a delivered webhook was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// First delivery: the purchase transitioned
    Applied,
    /// Duplicate delivery: nothing changed
    Replay,
    /// Coupon race lost: the purchase was failed instead of completed
    CouponExhausted,
    /// Informational or in-progress notification: acknowledged, ledger
    /// untouched
    Ignored,
}

pub struct WebhookDispatcher {
    registry: Arc<ProviderRegistry>,
    purchases: Arc<PurchaseRepository>,
    notifier: Arc<dyn EnrollmentNotifier>,
}

impl WebhookDispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        purchases: Arc<PurchaseRepository>,
        notifier: Arc<dyn EnrollmentNotifier>,
    ) -> Self {
        Self {
            registry,
            purchases,
            notifier,
        }
    }

    /// Verify, canonicalize and apply one provider callback.
    pub async fn dispatch(
        &self,
        provider: Provider,
        headers: &HeaderMap,
        body: &[u8],
    ) -> AppResult<DispatchOutcome> {
        let adapter = self.registry.get(provider)?;

        if let Err(err) = adapter.verify_webhook(body, headers) {
            warn!(%provider, error = %err, "webhook signature verification failed");
            return Err(err);
        }

        let event = adapter.parse_webhook(body)?;
        match event {
            WebhookEvent::Succeeded {
                provider_transaction_id,
                session_ref,
                paid_amount,
                ..
            } => {
                self.apply_confirmation(provider, &session_ref, &provider_transaction_id, paid_amount)
                    .await
            }
            WebhookEvent::Failed {
                session_ref,
                reason,
                ..
            } => self.apply_failure(provider, &session_ref, reason.as_deref()).await,
            WebhookEvent::Refunded {
                provider_transaction_id,
            } => self.apply_refund(provider, &provider_transaction_id).await,
            WebhookEvent::Ignored {
                provider_transaction_id,
                event,
            } => {
                info!(
                    %provider,
                    provider_transaction_id,
                    event,
                    "informational webhook acknowledged"
                );
                Ok(DispatchOutcome::Ignored)
            }
        }
    }

    /// Apply a verified success confirmation, keyed for idempotency by
    /// (provider, provider_transaction_id). Used by the webhook path and
    /// by the orchestrator's explicit capture path.
    pub async fn apply_confirmation(
        &self,
        provider: Provider,
        session_ref: &str,
        provider_transaction_id: &str,
        paid_amount: i64,
    ) -> AppResult<DispatchOutcome> {
        // Replay fast path: this transaction id has already settled
        if let Some(existing) = self
            .purchases
            .find_by_provider_tx(provider.as_str(), provider_transaction_id)
            .await?
        {
            return self.resolve_replay(&existing, provider_transaction_id);
        }

        let purchase = self
            .purchases
            .find_by_session_ref(provider.as_str(), session_ref)
            .await?
            .ok_or_else(|| {
                warn!(%provider, session_ref, "confirmation for unknown session");
                AppError::domain(DomainError::PurchaseNotFound { id: uuid::Uuid::nil() })
            })?;

        match purchase.status()? {
            PurchaseStatus::Pending => {}
            _ => return self.resolve_replay(&purchase, provider_transaction_id),
        }

        let expected = purchase.amount - purchase.discount_amount;
        if paid_amount != 0 && paid_amount != expected {
            warn!(
                purchase_id = %purchase.id,
                paid_amount,
                expected,
                "provider-reported amount differs from charged amount"
            );
        }

        // Coupon redemption and the status transition commit or roll back
        // together: a replay that loses the race on either statement
        // leaves no partial side effects.
        let mut tx = self.purchases.begin().await?;

        if let Some(coupon_id) = purchase.coupon_id {
            let redeemed = CouponRepository::redeem(&mut tx, coupon_id).await?;
            if !redeemed {
                PurchaseRepository::fail_if_pending_tx(&mut tx, purchase.id, "coupon_exhausted")
                    .await?;
                tx.commit().await.map_err(crate::database::error::DatabaseError::from_sqlx)?;
                warn!(
                    purchase_id = %purchase.id,
                    %coupon_id,
                    "coupon exhausted at confirmation, purchase failed"
                );
                return Ok(DispatchOutcome::CouponExhausted);
            }
        }

        let completed =
            PurchaseRepository::complete_if_pending(&mut tx, purchase.id, provider_transaction_id)
                .await;

        let completed = match completed {
            Ok(done) => done,
            // A concurrent delivery of the same transaction id hit the
            // unique (provider, provider_transaction_id) index first
            Err(err) if err.is_unique_violation() => {
                tx.rollback()
                    .await
                    .map_err(crate::database::error::DatabaseError::from_sqlx)?;
                return Ok(DispatchOutcome::Replay);
            }
            Err(err) => return Err(err.into()),
        };

        if !completed {
            tx.rollback()
                .await
                .map_err(crate::database::error::DatabaseError::from_sqlx)?;
            let current = self
                .purchases
                .find_by_id(purchase.id)
                .await?
                .ok_or(AppError::domain(DomainError::PurchaseNotFound { id: purchase.id }))?;
            return self.resolve_replay(&current, provider_transaction_id);
        }

        tx.commit()
            .await
            .map_err(crate::database::error::DatabaseError::from_sqlx)?;

        info!(purchase_id = %purchase.id, %provider, "purchase completed");
        self.notifier
            .purchase_completed(purchase.id, purchase.user_id, purchase.course_id)
            .await;

        Ok(DispatchOutcome::Applied)
    }

    /// Decide whether a non-pending purchase means a harmless replay or an
    /// illegal transition.
    fn resolve_replay(
        &self,
        purchase: &Purchase,
        provider_transaction_id: &str,
    ) -> AppResult<DispatchOutcome> {
        match purchase.status()? {
            PurchaseStatus::Completed
                if purchase.provider_transaction_id.as_deref()
                    == Some(provider_transaction_id) =>
            {
                info!(purchase_id = %purchase.id, "duplicate confirmation ignored");
                Ok(DispatchOutcome::Replay)
            }
            status => {
                warn!(
                    purchase_id = %purchase.id,
                    current = %status,
                    "confirmation for purchase not in pending state"
                );
                Err(AppError::domain(DomainError::InvalidStateTransition {
                    purchase_id: purchase.id,
                    from: status.as_str().to_string(),
                    to: PurchaseStatus::Completed.as_str().to_string(),
                }))
            }
        }
    }

    async fn apply_failure(
        &self,
        provider: Provider,
        session_ref: &str,
        reason: Option<&str>,
    ) -> AppResult<DispatchOutcome> {
        let purchase = self
            .purchases
            .find_by_session_ref(provider.as_str(), session_ref)
            .await?
            .ok_or_else(|| {
                warn!(%provider, session_ref, "failure report for unknown session");
                AppError::domain(DomainError::PurchaseNotFound { id: uuid::Uuid::nil() })
            })?;

        let failed = self
            .purchases
            .fail_if_pending(purchase.id, reason.unwrap_or("provider_declined"))
            .await?;

        if failed {
            info!(purchase_id = %purchase.id, ?reason, "purchase failed");
            return Ok(DispatchOutcome::Applied);
        }

        match purchase.status()? {
            PurchaseStatus::Failed => Ok(DispatchOutcome::Replay),
            status => {
                warn!(
                    purchase_id = %purchase.id,
                    current = %status,
                    "failure report for purchase not in pending state"
                );
                Err(AppError::domain(DomainError::InvalidStateTransition {
                    purchase_id: purchase.id,
                    from: status.as_str().to_string(),
                    to: PurchaseStatus::Failed.as_str().to_string(),
                }))
            }
        }
    }

    async fn apply_refund(
        &self,
        provider: Provider,
        provider_transaction_id: &str,
    ) -> AppResult<DispatchOutcome> {
        let purchase = self
            .purchases
            .find_by_provider_tx(provider.as_str(), provider_transaction_id)
            .await?
            .ok_or_else(|| {
                warn!(%provider, provider_transaction_id, "refund report for unknown transaction");
                AppError::domain(DomainError::PurchaseNotFound { id: uuid::Uuid::nil() })
            })?;

        let refunded = self.purchases.refund_if_completed(purchase.id).await?;
        if refunded {
            info!(purchase_id = %purchase.id, "purchase refunded");
            return Ok(DispatchOutcome::Applied);
        }

        match purchase.status()? {
            PurchaseStatus::Refunded => Ok(DispatchOutcome::Replay),
            status => {
                warn!(
                    purchase_id = %purchase.id,
                    current = %status,
                    "refund report for purchase not in completed state"
                );
                Err(AppError::domain(DomainError::InvalidStateTransition {
                    purchase_id: purchase.id,
                    from: status.as_str().to_string(),
                    to: PurchaseStatus::Refunded.as_str().to_string(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::payments::traits::ProviderAdapter;
    use crate::payments::types::{
        CheckoutParams, CheckoutSession, Confirmation, RefundReceipt,
    };
    use async_trait::async_trait;
    use sqlx::postgres::PgPoolOptions;

    /// Adapter that accepts any signature and reports an in-progress
    /// notification.
    struct InFlightAdapter;

    #[async_trait]
    impl ProviderAdapter for InFlightAdapter {
        fn provider(&self) -> Provider {
            Provider::Card
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
            Ok(WebhookEvent::Ignored {
                provider_transaction_id: "tx_inflight".to_string(),
                event: "IN_PROGRESS".to_string(),
            })
        }
    }

    // Lazy pool: never connects as long as no query runs, which is the
    // point of the test below.
    fn unreachable_pool() -> sqlx::PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://nobody@localhost:1/nowhere")
            .unwrap()
    }

    #[tokio::test]
    async fn in_flight_notification_is_acked_without_touching_the_ledger() {
        let registry = Arc::new(ProviderRegistry::new().register(Arc::new(InFlightAdapter)));
        let dispatcher = WebhookDispatcher::new(
            registry,
            Arc::new(PurchaseRepository::new(unreachable_pool())),
            Arc::new(crate::payments::LoggingEnrollmentNotifier),
        );

        let outcome = dispatcher
            .dispatch(Provider::Card, &HeaderMap::new(), b"{}")
            .await
            .expect("informational webhook must be acknowledged");
        assert_eq!(outcome, DispatchOutcome::Ignored);
    }
}
