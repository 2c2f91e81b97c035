//! Checkout orchestrator
//!
//! Front door of the settlement core. Resolves the course offer, prices
//! the purchase through the revenue split calculator, opens a pending
//! ledger row and hands the buyer to the selected provider. Also owns the
//! explicit capture path (two-phase providers) and refunds.

use crate::config::PaymentsConfig;
use crate::database::coupon_repository::{Coupon, CouponRepository};
use crate::database::purchase_repository::{NewPurchase, PurchaseRepository, PurchaseStatus};
use crate::error::{AppError, AppResult, CouponRejection, DomainError, ExternalError};
use crate::payments::dispatcher::{DispatchOutcome, WebhookDispatcher};
use crate::payments::registry::ProviderRegistry;
use crate::payments::split;
use crate::payments::types::{
    BuyerInfo, CheckoutMetadata, CheckoutParams, ConfirmationStatus, Provider, RefundReceipt,
};
use crate::payments::CourseCatalog;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A checkout request as the API layer hands it over. Buyer details come
/// from the user domain, which is outside this core.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub course_id: Uuid,
    pub user_id: Uuid,
    pub provider: Provider,
    pub coupon_code: Option<String>,
    pub buyer: BuyerInfo,
}

/// What the caller needs to continue the flow
#[derive(Debug, Clone)]
pub struct CheckoutCreated {
    pub purchase_id: Uuid,
    pub redirect_url: String,
}

pub struct CheckoutOrchestrator {
    registry: Arc<ProviderRegistry>,
    purchases: Arc<PurchaseRepository>,
    coupons: Arc<CouponRepository>,
    catalog: Arc<dyn CourseCatalog>,
    dispatcher: Arc<WebhookDispatcher>,
    settings: PaymentsConfig,
}

impl CheckoutOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        purchases: Arc<PurchaseRepository>,
        coupons: Arc<CouponRepository>,
        catalog: Arc<dyn CourseCatalog>,
        dispatcher: Arc<WebhookDispatcher>,
        settings: PaymentsConfig,
    ) -> Self {
        Self {
            registry,
            purchases,
            coupons,
            catalog,
            dispatcher,
            settings,
        }
    }

    async fn resolve_coupon(&self, code: Option<&str>) -> AppResult<Option<Coupon>> {
        let Some(code) = code else {
            return Ok(None);
        };
        match self.coupons.find_by_code(code).await? {
            Some(coupon) => Ok(Some(coupon)),
            None => Err(AppError::domain(DomainError::CouponInvalid {
                code: code.to_string(),
                reason: CouponRejection::UnknownCode,
            })),
        }
    }

    /// Start a checkout: price it, open a pending purchase, create the
    /// provider session and return the redirect target.
    ///
    /// The provider call is never retried here; a retry could mint a
    /// second provider-side session for the same purchase.
    pub async fn create_checkout(&self, request: CheckoutRequest) -> AppResult<CheckoutCreated> {
        let offer = self.catalog.offer(request.course_id).await?;
        let coupon = self.resolve_coupon(request.coupon_code.as_deref()).await?;

        let split = split::compute_split(
            offer.price,
            coupon.as_ref(),
            request.course_id,
            self.settings.platform_fee_percent,
            Utc::now(),
        )?;

        let purchase = self
            .purchases
            .create_pending(&NewPurchase {
                user_id: request.user_id,
                course_id: request.course_id,
                provider: request.provider.as_str().to_string(),
                amount: offer.price,
                currency: self.settings.currency.clone(),
                discount_amount: split.discount_amount,
                platform_share: split.platform_share,
                instructor_share: split.instructor_share,
                coupon_id: coupon.as_ref().map(|c| c.id),
            })
            .await?;

        info!(
            purchase_id = %purchase.id,
            provider = %request.provider,
            charge = split.charge_amount,
            "pending purchase opened"
        );

        let adapter = self.registry.get(request.provider)?;
        let params = CheckoutParams {
            charge_amount: split.charge_amount,
            currency: self.settings.currency.clone(),
            buyer: request.buyer,
            description: offer.title,
            metadata: CheckoutMetadata {
                user_id: request.user_id,
                course_id: request.course_id,
                instructor_share: split.instructor_share,
                coupon_id: coupon.as_ref().map(|c| c.id),
            },
        };

        let session = match adapter.create_checkout(params).await {
            Ok(session) => session,
            Err(err) => {
                // The provider never saw, or rejected, this session; the
                // row would otherwise sit pending until the sweeper ran.
                let _ = self
                    .purchases
                    .fail_if_pending(purchase.id, "session_creation_failed")
                    .await;
                return Err(err);
            }
        };

        self.purchases
            .attach_session_ref(purchase.id, &session.provider_session_ref)
            .await?;

        info!(
            purchase_id = %purchase.id,
            session_ref = %session.provider_session_ref,
            "checkout session created"
        );

        Ok(CheckoutCreated {
            purchase_id: purchase.id,
            redirect_url: session.redirect_url,
        })
    }

    /// Explicit second phase for providers that finalize on redirect-back
    /// rather than push-only webhooks. Applies the confirmation through
    /// the same ledger path as a webhook, so replays stay idempotent.
    pub async fn capture(&self, purchase_id: Uuid) -> AppResult<DispatchOutcome> {
        let purchase = self
            .purchases
            .find_by_id(purchase_id)
            .await?
            .ok_or(AppError::domain(DomainError::PurchaseNotFound { id: purchase_id }))?;

        let provider: Provider = purchase.provider.parse().map_err(|message: String| {
            AppError::configuration(message).with_context(format!("purchase {}", purchase_id))
        })?;

        let session_ref = purchase.provider_session_ref.clone().ok_or_else(|| {
            AppError::domain(DomainError::InvalidStateTransition {
                purchase_id,
                from: purchase.status.clone(),
                to: PurchaseStatus::Completed.as_str().to_string(),
            })
        })?;

        let adapter = self.registry.get(provider)?;
        let confirmation = adapter.retrieve_confirmation(&session_ref).await?;

        match confirmation.status {
            ConfirmationStatus::Succeeded => {
                self.dispatcher
                    .apply_confirmation(
                        provider,
                        &session_ref,
                        &confirmation.provider_transaction_id,
                        confirmation.paid_amount,
                    )
                    .await
            }
            ConfirmationStatus::Pending => Err(AppError::external(
                ExternalError::ProviderUnavailable {
                    provider,
                    message: "confirmation still pending at provider".to_string(),
                },
            )),
            ConfirmationStatus::Failed => {
                self.purchases
                    .fail_if_pending(purchase_id, "capture_failed")
                    .await?;
                Err(AppError::external(ExternalError::ProviderRejected {
                    provider,
                    message: "provider reported the payment as failed".to_string(),
                }))
            }
        }
    }

    /// Refund a completed purchase, partially when `amount` is given.
    /// Share columns are left untouched; reversal accounting is a
    /// downstream concern.
    pub async fn refund(&self, purchase_id: Uuid, amount: Option<i64>) -> AppResult<RefundReceipt> {
        let purchase = self
            .purchases
            .find_by_id(purchase_id)
            .await?
            .ok_or(AppError::domain(DomainError::PurchaseNotFound { id: purchase_id }))?;

        let status = purchase.status()?;
        if status != PurchaseStatus::Completed {
            warn!(%purchase_id, current = %status, "refund requested for non-completed purchase");
            return Err(AppError::domain(DomainError::InvalidStateTransition {
                purchase_id,
                from: status.as_str().to_string(),
                to: PurchaseStatus::Refunded.as_str().to_string(),
            }));
        }

        let provider: Provider = purchase.provider.parse().map_err(|message: String| {
            AppError::configuration(message).with_context(format!("purchase {}", purchase_id))
        })?;

        let transaction_id = purchase.provider_transaction_id.clone().ok_or_else(|| {
            AppError::domain(DomainError::InvalidStateTransition {
                purchase_id,
                from: status.as_str().to_string(),
                to: PurchaseStatus::Refunded.as_str().to_string(),
            })
        })?;

        if let Some(amount) = amount {
            let charged = purchase.amount - purchase.discount_amount;
            if amount <= 0 || amount > charged {
                return Err(AppError::external(ExternalError::ProviderRejected {
                    provider,
                    message: format!(
                        "refund amount {} outside charged amount {}",
                        amount, charged
                    ),
                }));
            }
        }

        let adapter = self.registry.get(provider)?;
        let receipt = adapter.create_refund(&transaction_id, amount).await?;

        let refunded = self.purchases.refund_if_completed(purchase_id).await?;
        if !refunded {
            warn!(%purchase_id, "purchase left completed state while refund was in flight");
        }

        info!(%purchase_id, refund_id = %receipt.refund_id, "refund recorded");
        Ok(receipt)
    }
}
