//! HTTP surface
//!
//! Thin axum handlers over the payment core. Handlers extract, delegate
//! and translate: every domain decision lives below this layer, and the
//! error taxonomy maps onto HTTP statuses in exactly one place.

pub mod checkout;
pub mod health;
pub mod webhooks;

use crate::config::Config;
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError};
use crate::payments::dispatcher::WebhookDispatcher;
use crate::payments::orchestrator::CheckoutOrchestrator;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub orchestrator: Arc<CheckoutOrchestrator>,
    pub dispatcher: Arc<WebhookDispatcher>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/checkout", post(checkout::create_checkout))
        .route(
            "/api/checkout/:purchase_id/capture",
            post(checkout::capture),
        )
        .route("/api/refund", post(checkout::refund))
        .route("/webhooks/:provider", post(webhooks::receive))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::CouponInvalid { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "coupon_invalid", self.to_string())
                }
                DomainError::CouponExhausted { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "coupon_exhausted", self.to_string())
                }
                DomainError::InvalidStateTransition { .. } => {
                    (StatusCode::CONFLICT, "invalid_state", self.to_string())
                }
                DomainError::PurchaseNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "purchase_not_found", self.to_string())
                }
                DomainError::CourseNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "course_not_found", self.to_string())
                }
                DomainError::UnsupportedProvider { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "unsupported_provider", self.to_string())
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::InvalidSignature { .. } => {
                    (StatusCode::UNAUTHORIZED, "invalid_signature", self.to_string())
                }
                ExternalError::ProviderUnavailable { .. } | ExternalError::AuthExpired { .. } => {
                    (StatusCode::BAD_GATEWAY, "provider_unavailable", self.to_string())
                }
                ExternalError::ProviderRejected { .. } => {
                    (StatusCode::BAD_GATEWAY, "provider_rejected", self.to_string())
                }
            },
            AppErrorKind::Infrastructure(err) => {
                // Internals stay out of the response body
                error!(error = %err, context = ?self.context, "infrastructure failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorBody {
                error: message,
                code,
            }),
        )
            .into_response()
    }
}
