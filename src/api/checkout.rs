use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{AppError, DomainError};
use crate::payments::dispatcher::DispatchOutcome;
use crate::payments::orchestrator::CheckoutRequest;
use crate::payments::types::{BuyerInfo, Provider};

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub course_id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub coupon_code: Option<String>,
    pub buyer_email: String,
    pub buyer_name: String,
    pub buyer_phone: Option<String>,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub purchase_id: Uuid,
    pub redirect_url: String,
}

fn parse_provider(raw: &str) -> Result<Provider, AppError> {
    raw.parse().map_err(|_: String| {
        AppError::domain(DomainError::UnsupportedProvider {
            name: raw.to_string(),
        })
    })
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Json(body): Json<CheckoutBody>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let provider = parse_provider(&body.provider)?;

    let created = state
        .orchestrator
        .create_checkout(CheckoutRequest {
            course_id: body.course_id,
            user_id: body.user_id,
            provider,
            coupon_code: body.coupon_code,
            buyer: BuyerInfo {
                email: body.buyer_email,
                name: body.buyer_name,
                phone: body.buyer_phone,
            },
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            purchase_id: created.purchase_id,
            redirect_url: created.redirect_url,
        }),
    ))
}

#[derive(Serialize)]
pub struct CaptureResponse {
    pub purchase_id: Uuid,
    pub outcome: &'static str,
}

pub async fn capture(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
) -> Result<Json<CaptureResponse>, AppError> {
    let outcome = state.orchestrator.capture(purchase_id).await?;

    let outcome = match outcome {
        DispatchOutcome::Applied => "completed",
        DispatchOutcome::Replay => "already_completed",
        DispatchOutcome::CouponExhausted => "coupon_exhausted",
        // apply_confirmation never produces this, but the ack is harmless
        DispatchOutcome::Ignored => "ignored",
    };

    Ok(Json(CaptureResponse {
        purchase_id,
        outcome,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub purchase_id: Uuid,
    /// Minor units; omitted means full refund
    pub amount: Option<i64>,
}

#[derive(Serialize)]
pub struct RefundResponse {
    pub refund_id: String,
    pub status: String,
}

pub async fn refund(
    State(state): State<AppState>,
    Json(body): Json<RefundBody>,
) -> Result<Json<RefundResponse>, AppError> {
    let receipt = state
        .orchestrator
        .refund(body.purchase_id, body.amount)
        .await?;

    Ok(Json(RefundResponse {
        refund_id: receipt.refund_id,
        status: receipt.status,
    }))
}
