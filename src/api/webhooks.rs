use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::api::AppState;
use crate::payments::dispatcher::DispatchOutcome;
use crate::payments::types::Provider;

#[derive(Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: &'static str,
}

/// Single entry point for all provider callbacks. The raw body must reach
/// the verifier untouched, so the handler takes `Bytes` and never a typed
/// extractor. Replays acknowledge with 200 so the provider stops
/// retrying.
pub async fn receive(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(provider) = provider.parse::<Provider>() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state.dispatcher.dispatch(provider, &headers, &body).await {
        Ok(outcome) => {
            let outcome = match outcome {
                DispatchOutcome::Applied => "applied",
                DispatchOutcome::Replay => "replay",
                DispatchOutcome::CouponExhausted => "coupon_exhausted",
                DispatchOutcome::Ignored => "ignored",
            };
            info!(%provider, outcome, "webhook acknowledged");
            Json(WebhookAck {
                received: true,
                outcome,
            })
            .into_response()
        }
        Err(err) => err.into_response(),
    }
}
