//! Provider adapter implementations
//!
//! One module per external payment network. All four follow the same
//! skeleton: a config struct with `from_env`, a `reqwest::Client` with a
//! per-call timeout, a private request helper that classifies HTTP
//! failures into the shared error taxonomy, and the `ProviderAdapter`
//! impl. Helpers shared by the adapters live here.

pub mod card;
pub mod gulf;
pub mod paypal;
pub mod regional;

pub use card::CardAdapter;
pub use gulf::GulfAdapter;
pub use paypal::PaypalAdapter;
pub use regional::RegionalAdapter;

use crate::error::{AppError, ExternalError};
use crate::payments::types::Provider;
use reqwest::StatusCode;

/// Classify a transport-level failure. Timeouts and connection errors are
/// retryable by the caller; nothing here retries automatically.
pub(crate) fn error_from_transport(provider: Provider, err: reqwest::Error) -> AppError {
    AppError::external(ExternalError::ProviderUnavailable {
        provider,
        message: if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        },
    })
}

/// Classify a non-success HTTP status. 401 surfaces as `AuthExpired` so
/// token-bearing adapters can refresh and retry once; other 4xx are
/// terminal business rejections; 5xx are retryable outages.
pub(crate) fn error_from_status(provider: Provider, status: StatusCode, body: &str) -> AppError {
    if status == StatusCode::UNAUTHORIZED {
        return AppError::external(ExternalError::AuthExpired { provider });
    }
    let message = format!("HTTP {}: {}", status, body);
    if status.is_server_error() {
        AppError::external(ExternalError::ProviderUnavailable { provider, message })
    } else {
        AppError::external(ExternalError::ProviderRejected { provider, message })
    }
}

/// Render minor units as the "123.45" decimal string some providers want
pub(crate) fn minor_to_decimal(amount: i64) -> String {
    format!("{}.{:02}", amount / 100, (amount % 100).abs())
}

/// Parse a provider decimal string back into minor units
pub(crate) fn decimal_to_minor(value: &str) -> Result<i64, String> {
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    let whole: i64 = whole
        .parse()
        .map_err(|e| format!("bad decimal amount '{}': {}", value, e))?;
    let frac = match frac.len() {
        0 => 0,
        1 => {
            frac.parse::<i64>()
                .map_err(|e| format!("bad decimal amount '{}': {}", value, e))?
                * 10
        }
        2 => frac
            .parse::<i64>()
            .map_err(|e| format!("bad decimal amount '{}': {}", value, e))?,
        _ => return Err(format!("bad decimal amount '{}': too many places", value)),
    };
    Ok(whole * 100 + frac)
}
