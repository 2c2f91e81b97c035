//! Application error taxonomy
//!
//! Errors are grouped into three families: domain rules (coupons, the
//! purchase state machine), external collaborators (payment providers),
//! and infrastructure (configuration, database). Handlers map these onto
//! HTTP statuses; adapters and repositories construct them directly.

use crate::database::error::DatabaseError;
use crate::payments::types::Provider;
use thiserror::Error;
use uuid::Uuid;

/// Result type used across the payment core
pub type AppResult<T> = Result<T, AppError>;

/// Why a coupon was rejected at validation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponRejection {
    UnknownCode,
    Inactive,
    NotStarted,
    Expired,
    Exhausted,
    BelowMinimum,
    ScopeMismatch,
}

impl CouponRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponRejection::UnknownCode => "unknown_code",
            CouponRejection::Inactive => "inactive",
            CouponRejection::NotStarted => "not_started",
            CouponRejection::Expired => "expired",
            CouponRejection::Exhausted => "exhausted",
            CouponRejection::BelowMinimum => "below_minimum",
            CouponRejection::ScopeMismatch => "scope_mismatch",
        }
    }
}

/// Business-rule failures
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("coupon '{code}' rejected: {}", reason.as_str())]
    CouponInvalid {
        code: String,
        reason: CouponRejection,
    },

    #[error("coupon '{code}' has no remaining uses")]
    CouponExhausted { code: String },

    #[error("illegal purchase transition {from} -> {to} for {purchase_id}")]
    InvalidStateTransition {
        purchase_id: Uuid,
        from: String,
        to: String,
    },

    #[error("purchase {id} not found")]
    PurchaseNotFound { id: Uuid },

    #[error("course {id} not found")]
    CourseNotFound { id: Uuid },

    #[error("unsupported payment provider '{name}'")]
    UnsupportedProvider { name: String },
}

/// Failures originating at a payment provider boundary
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("{provider} unavailable: {message}")]
    ProviderUnavailable { provider: Provider, message: String },

    #[error("{provider} rejected the request: {message}")]
    ProviderRejected { provider: Provider, message: String },

    /// `payload_hash` is a SHA-256 of the rejected body; the raw body and
    /// the signing secret are never logged.
    #[error("invalid {provider} webhook signature (payload sha256={payload_hash})")]
    InvalidSignature {
        provider: Provider,
        payload_hash: String,
    },

    #[error("{provider} auth token expired")]
    AuthExpired { provider: Provider },
}

/// Configuration and persistence failures
#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Error)]
pub enum AppErrorKind {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    External(#[from] ExternalError),
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),
}

/// Top-level application error
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn external(err: ExternalError) -> Self {
        Self::new(AppErrorKind::External(err))
    }

    pub fn infrastructure(err: InfrastructureError) -> Self {
        Self::new(AppErrorKind::Infrastructure(err))
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::infrastructure(InfrastructureError::Configuration {
            message: message.into(),
        })
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Whether the caller may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::External(ExternalError::ProviderUnavailable { .. }) => true,
            AppErrorKind::Infrastructure(InfrastructureError::Database(db)) => db.is_retryable(),
            _ => false,
        }
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        Self::infrastructure(InfrastructureError::Database(err))
    }
}
