//! Payment settlement core
//!
//! Turns a course purchase intent into a confirmed, revenue-split
//! transaction across four external payment networks. The orchestrator
//! starts checkouts, the dispatcher applies provider webhooks to the
//! purchase ledger, and everything provider-specific hides behind the
//! `ProviderAdapter` trait.

pub mod dispatcher;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod signature;
pub mod split;
pub mod token_cache;
pub mod traits;
pub mod types;

use crate::error::AppResult;
use async_trait::async_trait;
use uuid::Uuid;

/// What the payment core needs to know about a course. The catalog itself
/// is owned by the content domain; this is its boundary.
#[derive(Debug, Clone)]
pub struct CourseOffer {
    pub course_id: Uuid,
    pub title: String,
    /// Effective price in minor units (list price or sale price,
    /// whichever is lower)
    pub price: i64,
}

#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn offer(&self, course_id: Uuid) -> AppResult<CourseOffer>;
}

/// Downstream enrollment collaborator, notified exactly once per
/// completed purchase. Implementations must tolerate being called after
/// the ledger transition has committed.
#[async_trait]
pub trait EnrollmentNotifier: Send + Sync {
    async fn purchase_completed(&self, purchase_id: Uuid, user_id: Uuid, course_id: Uuid);
}

/// No-op notifier that only logs; the real fan-out lives outside this
/// service.
pub struct LoggingEnrollmentNotifier;

#[async_trait]
impl EnrollmentNotifier for LoggingEnrollmentNotifier {
    async fn purchase_completed(&self, purchase_id: Uuid, user_id: Uuid, course_id: Uuid) {
        tracing::info!(
            %purchase_id,
            %user_id,
            %course_id,
            "purchase completed, enrollment notified"
        );
    }
}
