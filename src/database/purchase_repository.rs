//! Purchase ledger
//!
//! Source of truth for a purchase's lifecycle. All state changes go through
//! compare-and-set updates conditioned on the current status, so concurrent
//! webhook deliveries and the external timeout sweeper can never push a row
//! through an illegal transition. Rows are never deleted; refunds are a
//! terminal state, not a removal.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Purchase lifecycle states.
///
/// Legal transitions: pending -> completed, pending -> failed,
/// completed -> refunded. Nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::Failed => "failed",
            PurchaseStatus::Refunded => "refunded",
        }
    }

    pub fn can_transition(&self, to: PurchaseStatus) -> bool {
        matches!(
            (self, to),
            (PurchaseStatus::Pending, PurchaseStatus::Completed)
                | (PurchaseStatus::Pending, PurchaseStatus::Failed)
                | (PurchaseStatus::Completed, PurchaseStatus::Refunded)
        )
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PurchaseStatus::Pending),
            "completed" => Ok(PurchaseStatus::Completed),
            "failed" => Ok(PurchaseStatus::Failed),
            "refunded" => Ok(PurchaseStatus::Refunded),
            other => Err(format!("unknown purchase status '{}'", other)),
        }
    }
}

/// Purchase entity, one row per checkout attempt
#[derive(Debug, Clone, FromRow)]
pub struct Purchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub provider: String,
    /// Provider's transaction id; unique per provider once set, the
    /// idempotency key for webhook replay
    pub provider_transaction_id: Option<String>,
    /// Provider's checkout-session handle
    pub provider_session_ref: Option<String>,
    /// Gross amount, minor units
    pub amount: i64,
    pub currency: String,
    pub discount_amount: i64,
    pub platform_share: i64,
    pub instructor_share: i64,
    pub coupon_id: Option<Uuid>,
    pub status: String,
    pub failure_reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub confirmed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub refunded_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Purchase {
    pub fn status(&self) -> Result<PurchaseStatus, DatabaseError> {
        PurchaseStatus::from_str(&self.status).map_err(|message| {
            DatabaseError::new(DatabaseErrorKind::QueryError { message })
                .with_context(format!("purchase {}", self.id))
        })
    }
}

/// Fields needed to open a pending purchase
#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub provider: String,
    pub amount: i64,
    pub currency: String,
    pub discount_amount: i64,
    pub platform_share: i64,
    pub instructor_share: i64,
    pub coupon_id: Option<Uuid>,
}

const PURCHASE_COLUMNS: &str = "id, user_id, course_id, provider, provider_transaction_id, \
     provider_session_ref, amount, currency, discount_amount, platform_share, instructor_share, \
     coupon_id, status, failure_reason, created_at, confirmed_at, refunded_at";

/// Repository for the purchase ledger
pub struct PurchaseRepository {
    pool: PgPool,
}

impl PurchaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a transaction for a multi-statement ledger mutation
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, DatabaseError> {
        self.pool.begin().await.map_err(DatabaseError::from_sqlx)
    }

    /// Open a purchase in `pending` before redirecting the buyer
    pub async fn create_pending(&self, new: &NewPurchase) -> Result<Purchase, DatabaseError> {
        sqlx::query_as::<_, Purchase>(&format!(
            "INSERT INTO purchases \
             (id, user_id, course_id, provider, amount, currency, discount_amount, \
              platform_share, instructor_share, coupon_id, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', NOW()) \
             RETURNING {}",
            PURCHASE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(new.course_id)
        .bind(&new.provider)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(new.discount_amount)
        .bind(new.platform_share)
        .bind(new.instructor_share)
        .bind(new.coupon_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Record the provider's session handle once the session exists
    pub async fn attach_session_ref(
        &self,
        id: Uuid,
        session_ref: &str,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE purchases SET provider_session_ref = $2 WHERE id = $1")
            .bind(id)
            .bind(session_ref)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Purchase", id.to_string()));
        }
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Purchase>, DatabaseError> {
        sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {} FROM purchases WHERE id = $1",
            PURCHASE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_session_ref(
        &self,
        provider: &str,
        session_ref: &str,
    ) -> Result<Option<Purchase>, DatabaseError> {
        sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {} FROM purchases WHERE provider = $1 AND provider_session_ref = $2",
            PURCHASE_COLUMNS
        ))
        .bind(provider)
        .bind(session_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Lookup by the webhook idempotency key
    pub async fn find_by_provider_tx(
        &self,
        provider: &str,
        provider_transaction_id: &str,
    ) -> Result<Option<Purchase>, DatabaseError> {
        sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {} FROM purchases WHERE provider = $1 AND provider_transaction_id = $2",
            PURCHASE_COLUMNS
        ))
        .bind(provider)
        .bind(provider_transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// pending -> completed, conditioned on the row still being pending.
    ///
    /// Returns `false` when the row was not pending; the caller decides
    /// whether that is an idempotent replay or an illegal transition. The
    /// unique index on (provider, provider_transaction_id) turns a replay
    /// racing the first delivery into a unique violation instead of a
    /// second completion.
    pub async fn complete_if_pending(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        provider_transaction_id: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE purchases \
             SET status = 'completed', provider_transaction_id = $2, confirmed_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(provider_transaction_id)
        .execute(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// pending -> failed compare-and-set. Also the hook for the external
    /// timeout sweeper, which must never fail a purchase that confirmed
    /// between its read and its write.
    pub async fn fail_if_pending(&self, id: Uuid, reason: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE purchases SET status = 'failed', failure_reason = $2 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Transaction-scoped variant of `fail_if_pending`, for marking the
    /// loser of a coupon race inside the same transaction
    pub async fn fail_if_pending_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        reason: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE purchases SET status = 'failed', failure_reason = $2 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(reason)
        .execute(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// completed -> refunded. Share columns stay untouched for audit;
    /// reversal accounting is a downstream concern.
    pub async fn refund_if_completed(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE purchases SET status = 'refunded', refunded_at = NOW() \
             WHERE id = $1 AND status = 'completed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        assert!(PurchaseStatus::Pending.can_transition(PurchaseStatus::Completed));
        assert!(PurchaseStatus::Pending.can_transition(PurchaseStatus::Failed));
        assert!(PurchaseStatus::Completed.can_transition(PurchaseStatus::Refunded));
    }

    #[test]
    fn failed_purchase_cannot_complete() {
        assert!(!PurchaseStatus::Failed.can_transition(PurchaseStatus::Completed));
    }

    #[test]
    fn refund_only_from_completed() {
        assert!(!PurchaseStatus::Pending.can_transition(PurchaseStatus::Refunded));
        assert!(!PurchaseStatus::Failed.can_transition(PurchaseStatus::Refunded));
        assert!(!PurchaseStatus::Refunded.can_transition(PurchaseStatus::Refunded));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            PurchaseStatus::Pending,
            PurchaseStatus::Completed,
            PurchaseStatus::Failed,
            PurchaseStatus::Refunded,
        ] {
            assert_eq!(PurchaseStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(PurchaseStatus::from_str("chargeback").is_err());
    }
}
