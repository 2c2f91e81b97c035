use crate::database::error::{DatabaseError, DatabaseErrorKind};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

/// Coupon discount kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Fixed => "fixed",
        }
    }
}

impl FromStr for DiscountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(DiscountType::Percentage),
            "fixed" => Ok(DiscountType::Fixed),
            other => Err(format!("unknown discount type '{}'", other)),
        }
    }
}

/// Coupon entity. Owned by the catalog domain; the payment core reads it
/// and touches only `used_count`, via `redeem`.
#[derive(Debug, Clone, FromRow)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub discount_type: String,
    /// Percent (0-100) for percentage coupons, minor units for fixed ones
    pub discount_value: i64,
    pub min_purchase: Option<i64>,
    /// Cap for percentage discounts, minor units
    pub max_discount: Option<i64>,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    pub start_date: chrono::DateTime<chrono::Utc>,
    pub expiry_date: Option<chrono::DateTime<chrono::Utc>>,
    /// None means the coupon applies to every course
    pub course_id: Option<Uuid>,
    pub is_active: bool,
}

impl Coupon {
    pub fn discount_type(&self) -> Result<DiscountType, DatabaseError> {
        DiscountType::from_str(&self.discount_type).map_err(|message| {
            DatabaseError::new(DatabaseErrorKind::QueryError { message })
                .with_context(format!("coupon {}", self.id))
        })
    }
}

const COUPON_COLUMNS: &str = "id, code, discount_type, discount_value, min_purchase, max_discount, \
     max_uses, used_count, start_date, expiry_date, course_id, is_active";

/// Repository for coupon reads and atomic redemption
pub struct CouponRepository {
    pool: PgPool,
}

impl CouponRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a coupon by code, case-insensitively
    pub async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, DatabaseError> {
        sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {} FROM coupons WHERE LOWER(code) = LOWER($1)",
            COUPON_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Coupon>, DatabaseError> {
        sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {} FROM coupons WHERE id = $1",
            COUPON_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Consume one use of a coupon.
    ///
    /// The usage-limit check and the increment happen in the same UPDATE, so
    /// two confirmations racing for the last slot are serialized by the row
    /// lock and exactly one of them sees `true`. Runs inside the caller's
    /// transaction so it commits or rolls back with the purchase transition.
    pub async fn redeem(
        tx: &mut Transaction<'_, Postgres>,
        coupon_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE coupons SET used_count = used_count + 1 \
             WHERE id = $1 AND is_active = true \
               AND (max_uses IS NULL OR used_count < max_uses)",
        )
        .bind(coupon_id)
        .execute(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}
