//! Revenue split calculation
//!
//! Pure functions: gross price + optional coupon + platform fee percent in,
//! split out. All arithmetic is in integer minor units, rounding half up
//! once per step. Coupon `used_count` is not touched here; it moves exactly
//! once, at confirmation time, so abandoned checkouts never consume a use.

use crate::database::coupon_repository::{Coupon, DiscountType};
use crate::error::{AppError, CouponRejection, DomainError};
use crate::payments::types::RevenueSplit;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Round-half-up percentage of an amount. `amount` and the result are
/// minor units; `percent` is 0-100.
fn percent_of(amount: i64, percent: i64) -> i64 {
    (amount * percent + 50) / 100
}

/// Check a coupon against the purchase being quoted.
///
/// Exhaustion is checked here as a fast reject; the authoritative check is
/// the conditional increment at confirmation time.
pub fn validate_coupon(
    coupon: &Coupon,
    course_id: Uuid,
    gross: i64,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let reject = |reason: CouponRejection| {
        AppError::domain(DomainError::CouponInvalid {
            code: coupon.code.clone(),
            reason,
        })
    };

    if !coupon.is_active {
        return Err(reject(CouponRejection::Inactive));
    }
    if now < coupon.start_date {
        return Err(reject(CouponRejection::NotStarted));
    }
    if let Some(expiry) = coupon.expiry_date {
        if now > expiry {
            return Err(reject(CouponRejection::Expired));
        }
    }
    if let Some(scope) = coupon.course_id {
        if scope != course_id {
            return Err(reject(CouponRejection::ScopeMismatch));
        }
    }
    if let Some(min) = coupon.min_purchase {
        if gross < min {
            return Err(reject(CouponRejection::BelowMinimum));
        }
    }
    if let Some(max_uses) = coupon.max_uses {
        if coupon.used_count >= max_uses {
            return Err(reject(CouponRejection::Exhausted));
        }
    }
    Ok(())
}

/// Discount a validated coupon grants on a gross price
pub fn discount_for(coupon: &Coupon, gross: i64) -> Result<i64, AppError> {
    let discount = match coupon.discount_type().map_err(AppError::from)? {
        DiscountType::Percentage => {
            let raw = percent_of(gross, coupon.discount_value);
            match coupon.max_discount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
        DiscountType::Fixed => coupon.discount_value.min(gross),
    };
    Ok(discount.min(gross))
}

/// Compute the full revenue split for a checkout.
///
/// `gross` is the course's effective price (list or sale price, whichever
/// the catalog reports as lower). `platform_fee_percent` comes from config,
/// passed explicitly to keep this testable.
pub fn compute_split(
    gross: i64,
    coupon: Option<&Coupon>,
    course_id: Uuid,
    platform_fee_percent: i64,
    now: DateTime<Utc>,
) -> Result<RevenueSplit, AppError> {
    let discount_amount = match coupon {
        Some(coupon) => {
            validate_coupon(coupon, course_id, gross, now)?;
            discount_for(coupon, gross)?
        }
        None => 0,
    };

    let charge_amount = (gross - discount_amount).max(0);
    let platform_share = percent_of(charge_amount, platform_fee_percent);
    let instructor_share = charge_amount - platform_share;

    Ok(RevenueSplit {
        discount_amount,
        charge_amount,
        platform_share,
        instructor_share,
    })
}
