//! Shared payment types
//!
//! Common request/response shapes used by every provider adapter, plus the
//! canonical checkout metadata codec. Adapters translate these to and from
//! their own wire formats; nothing provider-specific lives here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Supported payment providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Card,
    Paypal,
    Regional,
    Gulf,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Card => "card",
            Provider::Paypal => "paypal",
            Provider::Regional => "regional",
            Provider::Gulf => "gulf",
        }
    }

    pub const ALL: [Provider; 4] = [
        Provider::Card,
        Provider::Paypal,
        Provider::Regional,
        Provider::Gulf,
    ];
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "card" => Ok(Provider::Card),
            "paypal" => Ok(Provider::Paypal),
            "regional" => Ok(Provider::Regional),
            "gulf" => Ok(Provider::Gulf),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Canonical metadata attached to every checkout session.
///
/// Providers with a pass-through metadata map carry it as JSON; providers
/// without one carry it encoded into the merchant reference string. Both
/// transports round-trip through this one codec so adapters only adapt
/// the transport, never the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    pub user_id: Uuid,
    pub course_id: Uuid,
    /// Instructor's share of the charge, minor units
    pub instructor_share: i64,
    pub coupon_id: Option<Uuid>,
}

impl CheckoutMetadata {
    const FIELD_SEP: char = '|';
    const NONE_MARK: &'static str = "-";

    /// Encode for providers that only offer a merchant reference string.
    pub fn to_merchant_ref(&self) -> String {
        let coupon = self
            .coupon_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| Self::NONE_MARK.to_string());
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.user_id,
            self.course_id,
            self.instructor_share,
            coupon,
            sep = Self::FIELD_SEP,
        )
    }

    pub fn from_merchant_ref(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.split(Self::FIELD_SEP).collect();
        if parts.len() != 4 {
            return Err(format!(
                "malformed merchant ref: expected 4 fields, got {}",
                parts.len()
            ));
        }
        let user_id = Uuid::parse_str(parts[0]).map_err(|e| format!("bad user id: {}", e))?;
        let course_id = Uuid::parse_str(parts[1]).map_err(|e| format!("bad course id: {}", e))?;
        let instructor_share: i64 = parts[2]
            .parse()
            .map_err(|e| format!("bad instructor share: {}", e))?;
        let coupon_id = if parts[3] == Self::NONE_MARK {
            None
        } else {
            Some(Uuid::parse_str(parts[3]).map_err(|e| format!("bad coupon id: {}", e))?)
        };
        Ok(Self {
            user_id,
            course_id,
            instructor_share,
            coupon_id,
        })
    }

    /// Encode for providers that pass a metadata map through verbatim.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "user_id": self.user_id,
            "course_id": self.course_id,
            "instructor_share": self.instructor_share,
            "coupon_id": self.coupon_id,
        })
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        serde_json::from_value(value.clone()).map_err(|e| format!("bad metadata map: {}", e))
    }
}

/// Buyer identity forwarded to the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerInfo {
    pub email: String,
    pub name: String,
    /// Required by some gateways, absent for most digital buyers
    pub phone: Option<String>,
}

/// Parameters for creating a provider-side checkout session
#[derive(Debug, Clone)]
pub struct CheckoutParams {
    /// Amount to charge after discount, minor units
    pub charge_amount: i64,
    /// ISO 4217 code
    pub currency: String,
    pub buyer: BuyerInfo,
    /// Line-item description shown on the provider's page
    pub description: String,
    pub metadata: CheckoutMetadata,
}

/// Result of creating a checkout session
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// Where to send the buyer to complete payment
    pub redirect_url: String,
    /// Provider-side handle for this session (order id, session id, ...)
    pub provider_session_ref: String,
}

/// Outcome reported by a provider for a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Succeeded,
    Pending,
    Failed,
}

/// Confirmation retrieved from a provider (poll/capture path)
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub status: ConfirmationStatus,
    pub provider_transaction_id: String,
    /// Amount the provider reports as paid, minor units
    pub paid_amount: i64,
    pub currency: String,
    pub payer_identity: Option<String>,
}

/// Result of issuing a refund at the provider
#[derive(Debug, Clone)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub status: String,
}

/// Canonical webhook event, produced by each adapter's payload mapping
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Succeeded {
        provider_transaction_id: String,
        session_ref: String,
        paid_amount: i64,
        currency: String,
    },
    Failed {
        provider_transaction_id: String,
        session_ref: String,
        reason: Option<String>,
    },
    Refunded {
        provider_transaction_id: String,
    },
    /// Intermediate or informational notification. Acknowledged so the
    /// provider stops redelivering, but never applied to the ledger; the
    /// purchase stays wherever it is until a terminal event arrives.
    Ignored {
        provider_transaction_id: String,
        event: String,
    },
}

/// Output of the revenue split computation, all minor units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevenueSplit {
    pub discount_amount: i64,
    pub charge_amount: i64,
    pub platform_share: i64,
    pub instructor_share: i64,
}
