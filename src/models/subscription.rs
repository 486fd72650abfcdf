use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Stripe subscription lifecycle statuses we care about. Raw strings are kept
/// in the database; this enum only drives reconciliation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
    Unknown,
}

impl SubscriptionStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" | "cancelled" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "unpaid" => Self::Unpaid,
            "paused" => Self::Paused,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Unpaid => "unpaid",
            Self::Paused => "paused",
            Self::Unknown => "unknown",
        }
    }

    /// Statuses that still represent a live entitlement. past_due stays in the
    /// set: the grace period keeps access until Stripe gives up on the charge.
    pub fn is_active_like(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing | Self::PastDue)
    }
}

/// One row per Stripe subscription id, scoped to a customer.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Stripe subscription id (`sub_...`).
    pub id: String,
    pub stripe_customer_id: String,
    pub status: String,
    pub price_id: Option<String>,
    pub currency: Option<String>,
    /// Minor currency units, from the subscription's price.
    pub amount_due: Option<i64>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub resolved_plan: Option<String>,
    pub resolved_plan_priority: Option<i16>,
    pub superseded: bool,
    pub last_reconciled_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl SubscriptionRecord {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::parse(&self.status)
    }
}
