use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::plan::PlanTier;

/// Mapping between an application user and their Stripe customer. One per
/// user; the customer id is what webhook payloads carry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StripeCustomerRecord {
    pub user_id: Uuid,
    pub stripe_customer_id: String,
    pub created_at: OffsetDateTime,
}

/// Access claims written onto the user record after reconciliation. Field
/// names follow the token contract consumed by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanClaims {
    pub plan: PlanTier,
    pub stripe_active: bool,
    pub stripe_past_due: bool,
}

impl PlanClaims {
    pub fn free() -> Self {
        Self {
            plan: PlanTier::Free,
            stripe_active: false,
            stripe_past_due: false,
        }
    }
}
