use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::billing::reconciler::Reconciliation;
use crate::models::{customer::PlanClaims, subscription::SubscriptionRecord};

#[async_trait]
pub trait BillingRepository: Send + Sync {
    async fn find_user_id_by_stripe_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error>;

    async fn upsert_stripe_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<(), sqlx::Error>;

    /// Insert or refresh the raw Stripe-sourced fields of a record. Resolved
    /// plan and superseded flags are left to `apply_reconciliation`.
    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> Result<(), sqlx::Error>;

    async fn list_subscriptions_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<SubscriptionRecord>, sqlx::Error>;

    /// Soft-mark: the record is kept for history, never deleted. Returns the
    /// owning customer id when the record exists.
    async fn mark_subscription_canceled(
        &self,
        subscription_id: &str,
        canceled_at: OffsetDateTime,
    ) -> Result<Option<String>, sqlx::Error>;

    /// Persist a reconciliation outcome for every record of the customer,
    /// stamping `last_reconciled_at` on each, atomically.
    async fn apply_reconciliation(
        &self,
        customer_id: &str,
        reconciliation: &Reconciliation,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error>;

    async fn update_user_claims(
        &self,
        user_id: Uuid,
        claims: &PlanClaims,
    ) -> Result<(), sqlx::Error>;
}
