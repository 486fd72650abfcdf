use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::reconciler::reconcile;
use crate::billing::resolver::PriceCatalog;
use crate::billing::BillingError;
use crate::db::billing_repository::BillingRepository;
use crate::models::customer::PlanClaims;
use crate::models::subscription::SubscriptionRecord;
use crate::services::stripe::{StripeGateway, SubscriptionInfo};

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub user_id: Uuid,
    pub claims: PlanClaims,
    pub winner: Option<String>,
}

fn ts(secs: Option<i64>) -> Option<OffsetDateTime> {
    secs.and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
}

fn record_from_info(info: &SubscriptionInfo, now: OffsetDateTime) -> SubscriptionRecord {
    SubscriptionRecord {
        id: info.id.clone(),
        stripe_customer_id: info.customer.clone(),
        status: info.status.clone(),
        price_id: info.price_id.clone(),
        currency: info.currency.clone(),
        amount_due: info.amount_due,
        current_period_start: ts(info.current_period_start),
        current_period_end: ts(info.current_period_end),
        cancel_at_period_end: info.cancel_at_period_end,
        canceled_at: ts(info.canceled_at),
        trial_end: ts(info.trial_end),
        resolved_plan: None,
        resolved_plan_priority: None,
        superseded: false,
        last_reconciled_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Re-run reconciliation over everything stored for the customer, schedule
/// cancellation of still-active losers, persist the outcome, and write the
/// resulting claims onto the user row.
async fn reconcile_customer(
    db: &dyn BillingRepository,
    stripe: &dyn StripeGateway,
    catalog: &PriceCatalog,
    customer_id: &str,
    user_id: Uuid,
) -> Result<SyncOutcome, BillingError> {
    let records = db.list_subscriptions_for_customer(customer_id).await?;
    let outcome = reconcile(&records, catalog);

    for entry in outcome.cancellations() {
        // Superseded subscriptions are wound down at period end, never cut
        // off immediately; a failed call is logged and the pass continues.
        if let Err(err) = stripe
            .set_subscription_cancel_at_period_end(&entry.subscription_id, true)
            .await
        {
            warn!(
                ?err,
                subscription_id = %entry.subscription_id,
                customer_id,
                "failed to schedule cancellation for superseded subscription"
            );
        }
    }

    let now = OffsetDateTime::now_utc();
    db.apply_reconciliation(customer_id, &outcome, now).await?;
    db.update_user_claims(user_id, &outcome.claims).await?;

    info!(
        customer_id,
        %user_id,
        winner = outcome.winner.as_deref().unwrap_or("none"),
        plan = outcome.claims.plan.as_str(),
        "reconciled customer subscriptions"
    );

    Ok(SyncOutcome {
        user_id,
        claims: outcome.claims,
        winner: outcome.winner,
    })
}

/// Map a Stripe subscription into the local record shape, persist it, and
/// reconcile. `prefetched` carries the payload-mapped subscription when the
/// webhook already delivered it; otherwise the subscription is fetched.
///
/// A subscription whose customer has no local mapping is acknowledged as a
/// no-op: checkout completion creates the mapping, and events racing ahead of
/// it will be followed by updates once the mapping exists.
pub async fn sync_subscription(
    db: &dyn BillingRepository,
    stripe: &dyn StripeGateway,
    catalog: &PriceCatalog,
    subscription_id: &str,
    prefetched: Option<SubscriptionInfo>,
) -> Result<Option<SyncOutcome>, BillingError> {
    let info = match prefetched {
        Some(info) => info,
        None => stripe.retrieve_subscription(subscription_id).await?,
    };

    let user_id = match db
        .find_user_id_by_stripe_customer_id(&info.customer)
        .await?
    {
        Some(id) => id,
        None => {
            info!(
                subscription_id,
                customer_id = %info.customer,
                "no customer mapping for subscription; skipping sync"
            );
            return Ok(None);
        }
    };

    let record = record_from_info(&info, OffsetDateTime::now_utc());
    db.upsert_subscription(&record).await?;

    let outcome = reconcile_customer(db, stripe, catalog, &info.customer, user_id).await?;
    Ok(Some(outcome))
}

/// Handle a subscription's final deletion. The record is soft-marked canceled
/// and claims are recomputed from the surviving set, so the scheduled death
/// of a superseded subscription leaves the winner's access untouched.
pub async fn remove_subscription(
    db: &dyn BillingRepository,
    stripe: &dyn StripeGateway,
    catalog: &PriceCatalog,
    subscription_id: &str,
) -> Result<Option<SyncOutcome>, BillingError> {
    let now = OffsetDateTime::now_utc();
    let customer_id = match db.mark_subscription_canceled(subscription_id, now).await? {
        Some(id) => id,
        None => {
            info!(subscription_id, "deletion for unknown subscription; skipping");
            return Ok(None);
        }
    };

    let user_id = match db.find_user_id_by_stripe_customer_id(&customer_id).await? {
        Some(id) => id,
        None => {
            info!(
                subscription_id,
                customer_id, "no customer mapping for deleted subscription; skipping"
            );
            return Ok(None);
        }
    };

    let outcome = reconcile_customer(db, stripe, catalog, &customer_id, user_id).await?;
    Ok(Some(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::MockBillingDb;
    use crate::models::plan::PlanTier;
    use crate::services::stripe::MockStripeGateway;

    fn info(id: &str, customer: &str, status: &str, amount: i64, period_end: i64) -> SubscriptionInfo {
        SubscriptionInfo {
            id: id.to_string(),
            customer: customer.to_string(),
            status: status.to_string(),
            price_id: Some(format!("price_{}", id)),
            currency: Some("usd".into()),
            amount_due: Some(amount),
            current_period_start: Some(period_end - 2_592_000),
            current_period_end: Some(period_end),
            cancel_at_period_end: false,
            canceled_at: None,
            trial_end: None,
        }
    }

    fn catalog() -> PriceCatalog {
        PriceCatalog::new(Vec::new(), Vec::new())
    }

    #[tokio::test]
    async fn sync_persists_record_and_writes_claims() {
        let user_id = Uuid::new_v4();
        let db = MockBillingDb::default().with_customer("cus_1", user_id);
        let stripe = MockStripeGateway::new()
            .with_subscription(info("sub_1", "cus_1", "active", 1500, 1_800_000_000));

        let outcome = sync_subscription(&db, &stripe, &catalog(), "sub_1", None)
            .await
            .unwrap()
            .expect("customer is mapped");

        assert_eq!(outcome.user_id, user_id);
        assert_eq!(outcome.claims.plan, PlanTier::Pro);
        assert!(outcome.claims.stripe_active);
        assert_eq!(outcome.winner.as_deref(), Some("sub_1"));

        let stored = db.subscription("sub_1").expect("record persisted");
        assert_eq!(stored.status, "active");
        assert!(!stored.superseded);
        assert!(stored.last_reconciled_at.is_some());
        assert_eq!(stored.resolved_plan.as_deref(), Some("pro"));
    }

    #[tokio::test]
    async fn sync_uses_prefetched_payload_without_stripe_fetch() {
        let user_id = Uuid::new_v4();
        let db = MockBillingDb::default().with_customer("cus_1", user_id);
        // Gateway has no subscription seeded; a fetch would fail.
        let stripe = MockStripeGateway::new();

        let prefetched = info("sub_1", "cus_1", "trialing", 30_000, 1_800_000_000);
        let outcome = sync_subscription(&db, &stripe, &catalog(), "sub_1", Some(prefetched))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.claims.plan, PlanTier::Business);
        assert!(outcome.claims.stripe_active);
    }

    #[tokio::test]
    async fn sync_without_customer_mapping_is_a_silent_no_op() {
        let db = MockBillingDb::default();
        let stripe = MockStripeGateway::new()
            .with_subscription(info("sub_1", "cus_unknown", "active", 1500, 1_800_000_000));

        let outcome = sync_subscription(&db, &stripe, &catalog(), "sub_1", None)
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert!(db.subscriptions.lock().unwrap().is_empty());
        assert!(db.claims_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_cancellation_call_does_not_abort_reconciliation() {
        let user_id = Uuid::new_v4();
        let db = MockBillingDb::default().with_customer("cus_1", user_id);
        let stripe = MockStripeGateway::new()
            .with_subscription(info("sub_biz", "cus_1", "active", 30_000, 1_800_000_000))
            .failing_cancellation();

        // Existing Pro record that will lose and need cancellation.
        sync_subscription(
            &db,
            &stripe,
            &catalog(),
            "sub_pro",
            Some(info("sub_pro", "cus_1", "active", 1500, 1_700_000_000)),
        )
        .await
        .unwrap();

        let outcome = sync_subscription(&db, &stripe, &catalog(), "sub_biz", None)
            .await
            .unwrap()
            .unwrap();

        // Cancellation was attempted and failed, but flags and claims landed.
        let calls = stripe.cancel_requests.lock().unwrap().clone();
        assert!(calls.contains(&("sub_pro".to_string(), true)));
        assert_eq!(outcome.claims.plan, PlanTier::Business);
        assert!(db.subscription("sub_pro").unwrap().superseded);
        assert!(!db.subscription("sub_biz").unwrap().superseded);
    }

    #[tokio::test]
    async fn removing_the_only_subscription_downgrades_claims_to_free() {
        let user_id = Uuid::new_v4();
        let db = MockBillingDb::default().with_customer("cus_1", user_id);
        let stripe = MockStripeGateway::new();

        sync_subscription(
            &db,
            &stripe,
            &catalog(),
            "sub_1",
            Some(info("sub_1", "cus_1", "active", 1500, 1_800_000_000)),
        )
        .await
        .unwrap();
        assert_eq!(db.claims_for(user_id).unwrap().plan, PlanTier::Pro);

        let outcome = remove_subscription(&db, &stripe, &catalog(), "sub_1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.claims, PlanClaims::free());
        let stored = db.subscription("sub_1").unwrap();
        assert_eq!(stored.status, "canceled");
        assert!(stored.canceled_at.is_some());
    }

    #[tokio::test]
    async fn removing_an_unknown_subscription_is_a_silent_no_op() {
        let db = MockBillingDb::default();
        let stripe = MockStripeGateway::new();

        let outcome = remove_subscription(&db, &stripe, &catalog(), "sub_missing")
            .await
            .unwrap();
        assert!(outcome.is_none());
    }
}
