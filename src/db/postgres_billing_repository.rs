use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::billing::reconciler::Reconciliation;
use crate::db::billing_repository::BillingRepository;
use crate::models::{
    customer::{PlanClaims, StripeCustomerRecord},
    subscription::SubscriptionRecord,
};

pub struct PostgresBillingRepository {
    pub pool: PgPool,
}

const SUBSCRIPTION_COLUMNS: &str = "id, stripe_customer_id, status, price_id, currency, \
     amount_due, current_period_start, current_period_end, cancel_at_period_end, canceled_at, \
     trial_end, resolved_plan, resolved_plan_priority, superseded, last_reconciled_at, \
     created_at, updated_at";

#[async_trait]
impl BillingRepository for PostgresBillingRepository {
    async fn find_user_id_by_stripe_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        let rec = sqlx::query_as::<Postgres, StripeCustomerRecord>(
            "SELECT user_id, stripe_customer_id, created_at FROM stripe_customers WHERE stripe_customer_id = $1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(rec.map(|r| r.user_id))
    }

    async fn upsert_stripe_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query::<Postgres>(
            r#"
            INSERT INTO stripe_customers (user_id, stripe_customer_id, created_at)
            VALUES ($1, $2, now())
            ON CONFLICT (user_id) DO UPDATE SET stripe_customer_id = EXCLUDED.stripe_customer_id
            "#,
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> Result<(), sqlx::Error> {
        // Raw Stripe fields only; resolved_* and superseded are restamped by
        // apply_reconciliation right after.
        sqlx::query::<Postgres>(
            r#"
            INSERT INTO stripe_subscriptions (
                id, stripe_customer_id, status, price_id, currency, amount_due,
                current_period_start, current_period_end, cancel_at_period_end,
                canceled_at, trial_end, superseded, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, false, $12, $12)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                price_id = EXCLUDED.price_id,
                currency = EXCLUDED.currency,
                amount_due = EXCLUDED.amount_due,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                canceled_at = EXCLUDED.canceled_at,
                trial_end = EXCLUDED.trial_end,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.stripe_customer_id)
        .bind(&record.status)
        .bind(&record.price_id)
        .bind(&record.currency)
        .bind(record.amount_due)
        .bind(record.current_period_start)
        .bind(record.current_period_end)
        .bind(record.cancel_at_period_end)
        .bind(record.canceled_at)
        .bind(record.trial_end)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_subscriptions_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<SubscriptionRecord>, sqlx::Error> {
        let rows = sqlx::query_as::<Postgres, SubscriptionRecord>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM stripe_subscriptions WHERE stripe_customer_id = $1 ORDER BY created_at"
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn mark_subscription_canceled(
        &self,
        subscription_id: &str,
        canceled_at: OffsetDateTime,
    ) -> Result<Option<String>, sqlx::Error> {
        let customer_id = sqlx::query_scalar::<Postgres, String>(
            r#"
            UPDATE stripe_subscriptions
            SET status = 'canceled', canceled_at = $2, updated_at = $2
            WHERE id = $1
            RETURNING stripe_customer_id
            "#,
        )
        .bind(subscription_id)
        .bind(canceled_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer_id)
    }

    async fn apply_reconciliation(
        &self,
        customer_id: &str,
        reconciliation: &Reconciliation,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Serialize concurrent webhook deliveries for the same customer.
        {
            let conn: &mut PgConnection = &mut *tx;
            sqlx::query::<Postgres>("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(customer_id)
                .execute(conn)
                .await?;
        }

        for entry in &reconciliation.entries {
            let conn: &mut PgConnection = &mut *tx;
            sqlx::query::<Postgres>(
                r#"
                UPDATE stripe_subscriptions
                SET resolved_plan = $2,
                    resolved_plan_priority = $3,
                    superseded = $4,
                    last_reconciled_at = $5,
                    updated_at = $5
                WHERE id = $1 AND stripe_customer_id = $6
                "#,
            )
            .bind(&entry.subscription_id)
            .bind(entry.plan.as_str())
            .bind(entry.priority)
            .bind(entry.superseded)
            .bind(now)
            .bind(customer_id)
            .execute(conn)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_user_claims(
        &self,
        user_id: Uuid,
        claims: &PlanClaims,
    ) -> Result<(), sqlx::Error> {
        sqlx::query::<Postgres>(
            r#"
            UPDATE users
            SET plan = $2, stripe_active = $3, stripe_past_due = $4
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(claims.plan.as_str())
        .bind(claims.stripe_active)
        .bind(claims.stripe_past_due)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
