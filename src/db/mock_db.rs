#![allow(dead_code)]
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::billing::reconciler::Reconciliation;
use crate::db::billing_repository::BillingRepository;
use crate::db::event_log_repository::EventLogRepository;
use crate::models::{customer::PlanClaims, subscription::SubscriptionRecord};

pub struct MockBillingDb {
    /// stripe customer id -> user id
    pub customers: Mutex<HashMap<String, Uuid>>,
    pub subscriptions: Mutex<Vec<SubscriptionRecord>>,
    pub claims: Mutex<HashMap<Uuid, PlanClaims>>,
    pub claims_updates: Mutex<Vec<(Uuid, PlanClaims)>>,
    pub reconcile_calls: Mutex<usize>,
    pub should_fail: bool,
}

impl Default for MockBillingDb {
    fn default() -> Self {
        Self {
            customers: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            claims: Mutex::new(HashMap::new()),
            claims_updates: Mutex::new(Vec::new()),
            reconcile_calls: Mutex::new(0),
            should_fail: false,
        }
    }
}

impl MockBillingDb {
    pub fn with_customer(self, customer_id: &str, user_id: Uuid) -> Self {
        self.customers
            .lock()
            .unwrap()
            .insert(customer_id.to_string(), user_id);
        self
    }

    pub fn with_subscription(self, record: SubscriptionRecord) -> Self {
        self.subscriptions.lock().unwrap().push(record);
        self
    }

    pub fn claims_for(&self, user_id: Uuid) -> Option<PlanClaims> {
        self.claims.lock().unwrap().get(&user_id).copied()
    }

    pub fn subscription(&self, subscription_id: &str) -> Option<SubscriptionRecord> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == subscription_id)
            .cloned()
    }
}

#[async_trait]
impl BillingRepository for MockBillingDb {
    async fn find_user_id_by_stripe_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        Ok(self.customers.lock().unwrap().get(customer_id).copied())
    }

    async fn upsert_stripe_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        self.customers
            .lock()
            .unwrap()
            .insert(customer_id.to_string(), user_id);
        Ok(())
    }

    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        let mut subs = self.subscriptions.lock().unwrap();
        if let Some(existing) = subs.iter_mut().find(|s| s.id == record.id) {
            let created_at = existing.created_at;
            let resolved_plan = existing.resolved_plan.clone();
            let resolved_plan_priority = existing.resolved_plan_priority;
            let superseded = existing.superseded;
            let last_reconciled_at = existing.last_reconciled_at;
            *existing = record.clone();
            existing.created_at = created_at;
            existing.resolved_plan = resolved_plan;
            existing.resolved_plan_priority = resolved_plan_priority;
            existing.superseded = superseded;
            existing.last_reconciled_at = last_reconciled_at;
        } else {
            subs.push(record.clone());
        }
        Ok(())
    }

    async fn list_subscriptions_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<SubscriptionRecord>, sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.stripe_customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn mark_subscription_canceled(
        &self,
        subscription_id: &str,
        canceled_at: OffsetDateTime,
    ) -> Result<Option<String>, sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        let mut subs = self.subscriptions.lock().unwrap();
        if let Some(sub) = subs.iter_mut().find(|s| s.id == subscription_id) {
            sub.status = "canceled".into();
            sub.canceled_at = Some(canceled_at);
            sub.updated_at = canceled_at;
            Ok(Some(sub.stripe_customer_id.clone()))
        } else {
            Ok(None)
        }
    }

    async fn apply_reconciliation(
        &self,
        customer_id: &str,
        reconciliation: &Reconciliation,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        *self.reconcile_calls.lock().unwrap() += 1;
        let mut subs = self.subscriptions.lock().unwrap();
        for entry in &reconciliation.entries {
            if let Some(sub) = subs
                .iter_mut()
                .find(|s| s.id == entry.subscription_id && s.stripe_customer_id == customer_id)
            {
                sub.resolved_plan = Some(entry.plan.as_str().to_string());
                sub.resolved_plan_priority = Some(entry.priority);
                sub.superseded = entry.superseded;
                sub.last_reconciled_at = Some(now);
                sub.updated_at = now;
            }
        }
        Ok(())
    }

    async fn update_user_claims(
        &self,
        user_id: Uuid,
        claims: &PlanClaims,
    ) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        self.claims.lock().unwrap().insert(user_id, *claims);
        self.claims_updates.lock().unwrap().push((user_id, *claims));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockEventLog {
    pub seen: Mutex<HashSet<String>>,
}

#[async_trait]
impl EventLogRepository for MockEventLog {
    async fn has_processed_event(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        Ok(self.seen.lock().unwrap().contains(event_id))
    }

    async fn record_event(&self, event_id: &str) -> Result<(), sqlx::Error> {
        self.seen.lock().unwrap().insert(event_id.to_string());
        Ok(())
    }
}
