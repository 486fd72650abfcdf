use time::OffsetDateTime;

use crate::billing::resolver::PriceCatalog;
use crate::models::customer::PlanClaims;
use crate::models::plan::PlanTier;
use crate::models::subscription::{SubscriptionRecord, SubscriptionStatus};

/// Per-record outcome of a reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconciledEntry {
    pub subscription_id: String,
    pub plan: PlanTier,
    pub priority: i16,
    pub superseded: bool,
    /// Still active-like, lost the reconciliation, and not yet scheduled to
    /// cancel in Stripe.
    pub needs_cancellation: bool,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Subscription id of the winning record, if any records exist.
    pub winner: Option<String>,
    pub entries: Vec<ReconciledEntry>,
    pub claims: PlanClaims,
}

impl Reconciliation {
    pub fn cancellations(&self) -> impl Iterator<Item = &ReconciledEntry> {
        self.entries.iter().filter(|e| e.needs_cancellation)
    }
}

fn period_end_key(record: &SubscriptionRecord) -> OffsetDateTime {
    record
        .current_period_end
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Resolve a customer's subscription set down to a single winner.
///
/// Active-like records (active/trialing/past_due) are considered before
/// anything else; only when none exist does the whole set compete. The winner
/// is the highest plan priority, tie-broken by latest period end, then by
/// subscription id so repeated runs over an unchanged set pick the same
/// record. All non-winners are superseded.
pub fn reconcile(records: &[SubscriptionRecord], catalog: &PriceCatalog) -> Reconciliation {
    if records.is_empty() {
        return Reconciliation {
            winner: None,
            entries: Vec::new(),
            claims: PlanClaims::free(),
        };
    }

    let any_active = records.iter().any(|r| r.status().is_active_like());

    let winner = records
        .iter()
        .filter(|r| !any_active || r.status().is_active_like())
        .max_by(|a, b| {
            let plan_a = catalog.resolve_plan(a.price_id.as_deref(), a.amount_due);
            let plan_b = catalog.resolve_plan(b.price_id.as_deref(), b.amount_due);
            plan_a
                .priority()
                .cmp(&plan_b.priority())
                .then_with(|| period_end_key(a).cmp(&period_end_key(b)))
                // max_by keeps the later element on Equal; invert the id order
                // so the lexicographically smallest id wins deterministically.
                .then_with(|| b.id.cmp(&a.id))
        })
        .map(|r| r.id.clone());

    let mut entries = Vec::with_capacity(records.len());
    let mut claims = PlanClaims::free();

    for record in records {
        let plan = catalog.resolve_plan(record.price_id.as_deref(), record.amount_due);
        let status = record.status();
        let is_winner = winner.as_deref() == Some(record.id.as_str());

        if is_winner && status.is_active_like() {
            claims = PlanClaims {
                plan,
                stripe_active: matches!(
                    status,
                    SubscriptionStatus::Active | SubscriptionStatus::Trialing
                ),
                stripe_past_due: matches!(status, SubscriptionStatus::PastDue),
            };
        }

        entries.push(ReconciledEntry {
            subscription_id: record.id.clone(),
            plan,
            priority: plan.priority(),
            superseded: !is_winner,
            needs_cancellation: !is_winner
                && status.is_active_like()
                && !record.cancel_at_period_end,
        });
    }

    Reconciliation {
        winner,
        entries,
        claims,
    }
}
