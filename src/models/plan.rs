use serde::{Deserialize, Serialize};

/// Effective plan a customer can be bound to after reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Pro,
    Business,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Business => "business",
        }
    }

    /// Ranking used when several subscriptions compete for one customer.
    pub fn priority(&self) -> i16 {
        match self {
            PlanTier::Business => 3,
            PlanTier::Pro => 2,
            PlanTier::Free => 1,
        }
    }

    /// Lenient parse of stored labels. Anything unrecognized maps to Free so
    /// a stale row never grants paid access.
    pub fn from_label(raw: Option<&str>) -> Self {
        let normalized = raw.unwrap_or_default().trim().to_lowercase();
        if normalized.is_empty() {
            return Self::Free;
        }

        let key = normalized
            .split([':', '-', '_', ' ', '/', '.'])
            .next()
            .unwrap_or(normalized.as_str());

        match key {
            "business" | "enterprise" | "team" => Self::Business,
            "pro" | "premium" | "plus" => Self::Pro,
            _ => Self::Free,
        }
    }
}
