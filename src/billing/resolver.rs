use std::collections::HashSet;

use crate::config::Config;
use crate::models::plan::PlanTier;

/// Minor-currency-unit floor above which an unrecognized price is treated as
/// a Business subscription.
pub const BUSINESS_AMOUNT_FLOOR: i64 = 25_000;
/// Floor for the Pro band. Anything below is treated as Free.
pub const PRO_AMOUNT_FLOOR: i64 = 900;

/// Price-id allow-lists. Exact matches are authoritative; the amount bands
/// are a fallback for price points that were never allow-listed.
#[derive(Debug, Default, Clone)]
pub struct PriceCatalog {
    pro: HashSet<String>,
    business: HashSet<String>,
}

impl PriceCatalog {
    pub fn new<I, J>(pro: I, business: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        Self {
            pro: pro.into_iter().collect(),
            business: business.into_iter().collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.pro_price_ids.iter().cloned(),
            config.business_price_ids.iter().cloned(),
        )
    }

    /// Classify a subscription into a plan tier. Best-effort: the amount
    /// fallback can misclassify price points outside the known bands, which
    /// is why allow-listing stays the preferred path.
    pub fn resolve_plan(&self, price_id: Option<&str>, amount_due: Option<i64>) -> PlanTier {
        if let Some(price_id) = price_id {
            if self.business.contains(price_id) {
                return PlanTier::Business;
            }
            if self.pro.contains(price_id) {
                return PlanTier::Pro;
            }
        }

        match amount_due {
            Some(amount) if amount >= BUSINESS_AMOUNT_FLOOR => PlanTier::Business,
            Some(amount) if amount >= PRO_AMOUNT_FLOOR => PlanTier::Pro,
            _ => PlanTier::Free,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PriceCatalog {
        PriceCatalog::new(
            ["price_pro_monthly".to_string(), "price_pro_yearly".into()],
            ["price_biz_monthly".to_string()],
        )
    }

    #[test]
    fn business_price_id_wins_regardless_of_amount() {
        let c = catalog();
        assert_eq!(
            c.resolve_plan(Some("price_biz_monthly"), Some(100)),
            PlanTier::Business
        );
        assert_eq!(
            c.resolve_plan(Some("price_biz_monthly"), None),
            PlanTier::Business
        );
    }

    #[test]
    fn pro_price_id_matches_before_amount_bands() {
        let c = catalog();
        assert_eq!(
            c.resolve_plan(Some("price_pro_yearly"), Some(90_000)),
            PlanTier::Pro
        );
    }

    #[test]
    fn amount_of_30000_without_price_match_is_business() {
        let c = catalog();
        assert_eq!(
            c.resolve_plan(Some("price_unknown"), Some(30_000)),
            PlanTier::Business
        );
    }

    #[test]
    fn amount_band_edges() {
        let c = catalog();
        assert_eq!(c.resolve_plan(None, Some(25_000)), PlanTier::Business);
        assert_eq!(c.resolve_plan(None, Some(24_999)), PlanTier::Pro);
        assert_eq!(c.resolve_plan(None, Some(900)), PlanTier::Pro);
        assert_eq!(c.resolve_plan(None, Some(899)), PlanTier::Free);
    }

    #[test]
    fn no_signal_resolves_to_free() {
        let c = catalog();
        assert_eq!(c.resolve_plan(None, None), PlanTier::Free);
        assert_eq!(c.resolve_plan(Some("price_unknown"), None), PlanTier::Free);
    }
}
