use std::env;

pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
}

pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub stripe: StripeSettings,
    /// Explicit price-id allow-lists consulted before the amount heuristic.
    pub pro_price_ids: Vec<String>,
    pub business_price_ids: Vec<String>,
}

fn parse_price_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok(); // Load .env file

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let frontend_origin = env::var("FRONTEND_ORIGIN").expect("FRONTEND_ORIGIN must be set");

        let stripe = StripeSettings {
            secret_key: env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY must be set"),
            webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .expect("STRIPE_WEBHOOK_SECRET must be set"),
        };

        let pro_price_ids = env::var("PRO_PRICE_IDS")
            .map(|v| parse_price_ids(&v))
            .unwrap_or_default();
        let business_price_ids = env::var("BUSINESS_PRICE_IDS")
            .map(|v| parse_price_ids(&v))
            .unwrap_or_default();

        Config {
            database_url,
            frontend_origin,
            stripe,
            pro_price_ids,
            business_price_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_price_ids_splits_and_trims() {
        let ids = parse_price_ids("price_a, price_b ,,price_c");
        assert_eq!(ids, vec!["price_a", "price_b", "price_c"]);
        assert!(parse_price_ids("").is_empty());
    }
}
