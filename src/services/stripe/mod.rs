// NOTE: async-stripe is compiled with a minimal feature set (runtime-tokio-hyper, billing,
// checkout, webhook-events, and connect to satisfy webhook payload types). Touching APIs outside
// those features will require updating Cargo.toml explicitly so we keep compile times and binary
// size in check.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StripeGatewayError {
    #[error("stripe api error: {0}")]
    Api(String),
    #[error("webhook verification failed: {0}")]
    Webhook(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("other error: {0}")]
    Other(String),
}

impl From<stripe::StripeError> for StripeGatewayError {
    fn from(err: stripe::StripeError) -> Self {
        StripeGatewayError::Api(err.to_string())
    }
}

impl From<stripe::WebhookError> for StripeGatewayError {
    fn from(err: stripe::WebhookError) -> Self {
        StripeGatewayError::Webhook(err.to_string())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    pub r#type: String,
    pub payload: serde_json::Value,
}

/// Subscription fields the synchronizer persists. Mapped once at the gateway
/// boundary so the rest of the service never touches SDK types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
    /// Stripe customer id (`cus_...`) the subscription belongs to.
    pub customer: String,
    pub status: String,
    pub price_id: Option<String>,
    pub currency: Option<String>,
    /// Unit amount of the subscription's price, in minor currency units.
    pub amount_due: Option<i64>,
    /// Unix timestamp (seconds) when the current period started
    pub current_period_start: Option<i64>,
    /// Unix timestamp (seconds) when the current period ends
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<i64>,
    pub trial_end: Option<i64>,
}

#[async_trait]
pub trait StripeGateway: Send + Sync {
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeGatewayError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeGatewayError>;

    async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<SubscriptionInfo, StripeGatewayError>;
}

mod live;
mod mock;

pub use live::LiveStripeGateway;
pub use mock::MockStripeGateway;
