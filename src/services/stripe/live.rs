use super::{StripeEvent, StripeGateway, StripeGatewayError, SubscriptionInfo};
use async_trait::async_trait;

pub struct LiveStripeGateway {
    client: stripe::Client,
    webhook_secret: String,
}

impl LiveStripeGateway {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        let client = stripe::Client::new(secret_key);
        Self {
            client,
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn from_settings(settings: &crate::config::StripeSettings) -> Self {
        Self::new(settings.secret_key.clone(), settings.webhook_secret.clone())
    }
}

fn map_subscription(sub: stripe::Subscription) -> SubscriptionInfo {
    // A subscription can technically carry several items; the first one is the
    // plan-bearing item for this platform.
    let price = sub.items.data.first().and_then(|item| item.price.clone());

    SubscriptionInfo {
        id: sub.id.to_string(),
        customer: sub.customer.id().to_string(),
        status: sub.status.to_string(),
        price_id: price.as_ref().map(|p| p.id.to_string()),
        currency: price
            .as_ref()
            .and_then(|p| p.currency)
            .map(|c| c.to_string()),
        amount_due: price.as_ref().and_then(|p| p.unit_amount),
        current_period_start: Some(sub.current_period_start),
        current_period_end: Some(sub.current_period_end),
        cancel_at_period_end: sub.cancel_at_period_end,
        canceled_at: sub.canceled_at,
        trial_end: sub.trial_end,
    }
}

#[async_trait]
impl StripeGateway for LiveStripeGateway {
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeGatewayError> {
        let payload_str =
            std::str::from_utf8(payload).map_err(|e| StripeGatewayError::Serde(e.to_string()))?;
        let event =
            stripe::Webhook::construct_event(payload_str, signature_header, &self.webhook_secret)?;
        let payload =
            serde_json::to_value(&event).map_err(|e| StripeGatewayError::Serde(e.to_string()))?;
        Ok(StripeEvent {
            id: event.id.to_string(),
            r#type: event.type_.to_string(),
            payload,
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeGatewayError> {
        let sub_id = subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| StripeGatewayError::Other(e.to_string()))?;
        let sub = stripe::Subscription::retrieve(&self.client, &sub_id, &[]).await?;
        Ok(map_subscription(sub))
    }

    async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<SubscriptionInfo, StripeGatewayError> {
        let sub_id = subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| StripeGatewayError::Other(e.to_string()))?;
        let mut params = stripe::UpdateSubscription::new();
        params.cancel_at_period_end = Some(cancel_at_period_end);
        let sub = stripe::Subscription::update(&self.client, &sub_id, params).await?;
        Ok(map_subscription(sub))
    }
}
