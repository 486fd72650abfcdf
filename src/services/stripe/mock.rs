#![allow(dead_code)]
use super::{StripeEvent, StripeGateway, StripeGatewayError, SubscriptionInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

#[derive(Clone, Default)]
pub struct MockStripeGateway {
    pub subscriptions: Arc<Mutex<HashMap<String, SubscriptionInfo>>>,
    pub cancel_requests: Arc<Mutex<Vec<(String, bool)>>>,
    pub events: Arc<Mutex<Vec<StripeEvent>>>,
    /// When set, cancellation calls fail with an Api error.
    pub fail_cancellation: Arc<AtomicBool>,
}

impl MockStripeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscription(self, info: SubscriptionInfo) -> Self {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(info.id.clone(), info);
        self
    }

    pub fn failing_cancellation(self) -> Self {
        self.fail_cancellation.store(true, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl StripeGateway for MockStripeGateway {
    fn verify_webhook(
        &self,
        payload: &[u8],
        _signature_header: &str,
    ) -> Result<StripeEvent, StripeGatewayError> {
        let val: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| StripeGatewayError::Serde(e.to_string()))?;
        let id = val
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("evt_mock")
            .to_string();
        let ty = val
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let evt = StripeEvent {
            id,
            r#type: ty,
            payload: val,
        };
        self.events.lock().unwrap().push(evt.clone());
        Ok(evt)
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeGatewayError> {
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| {
                StripeGatewayError::NotFound(format!("subscription {} not found", subscription_id))
            })
    }

    async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<SubscriptionInfo, StripeGatewayError> {
        self.cancel_requests
            .lock()
            .unwrap()
            .push((subscription_id.to_string(), cancel_at_period_end));

        if self.fail_cancellation.load(Ordering::SeqCst) {
            return Err(StripeGatewayError::Api("mock cancellation failure".into()));
        }

        let mut guard = self.subscriptions.lock().unwrap();
        let sub = guard.entry(subscription_id.to_string()).or_insert_with(|| {
            SubscriptionInfo {
                id: subscription_id.to_string(),
                customer: "cus_mock".into(),
                status: "active".into(),
                price_id: None,
                currency: None,
                amount_due: None,
                current_period_start: None,
                current_period_end: None,
                cancel_at_period_end: false,
                canceled_at: None,
                trial_end: None,
            }
        });
        sub.cancel_at_period_end = cancel_at_period_end;
        Ok(sub.clone())
    }
}
