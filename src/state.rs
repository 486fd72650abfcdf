use crate::billing::resolver::PriceCatalog;
use crate::config::Config;
use crate::db::{billing_repository::BillingRepository, event_log_repository::EventLogRepository};
use crate::services::stripe::StripeGateway;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn BillingRepository>,
    pub event_log: Arc<dyn EventLogRepository>,
    pub stripe: Arc<dyn StripeGateway>,
    pub catalog: Arc<PriceCatalog>,
    pub config: Arc<Config>,
}
