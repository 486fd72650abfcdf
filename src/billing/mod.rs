pub mod reconciler;
pub mod resolver;
pub mod synchronizer;

use crate::services::stripe::StripeGatewayError;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Stripe(#[from] StripeGatewayError),
}
