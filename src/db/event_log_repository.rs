use async_trait::async_trait;

/// Ledger of processed Stripe event ids. Checked before dispatch, recorded
/// after successful handling, so a failed delivery remains retryable.
#[async_trait]
pub trait EventLogRepository: Send + Sync {
    async fn has_processed_event(&self, event_id: &str) -> Result<bool, sqlx::Error>;

    async fn record_event(&self, event_id: &str) -> Result<(), sqlx::Error>;
}
