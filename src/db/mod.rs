pub mod billing_repository;
pub mod event_log_repository;
pub mod mock_db;
pub mod postgres_billing_repository;
pub mod postgres_event_log_repository;
