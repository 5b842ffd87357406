pub mod mock_store;
pub mod postgres_subscription_store;
pub mod subscription_store;
