// NOTE: async-stripe is compiled with a minimal feature set (runtime-tokio-hyper,
// checkout, webhook-events, and connect to satisfy webhook payload types).
// Touching APIs outside those features requires updating Cargo.toml explicitly.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum BillingServiceError {
    #[error("stripe api error: {0}")]
    Api(String),
    #[error("webhook verification failed: {0}")]
    Webhook(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("other error: {0}")]
    Other(String),
}

impl From<stripe::StripeError> for BillingServiceError {
    fn from(err: stripe::StripeError) -> Self {
        BillingServiceError::Api(err.to_string())
    }
}

impl From<stripe::WebhookError> for BillingServiceError {
    fn from(err: stripe::WebhookError) -> Self {
        BillingServiceError::Webhook(err.to_string())
    }
}

/// A verified webhook event: stable provider id, type string, and the raw
/// payload for field extraction in the reconciler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BillingEvent {
    pub id: String,
    pub r#type: String,
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: String,
    pub cancel_at_period_end: bool,
    /// Unix timestamp (seconds) when the current period ends
    pub current_period_end: i64,
}

#[async_trait]
pub trait BillingService: Send + Sync {
    /// Verify the webhook signature over the raw body and parse the event.
    /// Must run before any event-type dispatch.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<BillingEvent, BillingServiceError>;

    /// Swap the subscription onto a new price (tier/interval change),
    /// prorating the difference.
    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
        tier: &str,
        billing_interval: &str,
    ) -> Result<ProviderSubscription, BillingServiceError>;

    /// Set or clear cancel-at-period-end; clearing it reactivates a
    /// subscription that was scheduled for cancellation.
    async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<ProviderSubscription, BillingServiceError>;
}

mod live;
mod mock;

#[allow(unused_imports)]
pub use live::LiveStripeService;
#[allow(unused_imports)]
pub use mock::MockBillingService;
