#![allow(dead_code)]
use super::{BillingEvent, BillingService, BillingServiceError, ProviderSubscription};
use async_trait::async_trait;

pub struct LiveStripeService {
    client: stripe::Client,
    webhook_secret: String,
}

impl LiveStripeService {
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

fn to_provider_subscription(sub: stripe::Subscription) -> ProviderSubscription {
    ProviderSubscription {
        id: sub.id.to_string(),
        status: sub.status.to_string(),
        cancel_at_period_end: sub.cancel_at_period_end,
        current_period_end: sub.current_period_end,
    }
}

#[async_trait]
impl BillingService for LiveStripeService {
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<BillingEvent, BillingServiceError> {
        let payload_str =
            std::str::from_utf8(payload).map_err(|e| BillingServiceError::Serde(e.to_string()))?;
        let event =
            stripe::Webhook::construct_event(payload_str, signature_header, &self.webhook_secret)?;
        let payload =
            serde_json::to_value(&event).map_err(|e| BillingServiceError::Serde(e.to_string()))?;
        Ok(BillingEvent {
            id: event.id.to_string(),
            r#type: event.type_.to_string(),
            payload,
        })
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
        tier: &str,
        billing_interval: &str,
    ) -> Result<ProviderSubscription, BillingServiceError> {
        let sub_id = subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| BillingServiceError::Other(e.to_string()))?;

        // The current item id is needed to swap the price in place.
        let current = stripe::Subscription::retrieve(&self.client, &sub_id, &[]).await?;
        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| {
                BillingServiceError::NotFound(format!(
                    "subscription {} has no items",
                    subscription_id
                ))
            })?;

        let mut params = stripe::UpdateSubscription::new();
        params.items = Some(vec![stripe::UpdateSubscriptionItems {
            id: Some(item_id),
            price: Some(price_id.to_string()),
            ..Default::default()
        }]);
        // Named via the generated module: the crate-root re-export of
        // SubscriptionProrationBehavior is ambiguous with the
        // subscription_item enum of the same name.
        params.proration_behavior = Some(
            stripe::generated::billing::subscription::SubscriptionProrationBehavior::CreateProrations,
        );
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("tier".to_string(), tier.to_string());
        metadata.insert("billingInterval".to_string(), billing_interval.to_string());
        params.metadata = Some(metadata);

        let sub = stripe::Subscription::update(&self.client, &sub_id, params).await?;
        Ok(to_provider_subscription(sub))
    }

    async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<ProviderSubscription, BillingServiceError> {
        let sub_id = subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| BillingServiceError::Other(e.to_string()))?;
        let mut params = stripe::UpdateSubscription::new();
        params.cancel_at_period_end = Some(cancel_at_period_end);
        let sub = stripe::Subscription::update(&self.client, &sub_id, params).await?;
        Ok(to_provider_subscription(sub))
    }
}
