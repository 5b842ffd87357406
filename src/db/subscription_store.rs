use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::subscription::{
    BillingInterval, SubscriptionRecord, SubscriptionStatus, SubscriptionTier,
};

/// Narrow persistence surface for subscription lifecycle state. Everything the
/// enforcement engine and the webhook reconciler touch goes through here; the
/// wider restaurant/menu CRUD lives elsewhere.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(&self, owner_id: Uuid) -> Result<Option<SubscriptionRecord>, sqlx::Error>;

    /// Checkout completion: activate the subscription with the purchased tier
    /// and remember the Stripe correlation ids. Upsert keyed by owner, so a
    /// redelivered event lands on the same state.
    async fn upsert_checkout(
        &self,
        owner_id: Uuid,
        tier: SubscriptionTier,
        interval: BillingInterval,
        customer_id: &str,
        subscription_id: &str,
    ) -> Result<(), sqlx::Error>;

    async fn find_owner_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error>;

    async fn set_status(
        &self,
        owner_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), sqlx::Error>;

    /// Tier change from webhook metadata or an explicit plan update. Refreshes
    /// the cached restaurant limit alongside the tier.
    async fn update_tier(
        &self,
        owner_id: Uuid,
        tier: SubscriptionTier,
        interval: BillingInterval,
    ) -> Result<(), sqlx::Error>;

    async fn mark_payment_failure(
        &self,
        owner_id: Uuid,
        failed_at: OffsetDateTime,
        grace_period_end: OffsetDateTime,
    ) -> Result<(), sqlx::Error>;

    /// Recovery: status back to active, both failure fields cleared.
    async fn clear_payment_failure(&self, owner_id: Uuid) -> Result<(), sqlx::Error>;

    /// Owners whose grace period has lapsed: status past_due and
    /// grace_period_end at or before `now`.
    async fn find_expired(&self, now: OffsetDateTime) -> Result<Vec<Uuid>, sqlx::Error>;

    /// Destructive cleanup after an expired grace period: delete every owned
    /// restaurant and reset the record to free defaults, all in one atomic
    /// batch. Returns the ids that were deleted.
    async fn cleanup_expired(&self, owner_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error>;
}
