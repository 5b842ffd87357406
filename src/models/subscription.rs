use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Default restaurant allowance for accounts without a paid tier.
pub const FREE_RESTAURANT_LIMIT: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Starter,
    Growth,
    Pro,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Starter => "starter",
            SubscriptionTier::Growth => "growth",
            SubscriptionTier::Pro => "pro",
        }
    }

    /// Tier values as they arrive in Stripe metadata.
    pub fn from_metadata(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "free" | "none" => Some(SubscriptionTier::Free),
            "starter" => Some(SubscriptionTier::Starter),
            "growth" => Some(SubscriptionTier::Growth),
            "pro" => Some(SubscriptionTier::Pro),
            _ => None,
        }
    }

    pub fn restaurant_limit(&self) -> i32 {
        match self {
            SubscriptionTier::Free => FREE_RESTAURANT_LIMIT,
            SubscriptionTier::Starter => 1,
            SubscriptionTier::Growth => 5,
            SubscriptionTier::Pro => 20,
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, SubscriptionTier::Free)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Inactive,
    Active,
    PastDue,
    Unpaid,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    /// Map a raw Stripe subscription status onto our lifecycle states.
    /// Transitional provider states (incomplete, paused, ...) land on Inactive.
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "active" | "trialing" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "unpaid" => SubscriptionStatus::Unpaid,
            "canceled" | "incomplete_expired" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Inactive,
        }
    }

    pub fn is_payment_failure(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::PastDue | SubscriptionStatus::Unpaid
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }

    pub fn from_metadata(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "monthly" => Some(BillingInterval::Monthly),
            "yearly" => Some(BillingInterval::Yearly),
            _ => None,
        }
    }
}

/// One record per owner identity. Created with free defaults at signup,
/// mutated by checkout completion, webhook reconciliation, and the
/// enforcement engine; cleanup resets the fields but keeps the row.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SubscriptionRecord {
    pub owner_id: Uuid,
    pub tier: SubscriptionTier,
    pub status: SubscriptionStatus,
    pub billing_interval: Option<BillingInterval>,
    pub restaurant_limit: i32,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub payment_failure_date: Option<OffsetDateTime>,
    pub grace_period_end: Option<OffsetDateTime>,
    pub owned_restaurant_ids: Vec<Uuid>,
    pub updated_at: OffsetDateTime,
}

impl SubscriptionRecord {
    /// Signup defaults: free tier, no subscription, one restaurant slot.
    pub fn new(owner_id: Uuid) -> Self {
        Self {
            owner_id,
            tier: SubscriptionTier::Free,
            status: SubscriptionStatus::Inactive,
            billing_interval: None,
            restaurant_limit: FREE_RESTAURANT_LIMIT,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            payment_failure_date: None,
            grace_period_end: None,
            owned_restaurant_ids: Vec::new(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn can_add_restaurant(&self) -> bool {
        (self.owned_restaurant_ids.len() as i32) < self.restaurant_limit
    }

    pub fn remaining_restaurant_slots(&self) -> i32 {
        (self.restaurant_limit - self.owned_restaurant_ids.len() as i32).max(0)
    }
}
