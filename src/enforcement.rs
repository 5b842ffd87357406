use std::sync::Arc;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::DEFAULT_GRACE_PERIOD_DAYS;
use crate::db::subscription_store::SubscriptionStore;
use crate::models::subscription::{SubscriptionRecord, SubscriptionStatus};

#[derive(Debug, Clone, Copy)]
pub struct EnforcementConfig {
    pub grace_period_days: i64,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            grace_period_days: DEFAULT_GRACE_PERIOD_DAYS,
        }
    }
}

/// Effective standing after grace-period rules are applied to a record.
/// Serialized as-is for the status endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStanding {
    pub status: SubscriptionStatus,
    pub is_in_grace_period: bool,
    pub days_remaining: i64,
    pub is_expired: bool,
}

impl SubscriptionStanding {
    fn inactive() -> Self {
        Self {
            status: SubscriptionStatus::Inactive,
            is_in_grace_period: false,
            days_remaining: 0,
            is_expired: false,
        }
    }
}

/// Grace-period state machine over the subscription store. Payment failures
/// open a fixed window; recovery closes it; lapsing past the window makes the
/// tenant's data eligible for destructive cleanup.
pub struct EnforcementEngine {
    store: Arc<dyn SubscriptionStore>,
    config: EnforcementConfig,
}

impl EnforcementEngine {
    pub fn new(store: Arc<dyn SubscriptionStore>, config: EnforcementConfig) -> Self {
        Self { store, config }
    }

    /// Records a payment failure and (re)opens the grace window from now.
    /// Every failure restarts the window, so a tenant limping along with
    /// repeated failed retries keeps their full grace period from the most
    /// recent failure. Always lands the record on past_due, whatever status
    /// the provider reported; the sweep only looks for past_due.
    pub async fn track_payment_failure(&self, owner_id: Uuid) -> Result<(), sqlx::Error> {
        self.track_payment_failure_at(owner_id, OffsetDateTime::now_utc())
            .await
    }

    pub async fn track_payment_failure_at(
        &self,
        owner_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        let grace_period_end = now + Duration::days(self.config.grace_period_days);
        self.store
            .mark_payment_failure(owner_id, now, grace_period_end)
            .await?;
        warn!(
            owner_id = %owner_id,
            grace_period_end = %grace_period_end,
            "payment failure recorded; grace period opened"
        );
        Ok(())
    }

    /// Recovery after a payment failure. Only applies when the stored record
    /// is actually in a failure state, so a redelivered recovery event is a
    /// no-op rather than a second reactivation.
    pub async fn reactivate_subscription(&self, owner_id: Uuid) -> Result<bool, sqlx::Error> {
        let Some(record) = self.store.get(owner_id).await? else {
            info!(owner_id = %owner_id, "reactivation for unknown owner ignored");
            return Ok(false);
        };
        if !record.status.is_payment_failure() {
            info!(
                owner_id = %owner_id,
                status = record.status.as_str(),
                "reactivation skipped; subscription not in a failure state"
            );
            return Ok(false);
        }
        self.store.clear_payment_failure(owner_id).await?;
        info!(owner_id = %owner_id, "subscription reactivated; grace period cleared");
        Ok(true)
    }

    pub fn is_in_grace_period(&self, record: &SubscriptionRecord, now: OffsetDateTime) -> bool {
        record.status.is_payment_failure()
            && record
                .grace_period_end
                .map(|end| now < end)
                .unwrap_or(false)
    }

    pub fn is_expired(&self, record: &SubscriptionRecord, now: OffsetDateTime) -> bool {
        record.status.is_payment_failure()
            && record
                .grace_period_end
                .map(|end| now >= end)
                .unwrap_or(false)
    }

    /// Whole days left in the grace window, rounded up, never negative. The
    /// ceil runs over milliseconds so a window with under a second left still
    /// counts as one day.
    pub fn days_remaining(&self, record: &SubscriptionRecord, now: OffsetDateTime) -> i64 {
        const DAY_MS: i128 = 86_400_000;
        let Some(end) = record.grace_period_end else {
            return 0;
        };
        let ms = (end - now).whole_milliseconds();
        (((ms + DAY_MS - 1) / DAY_MS).max(0)) as i64
    }

    /// Effective standing computed from one record snapshot so the three
    /// derived fields cannot disagree with each other.
    pub async fn status_with_grace(
        &self,
        owner_id: Uuid,
    ) -> Result<SubscriptionStanding, sqlx::Error> {
        let Some(record) = self.store.get(owner_id).await? else {
            return Ok(SubscriptionStanding::inactive());
        };
        let now = OffsetDateTime::now_utc();
        Ok(SubscriptionStanding {
            status: record.status,
            is_in_grace_period: self.is_in_grace_period(&record, now),
            days_remaining: self.days_remaining(&record, now),
            is_expired: self.is_expired(&record, now),
        })
    }

    /// Deletes the tenant's restaurants and resets their record. Returns the
    /// number of restaurants removed.
    pub async fn cleanup_expired_subscription(&self, owner_id: Uuid) -> Result<u64, sqlx::Error> {
        let deleted = self.store.cleanup_expired(owner_id).await?;
        info!(
            owner_id = %owner_id,
            deleted = deleted.len(),
            "expired subscription cleaned up"
        );
        Ok(deleted.len() as u64)
    }

    /// Sweeps every tenant whose grace period has lapsed. A failure for one
    /// tenant is logged and the sweep moves on; the returned count covers
    /// tenants cleaned, not restaurants deleted.
    pub async fn cleanup_all_expired(&self) -> Result<u64, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let expired = self.store.find_expired(now).await?;
        let mut cleaned = 0u64;
        for owner_id in expired {
            match self.store.cleanup_expired(owner_id).await {
                Ok(deleted) => {
                    info!(
                        owner_id = %owner_id,
                        deleted = deleted.len(),
                        "expired subscription cleaned up"
                    );
                    cleaned += 1;
                }
                Err(err) => {
                    error!(owner_id = %owner_id, error = %err, "cleanup failed; continuing sweep");
                }
            }
        }
        Ok(cleaned)
    }
}
