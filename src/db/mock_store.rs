#![allow(dead_code)]
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::subscription_store::SubscriptionStore;
use crate::models::subscription::{
    BillingInterval, SubscriptionRecord, SubscriptionStatus, SubscriptionTier,
    FREE_RESTAURANT_LIMIT,
};

/// In-memory store used by unit tests. Captures every mutation so tests can
/// assert on what the reconciler and the enforcement engine actually did.
#[derive(Clone, Default)]
pub struct MockSubscriptionStore {
    pub records: Arc<Mutex<HashMap<Uuid, SubscriptionRecord>>>,
    pub deleted_restaurants: Arc<Mutex<Vec<Uuid>>>,
    pub status_updates: Arc<Mutex<Vec<(Uuid, SubscriptionStatus)>>>,
    pub failure_marks: Arc<Mutex<usize>>,
    pub failure_clears: Arc<Mutex<usize>>,
    pub fail_cleanup_for: Arc<Mutex<HashSet<Uuid>>>,
    pub should_fail: Arc<Mutex<bool>>,
}

impl MockSubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, record: SubscriptionRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.owner_id, record);
    }

    pub fn record(&self, owner_id: Uuid) -> Option<SubscriptionRecord> {
        self.records.lock().unwrap().get(&owner_id).cloned()
    }

    /// Makes cleanup_expired fail for one owner, for sweep-continuation tests.
    pub fn fail_cleanup_for(&self, owner_id: Uuid) {
        self.fail_cleanup_for.lock().unwrap().insert(owner_id);
    }

    fn check_failure(&self) -> Result<(), sqlx::Error> {
        if *self.should_fail.lock().unwrap() {
            return Err(sqlx::Error::Protocol("mock store failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for MockSubscriptionStore {
    async fn get(&self, owner_id: Uuid) -> Result<Option<SubscriptionRecord>, sqlx::Error> {
        self.check_failure()?;
        Ok(self.record(owner_id))
    }

    async fn upsert_checkout(
        &self,
        owner_id: Uuid,
        tier: SubscriptionTier,
        interval: BillingInterval,
        customer_id: &str,
        subscription_id: &str,
    ) -> Result<(), sqlx::Error> {
        self.check_failure()?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .entry(owner_id)
            .or_insert_with(|| SubscriptionRecord::new(owner_id));
        record.tier = tier;
        record.status = SubscriptionStatus::Active;
        record.billing_interval = Some(interval);
        record.restaurant_limit = tier.restaurant_limit();
        record.stripe_customer_id = Some(customer_id.to_string());
        record.stripe_subscription_id = Some(subscription_id.to_string());
        record.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn find_owner_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        self.check_failure()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.stripe_subscription_id.as_deref() == Some(subscription_id))
            .map(|r| r.owner_id))
    }

    async fn set_status(
        &self,
        owner_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), sqlx::Error> {
        self.check_failure()?;
        self.status_updates.lock().unwrap().push((owner_id, status));
        if let Some(record) = self.records.lock().unwrap().get_mut(&owner_id) {
            record.status = status;
            record.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn update_tier(
        &self,
        owner_id: Uuid,
        tier: SubscriptionTier,
        interval: BillingInterval,
    ) -> Result<(), sqlx::Error> {
        self.check_failure()?;
        if let Some(record) = self.records.lock().unwrap().get_mut(&owner_id) {
            record.tier = tier;
            record.billing_interval = Some(interval);
            record.restaurant_limit = tier.restaurant_limit();
            record.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn mark_payment_failure(
        &self,
        owner_id: Uuid,
        failed_at: OffsetDateTime,
        grace_period_end: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        self.check_failure()?;
        *self.failure_marks.lock().unwrap() += 1;
        if let Some(record) = self.records.lock().unwrap().get_mut(&owner_id) {
            record.status = SubscriptionStatus::PastDue;
            record.payment_failure_date = Some(failed_at);
            record.grace_period_end = Some(grace_period_end);
            record.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn clear_payment_failure(&self, owner_id: Uuid) -> Result<(), sqlx::Error> {
        self.check_failure()?;
        *self.failure_clears.lock().unwrap() += 1;
        if let Some(record) = self.records.lock().unwrap().get_mut(&owner_id) {
            record.status = SubscriptionStatus::Active;
            record.payment_failure_date = None;
            record.grace_period_end = None;
            record.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn find_expired(&self, now: OffsetDateTime) -> Result<Vec<Uuid>, sqlx::Error> {
        self.check_failure()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.status == SubscriptionStatus::PastDue
                    && r.grace_period_end.map(|end| end <= now).unwrap_or(false)
            })
            .map(|r| r.owner_id)
            .collect())
    }

    async fn cleanup_expired(&self, owner_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
        self.check_failure()?;
        if self.fail_cleanup_for.lock().unwrap().contains(&owner_id) {
            return Err(sqlx::Error::Protocol("mock cleanup failure".into()));
        }
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(&owner_id) else {
            return Ok(Vec::new());
        };
        let owned = std::mem::take(&mut record.owned_restaurant_ids);
        self.deleted_restaurants
            .lock()
            .unwrap()
            .extend(owned.iter().copied());
        record.status = SubscriptionStatus::Canceled;
        record.tier = SubscriptionTier::Free;
        record.restaurant_limit = FREE_RESTAURANT_LIMIT;
        record.grace_period_end = None;
        record.payment_failure_date = None;
        record.updated_at = OffsetDateTime::now_utc();
        Ok(owned)
    }
}
