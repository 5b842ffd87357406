use async_trait::async_trait;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::subscription_store::SubscriptionStore;
use crate::models::subscription::{
    BillingInterval, SubscriptionRecord, SubscriptionStatus, SubscriptionTier,
    FREE_RESTAURANT_LIMIT,
};

pub struct PostgresSubscriptionStore {
    pub pool: PgPool,
}

// Runtime-bound queries rather than the query! macros so the crate builds
// without a reachable database.
#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn get(&self, owner_id: Uuid) -> Result<Option<SubscriptionRecord>, sqlx::Error> {
        sqlx::query_as::<_, SubscriptionRecord>(
            r#"
            SELECT owner_id,
                   tier,
                   status,
                   billing_interval,
                   restaurant_limit,
                   stripe_customer_id,
                   stripe_subscription_id,
                   payment_failure_date,
                   grace_period_end,
                   owned_restaurant_ids,
                   updated_at
            FROM subscription_records
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn upsert_checkout(
        &self,
        owner_id: Uuid,
        tier: SubscriptionTier,
        interval: BillingInterval,
        customer_id: &str,
        subscription_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO subscription_records
                (owner_id, tier, status, billing_interval, restaurant_limit,
                 stripe_customer_id, stripe_subscription_id, owned_restaurant_ids, updated_at)
            VALUES ($1, $2, 'active', $3, $4, $5, $6, '{}', now())
            ON CONFLICT (owner_id) DO UPDATE SET
                tier = EXCLUDED.tier,
                status = 'active',
                billing_interval = EXCLUDED.billing_interval,
                restaurant_limit = EXCLUDED.restaurant_limit,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                updated_at = now()
            "#,
        )
        .bind(owner_id)
        .bind(tier.as_str())
        .bind(interval.as_str())
        .bind(tier.restaurant_limit())
        .bind(customer_id)
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_owner_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT owner_id FROM subscription_records WHERE stripe_subscription_id = $1",
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("owner_id")))
    }

    async fn set_status(
        &self,
        owner_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE subscription_records SET status = $2, updated_at = now() WHERE owner_id = $1",
        )
        .bind(owner_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_tier(
        &self,
        owner_id: Uuid,
        tier: SubscriptionTier,
        interval: BillingInterval,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE subscription_records
            SET tier = $2, billing_interval = $3, restaurant_limit = $4, updated_at = now()
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .bind(tier.as_str())
        .bind(interval.as_str())
        .bind(tier.restaurant_limit())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_payment_failure(
        &self,
        owner_id: Uuid,
        failed_at: OffsetDateTime,
        grace_period_end: OffsetDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE subscription_records
            SET status = 'past_due',
                payment_failure_date = $2,
                grace_period_end = $3,
                updated_at = now()
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .bind(failed_at)
        .bind(grace_period_end)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_payment_failure(&self, owner_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE subscription_records
            SET status = 'active',
                payment_failure_date = NULL,
                grace_period_end = NULL,
                updated_at = now()
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_expired(&self, now: OffsetDateTime) -> Result<Vec<Uuid>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id
            FROM subscription_records
            WHERE status = 'past_due' AND grace_period_end <= $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.get("owner_id")).collect())
    }

    async fn cleanup_expired(&self, owner_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
        // Restaurant deletion and the record reset must land together; a crash
        // mid-sweep must not leave the record pointing at deleted rows.
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT owned_restaurant_ids FROM subscription_records WHERE owner_id = $1 FOR UPDATE",
        )
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await?;

        let owned: Vec<Uuid> = match row {
            Some(r) => r.get("owned_restaurant_ids"),
            None => {
                tx.rollback().await?;
                return Ok(Vec::new());
            }
        };

        if !owned.is_empty() {
            sqlx::query("DELETE FROM restaurants WHERE id = ANY($1)")
                .bind(&owned)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            UPDATE subscription_records
            SET status = 'canceled',
                tier = 'free',
                restaurant_limit = $2,
                owned_restaurant_ids = '{}',
                grace_period_end = NULL,
                payment_failure_date = NULL,
                updated_at = now()
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .bind(FREE_RESTAURANT_LIMIT)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(owned)
    }
}
