use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::subscription::{BillingInterval, SubscriptionStatus, SubscriptionTier};
use crate::responses::JsonResponse;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub owner_id: Uuid,
}

/// GET /api/subscription/status?ownerId=... Effective standing with grace
/// period applied; unknown owners read as inactive rather than 404.
pub async fn get_subscription_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Response {
    match state.enforcement().status_with_grace(query.owner_id).await {
        Ok(standing) => Json(standing).into_response(),
        Err(err) => {
            error!(owner_id = %query.owner_id, error = %err, "failed to load standing");
            JsonResponse::server_error("Failed to load subscription status").into_response()
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscriptionRequest {
    pub owner_id: Uuid,
    pub subscription_id: String,
    pub new_tier: String,
    pub billing_interval: String,
}

/// POST /api/subscription/update. Swaps the provider price, then mirrors the
/// tier and the provider's resulting status into the store.
pub async fn update_subscription(
    State(state): State<AppState>,
    Json(req): Json<UpdateSubscriptionRequest>,
) -> Response {
    let Some(tier) = SubscriptionTier::from_metadata(&req.new_tier) else {
        return JsonResponse::bad_request("Unknown subscription tier").into_response();
    };
    let Some(interval) = BillingInterval::from_metadata(&req.billing_interval) else {
        return JsonResponse::bad_request("Unknown billing interval").into_response();
    };
    if !tier.is_paid() {
        // Downgrading to free goes through cancellation, not a price swap.
        return JsonResponse::bad_request("Cannot switch to the free tier here").into_response();
    }
    let Some(price_id) = state.config.stripe.prices.lookup(tier, interval) else {
        return JsonResponse::bad_request("No price configured for that tier").into_response();
    };

    let updated = match state
        .billing
        .update_subscription_price(&req.subscription_id, price_id, tier.as_str(), interval.as_str())
        .await
    {
        Ok(sub) => sub,
        Err(err) => {
            error!(
                owner_id = %req.owner_id,
                subscription_id = %req.subscription_id,
                error = %err,
                "provider price update failed"
            );
            return JsonResponse::server_error("Failed to update subscription").into_response();
        }
    };

    let status = SubscriptionStatus::from_provider(&updated.status);
    if let Err(err) = state.store.update_tier(req.owner_id, tier, interval).await {
        error!(owner_id = %req.owner_id, error = %err, "failed to persist tier change");
        return JsonResponse::server_error("Failed to update subscription").into_response();
    }
    if let Err(err) = state.store.set_status(req.owner_id, status).await {
        error!(owner_id = %req.owner_id, error = %err, "failed to persist status change");
        return JsonResponse::server_error("Failed to update subscription").into_response();
    }

    info!(
        owner_id = %req.owner_id,
        tier = tier.as_str(),
        interval = interval.as_str(),
        "subscription plan updated"
    );
    Json(serde_json::json!({
        "success": true,
        "subscriptionId": updated.id,
        "tier": tier.as_str(),
        "billingInterval": interval.as_str(),
        "restaurantLimit": tier.restaurant_limit(),
        "status": status.as_str(),
    }))
    .into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactivateSubscriptionRequest {
    pub owner_id: Uuid,
    pub subscription_id: String,
}

/// POST /api/subscription/reactivate. Clears cancel-at-period-end on the
/// provider side and marks the stored record active again.
pub async fn reactivate_subscription(
    State(state): State<AppState>,
    Json(req): Json<ReactivateSubscriptionRequest>,
) -> Response {
    let updated = match state
        .billing
        .set_subscription_cancel_at_period_end(&req.subscription_id, false)
        .await
    {
        Ok(sub) => sub,
        Err(err) => {
            error!(
                owner_id = %req.owner_id,
                subscription_id = %req.subscription_id,
                error = %err,
                "provider reactivation failed"
            );
            return JsonResponse::server_error("Failed to reactivate subscription")
                .into_response();
        }
    };

    if let Err(err) = state
        .store
        .set_status(req.owner_id, SubscriptionStatus::Active)
        .await
    {
        error!(owner_id = %req.owner_id, error = %err, "failed to persist reactivation");
        return JsonResponse::server_error("Failed to reactivate subscription").into_response();
    }

    info!(owner_id = %req.owner_id, "scheduled cancellation reverted");
    Json(serde_json::json!({
        "success": true,
        "subscriptionId": updated.id,
        "status": updated.status,
        "cancelAtPeriodEnd": updated.cancel_at_period_end,
        "currentPeriodEnd": updated.current_period_end,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_store::MockSubscriptionStore;
    use crate::models::subscription::SubscriptionRecord;
    use crate::services::billing::MockBillingService;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use time::{Duration, OffsetDateTime};

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn growth_record(owner: Uuid) -> SubscriptionRecord {
        let mut record = SubscriptionRecord::new(owner);
        record.tier = SubscriptionTier::Growth;
        record.restaurant_limit = record.tier.restaurant_limit();
        record.status = SubscriptionStatus::Active;
        record.stripe_subscription_id = Some("sub_123".into());
        record
    }

    #[tokio::test]
    async fn status_reports_grace_window() {
        let store = MockSubscriptionStore::new();
        let owner = Uuid::new_v4();
        let mut record = growth_record(owner);
        record.status = SubscriptionStatus::PastDue;
        let now = OffsetDateTime::now_utc();
        record.payment_failure_date = Some(now);
        record.grace_period_end = Some(now + Duration::days(12));
        store.seed(record);
        let state = AppState::for_tests_with(store, MockBillingService::new());

        let resp =
            get_subscription_status(State(state), Query(StatusQuery { owner_id: owner })).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "past_due");
        assert_eq!(json["isInGracePeriod"], true);
        assert_eq!(json["daysRemaining"], 12);
        assert_eq!(json["isExpired"], false);
    }

    #[tokio::test]
    async fn status_for_unknown_owner_is_inactive() {
        let state = AppState::for_tests();
        let resp = get_subscription_status(
            State(state),
            Query(StatusQuery {
                owner_id: Uuid::new_v4(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "inactive");
        assert_eq!(json["isInGracePeriod"], false);
    }

    #[tokio::test]
    async fn update_rejects_free_tier_and_unknown_values() {
        let state = AppState::for_tests();
        let owner = Uuid::new_v4();

        let free = update_subscription(
            State(state.clone()),
            Json(UpdateSubscriptionRequest {
                owner_id: owner,
                subscription_id: "sub_123".into(),
                new_tier: "free".into(),
                billing_interval: "monthly".into(),
            }),
        )
        .await;
        assert_eq!(free.status(), StatusCode::BAD_REQUEST);

        let bogus = update_subscription(
            State(state),
            Json(UpdateSubscriptionRequest {
                owner_id: owner,
                subscription_id: "sub_123".into(),
                new_tier: "platinum".into(),
                billing_interval: "monthly".into(),
            }),
        )
        .await;
        assert_eq!(bogus.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_swaps_price_and_mirrors_store() {
        let store = MockSubscriptionStore::new();
        let billing = MockBillingService::new();
        let owner = Uuid::new_v4();
        store.seed(growth_record(owner));
        let state = AppState::for_tests_with(store.clone(), billing.clone());

        let resp = update_subscription(
            State(state),
            Json(UpdateSubscriptionRequest {
                owner_id: owner,
                subscription_id: "sub_123".into(),
                new_tier: "pro".into(),
                billing_interval: "yearly".into(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        // The configured price id for pro/yearly reached the provider.
        let updates = billing.price_updates.lock().unwrap().clone();
        assert_eq!(updates, vec![("sub_123".to_string(), "price_pro_y".to_string())]);

        let record = store.record(owner).unwrap();
        assert_eq!(record.tier, SubscriptionTier::Pro);
        assert_eq!(record.restaurant_limit, 20);
        assert_eq!(record.billing_interval, Some(BillingInterval::Yearly));
        assert_eq!(record.status, SubscriptionStatus::Active);

        let json = body_json(resp).await;
        assert_eq!(json["tier"], "pro");
        assert_eq!(json["restaurantLimit"], 20);
        assert_eq!(json["status"], "active");
    }

    #[tokio::test]
    async fn update_provider_failure_leaves_store_untouched() {
        let store = MockSubscriptionStore::new();
        let owner = Uuid::new_v4();
        store.seed(growth_record(owner));
        let state = AppState::for_tests_with(store.clone(), MockBillingService::failing());

        let resp = update_subscription(
            State(state),
            Json(UpdateSubscriptionRequest {
                owner_id: owner,
                subscription_id: "sub_123".into(),
                new_tier: "pro".into(),
                billing_interval: "monthly".into(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(store.record(owner).unwrap().tier, SubscriptionTier::Growth);
    }

    #[tokio::test]
    async fn reactivate_clears_cancel_flag_and_marks_active() {
        let store = MockSubscriptionStore::new();
        let billing = MockBillingService::new();
        let owner = Uuid::new_v4();
        let mut record = growth_record(owner);
        record.status = SubscriptionStatus::Canceled;
        store.seed(record);
        let state = AppState::for_tests_with(store.clone(), billing.clone());

        let resp = reactivate_subscription(
            State(state),
            Json(ReactivateSubscriptionRequest {
                owner_id: owner,
                subscription_id: "sub_123".into(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let flags = billing.cancel_flag_updates.lock().unwrap().clone();
        assert_eq!(flags, vec![("sub_123".to_string(), false)]);
        assert_eq!(store.record(owner).unwrap().status, SubscriptionStatus::Active);

        let json = body_json(resp).await;
        assert_eq!(json["cancelAtPeriodEnd"], false);
        assert_eq!(json["success"], true);
    }
}
