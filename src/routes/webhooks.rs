use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::subscription::{BillingInterval, SubscriptionStatus, SubscriptionTier};
use crate::responses::JsonResponse;
use crate::state::AppState;
use crate::utils::ip::is_allowed_source;

fn jget<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    Some(current)
}

fn extract_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    jget(value, path).and_then(|v| v.as_str())
}

fn ack() -> Response {
    Json(serde_json::json!({ "received": true })).into_response()
}

/// POST /api/webhooks/stripe. Signature verification happens before any
/// dispatch on the event type; in production the source address must also be
/// on the Stripe egress allow-list. Events that cannot be acted on (missing
/// metadata, unknown subscription ids) are logged and acknowledged so the
/// provider stops retrying them.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.config.environment.is_production()
        && !is_allowed_source(&headers, &state.config.stripe.allowed_webhook_ips)
    {
        warn!("webhook request from address outside the Stripe allow-list");
        return JsonResponse::unauthorized("Unauthorized").into_response();
    }

    let Some(signature) = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
    else {
        return JsonResponse::bad_request("Missing Stripe-Signature header").into_response();
    };

    let event = match state.billing.verify_webhook(&body, signature) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "webhook signature verification failed");
            return (StatusCode::BAD_REQUEST, "invalid webhook").into_response();
        }
    };

    info!(event_id = %event.id, event_type = %event.r#type, "stripe webhook received");

    match event.r#type.as_str() {
        "checkout.session.completed" => handle_checkout_completed(&state, &event.payload).await,
        "customer.subscription.updated" => {
            handle_subscription_updated(&state, &event.payload).await
        }
        "customer.subscription.deleted" => {
            handle_subscription_deleted(&state, &event.payload).await
        }
        other => {
            info!(event_type = other, "unhandled stripe event acknowledged");
            ack()
        }
    }
}

/// Checkout completion activates the purchased tier. Sessions that are not
/// subscription-mode, or that arrive without the metadata our checkout flow
/// always sets, are acknowledged without touching the store.
async fn handle_checkout_completed(state: &AppState, payload: &Value) -> Response {
    let object = jget(payload, &["data", "object"]).cloned().unwrap_or(Value::Null);

    if extract_str(&object, &["mode"]) != Some("subscription") {
        info!("checkout session is not subscription mode; acknowledged");
        return ack();
    }

    let owner_id = extract_str(&object, &["metadata", "userId"])
        .and_then(|raw| Uuid::parse_str(raw).ok());
    let tier = extract_str(&object, &["metadata", "tier"]).and_then(SubscriptionTier::from_metadata);
    let interval = extract_str(&object, &["metadata", "billingInterval"])
        .and_then(BillingInterval::from_metadata);
    let customer_id = extract_str(&object, &["customer"]);
    let subscription_id = extract_str(&object, &["subscription"]);

    let (Some(owner_id), Some(tier), Some(interval), Some(customer_id), Some(subscription_id)) =
        (owner_id, tier, interval, customer_id, subscription_id)
    else {
        warn!("checkout session missing metadata or correlation ids; acknowledged");
        return ack();
    };

    match state
        .store
        .upsert_checkout(owner_id, tier, interval, customer_id, subscription_id)
        .await
    {
        Ok(()) => {
            info!(
                owner_id = %owner_id,
                tier = tier.as_str(),
                "checkout completed; subscription activated"
            );
        }
        Err(err) => {
            // Acknowledged anyway: retrying the same broken write from
            // Stripe's side will not fix a store problem.
            error!(owner_id = %owner_id, error = %err, "failed to persist checkout completion");
        }
    }
    ack()
}

/// Status transitions from the provider. Failure states open a grace window;
/// an active status arriving after a failure state closes it. Store errors
/// past this point are logged and acknowledged; a provider retry cannot fix
/// them and must not be provoked by internal bookkeeping failures.
async fn handle_subscription_updated(state: &AppState, payload: &Value) -> Response {
    let Some(subscription_id) = extract_str(payload, &["data", "object", "id"]) else {
        return JsonResponse::bad_request("Malformed subscription event").into_response();
    };

    let owner_id = match state.store.find_owner_by_subscription_id(subscription_id).await {
        Ok(Some(owner_id)) => owner_id,
        Ok(None) => {
            info!(subscription_id, "update for unknown subscription acknowledged");
            return ack();
        }
        Err(err) => {
            error!(subscription_id, error = %err, "owner lookup failed");
            return ack();
        }
    };

    let raw_status = extract_str(payload, &["data", "object", "status"]).unwrap_or("unknown");
    let new_status = SubscriptionStatus::from_provider(raw_status);
    // The recovery decision rides on the event's own delta, so it cannot be
    // defeated by whatever the store already says.
    let previous = extract_str(payload, &["data", "previous_attributes", "status"])
        .map(SubscriptionStatus::from_provider);
    let recovered = new_status == SubscriptionStatus::Active
        && previous.map(|s| s.is_payment_failure()).unwrap_or(false);

    let engine = state.enforcement();
    if recovered {
        // Clearing the failure fields also lands the status on active; the
        // plain status write only runs when there was nothing to clear
        // (a redelivered recovery event).
        match engine.reactivate_subscription(owner_id).await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(err) = state.store.set_status(owner_id, new_status).await {
                    error!(owner_id = %owner_id, error = %err, "failed to persist status update");
                }
            }
            Err(err) => {
                error!(owner_id = %owner_id, error = %err, "failed to reactivate subscription");
            }
        }
    } else {
        if let Err(err) = state.store.set_status(owner_id, new_status).await {
            error!(owner_id = %owner_id, error = %err, "failed to persist status update");
            return ack();
        }
        if new_status.is_payment_failure() {
            if let Err(err) = engine.track_payment_failure(owner_id).await {
                error!(owner_id = %owner_id, error = %err, "failed to open grace period");
            }
        }
    }

    // Tier changes ride along in subscription metadata when a plan update
    // goes through the provider.
    let tier = extract_str(payload, &["data", "object", "metadata", "tier"])
        .and_then(SubscriptionTier::from_metadata);
    let interval = extract_str(payload, &["data", "object", "metadata", "billingInterval"])
        .and_then(BillingInterval::from_metadata);
    if let (Some(tier), Some(interval)) = (tier, interval) {
        if let Err(err) = state.store.update_tier(owner_id, tier, interval).await {
            error!(owner_id = %owner_id, error = %err, "failed to persist tier update");
        }
    }

    ack()
}

async fn handle_subscription_deleted(state: &AppState, payload: &Value) -> Response {
    let Some(subscription_id) = extract_str(payload, &["data", "object", "id"]) else {
        return JsonResponse::bad_request("Malformed subscription event").into_response();
    };

    match state.store.find_owner_by_subscription_id(subscription_id).await {
        Ok(Some(owner_id)) => {
            if let Err(err) = state
                .store
                .set_status(owner_id, SubscriptionStatus::Canceled)
                .await
            {
                error!(owner_id = %owner_id, error = %err, "failed to mark subscription canceled");
            } else {
                info!(owner_id = %owner_id, "subscription deleted; marked canceled");
            }
        }
        Ok(None) => {
            info!(subscription_id, "deletion for unknown subscription acknowledged");
        }
        Err(err) => {
            error!(subscription_id, error = %err, "owner lookup failed");
        }
    }
    ack()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_store::MockSubscriptionStore;
    use crate::models::subscription::SubscriptionRecord;
    use crate::services::billing::MockBillingService;
    use axum::http::HeaderValue;
    use time::{Duration, OffsetDateTime};

    fn sig_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", HeaderValue::from_static("t=1,v1=stub"));
        headers
    }

    fn checkout_payload(owner_id: Uuid, tier: &str) -> Vec<u8> {
        serde_json::json!({
            "id": "evt_checkout",
            "type": "checkout.session.completed",
            "data": { "object": {
                "mode": "subscription",
                "customer": "cus_123",
                "subscription": "sub_123",
                "metadata": {
                    "userId": owner_id.to_string(),
                    "tier": tier,
                    "billingInterval": "monthly"
                }
            }}
        })
        .to_string()
        .into_bytes()
    }

    fn updated_payload(status: &str, previous_status: Option<&str>) -> Vec<u8> {
        let mut payload = serde_json::json!({
            "id": "evt_updated",
            "type": "customer.subscription.updated",
            "data": { "object": { "id": "sub_123", "status": status } }
        });
        if let Some(prev) = previous_status {
            payload["data"]["previous_attributes"] = serde_json::json!({ "status": prev });
        }
        payload.to_string().into_bytes()
    }

    fn seeded_state(record: SubscriptionRecord) -> (AppState, MockSubscriptionStore) {
        let store = MockSubscriptionStore::new();
        store.seed(record);
        let state = AppState::for_tests_with(store.clone(), MockBillingService::new());
        (state, store)
    }

    fn active_record(owner_id: Uuid) -> SubscriptionRecord {
        let mut record = SubscriptionRecord::new(owner_id);
        record.tier = SubscriptionTier::Growth;
        record.restaurant_limit = record.tier.restaurant_limit();
        record.status = SubscriptionStatus::Active;
        record.stripe_customer_id = Some("cus_123".into());
        record.stripe_subscription_id = Some("sub_123".into());
        record
    }

    #[tokio::test]
    async fn missing_signature_header_is_rejected() {
        let state = AppState::for_tests();
        let resp = stripe_webhook(
            State(state),
            HeaderMap::new(),
            Bytes::from_static(b"{}"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn checkout_completed_activates_purchased_tier() {
        let owner = Uuid::new_v4();
        let store = MockSubscriptionStore::new();
        let state = AppState::for_tests_with(store.clone(), MockBillingService::new());

        let resp = stripe_webhook(
            State(state),
            sig_headers(),
            Bytes::from(checkout_payload(owner, "growth")),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let record = store.record(owner).expect("record created");
        assert_eq!(record.tier, SubscriptionTier::Growth);
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.restaurant_limit, 5);
        assert_eq!(record.billing_interval, Some(BillingInterval::Monthly));
        assert_eq!(record.stripe_customer_id.as_deref(), Some("cus_123"));
        assert_eq!(record.stripe_subscription_id.as_deref(), Some("sub_123"));
    }

    #[tokio::test]
    async fn checkout_without_metadata_is_acknowledged_without_writes() {
        let store = MockSubscriptionStore::new();
        let state = AppState::for_tests_with(store.clone(), MockBillingService::new());

        let payload = serde_json::json!({
            "id": "evt_checkout",
            "type": "checkout.session.completed",
            "data": { "object": { "mode": "subscription", "customer": "cus_123" } }
        })
        .to_string();

        let resp = stripe_webhook(State(state), sig_headers(), Bytes::from(payload)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_subscription_checkout_is_ignored() {
        let owner = Uuid::new_v4();
        let store = MockSubscriptionStore::new();
        let state = AppState::for_tests_with(store.clone(), MockBillingService::new());

        let payload = serde_json::json!({
            "id": "evt_checkout",
            "type": "checkout.session.completed",
            "data": { "object": {
                "mode": "payment",
                "customer": "cus_123",
                "subscription": "sub_123",
                "metadata": { "userId": owner.to_string(), "tier": "pro", "billingInterval": "yearly" }
            }}
        })
        .to_string();

        let resp = stripe_webhook(State(state), sig_headers(), Bytes::from(payload)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(store.record(owner).is_none());
    }

    #[tokio::test]
    async fn past_due_update_opens_grace_window() {
        let owner = Uuid::new_v4();
        let (state, store) = seeded_state(active_record(owner));

        let resp = stripe_webhook(
            State(state),
            sig_headers(),
            Bytes::from(updated_payload("past_due", None)),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let record = store.record(owner).unwrap();
        assert_eq!(record.status, SubscriptionStatus::PastDue);
        let grace_end = record.grace_period_end.expect("grace window opened");
        let expected = OffsetDateTime::now_utc() + Duration::days(30);
        assert!((grace_end - expected).abs() < Duration::minutes(1));
    }

    #[tokio::test]
    async fn unpaid_update_still_lands_on_past_due_for_the_sweep() {
        let owner = Uuid::new_v4();
        let (state, store) = seeded_state(active_record(owner));

        let resp = stripe_webhook(
            State(state),
            sig_headers(),
            Bytes::from(updated_payload("unpaid", None)),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        // find_expired only matches past_due; an unpaid event must not leave
        // the record on a status the sweep never looks at.
        let record = store.record(owner).unwrap();
        assert_eq!(record.status, SubscriptionStatus::PastDue);
        assert!(record.grace_period_end.is_some());
        assert!(record.payment_failure_date.is_some());
    }

    #[tokio::test]
    async fn store_failure_during_update_is_still_acknowledged() {
        let store = MockSubscriptionStore::new();
        store.seed(active_record(Uuid::new_v4()));
        *store.should_fail.lock().unwrap() = true;
        let state = AppState::for_tests_with(store, MockBillingService::new());

        let resp = stripe_webhook(
            State(state),
            sig_headers(),
            Bytes::from(updated_payload("past_due", None)),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn store_failure_during_delete_is_still_acknowledged() {
        let store = MockSubscriptionStore::new();
        store.seed(active_record(Uuid::new_v4()));
        *store.should_fail.lock().unwrap() = true;
        let state = AppState::for_tests_with(store, MockBillingService::new());

        let payload = serde_json::json!({
            "id": "evt_deleted",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_123" } }
        })
        .to_string();
        let resp = stripe_webhook(State(state), sig_headers(), Bytes::from(payload)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn recovery_after_past_due_reactivates_exactly_once() {
        let owner = Uuid::new_v4();
        let mut record = active_record(owner);
        record.status = SubscriptionStatus::PastDue;
        record.payment_failure_date = Some(OffsetDateTime::now_utc());
        record.grace_period_end = Some(OffsetDateTime::now_utc() + Duration::days(20));
        let (state, store) = seeded_state(record);

        let payload = updated_payload("active", Some("past_due"));
        let resp = stripe_webhook(
            State(state.clone()),
            sig_headers(),
            Bytes::from(payload.clone()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let record = store.record(owner).unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert!(record.grace_period_end.is_none());
        assert!(record.payment_failure_date.is_none());

        // Redelivery of the same event: still active, but no second clear.
        let resp = stripe_webhook(State(state), sig_headers(), Bytes::from(payload)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(store.record(owner).unwrap().status, SubscriptionStatus::Active);
        assert_eq!(*store.failure_clears.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn active_update_without_prior_failure_does_not_touch_grace_state() {
        let owner = Uuid::new_v4();
        let (state, store) = seeded_state(active_record(owner));

        let resp = stripe_webhook(
            State(state),
            sig_headers(),
            Bytes::from(updated_payload("active", None)),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(*store.failure_clears.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn update_for_unknown_subscription_is_acknowledged() {
        let store = MockSubscriptionStore::new();
        let state = AppState::for_tests_with(store.clone(), MockBillingService::new());

        let resp = stripe_webhook(
            State(state),
            sig_headers(),
            Bytes::from(updated_payload("past_due", None)),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(store.status_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_without_subscription_id_is_malformed() {
        let state = AppState::for_tests();
        let payload = serde_json::json!({
            "id": "evt_updated",
            "type": "customer.subscription.updated",
            "data": { "object": { "status": "past_due" } }
        })
        .to_string();

        let resp = stripe_webhook(State(state), sig_headers(), Bytes::from(payload)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_with_metadata_changes_tier() {
        let owner = Uuid::new_v4();
        let (state, store) = seeded_state(active_record(owner));

        let payload = serde_json::json!({
            "id": "evt_updated",
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": "sub_123",
                "status": "active",
                "metadata": { "tier": "pro", "billingInterval": "yearly" }
            }}
        })
        .to_string();

        let resp = stripe_webhook(State(state), sig_headers(), Bytes::from(payload)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let record = store.record(owner).unwrap();
        assert_eq!(record.tier, SubscriptionTier::Pro);
        assert_eq!(record.restaurant_limit, 20);
        assert_eq!(record.billing_interval, Some(BillingInterval::Yearly));
    }

    #[tokio::test]
    async fn deleted_subscription_is_marked_canceled() {
        let owner = Uuid::new_v4();
        let (state, store) = seeded_state(active_record(owner));

        let payload = serde_json::json!({
            "id": "evt_deleted",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_123" } }
        })
        .to_string();

        let resp = stripe_webhook(State(state), sig_headers(), Bytes::from(payload)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(store.record(owner).unwrap().status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn unknown_event_type_is_acknowledged_untouched() {
        let store = MockSubscriptionStore::new();
        let state = AppState::for_tests_with(store.clone(), MockBillingService::new());

        let payload = serde_json::json!({
            "id": "evt_misc",
            "type": "invoice.finalized",
            "data": { "object": {} }
        })
        .to_string();

        let resp = stripe_webhook(State(state), sig_headers(), Bytes::from(payload)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(store.records.lock().unwrap().is_empty());
        assert!(store.status_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn production_rejects_addresses_off_the_allow_list() {
        let state = AppState::for_tests_production(
            MockSubscriptionStore::new(),
            MockBillingService::new(),
        );

        let mut headers = sig_headers();
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.0.2.1"));
        let resp = stripe_webhook(State(state), headers, Bytes::from_static(b"{}")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn production_accepts_allow_listed_addresses() {
        let owner = Uuid::new_v4();
        let store = MockSubscriptionStore::new();
        store.seed(active_record(owner));
        let state = AppState::for_tests_production(store.clone(), MockBillingService::new());

        let mut headers = sig_headers();
        headers.insert("x-forwarded-for", HeaderValue::from_static("3.18.12.63"));
        let resp = stripe_webhook(
            State(state),
            headers,
            Bytes::from(updated_payload("past_due", None)),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(store.record(owner).unwrap().status, SubscriptionStatus::PastDue);
    }
}
