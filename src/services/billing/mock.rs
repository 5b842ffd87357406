#![allow(dead_code)]
use super::{BillingEvent, BillingService, BillingServiceError, ProviderSubscription};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Accepts any signature and records every call; used wherever tests need a
/// billing provider without touching the network.
#[derive(Clone, Default)]
pub struct MockBillingService {
    pub events: Arc<Mutex<Vec<BillingEvent>>>,
    pub price_updates: Arc<Mutex<Vec<(String, String)>>>,
    pub cancel_flag_updates: Arc<Mutex<Vec<(String, bool)>>>,
    pub subscription_status: Arc<Mutex<String>>,
    pub should_fail: Arc<Mutex<bool>>,
}

fn period_end_in_30_days() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    now + 30 * 24 * 60 * 60
}

impl MockBillingService {
    pub fn new() -> Self {
        Self {
            subscription_status: Arc::new(Mutex::new("active".to_string())),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        let mock = Self::new();
        *mock.should_fail.lock().unwrap() = true;
        mock
    }

    fn check_failure(&self) -> Result<(), BillingServiceError> {
        if *self.should_fail.lock().unwrap() {
            return Err(BillingServiceError::Api("mock stripe failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BillingService for MockBillingService {
    fn verify_webhook(
        &self,
        payload: &[u8],
        _signature_header: &str,
    ) -> Result<BillingEvent, BillingServiceError> {
        let val: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| BillingServiceError::Serde(e.to_string()))?;
        let id = val
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("evt_test")
            .to_string();
        let ty = val
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let evt = BillingEvent {
            id,
            r#type: ty,
            payload: val,
        };
        self.events.lock().unwrap().push(evt.clone());
        Ok(evt)
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
        _tier: &str,
        _billing_interval: &str,
    ) -> Result<ProviderSubscription, BillingServiceError> {
        self.check_failure()?;
        self.price_updates
            .lock()
            .unwrap()
            .push((subscription_id.to_string(), price_id.to_string()));
        Ok(ProviderSubscription {
            id: subscription_id.to_string(),
            status: self.subscription_status.lock().unwrap().clone(),
            cancel_at_period_end: false,
            current_period_end: period_end_in_30_days(),
        })
    }

    async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<ProviderSubscription, BillingServiceError> {
        self.check_failure()?;
        self.cancel_flag_updates
            .lock()
            .unwrap()
            .push((subscription_id.to_string(), cancel_at_period_end));
        Ok(ProviderSubscription {
            id: subscription_id.to_string(),
            status: self.subscription_status.lock().unwrap().clone(),
            cancel_at_period_end,
            current_period_end: period_end_in_30_days(),
        })
    }
}
