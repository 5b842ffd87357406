use std::sync::Arc;

use crate::config::Config;
use crate::db::subscription_store::SubscriptionStore;
use crate::enforcement::{EnforcementConfig, EnforcementEngine};
use crate::services::billing::BillingService;
use crate::utils::csrf::CsrfTokenCodec;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SubscriptionStore>,
    pub billing: Arc<dyn BillingService>,
    pub csrf: CsrfTokenCodec,
    pub config: Arc<Config>,
}

impl AppState {
    /// Enforcement is stateless over the store, so handlers build one per
    /// request rather than sharing an instance.
    pub fn enforcement(&self) -> EnforcementEngine {
        EnforcementEngine::new(
            Arc::clone(&self.store),
            EnforcementConfig {
                grace_period_days: self.config.grace_period_days,
            },
        )
    }
}

#[cfg(test)]
impl AppState {
    pub fn for_tests() -> Self {
        Self::for_tests_with(
            crate::db::mock_store::MockSubscriptionStore::default(),
            crate::services::billing::MockBillingService::new(),
        )
    }

    pub fn for_tests_with(
        store: crate::db::mock_store::MockSubscriptionStore,
        billing: crate::services::billing::MockBillingService,
    ) -> Self {
        let config = Config::for_tests();
        AppState {
            store: Arc::new(store),
            billing: Arc::new(billing),
            csrf: CsrfTokenCodec::new(config.csrf_secret_key.clone()),
            config: Arc::new(config),
        }
    }

    pub fn for_tests_production(
        store: crate::db::mock_store::MockSubscriptionStore,
        billing: crate::services::billing::MockBillingService,
    ) -> Self {
        let config = Config::for_tests_production();
        AppState {
            store: Arc::new(store),
            billing: Arc::new(billing),
            csrf: CsrfTokenCodec::new(config.csrf_secret_key.clone()),
            config: Arc::new(config),
        }
    }
}
