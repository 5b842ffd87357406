use std::env;

use thiserror::Error;
use tracing::warn;

use crate::models::subscription::{BillingInterval, SubscriptionTier};

/// Stripe's published webhook egress addresses. Used as the default source
/// allow-list for the webhook endpoint in production.
pub const STRIPE_WEBHOOK_EGRESS_IPS: &[&str] = &[
    "3.18.12.63",
    "3.130.192.231",
    "13.235.14.237",
    "13.235.122.149",
    "18.211.135.69",
    "35.154.171.200",
    "52.15.183.38",
    "54.187.174.169",
    "54.187.205.235",
    "54.187.216.72",
    "54.241.31.99",
    "54.241.31.102",
    "54.241.34.107",
];

pub const DEFAULT_GRACE_PERIOD_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    fn from_env() -> Self {
        match env::var("ENVIRONMENT").ok().as_deref() {
            Some("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set")]
    MissingDatabaseUrl,
    #[error("{0} must be set in production; refusing to start with an insecure default")]
    MissingSecret(&'static str),
}

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
    pub allowed_webhook_ips: Vec<String>,
    pub prices: PriceTable,
}

/// Price ids for each paid tier and billing interval, mirroring the Stripe
/// dashboard products.
#[derive(Debug, Clone)]
pub struct PriceTable {
    pub starter_monthly: String,
    pub starter_yearly: String,
    pub growth_monthly: String,
    pub growth_yearly: String,
    pub pro_monthly: String,
    pub pro_yearly: String,
}

impl PriceTable {
    pub fn lookup(&self, tier: SubscriptionTier, interval: BillingInterval) -> Option<&str> {
        let price = match (tier, interval) {
            (SubscriptionTier::Starter, BillingInterval::Monthly) => &self.starter_monthly,
            (SubscriptionTier::Starter, BillingInterval::Yearly) => &self.starter_yearly,
            (SubscriptionTier::Growth, BillingInterval::Monthly) => &self.growth_monthly,
            (SubscriptionTier::Growth, BillingInterval::Yearly) => &self.growth_yearly,
            (SubscriptionTier::Pro, BillingInterval::Monthly) => &self.pro_monthly,
            (SubscriptionTier::Pro, BillingInterval::Yearly) => &self.pro_yearly,
            (SubscriptionTier::Free, _) => return None,
        };
        Some(price.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub database_url: String,
    pub frontend_origin: String,
    pub csrf_secret_key: String,
    pub cleanup_api_token: String,
    pub grace_period_days: i64,
    pub cookie_secure: bool,
    pub stripe: StripeSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let environment = Environment::from_env();

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;
        let frontend_origin =
            env::var("FRONTEND_ORIGIN").unwrap_or_else(|_| "http://localhost:3001".to_string());

        let csrf_secret_key = required_secret("CSRF_SECRET_KEY", environment)?;
        let cleanup_api_token = required_secret("CLEANUP_API_TOKEN", environment)?;
        let stripe_secret_key = required_secret("STRIPE_SECRET_KEY", environment)?;
        let stripe_webhook_secret = required_secret("STRIPE_WEBHOOK_SECRET", environment)?;

        let grace_period_days = env::var("GRACE_PERIOD_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_GRACE_PERIOD_DAYS);

        let cookie_secure = env::var("COOKIE_SECURE")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or_else(|| environment.is_production());

        let allowed_webhook_ips = env::var("STRIPE_WEBHOOK_ALLOWED_IPS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| {
                STRIPE_WEBHOOK_EGRESS_IPS
                    .iter()
                    .map(|ip| ip.to_string())
                    .collect()
            });

        Ok(Config {
            environment,
            database_url,
            frontend_origin,
            csrf_secret_key,
            cleanup_api_token,
            grace_period_days,
            cookie_secure,
            stripe: StripeSettings {
                secret_key: stripe_secret_key,
                webhook_secret: stripe_webhook_secret,
                allowed_webhook_ips,
                prices: price_table_from_env(environment)?,
            },
        })
    }
}

fn required_secret(name: &'static str, environment: Environment) -> Result<String, ConfigError> {
    secret_or_fallback(env::var(name).ok(), name, environment)
}

/// Missing secrets are fatal in production. In development a placeholder is
/// substituted so the service can run locally, logged loudly as insecure.
fn secret_or_fallback(
    value: Option<String>,
    name: &'static str,
    environment: Environment,
) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ if environment.is_production() => Err(ConfigError::MissingSecret(name)),
        _ => {
            warn!(
                secret = name,
                "secret not set; using an INSECURE development fallback"
            );
            Ok(format!("dev-insecure-{}", name.to_lowercase()))
        }
    }
}

fn price_table_from_env(environment: Environment) -> Result<PriceTable, ConfigError> {
    Ok(PriceTable {
        starter_monthly: price_id("STRIPE_STARTER_MONTHLY_PRICE_ID", environment)?,
        starter_yearly: price_id("STRIPE_STARTER_YEARLY_PRICE_ID", environment)?,
        growth_monthly: price_id("STRIPE_GROWTH_MONTHLY_PRICE_ID", environment)?,
        growth_yearly: price_id("STRIPE_GROWTH_YEARLY_PRICE_ID", environment)?,
        pro_monthly: price_id("STRIPE_PRO_MONTHLY_PRICE_ID", environment)?,
        pro_yearly: price_id("STRIPE_PRO_YEARLY_PRICE_ID", environment)?,
    })
}

fn price_id(name: &'static str, environment: Environment) -> Result<String, ConfigError> {
    secret_or_fallback(env::var(name).ok(), name, environment)
}

#[cfg(test)]
impl Config {
    /// A fully populated development config for unit tests; no env reads.
    pub fn for_tests() -> Self {
        Config {
            environment: Environment::Development,
            database_url: String::new(),
            frontend_origin: "https://app.example.com".into(),
            csrf_secret_key: "0123456789abcdef0123456789abcdef".into(),
            cleanup_api_token: "test-cleanup-token".into(),
            grace_period_days: DEFAULT_GRACE_PERIOD_DAYS,
            cookie_secure: true,
            stripe: StripeSettings {
                secret_key: "sk_test_stub".into(),
                webhook_secret: "whsec_test_stub".into(),
                allowed_webhook_ips: STRIPE_WEBHOOK_EGRESS_IPS
                    .iter()
                    .map(|ip| ip.to_string())
                    .collect(),
                prices: PriceTable {
                    starter_monthly: "price_starter_m".into(),
                    starter_yearly: "price_starter_y".into(),
                    growth_monthly: "price_growth_m".into(),
                    growth_yearly: "price_growth_y".into(),
                    pro_monthly: "price_pro_m".into(),
                    pro_yearly: "price_pro_y".into(),
                },
            },
        }
    }

    pub fn for_tests_production() -> Self {
        Config {
            environment: Environment::Production,
            ..Self::for_tests()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_secret_is_fatal_in_production() {
        let result = secret_or_fallback(None, "CSRF_SECRET_KEY", Environment::Production);
        assert!(matches!(result, Err(ConfigError::MissingSecret(_))));

        let empty = secret_or_fallback(
            Some("  ".into()),
            "CSRF_SECRET_KEY",
            Environment::Production,
        );
        assert!(matches!(empty, Err(ConfigError::MissingSecret(_))));
    }

    #[test]
    fn missing_secret_falls_back_in_development() {
        let value = secret_or_fallback(None, "CSRF_SECRET_KEY", Environment::Development)
            .expect("development fallback");
        assert_eq!(value, "dev-insecure-csrf_secret_key");
    }

    #[test]
    fn provided_secret_wins_in_any_environment() {
        let value = secret_or_fallback(
            Some("real-secret".into()),
            "CLEANUP_API_TOKEN",
            Environment::Production,
        )
        .expect("explicit value");
        assert_eq!(value, "real-secret");
    }

    #[test]
    fn price_table_has_no_free_tier_entry() {
        let config = Config::for_tests();
        assert!(config
            .stripe
            .prices
            .lookup(SubscriptionTier::Free, BillingInterval::Monthly)
            .is_none());
        assert_eq!(
            config
                .stripe
                .prices
                .lookup(SubscriptionTier::Growth, BillingInterval::Yearly),
            Some("price_growth_y")
        );
    }
}
