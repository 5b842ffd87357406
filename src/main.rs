mod config;
mod db;
mod enforcement;
mod models;
mod responses;
mod routes;
mod services;
mod state;
pub mod utils;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::http::Method;
use axum::{
    http::HeaderName,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use config::Config;
use db::postgres_subscription_store::PostgresSubscriptionStore;
use responses::JsonResponse;
use routes::cleanup::{manual_cleanup, trigger_cleanup};
use routes::subscription::{
    get_subscription_status, reactivate_subscription, update_subscription,
};
use routes::webhooks::stripe_webhook;
use services::billing::{BillingService, LiveStripeService};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use utils::csrf::{get_csrf_token, validate_csrf, CsrfTokenCodec};

use crate::db::subscription_store::SubscriptionStore;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration error");
            std::process::exit(1);
        }
    };

    let rate_limit_ms: u64 = std::env::var("RATE_LIMITER_MILLISECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        // Default: 200ms/token (~5 req/sec)
        .unwrap_or(200);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(20);
    let global_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(rate_limit_ms)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .unwrap(),
    );

    // Stripe retries webhooks aggressively on failure; give the webhook and
    // cleanup endpoints more headroom than interactive traffic.
    let webhook_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(1)
            .burst_size(30)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .unwrap(),
    );

    // Background task to cleanup old rate-limiter IPs
    let governor_limiter = global_governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = std::time::Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let pg_pool = establish_connection(&config.database_url).await;
    let store = Arc::new(PostgresSubscriptionStore {
        pool: pg_pool.clone(),
    }) as Arc<dyn SubscriptionStore>;

    let billing =
        Arc::new(LiveStripeService::from_settings(&config.stripe)) as Arc<dyn BillingService>;
    let csrf = CsrfTokenCodec::new(config.csrf_secret_key.clone());

    let state = AppState {
        store,
        billing,
        csrf,
        config: Arc::new(config.clone()),
    };

    let cors = CorsLayer::new()
        .allow_origin(config.frontend_origin.parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .allow_credentials(true);

    let csrf_layer = ServiceBuilder::new().layer(axum::middleware::from_fn_with_state(
        state.clone(),
        validate_csrf,
    ));

    // Mutating subscription management needs the double-submit token pair.
    let csrf_protected_routes = Router::new()
        .route("/subscription/update", post(update_subscription))
        .route("/subscription/reactivate", post(reactivate_subscription))
        .layer(csrf_layer);

    // Safe reads, token issuance, and the provider-authenticated surfaces.
    let unprotected_routes = Router::new()
        .route("/auth/csrf-token", get(get_csrf_token))
        .route("/subscription/status", get(get_subscription_status))
        .route("/webhooks/stripe", post(stripe_webhook))
        .route(
            "/cleanup-expired-subscriptions",
            post(trigger_cleanup).get(manual_cleanup),
        )
        .layer(GovernorLayer {
            config: webhook_governor_conf,
        });

    let api_routes = csrf_protected_routes.merge(unprotected_routes);

    let app = Router::new()
        .route("/", get(root))
        .nest("/api", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: global_governor_conf,
        })
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));

    let listener = TcpListener::bind(addr).await.unwrap();
    println!("Running at http://{}", addr);
    axum::serve(listener, make_service).await.unwrap();
}

/// A simple root route.
async fn root() -> Response {
    JsonResponse::success("Menucard billing service").into_response()
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> PgPool {
    let pool = PgPool::connect(database_url)
        .await
        .expect("Failed to connect to the database");

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .expect("Failed to verify database connection");

    info!("Successfully connected to the database");
    pool
}
