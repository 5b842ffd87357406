use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::responses::JsonResponse;
use crate::state::AppState;

/// POST /api/cleanup-expired-subscriptions. Meant for schedulers; requires
/// the bearer token from configuration.
pub async fn trigger_cleanup(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|header| {
            let expected = format!("Bearer {}", state.config.cleanup_api_token);
            header.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 1
        })
        .unwrap_or(false);

    if !authorized {
        return JsonResponse::unauthorized("Unauthorized").into_response();
    }

    run_cleanup(&state).await
}

/// GET variant of the sweep without bearer auth, kept for manual operator
/// invocation from a browser.
pub async fn manual_cleanup(State(state): State<AppState>) -> Response {
    run_cleanup(&state).await
}

async fn run_cleanup(state: &AppState) -> Response {
    let engine = state.enforcement();
    match engine.cleanup_all_expired().await {
        Ok(cleaned) => {
            info!(cleaned, "expired subscription sweep finished");
            let timestamp = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default();
            Json(serde_json::json!({
                "success": true,
                "cleanedCount": cleaned,
                "timestamp": timestamp,
            }))
            .into_response()
        }
        Err(err) => {
            error!(error = %err, "expired subscription sweep failed");
            JsonResponse::server_error("Cleanup failed").into_response()
        }
    }
}
