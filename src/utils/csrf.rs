use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::Cookie;
use base64::{prelude::BASE64_URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand_core::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::responses::JsonResponse;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Tokens live for 24 hours from issuance.
pub const TOKEN_TTL_MS: i64 = 24 * 60 * 60 * 1000;
/// Clients should refresh a token with less than an hour left.
const REFRESH_WINDOW_MS: i64 = 60 * 60 * 1000;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_COOKIE: &str = "csrf_token";

pub const CODE_TOKEN_MISSING: &str = "CSRF_TOKEN_MISSING";
pub const CODE_TOKEN_INVALID: &str = "CSRF_TOKEN_INVALID";

/// Stateless signed-token codec: `random.expiry_ms.signature` where the
/// signature is an HMAC-SHA256 over the first two segments. Nothing is stored
/// server-side; validity is signature + expiry alone.
#[derive(Clone)]
pub struct CsrfTokenCodec {
    secret: Arc<Vec<u8>>,
}

impl CsrfTokenCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::new(secret.as_ref().to_vec()),
        }
    }

    pub fn generate(&self) -> String {
        self.generate_at(now_ms())
    }

    fn generate_at(&self, now_ms: i64) -> String {
        let mut bytes = [0u8; 32]; // 256-bit random part
        rand_core::OsRng.fill_bytes(&mut bytes);
        let random = BASE64_URL_SAFE_NO_PAD.encode(bytes);
        let expires_at = now_ms + TOKEN_TTL_MS;
        let data = format!("{random}.{expires_at}");
        let signature = self.sign(&data);
        format!("{data}.{signature}")
    }

    /// Fails closed: any parse error, bad signature, or past expiry is `false`.
    pub fn validate(&self, token: &str) -> bool {
        self.validate_at(token, now_ms())
    }

    fn validate_at(&self, token: &str, now_ms: i64) -> bool {
        let mut parts = token.split('.');
        let (Some(random), Some(expiry), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        let expected = self.sign(&format!("{random}.{expiry}"));
        if expected.as_bytes().ct_eq(signature.as_bytes()).unwrap_u8() != 1 {
            return false;
        }

        match expiry.parse::<i64>() {
            Ok(expires_at) => now_ms < expires_at,
            Err(_) => false,
        }
    }

    /// True when the remaining lifetime is under an hour, or the token cannot
    /// be parsed at all (either way the client should fetch a fresh one).
    pub fn is_expiring_soon(&self, token: &str) -> bool {
        self.is_expiring_soon_at(token, now_ms())
    }

    fn is_expiring_soon_at(&self, token: &str, now_ms: i64) -> bool {
        match token_expiry(token) {
            Some(expires_at) => expires_at - now_ms < REFRESH_WINDOW_MS,
            None => true,
        }
    }

    fn sign(&self, data: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC-SHA256 accepts keys of any length");
        mac.update(data.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

pub fn token_expiry(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let (Some(_), Some(expiry), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    expiry.parse::<i64>().ok()
}

fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Double-submit-cookie guard for mutating routes. GET/HEAD/OPTIONS pass
/// through untouched; everything else needs a header token byte-equal to the
/// cookie token, and the pair must validate against the codec.
pub async fn validate_csrf(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if matches!(
        req.method(),
        &Method::GET | &Method::HEAD | &Method::OPTIONS
    ) {
        return next.run(req).await;
    }

    let headers = req.headers();
    let header_token = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());

    let cookie_header = headers
        .get_all("cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    let cookie_token = extract_csrf_from_cookie(&cookie_header);

    let (header_token, cookie_token) = match (header_token, cookie_token.as_deref()) {
        (Some(h), Some(c)) => (h, c),
        _ => {
            warn!(path = %req.uri().path(), "mutating request without CSRF token pair");
            return JsonResponse::forbidden_with_code(
                "Missing CSRF token",
                CODE_TOKEN_MISSING,
            )
            .into_response();
        }
    };

    if header_token.as_bytes().ct_eq(cookie_token.as_bytes()).unwrap_u8() != 1
        || !state.csrf.validate(header_token)
    {
        warn!(path = %req.uri().path(), "rejected request with invalid CSRF token");
        return JsonResponse::forbidden_with_code("Invalid CSRF token", CODE_TOKEN_INVALID)
            .into_response();
    }

    next.run(req).await
}

fn extract_csrf_from_cookie(cookie_str: &str) -> Option<String> {
    for cookie in cookie_str.split(';') {
        if let Ok(parsed) = Cookie::parse_encoded(cookie.trim()) {
            if parsed.name() == CSRF_COOKIE {
                return Some(parsed.value().to_string());
            }
        }
    }
    None
}

/// GET /api/auth/csrf-token: mints a token, returns it in the body and as an
/// HttpOnly cookie. The body copy is what the client echoes back in the
/// x-csrf-token header, since script cannot read the cookie.
pub async fn get_csrf_token(State(state): State<AppState>) -> Response {
    let token = state.csrf.generate();
    let expires_at = match token_expiry(&token) {
        Some(ms) => ms,
        None => {
            return JsonResponse::server_error("Failed to generate CSRF token").into_response()
        }
    };

    let secure = if state.config.cookie_secure {
        "; Secure"
    } else {
        ""
    };
    let set_cookie_value = format!(
        "{CSRF_COOKIE}={token}; Path=/; SameSite=Strict; HttpOnly; Max-Age={}{secure}",
        TOKEN_TTL_MS / 1000
    );
    let cookie = match HeaderValue::from_str(&set_cookie_value) {
        Ok(v) => v,
        Err(err) => {
            warn!(?err, "generated CSRF cookie was not a valid header value");
            return JsonResponse::server_error("Failed to generate CSRF token").into_response();
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);

    (
        StatusCode::OK,
        headers,
        Json(serde_json::json!({ "token": token, "expiresAt": expires_at })),
    )
        .into_response()
}
