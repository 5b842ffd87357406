use axum::http::HeaderMap;

/// Best-effort client address from proxy headers. The first entry of
/// x-forwarded-for is the original client when the service sits behind a
/// trusted proxy; x-real-ip is the fallback.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// True when the request's resolved client IP appears in the allow-list.
/// Requests with no resolvable IP are rejected.
pub fn is_allowed_source(headers: &HeaderMap, allowed: &[String]) -> bool {
    match client_ip(headers) {
        Some(ip) => allowed.iter().any(|a| a == &ip),
        None => false,
    }
}
