//! Security response headers. Skipped for websocket upgrades, where extra
//! headers would break the handshake.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

#[derive(Clone)]
pub struct SecureHeadersState {
    pub development: bool,
}

pub async fn secure_headers_middleware(
    State(state): State<SecureHeadersState>,
    request: Request,
    next: Next,
) -> Response {
    let is_websocket_upgrade = request
        .headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));

    let request_id = Uuid::new_v4().to_string();
    let mut response = next.run(request).await;
    if is_websocket_upgrade {
        return response;
    }

    let csp = if state.development {
        // Dev builds need eval for the bundler's HMR runtime.
        "default-src 'self'; script-src 'self' 'unsafe-inline' 'unsafe-eval'; \
         style-src 'self' 'unsafe-inline'; img-src 'self' data: blob:; \
         connect-src 'self' ws: wss: http://localhost:* http://127.0.0.1:*"
    } else {
        "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
         img-src 'self' data: blob:; connect-src 'self' wss:"
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(csp) {
        headers.insert(header::CONTENT_SECURITY_POLICY, value);
    }
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert("X-Request-ID", value);
    }
    response
}
