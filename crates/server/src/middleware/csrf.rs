//! Double-submit CSRF protection for `/api/*`.
//!
//! Safe requests that succeed get a fresh signed `csrf-token` cookie; every
//! unsafe request must echo the cookie value in `X-CSRF-Token`. Violations
//! are rejected with a 403 JSON body before any handler runs.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const CSRF_COOKIE: &str = "csrf-token";
pub const CSRF_HEADER: &str = "X-CSRF-Token";
const TOKEN_TTL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Clone)]
pub struct CsrfState {
    secret: Arc<String>,
}

impl CsrfState {
    /// Tokens from previous processes stay valid only when a stable secret
    /// is configured; otherwise a fresh one is generated per boot.
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: Arc::new(secret.unwrap_or_else(|| Uuid::new_v4().to_string())),
        }
    }

    fn sign(&self, expires_at: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b".");
        hasher.update(expires_at.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn issue_token(&self) -> String {
        let expires_at = chrono::Utc::now().timestamp() + TOKEN_TTL.as_secs() as i64;
        format!("{expires_at}.{}", self.sign(expires_at))
    }

    pub fn validate_token(&self, token: &str) -> bool {
        let Some((expires_at, signature)) = token.split_once('.') else {
            return false;
        };
        let Ok(expires_at) = expires_at.parse::<i64>() else {
            return false;
        };
        if expires_at < chrono::Utc::now().timestamp() {
            return false;
        }
        self.sign(expires_at) == signature
    }
}

pub async fn csrf_middleware(
    State(state): State<CsrfState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let safe = matches!(method, Method::GET | Method::HEAD | Method::OPTIONS);

    if !safe {
        let cookie_token = cookie_value(&request, CSRF_COOKIE);
        let header_token = request
            .headers()
            .get(CSRF_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let valid = match (&cookie_token, &header_token) {
            (Some(cookie), Some(header)) => cookie == header && state.validate_token(cookie),
            _ => false,
        };
        if !valid {
            tracing::warn!(%method, path, "CSRF validation failed");
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({
                    "error": "CSRF token missing or invalid",
                    "code": "CSRF_VIOLATION",
                })),
            )
                .into_response();
        }
    }

    let mut response = next.run(request).await;

    // Successful safe responses under /api refresh the token cookie. Auth
    // transitions rotate it the same way since sign-in flows are GETs to
    // /api/auth/* followed by a redirect.
    if safe && path.starts_with("/api") && response.status().as_u16() < 400 {
        let cookie = format!(
            "{CSRF_COOKIE}={}; Path=/; SameSite=Strict; Max-Age={}",
            state.issue_token(),
            TOKEN_TTL.as_secs()
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

pub(crate) fn cookie_value(request: &Request, name: &str) -> Option<String> {
    let raw = request.headers().get(header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let (key, value) = pair.trim().split_once('=')?;
        if key == name {
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, middleware::from_fn_with_state, routing::{get, post}};
    use tower::ServiceExt;

    use super::*;

    fn app() -> (Router, CsrfState) {
        let state = CsrfState::new(Some("test-secret".to_string()));
        let router = Router::new()
            .route("/api/anything", post(|| async { "ok" }))
            .route("/api/anything", get(|| async { "ok" }))
            .layer(from_fn_with_state(state.clone(), csrf_middleware));
        (router, state)
    }

    #[tokio::test]
    async fn post_without_token_is_rejected_with_csrf_violation() {
        let (app, _) = app();
        let response = app
            .oneshot(
                axum::http::Request::post("/api/anything")
                    .header("Origin", "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "CSRF_VIOLATION");
    }

    #[tokio::test]
    async fn get_issues_a_fresh_cookie_and_double_submit_passes() {
        let (app, state) = app();
        let response = app
            .clone()
            .oneshot(
                axum::http::Request::get("/api/anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(set_cookie.starts_with("csrf-token="));
        let token = set_cookie
            .trim_start_matches("csrf-token=")
            .split(';')
            .next()
            .unwrap()
            .to_string();
        assert!(state.validate_token(&token));

        let response = app
            .oneshot(
                axum::http::Request::post("/api/anything")
                    .header(header::COOKIE, format!("csrf-token={token}"))
                    .header(CSRF_HEADER, token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn expired_and_tampered_tokens_fail_validation() {
        let state = CsrfState::new(Some("secret".to_string()));
        let token = state.issue_token();
        assert!(state.validate_token(&token));
        assert!(!state.validate_token(&format!("{token}x")));
        let expired = {
            let past = chrono::Utc::now().timestamp() - 10;
            format!("{past}.{}", "0".repeat(64))
        };
        assert!(!state.validate_token(&expired));
    }
}
