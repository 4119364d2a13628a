//! Global API rate limiting, keyed by the authenticated user when present
//! and the client address otherwise.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use services::services::rate_limit::{RateLimitConfig, RateLimitService};

use crate::{error::ApiError, middleware::auth::AuthUser};

#[derive(Clone)]
pub struct RateLimitState {
    pub service: Arc<RateLimitService>,
    pub limit: u32,
    pub period_secs: i64,
    pub burst: Option<u32>,
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let key = request
        .extensions()
        .get::<AuthUser>()
        .and_then(|user| user.0.as_ref())
        .map(|user| format!("user:{}", user.id))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| format!("ip:{}", info.0.ip()))
        })
        .unwrap_or_else(|| "anonymous".to_string());

    let mut config = RateLimitConfig::new(state.limit, state.period_secs);
    if let Some(burst) = state.burst {
        config = config.with_burst(burst);
    }

    let result = state.service.increment(&key, &config).await;
    if !result.success {
        let mut response = ApiError::RateLimited.into_response();
        response
            .headers_mut()
            .insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        return response;
    }

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&result.remaining_limit.to_string()) {
        response.headers_mut().insert("X-RateLimit-Remaining", value);
    }
    response
}
