use axum::{
    Router,
    http::{HeaderName, Method, StatusCode, header},
    middleware::from_fn_with_state,
    routing::get,
};
use deployment::Deployment;
use services::services::config::Config;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{
    DeploymentImpl,
    middleware::{
        AuthState, CsrfState, RateLimitState, SecureHeadersState, attach_auth_middleware,
        csrf_middleware, rate_limit_middleware, secure_headers_middleware,
    },
    routes,
};

const DEV_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:5173",
    "http://127.0.0.1:5173",
];

pub async fn router(deployment: DeploymentImpl) -> Router {
    let config = deployment.config().read().await.clone();

    let auth_state = AuthState {
        app_service: deployment.app_service().clone(),
    };
    let csrf_state = CsrfState::new(config.csrf_secret.clone());
    let rate_limit_state = RateLimitState {
        service: deployment.rate_limiter().clone(),
        limit: config.api_rate_limit.limit,
        period_secs: config.api_rate_limit.period_secs as i64,
        burst: config.api_rate_limit.burst,
    };
    let secure_headers_state = SecureHeadersState {
        development: config.is_development(),
    };

    // Middleware chain outer → inner: secure headers → CORS → CSRF →
    // rate limit → auth. Layers added later wrap the ones added earlier.
    let api_routes = Router::new()
        .merge(routes::agents::router(&deployment))
        .merge(routes::apps::router(&deployment))
        .layer(from_fn_with_state(auth_state, attach_auth_middleware))
        .layer(from_fn_with_state(rate_limit_state, rate_limit_middleware))
        .layer(from_fn_with_state(csrf_state, csrf_middleware));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api_routes)
        .fallback(not_found)
        .layer(cors_layer(&config))
        .layer(from_fn_with_state(
            secure_headers_state,
            secure_headers_middleware,
        ))
        .with_state(deployment)
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

fn cors_layer(config: &Config) -> CorsLayer {
    let custom_domain = config.custom_domain.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let Ok(origin) = origin.to_str() else {
                return false;
            };
            if let Some(domain) = &custom_domain {
                let suffix = format!("://{domain}");
                if origin.ends_with(&suffix) || origin.ends_with(&format!(".{domain}")) {
                    return true;
                }
            }
            DEV_ORIGINS.contains(&origin)
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-csrf-token"),
        ])
        .allow_credentials(true)
        .expose_headers([
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-ratelimit-remaining"),
        ])
}
