//! Authentication middleware. The credential provider itself is external;
//! a session is a bearer token (or cookie) carrying the user id, resolved
//! against the app database.
//!
//! Three access levels: public routes run with whatever `AuthUser` was
//! attached, authenticated routes require one, owner-only routes also check
//! app ownership via the `agent_id`/`id` path parameter.

use std::collections::HashMap;

use axum::{
    extract::{Path, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use db::models::user::User;
use services::services::app_service::AppService;
use uuid::Uuid;

use crate::{error::ApiError, middleware::csrf::cookie_value};

const SESSION_COOKIE: &str = "vibesdk-session";

#[derive(Clone)]
pub struct AuthState {
    pub app_service: AppService,
}

#[derive(Clone)]
pub struct AuthUser(pub Option<User>);

pub async fn attach_auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let session_id = bearer_token(&request).or_else(|| cookie_value(&request, SESSION_COOKIE));
    let user = match session_id.and_then(|raw| Uuid::parse_str(&raw).ok()) {
        Some(user_id) => match state.app_service.get_user(user_id).await {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!("User lookup failed: {err}");
                None
            }
        },
        None => None,
    };
    request.extensions_mut().insert(AuthUser(user));
    next.run(request).await
}

pub async fn require_auth_middleware(request: Request, next: Next) -> Response {
    let authenticated = request
        .extensions()
        .get::<AuthUser>()
        .is_some_and(|user| user.0.is_some());
    if !authenticated {
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

/// Owner-only access: the `agent_id` (or `id`) path parameter names an app;
/// apps with an owner are only reachable by that owner. Ownerless apps stay
/// open — anonymous sessions have nothing to match against.
pub async fn require_owner_middleware(
    State(state): State<AuthState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let app_id = params
        .get("agent_id")
        .or_else(|| params.get("id"))
        .and_then(|raw| Uuid::parse_str(raw).ok());
    let Some(app_id) = app_id else {
        return ApiError::BadRequest("Missing agent id".to_string()).into_response();
    };

    let app = match state.app_service.get_app(app_id).await {
        Ok(app) => app,
        Err(err) => return ApiError::from(err).into_response(),
    };
    let Some(app) = app else {
        return ApiError::NotFound("App not found".to_string()).into_response();
    };

    if let Some(owner_id) = app.user_id {
        let user_id = request
            .extensions()
            .get::<AuthUser>()
            .and_then(|user| user.0.as_ref())
            .map(|user| user.id);
        if user_id != Some(owner_id) {
            return ApiError::Forbidden("You do not own this app".to_string()).into_response();
        }
    }
    next.run(request).await
}

fn bearer_token(request: &Request) -> Option<String> {
    let raw = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ").map(str::to_string)
}
