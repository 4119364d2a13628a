use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::{DbErr, models::app::AppError};
use services::services::{
    app_service::AppServiceError, config::ConfigError, deployment_manager::DeploymentManagerError,
    github::GitHubServiceError, sandbox::SandboxError, screenshot::ScreenshotError,
    workspace::WorkspaceError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    App(#[from] AppError),
    #[error(transparent)]
    AppService(#[from] AppServiceError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    DeploymentManager(#[from] DeploymentManagerError),
    #[error(transparent)]
    GitHub(#[from] GitHubServiceError),
    #[error(transparent)]
    Screenshot(#[from] ScreenshotError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::App(err) => match err {
                AppError::AppNotFound => (StatusCode::NOT_FOUND, "AppError"),
                AppError::InvalidProjectName(_) => (StatusCode::BAD_REQUEST, "AppError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "AppError"),
            },
            ApiError::AppService(err) => match err {
                AppServiceError::App(AppError::AppNotFound) => {
                    (StatusCode::NOT_FOUND, "AppServiceError")
                }
                AppServiceError::App(AppError::InvalidProjectName(_)) => {
                    (StatusCode::BAD_REQUEST, "AppServiceError")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "AppServiceError"),
            },
            ApiError::Workspace(_) => (StatusCode::INTERNAL_SERVER_ERROR, "WorkspaceError"),
            ApiError::Sandbox(err) => match err {
                SandboxError::PathTraversal(_) => (StatusCode::BAD_REQUEST, "SandboxError"),
                SandboxError::InstanceNotFound(_) | SandboxError::ProcessNotFound(_) => {
                    (StatusCode::NOT_FOUND, "SandboxError")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "SandboxError"),
            },
            ApiError::DeploymentManager(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "DeploymentManagerError")
            }
            ApiError::GitHub(err) => match err {
                GitHubServiceError::InvalidRepoUrl(_) => {
                    (StatusCode::BAD_REQUEST, "GitHubServiceError")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "GitHubServiceError"),
            },
            ApiError::Screenshot(err) => match err {
                ScreenshotError::NotConfigured => {
                    (StatusCode::SERVICE_UNAVAILABLE, "ScreenshotError")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "ScreenshotError"),
            },
            ApiError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ConfigError"),
            ApiError::Database(err) => match err {
                DbErr::RecordNotFound(_) => (StatusCode::NOT_FOUND, "DatabaseError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            },
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "ForbiddenError"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "RateLimitError"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
            ApiError::Other(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        let error_message = match &self {
            ApiError::Unauthorized => "Unauthorized. Please sign in again.".to_string(),
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) | ApiError::Internal(msg) => {
                msg.clone()
            }
            ApiError::Forbidden(msg) => msg.clone(),
            ApiError::RateLimited => "Rate limit exceeded. Try again shortly.".to_string(),
            _ => format!("{}: {}", error_type, self),
        };

        if status_code.is_server_error() {
            tracing::error!(
                status = %status_code,
                error_type,
                error = %self,
                "API request failed"
            );
        }
        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_maps_to_expected_http_statuses() {
        assert_eq!(
            ApiError::BadRequest("bad".to_string())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::NotFound("missing".to_string())
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::RateLimited.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from(AppError::AppNotFound).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
