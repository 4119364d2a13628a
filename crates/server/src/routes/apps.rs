use axum::{
    Extension, Router,
    extract::State,
    middleware::{from_fn, from_fn_with_state},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::app::App;
use deployment::Deployment;
use utils::response::ApiResponse;

use crate::{
    DeploymentImpl,
    error::ApiError,
    middleware::{AuthUser, load_app_middleware, require_auth_middleware},
};

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let app_detail = Router::new()
        .route("/apps/{id}", get(get_app))
        .layer(from_fn_with_state(
            deployment.clone(),
            load_app_middleware::<DeploymentImpl>,
        ));

    Router::new()
        .route("/apps", get(list_apps))
        .merge(app_detail)
        .layer(from_fn(require_auth_middleware))
}

pub async fn list_apps(
    State(deployment): State<DeploymentImpl>,
    Extension(user): Extension<AuthUser>,
) -> Result<ResponseJson<ApiResponse<Vec<App>>>, ApiError> {
    let user = user.0.ok_or(ApiError::Unauthorized)?;
    let apps = deployment.app_service().list_apps_for_user(user.id).await?;
    Ok(ResponseJson(ApiResponse::success(apps)))
}

pub async fn get_app(
    Extension(app): Extension<App>,
) -> Result<ResponseJson<ApiResponse<App>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(app)))
}
