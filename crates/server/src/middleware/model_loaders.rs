use std::{fmt::Display, future::Future};

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use db::{DBService, models::app::App};
use deployment::Deployment;
use uuid::Uuid;

pub trait ModelLoaderDeps {
    fn db_service(&self) -> &DBService;
}

impl<D> ModelLoaderDeps for D
where
    D: Deployment,
{
    fn db_service(&self) -> &DBService {
        self.db()
    }
}

async fn fetch_model_or_status<M, E, Fut>(
    model_name: &'static str,
    model_id: Uuid,
    load_future: Fut,
) -> Result<M, StatusCode>
where
    E: Display,
    Fut: Future<Output = Result<Option<M>, E>>,
{
    match load_future.await {
        Ok(Some(model)) => Ok(model),
        Ok(None) => {
            tracing::warn!("{model_name} {model_id} not found");
            Err(StatusCode::NOT_FOUND)
        }
        Err(error) => {
            tracing::error!("Failed to fetch {model_name} {model_id}: {error}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn load_app_middleware<S>(
    State(deployment): State<S>,
    Path(app_id): Path<Uuid>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode>
where
    S: ModelLoaderDeps,
{
    let app = fetch_model_or_status(
        "App",
        app_id,
        App::find_by_id(&deployment.db_service().pool, app_id),
    )
    .await?;
    let mut request = request;
    request.extensions_mut().insert(app);
    Ok(next.run(request).await)
}
