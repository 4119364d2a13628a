//! The deployment trait: the capability surface the HTTP layer programs
//! against. One concrete implementation (`local-deployment`) wires the
//! local sandbox backend; the seam keeps routes testable and the module
//! graph acyclic.

use std::sync::Arc;

use agent::manager::AgentManager;
use async_trait::async_trait;
use db::DBService;
use operations::client::InferenceClient;
use services::services::{
    app_service::AppService, config::Config, github::GitHubService,
    rate_limit::RateLimitService, sandbox::SandboxService, screenshot::ScreenshotService,
};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Database(#[from] db::DbErr),
    #[error(transparent)]
    Config(#[from] services::services::config::ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait Deployment: Clone + Send + Sync + 'static {
    async fn new() -> Result<Self, DeploymentError>
    where
        Self: Sized;

    fn config(&self) -> &Arc<RwLock<Config>>;
    fn db(&self) -> &DBService;
    fn app_service(&self) -> &AppService;
    fn agents(&self) -> &AgentManager;
    fn sandbox(&self) -> &Arc<dyn SandboxService>;
    fn github(&self) -> &GitHubService;
    fn screenshot(&self) -> &ScreenshotService;
    fn inference(&self) -> &InferenceClient;
    fn rate_limiter(&self) -> &Arc<RateLimitService>;
}
