use std::sync::Arc;

use agent::{core::AgentDeps, manager::AgentManager};
use async_trait::async_trait;
use db::DBService;
use deployment::{Deployment, DeploymentError};
use operations::client::InferenceClient;
use services::services::{
    app_service::AppService,
    config::{Config, load_config_from_file, save_config_to_file},
    github::GitHubService,
    rate_limit::RateLimitService,
    sandbox::SandboxService,
    screenshot::ScreenshotService,
};
use tokio::sync::RwLock;
use utils::assets::config_path;

use crate::sandbox::LocalSandboxService;

pub mod sandbox;

#[derive(Clone)]
pub struct LocalDeployment {
    config: Arc<RwLock<Config>>,
    db: DBService,
    app_service: AppService,
    agents: AgentManager,
    sandbox: Arc<dyn SandboxService>,
    github: GitHubService,
    screenshot: ScreenshotService,
    inference: InferenceClient,
    rate_limiter: Arc<RateLimitService>,
}

#[async_trait]
impl Deployment for LocalDeployment {
    async fn new() -> Result<Self, DeploymentError> {
        let mut raw_config = load_config_from_file(&config_path()).await;
        raw_config.apply_env_overrides();
        // Persist migrated defaults so the next start sees a complete file.
        save_config_to_file(&raw_config, &config_path()).await?;

        let inference = InferenceClient::new(&raw_config.inference);
        let github = GitHubService::new(&raw_config.github_api_base);
        let screenshot_api_url = raw_config.screenshot_api_url.clone();
        let config = Arc::new(RwLock::new(raw_config));

        let db = DBService::new().await?;
        let app_service = AppService::new(db.clone());
        let sandbox: Arc<dyn SandboxService> = Arc::new(LocalSandboxService::new());
        let screenshot = ScreenshotService::new(screenshot_api_url, app_service.clone());
        let rate_limiter = Arc::new(RateLimitService::new());

        let agents = AgentManager::new(AgentDeps {
            app_service: app_service.clone(),
            inference: inference.clone(),
            sandbox: sandbox.clone(),
            github: github.clone(),
            screenshot: screenshot.clone(),
            config: config.clone(),
            template_override: None,
        });

        Ok(Self {
            config,
            db,
            app_service,
            agents,
            sandbox,
            github,
            screenshot,
            inference,
            rate_limiter,
        })
    }

    fn config(&self) -> &Arc<RwLock<Config>> {
        &self.config
    }

    fn db(&self) -> &DBService {
        &self.db
    }

    fn app_service(&self) -> &AppService {
        &self.app_service
    }

    fn agents(&self) -> &AgentManager {
        &self.agents
    }

    fn sandbox(&self) -> &Arc<dyn SandboxService> {
        &self.sandbox
    }

    fn github(&self) -> &GitHubService {
        &self.github
    }

    fn screenshot(&self) -> &ScreenshotService {
        &self.screenshot
    }

    fn inference(&self) -> &InferenceClient {
        &self.inference
    }

    fn rate_limiter(&self) -> &Arc<RateLimitService> {
        &self.rate_limiter
    }
}
