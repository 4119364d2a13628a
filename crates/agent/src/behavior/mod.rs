//! Agent behaviors. The build loop is the behavior variant's `build`; both
//! variants drive the same narrow infrastructure surface, so the agent ↔
//! behavior dependency stays one-directional.

use async_trait::async_trait;
use operations::{
    client::{InferenceClient, InferenceError},
    context::InferenceContext,
    operations::IssueSnapshot,
};
use services::services::{
    deployment_manager::{DeploymentManager, DeploymentManagerError},
    file_manager::FileManager,
    workspace::WorkspaceError,
};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    core::UserImage,
    state::{AgentState, BehaviorKind},
    ws::WsHub,
};

pub mod agentic;
pub mod phasic;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Deployment(#[from] DeploymentManagerError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The capability surface behaviors are allowed to touch. Keeping it narrow
/// breaks the agent ↔ behavior cycle and lets tests drive the loop against
/// a bench harness.
#[async_trait]
pub trait AgentInfra: Send + Sync {
    fn state(&self) -> &RwLock<AgentState>;
    fn ws(&self) -> &WsHub;
    fn inference(&self) -> &InferenceClient;
    /// Acquire-or-reuse the build-wide abort handle.
    fn inference_ctx(&self) -> InferenceContext;
    fn file_manager(&self) -> &FileManager;
    async fn deployment(&self) -> anyhow::Result<DeploymentManager>;
    async fn current_issues(&self) -> IssueSnapshot;
    async fn execute_commands(
        &self,
        commands: &[String],
        with_retries: bool,
    ) -> anyhow::Result<()>;
    async fn deterministic_code_fixes(&self) -> anyhow::Result<()>;
    async fn fast_smart_fixes(&self) -> anyhow::Result<()>;
    async fn fast_fixes_enabled(&self) -> bool;
    fn take_pending_images(&self) -> Vec<UserImage>;
    async fn persist_state(&self) -> anyhow::Result<()>;
    async fn push_assistant_message(&self, content: &str) -> anyhow::Result<()>;
}

pub async fn build(kind: BehaviorKind, infra: &dyn AgentInfra) -> Result<(), BuildError> {
    match kind {
        BehaviorKind::Phasic => phasic::build(infra).await,
        BehaviorKind::Agentic => agentic::build(infra).await,
    }
}
