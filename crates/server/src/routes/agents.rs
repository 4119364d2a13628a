use agent::{core::UserImage, state::AgentState, ws::WsMessageType};
use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, patch, post, put},
};
use db::models::app::App;
use deployment::Deployment;
use operations::schemas::Blueprint;
use serde::{Deserialize, Serialize};
use serde_json::json;
use services::services::github::{GithubExportRequest, GithubExportResult, RemoteStatus};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{
    DeploymentImpl,
    error::ApiError,
    middleware::{AuthState, AuthUser, require_owner_middleware},
};

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let auth_state = AuthState {
        app_service: deployment.app_service().clone(),
    };

    let agent_scoped = Router::new()
        .route("/agents/{agent_id}", get(get_agent))
        .route("/agents/{agent_id}/request", post(queue_user_request))
        .route("/agents/{agent_id}/cancel", post(cancel_generation))
        .route("/agents/{agent_id}/blueprint", patch(update_blueprint))
        .route("/agents/{agent_id}/project-name", put(update_project_name))
        .route("/agents/{agent_id}/message", post(send_message))
        .route("/agents/{agent_id}/files/regenerate", post(regenerate_file))
        .route("/agents/{agent_id}/simple-codegen", post(simple_codegen))
        .route("/agents/{agent_id}/deep-debug", post(start_deep_debug))
        .route("/agents/{agent_id}/screenshot", post(capture_screenshot))
        .route("/agents/{agent_id}/github/export", post(github_export))
        .route("/agents/{agent_id}/github/status", post(github_status))
        .route("/agents/{agent_id}/ws", get(super::ws::agent_ws))
        .layer(from_fn_with_state(auth_state, require_owner_middleware));

    Router::new()
        .route("/agents", post(create_agent))
        .merge(agent_scoped)
}

#[derive(Debug, Deserialize, TS)]
pub struct CreateAgentRequest {
    pub query: String,
}

#[derive(Debug, Serialize, TS)]
pub struct CreateAgentResponse {
    pub agent_id: Uuid,
    pub blueprint: Blueprint,
}

pub async fn create_agent(
    State(deployment): State<DeploymentImpl>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateAgentRequest>,
) -> Result<ResponseJson<ApiResponse<CreateAgentResponse>>, ApiError> {
    if payload.query.trim().is_empty() {
        return Err(ApiError::BadRequest("Query must not be empty".to_string()));
    }

    let agent_id = Uuid::new_v4();
    let agent = deployment.agents().get_or_create(agent_id).await?;
    let user_id = user.0.as_ref().map(|user| user.id);

    let hub = agent.ws_hub();
    let blueprint = agent
        .initialize(&payload.query, user_id, &|chunk| {
            hub.broadcast(
                WsMessageType::ConversationResponse,
                json!({ "conversation_id": "blueprint", "chunk": chunk }),
            );
        })
        .await?;

    // Deployment, setup prediction and the first build run in the
    // background; progress streams over the agent websocket.
    {
        let agent = agent.clone();
        tokio::spawn(async move {
            if let Err(err) = agent.initialize_async().await {
                tracing::warn!(agent_id = %agent.id(), "Agent post-init failed: {err}");
            }
            agent.generate_all_files().await;
        });
    }

    Ok(ResponseJson(ApiResponse::success(CreateAgentResponse {
        agent_id,
        blueprint,
    })))
}

#[derive(Debug, Serialize, TS)]
pub struct AgentDetails {
    pub app: Option<App>,
    pub state: AgentState,
}

pub async fn get_agent(
    State(deployment): State<DeploymentImpl>,
    Path(agent_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<AgentDetails>>, ApiError> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    let app = deployment.app_service().get_app(agent_id).await?;
    Ok(ResponseJson(ApiResponse::success(AgentDetails {
        app,
        state: agent.state_snapshot().await,
    })))
}

#[derive(Debug, Deserialize, TS)]
pub struct ImagePayload {
    pub filename: String,
    pub data_base64: String,
}

#[derive(Debug, Deserialize, TS)]
pub struct UserRequestPayload {
    pub text: String,
    #[serde(default)]
    pub images: Vec<ImagePayload>,
}

pub async fn queue_user_request(
    State(deployment): State<DeploymentImpl>,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<UserRequestPayload>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    let images = payload
        .images
        .into_iter()
        .map(|image| UserImage {
            filename: image.filename,
            data_base64: image.data_base64,
        })
        .collect();
    agent.queue_user_request(payload.text, images).await;
    agent.generate_all_files().await;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn cancel_generation(
    State(deployment): State<DeploymentImpl>,
    Path(agent_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    agent.cancel_current_inference();
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn update_blueprint(
    State(deployment): State<DeploymentImpl>,
    Path(agent_id): Path<Uuid>,
    Json(patch): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<ResponseJson<ApiResponse<Blueprint>>, ApiError> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    let blueprint = agent.update_blueprint(&patch).await?;
    Ok(ResponseJson(ApiResponse::success(blueprint)))
}

#[derive(Debug, Deserialize, TS)]
pub struct UpdateProjectNameRequest {
    pub project_name: String,
}

pub async fn update_project_name(
    State(deployment): State<DeploymentImpl>,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<UpdateProjectNameRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    agent
        .update_project_name(&payload.project_name)
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    Ok(ResponseJson(ApiResponse::success(())))
}

#[derive(Debug, Deserialize, TS)]
pub struct SendMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize, TS)]
pub struct SendMessageResponse {
    pub reply: String,
}

pub async fn send_message(
    State(deployment): State<DeploymentImpl>,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<ResponseJson<ApiResponse<SendMessageResponse>>, ApiError> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    let reply = agent
        .process_user_message(&payload.message)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(ResponseJson(ApiResponse::success(SendMessageResponse {
        reply,
    })))
}

#[derive(Debug, Deserialize, TS)]
pub struct SimpleCodegenRequest {
    pub description: String,
}

pub async fn simple_codegen(
    State(deployment): State<DeploymentImpl>,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<SimpleCodegenRequest>,
) -> Result<ResponseJson<ApiResponse<Vec<String>>>, ApiError> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    let paths = agent
        .generate_simple_code(&payload.description)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(ResponseJson(ApiResponse::success(paths)))
}

#[derive(Debug, Deserialize, TS)]
pub struct RegenerateFileRequest {
    pub file_path: String,
    #[serde(default)]
    pub retry_index: u32,
}

pub async fn regenerate_file(
    State(deployment): State<DeploymentImpl>,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<RegenerateFileRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    agent
        .regenerate_file(&payload.file_path, payload.retry_index)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(ResponseJson(ApiResponse::success(())))
}

#[derive(Debug, Serialize, TS)]
pub struct DeepDebugResponse {
    pub started: bool,
}

pub async fn start_deep_debug(
    State(deployment): State<DeploymentImpl>,
    Path(agent_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<DeepDebugResponse>>, ApiError> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    let started = agent.start_deep_debug().await;
    Ok(ResponseJson(ApiResponse::success(DeepDebugResponse {
        started,
    })))
}

pub async fn capture_screenshot(
    State(deployment): State<DeploymentImpl>,
    Path(agent_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<String>>, ApiError> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    let path = agent
        .capture_screenshot()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(ResponseJson(ApiResponse::success(path)))
}

#[derive(Debug, Deserialize, TS)]
pub struct GithubExportPayload {
    pub repo_url: String,
    pub token: String,
}

pub async fn github_export(
    State(deployment): State<DeploymentImpl>,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<GithubExportPayload>,
) -> Result<ResponseJson<ApiResponse<GithubExportResult>>, ApiError> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    let result = agent
        .export_to_github(&payload.repo_url, &payload.token)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(ResponseJson(ApiResponse::success(result)))
}

pub async fn github_status(
    State(deployment): State<DeploymentImpl>,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<GithubExportPayload>,
) -> Result<ResponseJson<ApiResponse<RemoteStatus>>, ApiError> {
    let agent = deployment.agents().get_or_create(agent_id).await?;
    let records = agent.workspace().export_git_objects().await?;
    let request = GithubExportRequest {
        repo_url: payload.repo_url,
        token: payload.token,
        default_branch: "main".to_string(),
        author_name: services::services::workspace::DEFAULT_AUTHOR_NAME.to_string(),
        author_email: services::services::workspace::DEFAULT_AUTHOR_EMAIL.to_string(),
    };
    let status = deployment.github().check_remote_status(&records, &request).await?;
    Ok(ResponseJson(ApiResponse::success(status)))
}
