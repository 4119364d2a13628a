//! The per-project agent: owns durable state, the workspace and deployment
//! handles, the websocket hub, and the single build task driving the
//! behavior state machine.

use std::sync::{
    Arc, Mutex as StdMutex,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Context;
use db::agent_store::{AgentDb, entities::agent_state};
use operations::{
    client::{ChunkCallback, InferenceClient, MessageRole},
    context::InferenceContext,
    operations::{
        IssueSnapshot, blueprint, conversation, fast_code_fixer, file_regeneration, setup,
        simple_codegen,
    },
    schemas::Blueprint,
};
use regex::Regex;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use services::services::{
    app_service::AppService,
    config::Config,
    deployment_manager::DeploymentManager,
    file_manager::{FileManager, FileMap, GeneratedFile},
    github::{ExportProgress, GitHubService, GithubExportRequest, GithubExportResult},
    sandbox::{ExecOptions, SandboxFile, SandboxService},
    screenshot::{ScreenshotService, Viewport},
    templates::{self, TemplateDetails, TemplateManifest},
    workspace::{DEFAULT_AUTHOR_EMAIL, DEFAULT_AUTHOR_NAME, StagedFile, Workspace},
};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio_util::sync::CancellationToken;
use utils::text::{derive_project_name, is_valid_project_name, looks_like_command};
use uuid::Uuid;

use crate::{
    behavior::{self, AgentInfra},
    conversation::{ConversationLog, ConversationMessage},
    state::{AgentState, BehaviorKind, DevState},
    ws::{WsHub, WsMessageType},
};

const COMMAND_CHUNK_SIZE: usize = 5;
const COMMAND_MAX_ATTEMPTS: u32 = 3;
const COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);
const DEEP_DEBUG_MAX_STEPS: usize = 3;
const STATE_ROW_ID: &str = "state";

/// Pending user images ride along with a single in-flight phase and are
/// never persisted; a restart drops them.
#[derive(Debug, Clone)]
pub struct UserImage {
    pub filename: String,
    pub data_base64: String,
}

#[derive(Clone)]
pub struct AgentDeps {
    pub app_service: AppService,
    pub inference: InferenceClient,
    pub sandbox: Arc<dyn SandboxService>,
    pub github: GitHubService,
    pub screenshot: ScreenshotService,
    pub config: Arc<RwLock<Config>>,
    /// Template override used by tests; production resolves from disk.
    pub template_override: Option<Arc<TemplateDetails>>,
}

pub struct Agent {
    id: Uuid,
    state: RwLock<AgentState>,
    store: AgentDb,
    conversation: ConversationLog,
    ws: WsHub,
    workspace: Workspace,
    file_manager: FileManager,
    deployment: OnceCell<DeploymentManager>,
    deps: AgentDeps,
    /// Build-wide abort handle; nested inference reuses it so one cancel
    /// aborts the entire phase. Never persisted.
    abort: StdMutex<Option<CancellationToken>>,
    building: AtomicBool,
    build_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    deep_debugging: AtomicBool,
    deep_debug_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    pending_images: StdMutex<Vec<UserImage>>,
    /// Ephemeral; wiped on restart and on eviction.
    github_token_cache: StdMutex<Option<String>>,
}

impl Agent {
    pub async fn open(id: Uuid, deps: AgentDeps) -> anyhow::Result<Arc<Self>> {
        let store = AgentDb::open(id).await?;
        Self::with_store(id, deps, store).await
    }

    pub async fn with_store(id: Uuid, deps: AgentDeps, store: AgentDb) -> anyhow::Result<Arc<Self>> {
        let state = Self::load_state(&store, id).await?;
        let file_map: FileMap = Arc::new(RwLock::new(state.files.clone()));

        let workspace = Workspace::new(&store);
        workspace.init(None).await?;
        let file_manager = FileManager::new(workspace.clone(), file_map);
        let conversation = ConversationLog::new(&store);

        Ok(Arc::new(Self {
            id,
            state: RwLock::new(state),
            store,
            conversation,
            ws: WsHub::new(),
            workspace,
            file_manager,
            deployment: OnceCell::new(),
            deps,
            abort: StdMutex::new(None),
            building: AtomicBool::new(false),
            build_task: Mutex::new(None),
            deep_debugging: AtomicBool::new(false),
            deep_debug_task: Mutex::new(None),
            pending_images: StdMutex::new(Vec::new()),
            github_token_cache: StdMutex::new(None),
        }))
    }

    async fn load_state(store: &AgentDb, id: Uuid) -> anyhow::Result<AgentState> {
        let row = agent_state::Entity::find_by_id(STATE_ROW_ID.to_string())
            .one(&store.pool)
            .await?;
        match row {
            Some(row) => serde_json::from_str(&row.state)
                .context("Failed to deserialize persisted agent state"),
            None => Ok(AgentState::new(id, String::new(), String::new())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn ws_hub(&self) -> &WsHub {
        &self.ws
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub async fn state_snapshot(&self) -> AgentState {
        self.state.read().await.clone()
    }

    /// Template name + manifest, for the connect-time snapshot message.
    pub async fn template_info(&self) -> (String, TemplateManifest) {
        let template = self.template().await;
        (template.name.clone(), template.manifest.clone())
    }

    // ---- initialization ----

    /// Resolve a template, generate the blueprint (streaming), customize
    /// template configuration, commit the initial tree and create the app
    /// record. `initialize_async` handles deployment and setup afterwards.
    pub async fn initialize(
        &self,
        query: &str,
        user_id: Option<Uuid>,
        on_blueprint_chunk: ChunkCallback<'_>,
    ) -> anyhow::Result<Blueprint> {
        let template_name = match &self.deps.template_override {
            Some(template) => template.name.clone(),
            None => templates::select_template(query),
        };
        {
            let mut state = self.state.write().await;
            state.query = query.to_string();
            state.identity.user_id = user_id;
            state.template_name = template_name.clone();
        }

        let ctx = self.inference_ctx_with_user(user_id).await;
        let mut blueprint = blueprint::generate(
            &self.deps.inference,
            &ctx,
            query,
            &template_name,
            on_blueprint_chunk,
        )
        .await?;

        let title_source = if blueprint.title.is_empty() {
            query
        } else {
            &blueprint.title
        };
        let project_name = derive_project_name(title_source);
        blueprint.project_name = project_name.clone();

        let template = self.template().await;
        if !template.files.is_empty() {
            let staged: Vec<StagedFile> = template
                .files
                .iter()
                .map(|file| StagedFile {
                    path: file.path.clone(),
                    contents: file.contents.clone(),
                })
                .collect();
            self.workspace
                .commit(&staged, &format!("Initial commit: {template_name} template"))
                .await?;
            self.seed_file_map(&template).await;

            let customized = customize_template_files(&template, &project_name);
            if !customized.is_empty() {
                self.workspace
                    .commit(&customized, "chore: Initialize project configuration files")
                    .await?;
                let map = self.file_manager.file_map();
                let mut map = map.write().await;
                for staged in &customized {
                    if let (Some(entry), Ok(contents)) = (
                        map.get_mut(&staged.path),
                        String::from_utf8(staged.contents.clone()),
                    ) {
                        entry.file_contents = contents;
                    }
                }
            }
        }

        self.deps
            .app_service
            .create_app(
                &db::models::app::CreateApp {
                    user_id,
                    title: title_source.chars().take(120).collect(),
                    user_query: query.to_string(),
                    project_name,
                    template_name,
                },
                self.id,
            )
            .await?;

        {
            let mut state = self.state.write().await;
            state.blueprint = Some(blueprint.clone());
        }
        self.persist_state().await?;
        Ok(blueprint)
    }

    /// Post-initialize background work: deploy the template, predict setup
    /// commands and write the README, then run the predicted commands.
    pub async fn initialize_async(&self) -> anyhow::Result<()> {
        let (blueprint, user_id) = {
            let state = self.state.read().await;
            (
                state.blueprint.clone().unwrap_or_default(),
                state.identity.user_id,
            )
        };
        let ctx = self.inference_ctx_with_user(user_id).await;
        let template = self.template().await;
        let package_json = template
            .files
            .iter()
            .find(|file| file.path == "package.json")
            .map(|file| String::from_utf8_lossy(&file.contents).to_string())
            .unwrap_or_default();

        let files: Vec<SandboxFile> = {
            let map = self.file_manager.get_all_files().await;
            map.into_iter()
                .map(|state| SandboxFile::text(state.file_path, state.file_contents))
                .collect()
        };

        let deploy = self.deploy_with_broadcast(&files);
        let commands = setup::analyze_setup_commands(
            &self.deps.inference,
            &ctx,
            &blueprint,
            &package_json,
        );
        let readme = setup::generate_readme(&self.deps.inference, &ctx, &blueprint);

        let (deploy_result, commands, readme) = tokio::join!(deploy, commands, readme);
        if let Err(err) = deploy_result {
            tracing::warn!("Initial sandbox deploy failed: {err}");
        }

        match readme {
            Ok(contents) if !contents.is_empty() => {
                self.file_manager
                    .save_file(
                        &GeneratedFile {
                            file_path: "README.md".to_string(),
                            file_contents: contents,
                            file_purpose: "Project README".to_string(),
                        },
                        "docs: Add README",
                    )
                    .await?;
            }
            Ok(_) => {}
            Err(err) => tracing::warn!("README generation failed: {err}"),
        }

        match commands {
            Ok(commands) if !commands.is_empty() => {
                self.execute_commands(&commands, true).await?;
            }
            Ok(_) => {}
            Err(err) => tracing::warn!("Setup command prediction failed: {err}"),
        }

        self.persist_state().await
    }

    async fn seed_file_map(&self, template: &TemplateDetails) {
        let map = self.file_manager.file_map();
        let mut map = map.write().await;
        for file in &template.files {
            let Ok(contents) = String::from_utf8(file.contents.clone()) else {
                continue;
            };
            map.entry(file.path.clone()).or_insert_with(|| {
                services::services::file_manager::FileState {
                    file_path: file.path.clone(),
                    file_contents: contents,
                    file_purpose: "Template file".to_string(),
                    last_diff: String::new(),
                }
            });
        }
    }

    // ---- build loop ----

    /// Start the build task. No-op when a build is already running, or when
    /// the MVP is done and no user input is waiting.
    pub async fn generate_all_files(self: &Arc<Self>) -> bool {
        if self.building.swap(true, Ordering::SeqCst) {
            return false;
        }
        {
            let state = self.state.read().await;
            if state.mvp_generated && state.pending_user_inputs.is_empty() {
                self.building.store(false, Ordering::SeqCst);
                return false;
            }
        }

        self.state.write().await.should_be_generating = true;
        self.ws
            .broadcast(WsMessageType::GenerationStarted, json!({}));

        let agent = self.clone();
        let handle = tokio::spawn(async move {
            agent.build_wrapper().await;
        });
        *self.build_task.lock().await = Some(handle);
        true
    }

    async fn build_wrapper(&self) {
        let kind = self.state.read().await.behavior;
        // Acquire the abort handle up front so cancellation works from the
        // first awaited operation.
        let _ = self.inference_ctx();

        let result = behavior::build(kind, self).await;
        match result {
            Ok(()) => {}
            Err(behavior::BuildError::Inference(err)) if err.is_aborted() => {
                tracing::info!(agent_id = %self.id, "Build cancelled");
            }
            Err(behavior::BuildError::Inference(err)) if err.is_rate_limited() => {
                tracing::warn!(agent_id = %self.id, "Build hit provider rate limit");
                self.ws.broadcast(
                    WsMessageType::RateLimitError,
                    json!({ "message": err.to_string() }),
                );
            }
            Err(err) => {
                tracing::error!(agent_id = %self.id, "Build failed: {err}");
                self.ws.broadcast(
                    WsMessageType::Error,
                    json!({ "message": err.to_string() }),
                );
            }
        }

        *self.abort.lock().unwrap() = None;
        {
            let mut state = self.state.write().await;
            state.dev_state = DevState::Idle;
            state.should_be_generating = false;
        }
        if let Err(err) = self.persist_state().await {
            tracing::error!("Failed to persist agent state: {err}");
        }
        self.building.store(false, Ordering::SeqCst);
        self.ws
            .broadcast(WsMessageType::GenerationComplete, json!({}));
    }

    pub async fn wait_for_build(&self) {
        let handle = self.build_task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::SeqCst)
    }

    /// Queue a user request for the build loop. In phasic mode the phases
    /// budget is topped back up so the build continues another round.
    pub async fn queue_user_request(&self, text: String, images: Vec<UserImage>) {
        {
            let mut state = self.state.write().await;
            state.pending_user_inputs.push(text);
            if state.behavior == BehaviorKind::Phasic {
                state.recharge_phases();
            }
        }
        if !images.is_empty() {
            self.pending_images.lock().unwrap().extend(images);
        }
        if let Err(err) = self.persist_state().await {
            tracing::error!("Failed to persist agent state: {err}");
        }
    }

    pub fn cancel_current_inference(&self) {
        if let Some(token) = self.abort.lock().unwrap().as_ref() {
            token.cancel();
        }
    }

    fn inference_ctx_with_user_sync(&self, user_id: Option<Uuid>, config: &Config) -> InferenceContext {
        let token = {
            let mut abort = self.abort.lock().unwrap();
            abort
                .get_or_insert_with(CancellationToken::new)
                .clone()
        };
        let mut ctx = InferenceContext {
            model: config.inference.model.clone(),
            fast_model: config.inference.fast_model.clone(),
            user_id,
            cancellation: token,
        };
        if ctx.model.is_empty() {
            ctx.model = "gpt-4o".to_string();
        }
        ctx
    }

    async fn inference_ctx_with_user(&self, user_id: Option<Uuid>) -> InferenceContext {
        let config = self.deps.config.read().await.clone();
        self.inference_ctx_with_user_sync(user_id, &config)
    }

    async fn template(&self) -> Arc<TemplateDetails> {
        if let Some(template) = &self.deps.template_override {
            return template.clone();
        }
        let name = self.state.read().await.template_name.clone();
        match templates::load_template(&name) {
            Ok(template) => Arc::new(template),
            Err(err) => {
                tracing::warn!(template = name, "Template unavailable: {err}");
                Arc::new(TemplateDetails {
                    name,
                    manifest: TemplateManifest::default(),
                    files: Vec::new(),
                })
            }
        }
    }

    async fn deployment_manager(&self) -> anyhow::Result<&DeploymentManager> {
        self.deployment
            .get_or_try_init(|| async {
                let template = self.template().await;
                let project_name = {
                    let state = self.state.read().await;
                    state
                        .blueprint
                        .as_ref()
                        .map(|blueprint| blueprint.project_name.clone())
                        .filter(|name| !name.is_empty())
                        .unwrap_or_else(|| format!("app-{}", self.id.simple()))
                };
                Ok::<_, anyhow::Error>(DeploymentManager::new(
                    self.deps.sandbox.clone(),
                    template,
                    project_name,
                ))
            })
            .await
    }

    async fn deploy_with_broadcast(&self, files: &[SandboxFile]) -> anyhow::Result<()> {
        self.ws
            .broadcast(WsMessageType::DeploymentStarted, json!({}));
        let deployment = self.deployment_manager().await?;
        match deployment.deploy_to_sandbox(files, false, None, false, None).await {
            Ok(preview_url) => {
                if let Some(preview_url) = &preview_url {
                    if let Err(err) = self
                        .deps
                        .app_service
                        .update_app_preview_url(self.id, preview_url)
                        .await
                    {
                        tracing::warn!("Failed to record preview URL: {err}");
                    }
                }
                self.ws.broadcast(
                    WsMessageType::DeploymentCompleted,
                    json!({ "preview_url": preview_url }),
                );
                Ok(())
            }
            Err(err) => {
                self.ws.broadcast(
                    WsMessageType::DeploymentFailed,
                    json!({ "message": err.to_string() }),
                );
                Err(err.into())
            }
        }
    }

    // ---- commands & self-healing ----

    async fn execute_commands_inner(
        &self,
        commands: &[String],
        with_retries: bool,
    ) -> anyhow::Result<()> {
        let deployment = self.deployment_manager().await?;
        let Some(instance_id) = deployment.instance_id().await else {
            tracing::warn!("Commands requested before any sandbox instance exists");
            return Ok(());
        };

        let filtered: Vec<String> = commands
            .iter()
            .map(|command| command.trim().to_string())
            .filter(|command| looks_like_command(command))
            .collect();
        let mut succeeded: Vec<String> = Vec::new();

        for chunk in filtered.chunks(COMMAND_CHUNK_SIZE) {
            for command in chunk {
                self.ws.broadcast(
                    WsMessageType::CommandExecuting,
                    json!({ "command": command }),
                );

                let mut last_stderr = String::new();
                let mut ok = false;
                let attempts = if with_retries && is_install_command(command) {
                    COMMAND_MAX_ATTEMPTS
                } else {
                    1
                };
                for _ in 0..attempts {
                    let result = self
                        .deps
                        .sandbox
                        .exec(
                            &instance_id,
                            command,
                            ExecOptions {
                                cwd: None,
                                timeout: Some(COMMAND_TIMEOUT),
                            },
                        )
                        .await?;
                    if result.success() {
                        ok = true;
                        break;
                    }
                    last_stderr = result.stderr;
                }

                if ok {
                    succeeded.push(command.clone());
                    continue;
                }
                tracing::warn!(command, "Command failed");
                if !(with_retries && is_install_command(command)) {
                    continue;
                }

                // AI-assisted fallback for failing installs.
                let ctx = self.inference_ctx();
                match setup::project_setup_assistant(
                    &self.deps.inference,
                    &ctx,
                    command,
                    &last_stderr,
                )
                .await
                {
                    Ok(alternatives) => {
                        for alternative in alternatives {
                            if !looks_like_command(&alternative) {
                                continue;
                            }
                            self.ws.broadcast(
                                WsMessageType::CommandExecuting,
                                json!({ "command": alternative }),
                            );
                            let result = self
                                .deps
                                .sandbox
                                .exec(
                                    &instance_id,
                                    &alternative,
                                    ExecOptions {
                                        cwd: None,
                                        timeout: Some(COMMAND_TIMEOUT),
                                    },
                                )
                                .await?;
                            if result.success() {
                                succeeded.push(alternative);
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!("Setup assistant unavailable: {err}");
                    }
                }
            }
        }

        let ran_install = succeeded.iter().any(|command| is_install_command(command));
        {
            let mut state = self.state.write().await;
            state.record_commands(&succeeded);
        }
        if ran_install {
            if let Err(err) = self.sync_package_manifest().await {
                tracing::warn!("package.json sync failed: {err}");
            }
        }
        self.persist_state().await
    }

    /// After dependency-changing commands, pull `package.json` back out of
    /// the sandbox and commit it when it drifted.
    pub async fn sync_package_manifest(&self) -> anyhow::Result<()> {
        let deployment = self.deployment_manager().await?;
        let Some(instance_id) = deployment.instance_id().await else {
            return Ok(());
        };
        let bytes = match self
            .deps
            .sandbox
            .read_file(&instance_id, "package.json")
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!("No package.json in sandbox: {err}");
                return Ok(());
            }
        };
        let contents = String::from_utf8_lossy(&bytes).to_string();

        let changed = {
            let state = self.state.read().await;
            state.last_package_json.as_deref() != Some(contents.as_str())
        };
        if !changed {
            return Ok(());
        }

        self.workspace
            .commit(
                &[StagedFile::text("package.json", contents.clone())],
                "chore: sync package.json dependencies from sandbox",
            )
            .await?;
        {
            let map = self.file_manager.file_map();
            let mut map = map.write().await;
            if let Some(entry) = map.get_mut("package.json") {
                entry.file_contents = contents.clone();
            }
        }
        self.state.write().await.last_package_json = Some(contents);
        self.ws.broadcast(
            WsMessageType::FileGenerated,
            json!({ "file_path": "package.json" }),
        );
        Ok(())
    }

    async fn deterministic_code_fixes_inner(&self) -> anyhow::Result<()> {
        self.ws
            .broadcast(WsMessageType::DeterministicCodeFixStarted, json!({}));
        let deployment = self.deployment_manager().await?;
        let analysis = deployment.run_static_analysis(None).await;
        self.ws.broadcast(
            WsMessageType::StaticAnalysisResults,
            json!({ "analysis": analysis }),
        );

        // Install external modules reported missing by TS2307.
        let missing = missing_external_modules(
            analysis
                .typecheck
                .issues
                .iter()
                .filter(|issue| issue.code == "TS2307")
                .map(|issue| issue.message.as_str()),
        );
        if !missing.is_empty() {
            let commands: Vec<String> = missing
                .iter()
                .map(|module| format!("bun install {module}"))
                .collect();
            self.execute_commands_inner(&commands, false).await?;
        }

        // Drop import lines for identifiers flagged as never read.
        let mut fixed: Vec<GeneratedFile> = Vec::new();
        for issue in analysis
            .typecheck
            .issues
            .iter()
            .filter(|issue| issue.code == "TS6133")
        {
            let Some(file) = self.file_manager.get_file(&issue.file).await else {
                continue;
            };
            if let Some(contents) = remove_unused_import_line(&file.file_contents, issue.line) {
                fixed.push(GeneratedFile {
                    file_path: file.file_path,
                    file_contents: contents,
                    file_purpose: file.file_purpose,
                });
            }
        }
        if !fixed.is_empty() {
            let (states, _) = self
                .file_manager
                .save_files(&fixed, "fix: Apply deterministic code fixes")
                .await?;
            let files: Vec<SandboxFile> = states
                .into_iter()
                .map(|state| SandboxFile::text(state.file_path, state.file_contents))
                .collect();
            let deployment = self.deployment_manager().await?;
            let _ = deployment.deploy_to_sandbox(&files, true, None, false, None).await;
        }

        self.ws
            .broadcast(WsMessageType::DeterministicCodeFixCompleted, json!({}));
        Ok(())
    }

    async fn fast_smart_fixes_inner(&self) -> anyhow::Result<()> {
        let issues = self.current_issues_inner().await;
        if issues.is_empty() {
            return Ok(());
        }
        let template = self.template().await;
        let files = self
            .file_manager
            .get_relevant_files(
                &template.manifest.redacted_files,
                &template.manifest.do_not_touch_files,
            )
            .await;
        let ctx = self.inference_ctx();
        let fixed =
            fast_code_fixer::fix(&self.deps.inference, &ctx, &files, &issues).await?;
        if fixed.is_empty() {
            return Ok(());
        }

        let generated: Vec<GeneratedFile> = fixed
            .into_iter()
            .map(|file| GeneratedFile {
                file_path: file.path,
                file_contents: file.contents,
                file_purpose: file.purpose,
            })
            .collect();
        let (states, _) = self
            .file_manager
            .save_files(&generated, "fix: Fast smart code fixes")
            .await?;
        for state in &states {
            self.ws.broadcast(
                WsMessageType::FileRegenerated,
                json!({ "file_path": state.file_path }),
            );
        }
        let files: Vec<SandboxFile> = states
            .into_iter()
            .map(|state| SandboxFile::text(state.file_path, state.file_contents))
            .collect();
        let deployment = self.deployment_manager().await?;
        let _ = deployment.deploy_to_sandbox(&files, true, None, false, None).await;
        Ok(())
    }

    async fn current_issues_inner(&self) -> IssueSnapshot {
        let Ok(deployment) = self.deployment_manager().await else {
            return IssueSnapshot::default();
        };
        let runtime_errors = deployment.fetch_runtime_errors(false).await;
        if !runtime_errors.is_empty() {
            self.ws.broadcast(
                WsMessageType::RuntimeErrorFound,
                json!({ "errors": runtime_errors }),
            );
        }
        let static_analysis = deployment.run_static_analysis(None).await;
        IssueSnapshot {
            runtime_errors,
            static_analysis,
        }
    }

    /// Regenerate one file; callers bump `retry_index` on repeated failures
    /// up to [`file_regeneration::MAX_REGENERATION_RETRIES`].
    pub async fn regenerate_file(&self, path: &str, retry_index: u32) -> anyhow::Result<()> {
        let Some(file) = self.file_manager.get_file(path).await else {
            anyhow::bail!("Unknown file: {path}");
        };
        self.ws.broadcast(
            WsMessageType::FileRegenerating,
            json!({ "file_path": path, "retry_index": retry_index }),
        );
        let issues = self.current_issues_inner().await;
        let ctx = self.inference_ctx();
        let output = file_regeneration::regenerate(
            &self.deps.inference,
            &ctx,
            &file,
            &issues,
            retry_index.min(file_regeneration::MAX_REGENERATION_RETRIES),
        )
        .await?;
        let state = self
            .file_manager
            .save_file(
                &GeneratedFile {
                    file_path: output.path,
                    file_contents: output.contents,
                    file_purpose: output.purpose,
                },
                &format!("fix: Regenerate {path}"),
            )
            .await?;
        self.ws.broadcast(
            WsMessageType::FileRegenerated,
            json!({ "file_path": state.file_path, "last_diff": state.last_diff }),
        );
        Ok(())
    }

    /// One-shot generation outside the phase loop: description → files,
    /// saved as a single commit and deployed.
    pub async fn generate_simple_code(&self, description: &str) -> anyhow::Result<Vec<String>> {
        let template = self.template().await;
        let existing = self
            .file_manager
            .get_relevant_files(
                &template.manifest.redacted_files,
                &template.manifest.do_not_touch_files,
            )
            .await;
        let ctx = self.inference_ctx();
        let outputs =
            simple_codegen::generate(&self.deps.inference, &ctx, description, &existing).await?;

        let generated: Vec<GeneratedFile> = outputs
            .into_iter()
            .map(|file| GeneratedFile {
                file_path: file.path,
                file_contents: file.contents,
                file_purpose: file.purpose,
            })
            .collect();
        let summary: String = description.chars().take(60).collect();
        let (states, _) = self
            .file_manager
            .save_files(&generated, &format!("feat: {summary}"))
            .await?;

        let mut paths = Vec::with_capacity(states.len());
        let files: Vec<SandboxFile> = states
            .into_iter()
            .map(|state| {
                self.ws.broadcast(
                    WsMessageType::FileGenerated,
                    json!({ "file_path": state.file_path }),
                );
                paths.push(state.file_path.clone());
                SandboxFile::text(state.file_path, state.file_contents)
            })
            .collect();
        let deployment = self.deployment_manager().await?;
        let _ = deployment.deploy_to_sandbox(&files, true, None, false, None).await;
        Ok(paths)
    }

    // ---- conversation & deep debug ----

    /// Stream an assistant reply to a user chat message; chunks replace the
    /// same conversation id so clients render a single growing message.
    pub async fn process_user_message(&self, message: &str) -> anyhow::Result<String> {
        let session_id = self.state.read().await.identity.session_id.clone();
        let conversation_id = Uuid::new_v4().to_string();

        self.conversation
            .add(
                &session_id,
                ConversationMessage::new(
                    Uuid::new_v4().to_string(),
                    MessageRole::User,
                    message,
                ),
            )
            .await?;

        let ctx = self.inference_ctx();
        let history: Vec<operations::client::ChatMessage> = self
            .conversation
            .get(&session_id)
            .await?
            .running
            .into_iter()
            .map(|m| operations::client::ChatMessage {
                role: m.role,
                content: m.content,
            })
            .collect();

        let ws = &self.ws;
        let reply_id = conversation_id.clone();
        let reply = conversation::process_user_message(
            &self.deps.inference,
            &ctx,
            &history,
            message,
            &move |chunk| {
                ws.broadcast(
                    WsMessageType::ConversationResponse,
                    json!({ "conversation_id": reply_id, "chunk": chunk }),
                );
            },
        )
        .await?;

        self.conversation
            .add(
                &session_id,
                ConversationMessage::new(&conversation_id, MessageRole::Assistant, reply.clone()),
            )
            .await?;
        Ok(reply)
    }

    /// Spawn a deep-debug session; at most one runs at a time. The
    /// transcript is stored and the slot freed even when a step errors.
    pub async fn start_deep_debug(self: &Arc<Self>) -> bool {
        if self.deep_debugging.swap(true, Ordering::SeqCst) {
            return false;
        }
        let agent = self.clone();
        let handle = tokio::spawn(async move {
            agent.run_deep_debug().await;
            agent.deep_debugging.store(false, Ordering::SeqCst);
        });
        *self.deep_debug_task.lock().await = Some(handle);
        true
    }

    async fn run_deep_debug(&self) {
        let session_id = self.state.read().await.identity.session_id.clone();
        let conversation_id = format!("deep-debug-{}", Uuid::new_v4());
        let ctx = self.inference_ctx();
        let mut transcript: Vec<operations::client::ChatMessage> = Vec::new();

        for _ in 0..DEEP_DEBUG_MAX_STEPS {
            let issues = self.current_issues_inner().await;
            if issues.is_empty() {
                break;
            }
            match conversation::deep_debug_step(&self.deps.inference, &ctx, &transcript, &issues)
                .await
            {
                Ok(reply) => {
                    transcript.push(operations::client::ChatMessage::assistant(reply.clone()));
                    self.ws.broadcast(
                        WsMessageType::ConversationResponse,
                        json!({ "conversation_id": conversation_id, "chunk": reply }),
                    );
                    let _ = self
                        .conversation
                        .add(
                            &session_id,
                            ConversationMessage::new(
                                &conversation_id,
                                MessageRole::Assistant,
                                reply,
                            ),
                        )
                        .await;
                }
                Err(err) => {
                    tracing::warn!("Deep debug step failed: {err}");
                    break;
                }
            }
        }

        let joined = transcript
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        {
            let mut state = self.state.write().await;
            state.last_deep_debug_transcript =
                if joined.is_empty() { None } else { Some(joined) };
        }
        if let Err(err) = self.persist_state().await {
            tracing::error!("Failed to persist deep-debug transcript: {err}");
        }
    }

    pub async fn wait_for_deep_debug(&self) {
        let handle = self.deep_debug_task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    // ---- blueprint & project name ----

    /// Apply a blueprint patch; keys outside the allow-list are ignored.
    pub async fn update_blueprint(
        &self,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<Blueprint> {
        let blueprint = {
            let mut state = self.state.write().await;
            let blueprint = state.blueprint.get_or_insert_with(Blueprint::default);
            blueprint.apply_patch(patch);
            blueprint.clone()
        };
        self.persist_state().await?;
        Ok(blueprint)
    }

    pub async fn update_project_name(&self, project_name: &str) -> anyhow::Result<()> {
        if !is_valid_project_name(project_name) {
            anyhow::bail!("Invalid project name: {project_name}");
        }
        self.deps
            .app_service
            .update_app_project_name(self.id, project_name)
            .await?;
        if let Ok(deployment) = self.deployment_manager().await {
            if let Err(err) = deployment.set_project_name(project_name).await {
                tracing::warn!("Failed to cascade project name to sandbox: {err}");
            }
        }
        {
            let mut state = self.state.write().await;
            if let Some(blueprint) = state.blueprint.as_mut() {
                blueprint.project_name = project_name.to_string();
            }
        }
        self.persist_state().await
    }

    // ---- GitHub export & screenshots ----

    pub async fn export_to_github(
        &self,
        repo_url: &str,
        token: &str,
    ) -> anyhow::Result<GithubExportResult> {
        *self.github_token_cache.lock().unwrap() = Some(token.to_string());
        self.ws.broadcast(
            WsMessageType::GithubExportStarted,
            json!({ "repo_url": repo_url }),
        );

        let records = self.workspace.export_git_objects().await?;
        let request = GithubExportRequest {
            repo_url: repo_url.to_string(),
            token: token.to_string(),
            default_branch: "main".to_string(),
            author_name: DEFAULT_AUTHOR_NAME.to_string(),
            author_email: DEFAULT_AUTHOR_EMAIL.to_string(),
        };

        let (progress_tx, mut progress_rx) =
            tokio::sync::mpsc::unbounded_channel::<ExportProgress>();
        let progress: services::services::github::ExportProgressCallback =
            Arc::new(move |event: ExportProgress| {
                let _ = progress_tx.send(event);
            });

        let export = self.deps.github.export(&records, &request, Some(progress));
        tokio::pin!(export);
        let result = loop {
            tokio::select! {
                Some(event) = progress_rx.recv() => {
                    if let ExportProgress::CommitPushed { index, total, message } = event {
                        self.ws.broadcast(
                            WsMessageType::GithubExportProgress,
                            json!({ "index": index, "total": total, "message": message }),
                        );
                    }
                }
                result = &mut export => break result,
            }
        };

        match result {
            Ok(result) => {
                self.ws.broadcast(
                    WsMessageType::GithubExportCompleted,
                    json!({ "repo_url": result.repo_url, "commits": result.commits_pushed }),
                );
                if let Err(err) = self
                    .deps
                    .app_service
                    .update_app_github_repo(self.id, repo_url)
                    .await
                {
                    tracing::warn!("Failed to record GitHub repo URL: {err}");
                }
                Ok(result)
            }
            Err(err) => {
                self.ws.broadcast(
                    WsMessageType::GithubExportError,
                    json!({ "message": err.to_string() }),
                );
                Err(err.into())
            }
        }
    }

    pub async fn capture_screenshot(&self) -> anyhow::Result<String> {
        self.ws
            .broadcast(WsMessageType::ScreenshotCaptureStarted, json!({}));
        let preview_url = match self.deployment_manager().await {
            Ok(deployment) => deployment.preview_url().await,
            Err(_) => None,
        };
        let Some(preview_url) = preview_url else {
            let message = "No preview deployed".to_string();
            self.ws.broadcast(
                WsMessageType::ScreenshotCaptureError,
                json!({ "message": message }),
            );
            anyhow::bail!(message);
        };

        match self
            .deps
            .screenshot
            .capture(self.id, &preview_url, Viewport::default())
            .await
        {
            Ok(path) => {
                self.ws.broadcast(
                    WsMessageType::ScreenshotCaptureSuccess,
                    json!({ "path": path }),
                );
                Ok(path)
            }
            Err(err) => {
                self.ws.broadcast(
                    WsMessageType::ScreenshotCaptureError,
                    json!({ "message": err.to_string() }),
                );
                Err(err.into())
            }
        }
    }

    // ---- persistence ----

    pub async fn persist(&self) -> anyhow::Result<()> {
        self.persist_state_inner().await
    }

    async fn persist_state_inner(&self) -> anyhow::Result<()> {
        let payload = {
            let mut state = self.state.write().await;
            state.files = self.file_manager.file_map().read().await.clone();
            state
                .project_updates
                .extend(self.ws.drain_project_updates());
            serde_json::to_string(&*state)?
        };

        let existing = agent_state::Entity::find_by_id(STATE_ROW_ID.to_string())
            .one(&self.store.pool)
            .await?;
        match existing {
            Some(model) => {
                let mut active: agent_state::ActiveModel = model.into();
                active.state = Set(payload);
                active.update(&self.store.pool).await?;
            }
            None => {
                let active = agent_state::ActiveModel {
                    id: Set(STATE_ROW_ID.to_string()),
                    state: Set(payload),
                };
                active.insert(&self.store.pool).await?;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AgentInfra for Agent {
    fn state(&self) -> &RwLock<AgentState> {
        &self.state
    }

    fn ws(&self) -> &WsHub {
        &self.ws
    }

    fn inference(&self) -> &InferenceClient {
        &self.deps.inference
    }

    fn inference_ctx(&self) -> InferenceContext {
        // The config read must not block; fall back to defaults if a write
        // lock is held elsewhere.
        let config = self
            .deps
            .config
            .try_read()
            .map(|config| config.clone())
            .unwrap_or_default();
        let user_id = None;
        self.inference_ctx_with_user_sync(user_id, &config)
    }

    fn file_manager(&self) -> &FileManager {
        &self.file_manager
    }

    async fn deployment(&self) -> anyhow::Result<DeploymentManager> {
        Ok(self.deployment_manager().await?.clone())
    }

    async fn current_issues(&self) -> IssueSnapshot {
        self.current_issues_inner().await
    }

    async fn execute_commands(
        &self,
        commands: &[String],
        with_retries: bool,
    ) -> anyhow::Result<()> {
        self.execute_commands_inner(commands, with_retries).await
    }

    async fn deterministic_code_fixes(&self) -> anyhow::Result<()> {
        self.deterministic_code_fixes_inner().await
    }

    async fn fast_smart_fixes(&self) -> anyhow::Result<()> {
        self.fast_smart_fixes_inner().await
    }

    async fn fast_fixes_enabled(&self) -> bool {
        self.deps.config.read().await.fast_smart_fixes_enabled
    }

    fn take_pending_images(&self) -> Vec<UserImage> {
        std::mem::take(&mut *self.pending_images.lock().unwrap())
    }

    async fn persist_state(&self) -> anyhow::Result<()> {
        self.persist_state_inner().await
    }

    async fn push_assistant_message(&self, content: &str) -> anyhow::Result<()> {
        let session_id = self.state.read().await.identity.session_id.clone();
        let conversation_id = Uuid::new_v4().to_string();
        self.conversation
            .add(
                &session_id,
                ConversationMessage::new(&conversation_id, MessageRole::Assistant, content),
            )
            .await?;
        self.ws.broadcast(
            WsMessageType::ConversationResponse,
            json!({ "conversation_id": conversation_id, "chunk": content }),
        );
        Ok(())
    }
}

/// Rewrite template configuration for the new project: package manifest
/// name, wrangler config name, and a `.gitignore` entry for local state.
fn customize_template_files(template: &TemplateDetails, project_name: &str) -> Vec<StagedFile> {
    let mut customized = Vec::new();
    for file in &template.files {
        let Ok(text) = std::str::from_utf8(&file.contents) else {
            continue;
        };
        let updated = match file.path.as_str() {
            "package.json" | "wrangler.json" | "wrangler.jsonc" => {
                rewrite_json_name(text, project_name)
            }
            ".gitignore" => {
                if text.lines().any(|line| line.trim() == ".vibesdk/") {
                    None
                } else {
                    Some(format!("{}\n.vibesdk/\n", text.trim_end()))
                }
            }
            ".bootstrap.js" => Some(text.replace("__PROJECT_NAME__", project_name)),
            _ => None,
        };
        if let Some(contents) = updated {
            if contents != text {
                customized.push(StagedFile::text(file.path.clone(), contents));
            }
        }
    }
    customized
}

fn rewrite_json_name(text: &str, project_name: &str) -> Option<String> {
    let re = Regex::new(r#""name"\s*:\s*"[^"]*""#).ok()?;
    if !re.is_match(text) {
        return None;
    }
    Some(
        re.replace(text, format!(r#""name": "{project_name}""#))
            .to_string(),
    )
}

fn is_install_command(command: &str) -> bool {
    let re = Regex::new(r"install| add |remove|uninstall").expect("valid regex");
    re.is_match(command)
}

/// Module names out of TS2307 messages, excluding relative paths and the
/// internal `@shared` namespace.
fn missing_external_modules<'a>(messages: impl Iterator<Item = &'a str>) -> Vec<String> {
    let re = Regex::new(r"Cannot find module '([^']+)'").expect("valid regex");
    let mut modules = Vec::new();
    for message in messages {
        if let Some(caps) = re.captures(message) {
            let module = caps[1].to_string();
            if module.starts_with('.') || module.starts_with("@shared") {
                continue;
            }
            if !modules.contains(&module) {
                modules.push(module);
            }
        }
    }
    modules
}

/// Drop the 1-indexed line when it is an import statement.
fn remove_unused_import_line(contents: &str, line: u32) -> Option<String> {
    let lines: Vec<&str> = contents.lines().collect();
    let index = (line as usize).checked_sub(1)?;
    let target = lines.get(index)?;
    if !target.trim_start().starts_with("import ") {
        return None;
    }
    let mut out: Vec<&str> = Vec::with_capacity(lines.len() - 1);
    out.extend(lines[..index].iter());
    out.extend(lines[index + 1..].iter());
    Some(format!("{}\n", out.join("\n")))
}
