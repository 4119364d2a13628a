//! End-to-end build-loop scenarios against a scripted inference backend and
//! an in-memory sandbox.

use std::sync::Arc;

use agent::{
    behavior::AgentInfra,
    core::{Agent, AgentDeps},
    state::DevState,
};
use async_trait::async_trait;
use db::{DBService, agent_store::AgentDb};
use operations::{
    client::{
        ChatBackend, ChatRequest, ChunkCallback, InferenceClient, InferenceError,
        test_support::ScriptedBackend,
    },
    schemas::{Blueprint, FileConcept, PhaseConcept},
};
use services::services::{
    app_service::AppService,
    config::Config,
    deployment_manager::test_support::MockSandbox,
    github::GitHubService,
    sandbox::SandboxFile,
    screenshot::ScreenshotService,
    templates::{TemplateDetails, TemplateManifest},
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn template() -> Arc<TemplateDetails> {
    Arc::new(TemplateDetails {
        name: "react-vite".to_string(),
        manifest: TemplateManifest::default(),
        files: vec![SandboxFile::text(
            "package.json",
            "{\n  \"name\": \"template-app\"\n}\n",
        )],
    })
}

struct Harness {
    agent: Arc<Agent>,
    sandbox: Arc<MockSandbox>,
}

async fn harness_with_backend(
    inference: InferenceClient,
    sandbox: Arc<MockSandbox>,
) -> Harness {
    let db = DBService::new_in_memory().await.unwrap();
    let app_service = AppService::new(db.clone());
    let deps = AgentDeps {
        app_service: app_service.clone(),
        inference,
        sandbox: sandbox.clone(),
        github: GitHubService::new("https://api.github.com"),
        screenshot: ScreenshotService::new(None, app_service),
        config: Arc::new(RwLock::new(Config {
            fast_smart_fixes_enabled: false,
            ..Default::default()
        })),
        template_override: Some(template()),
    };
    let store = AgentDb::open_in_memory().await.unwrap();
    let agent = Agent::with_store(Uuid::new_v4(), deps, store).await.unwrap();
    Harness { agent, sandbox }
}

async fn harness(responses: Vec<String>) -> Harness {
    let backend = Arc::new(ScriptedBackend::new(responses));
    let inference = InferenceClient::with_backend(backend);
    harness_with_backend(inference, Arc::new(MockSandbox::default())).await
}

fn phase_concept(name: &str, file: &str, last_phase: bool) -> PhaseConcept {
    PhaseConcept {
        name: name.to_string(),
        description: format!("{name} work"),
        last_phase,
        files: vec![FileConcept {
            path: file.to_string(),
            purpose: "generated".to_string(),
            changes: None,
        }],
        install_commands: Vec::new(),
    }
}

fn blueprint_response() -> String {
    serde_json::json!({
        "title": "Todo List",
        "description": "A todo list app",
        "initial_phase": {
            "name": "Core UI",
            "description": "todo list skeleton",
            "last_phase": false,
            "files": [{"path": "src/App.tsx", "purpose": "root component"}]
        }
    })
    .to_string()
}

fn file_block(path: &str, contents: &str) -> String {
    format!("<file path=\"{path}\" purpose=\"generated\">\n{contents}\n</file>")
}

async fn seed_blueprint(agent: &Arc<Agent>, initial: PhaseConcept) {
    let mut state = agent.state().write().await;
    state.query = "build a todo list".to_string();
    state.blueprint = Some(Blueprint {
        title: "Todo List".to_string(),
        project_name: "todo-list-test01".to_string(),
        initial_phase: Some(initial),
        ..Default::default()
    });
}

fn drain_messages(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

#[tokio::test]
async fn happy_path_runs_to_idle_with_expected_commits() {
    let harness = harness(vec![
        blueprint_response(),
        file_block("src/App.tsx", "export default function App() {}"),
        r#"{"done": true}"#.to_string(),
        "No further changes required.".to_string(),
    ])
    .await;
    let agent = &harness.agent;
    let (_, mut rx) = agent.ws_hub().add_connection();

    let blueprint = agent
        .initialize("build a todo list", None, &|_chunk| {})
        .await
        .unwrap();
    assert_eq!(blueprint.title, "Todo List");
    assert!(blueprint.project_name.starts_with("todo-list-"));

    assert!(agent.generate_all_files().await);
    agent.wait_for_build().await;

    let state = agent.state_snapshot().await;
    assert_eq!(state.dev_state, DevState::Idle);
    assert!(state.mvp_generated);
    assert!(state.reviewing_initiated);
    assert_eq!(state.pending_user_inputs.len(), 0);

    // Newest-first commit log: the implemented phase, template
    // customization, template import. The finalization phase produced no
    // files, so no commit for it.
    let log = agent.workspace().log(10).await;
    let messages: Vec<&str> = log.iter().map(|c| c.message.as_str()).collect();
    assert!(messages[0].starts_with("feat: Core UI"));
    assert!(messages.contains(&"chore: Initialize project configuration files"));
    assert!(messages.iter().any(|m| m.starts_with("Initial commit:")));

    // The generated file is retrievable from HEAD with identical bytes.
    let head = agent.workspace().head_or_none().await.unwrap();
    let bytes = agent
        .workspace()
        .read_file_at_commit(&head, "src/App.tsx")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bytes, b"export default function App() {}");

    let messages = drain_messages(&mut rx);
    assert!(messages.iter().any(|m| m.contains("GENERATION_STARTED")));
    assert!(messages.iter().any(|m| m.contains("PHASE_IMPLEMENTED")));
    assert!(messages.iter().any(|m| m.contains("GENERATION_COMPLETE")));
}

#[tokio::test]
async fn phases_budget_exhaustion_forces_finalization() {
    let harness = harness(vec![
        file_block("src/App.tsx", "v1"),
        serde_json::json!({
            "done": false,
            "phase": {
                "name": "Second Phase",
                "description": "more features",
                "last_phase": false,
                "files": [{"path": "src/More.tsx", "purpose": "extra"}]
            }
        })
        .to_string(),
        file_block("src/More.tsx", "v2"),
        "nothing left to do".to_string(),
    ])
    .await;
    let agent = &harness.agent;

    seed_blueprint(agent, phase_concept("Core UI", "src/App.tsx", false)).await;
    {
        let mut state = agent.state().write().await;
        state.phases_counter = 2;
    }

    assert!(agent.generate_all_files().await);
    agent.wait_for_build().await;

    let state = agent.state_snapshot().await;
    assert_eq!(state.dev_state, DevState::Idle);
    assert!(state.mvp_generated);
    let names: Vec<&str> = state
        .generated_phases
        .iter()
        .map(|p| p.concept.name.as_str())
        .collect();
    assert_eq!(names, vec!["Core UI", "Second Phase", "Finalization and Review"]);
    assert!(state.generated_phases.iter().all(|p| p.completed));
    assert_eq!(state.phases_counter, 0);
}

#[tokio::test]
async fn queued_user_input_recharges_phase_budget() {
    let harness = harness(Vec::new()).await;
    let agent = &harness.agent;
    {
        let mut state = agent.state().write().await;
        state.phases_counter = 0;
    }
    agent
        .queue_user_request("add dark mode".to_string(), Vec::new())
        .await;
    let state = agent.state_snapshot().await;
    assert_eq!(state.phases_counter, 3);
    assert_eq!(state.pending_user_inputs, vec!["add dark mode"]);
}

#[tokio::test]
async fn failing_install_is_replaced_by_assistant_suggestion() {
    let harness = harness(vec![
        r#"{"commands": ["bun install known-pkg"]}"#.to_string(),
    ])
    .await;
    let agent = &harness.agent;
    seed_blueprint(agent, phase_concept("Core UI", "src/App.tsx", true)).await;

    // Provision an instance so commands have somewhere to run.
    let deployment = agent.deployment().await.unwrap();
    deployment
        .deploy_to_sandbox(
            &[SandboxFile::text("src/App.tsx", "x")],
            false,
            None,
            false,
            None,
        )
        .await
        .unwrap();

    harness
        .sandbox
        .script("bun install unknown-pkg", 1, "error: package not found", None);

    agent
        .execute_commands(&["bun install unknown-pkg".to_string()], true)
        .await
        .unwrap();

    let state = agent.state_snapshot().await;
    assert!(state
        .commands_history
        .contains(&"bun install known-pkg".to_string()));
    assert!(!state
        .commands_history
        .iter()
        .any(|c| c.contains("unknown-pkg")));

    // The original command was attempted three times before the assistant
    // was consulted.
    let attempts = harness
        .sandbox
        .exec_log()
        .iter()
        .filter(|c| c.as_str() == "bun install unknown-pkg")
        .count();
    assert_eq!(attempts, 3);

    // Dependency churn triggered a package.json sync commit.
    let log = agent.workspace().log(10).await;
    assert!(log
        .iter()
        .any(|c| c.message == "chore: sync package.json dependencies from sandbox"));
}

/// Backend whose calls never complete; cancellation must unblock them.
struct HangingBackend;

#[async_trait]
impl ChatBackend for HangingBackend {
    async fn complete(&self, _request: &ChatRequest) -> Result<String, InferenceError> {
        std::future::pending().await
    }

    async fn stream(
        &self,
        _request: &ChatRequest,
        _on_chunk: ChunkCallback<'_>,
        _cancel: &CancellationToken,
    ) -> Result<String, InferenceError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn cancellation_mid_phase_lands_in_idle_with_generation_complete() {
    let inference = InferenceClient::with_backend(Arc::new(HangingBackend));
    let harness = harness_with_backend(inference, Arc::new(MockSandbox::default())).await;
    let agent = &harness.agent;
    seed_blueprint(agent, phase_concept("Core UI", "src/App.tsx", false)).await;
    let (_, mut rx) = agent.ws_hub().add_connection();

    assert!(agent.generate_all_files().await);
    // A second start while the build is running is a no-op.
    assert!(!agent.generate_all_files().await);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    agent.cancel_current_inference();
    agent.wait_for_build().await;

    let state = agent.state_snapshot().await;
    assert_eq!(state.dev_state, DevState::Idle);
    assert!(!state.should_be_generating);
    assert!(!agent.is_building());

    let messages = drain_messages(&mut rx);
    assert!(messages.iter().any(|m| m.contains("GENERATION_COMPLETE")));
}

#[tokio::test]
async fn second_build_after_mvp_without_input_is_a_noop() {
    let harness = harness(Vec::new()).await;
    let agent = &harness.agent;
    {
        let mut state = agent.state().write().await;
        state.mvp_generated = true;
    }
    assert!(!agent.generate_all_files().await);

    agent
        .queue_user_request("one more feature".to_string(), Vec::new())
        .await;
    // With pending input the build starts again; it will fail fast on the
    // empty script, which is fine for this test.
    assert!(agent.generate_all_files().await);
    agent.wait_for_build().await;
}
