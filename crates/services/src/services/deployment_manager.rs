//! Per-agent deployment orchestration: provisions a sandbox instance, pushes
//! generated files into it, keeps the preview alive, and harvests runtime
//! errors and static analysis for the self-repair loop.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use ts_rs::TS;
use uuid::Uuid;

use crate::services::{
    sandbox::{ExecOptions, ExecResult, InstanceMetadata, SandboxError, SandboxFile, SandboxService},
    templates::TemplateDetails,
};

pub const PREVIEW_UNAVAILABLE_ERROR: &str =
    "<runtime errors not available at the moment as preview is not deployed>";

const BOOTSTRAP_SCRIPT: &str = ".bootstrap.js";
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(300);
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(120);
const PREVIEW_POLL_INTERVAL: Duration = Duration::from_millis(500);
const PREVIEW_POLL_ATTEMPTS: u32 = 40;

#[derive(Debug, Error)]
pub enum DeploymentManagerError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("No sandbox instance has been provisioned")]
    NotDeployed,
}

#[derive(Debug, Clone)]
pub enum DeployEvent {
    Started { commit_message: Option<String> },
    Completed { preview_url: Option<String> },
    Error { message: String },
    AfterSetupCommands,
}

pub type DeployEventCallback = Arc<dyn Fn(DeployEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Fatal,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct RuntimeError {
    pub message: String,
    #[ts(type = "Date")]
    pub timestamp: DateTime<Utc>,
    pub severity: ErrorSeverity,
    pub raw_output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct AnalysisIssue {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub code: String,
    pub message: String,
    pub severity: IssueSeverity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct AnalysisReport {
    pub issues: Vec<AnalysisIssue>,
    pub summary: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct StaticAnalysisResult {
    pub lint: AnalysisReport,
    pub typecheck: AnalysisReport,
}

struct DeployState {
    session_id: String,
    instance_id: Option<String>,
    preview_url: Option<String>,
    dev_process_id: Option<String>,
    runtime_errors: Vec<RuntimeError>,
    redeploy_in_flight: bool,
}

#[derive(Clone)]
pub struct DeploymentManager {
    sandbox: Arc<dyn SandboxService>,
    template: Arc<TemplateDetails>,
    project_name: String,
    state: Arc<RwLock<DeployState>>,
    /// Serializes provisioning so concurrent first deploys share one
    /// instance.
    provision_lock: Arc<tokio::sync::Mutex<()>>,
}

impl DeploymentManager {
    pub fn new(
        sandbox: Arc<dyn SandboxService>,
        template: Arc<TemplateDetails>,
        project_name: String,
    ) -> Self {
        Self {
            sandbox,
            template,
            project_name,
            state: Arc::new(RwLock::new(DeployState {
                session_id: Uuid::new_v4().to_string(),
                instance_id: None,
                preview_url: None,
                dev_process_id: None,
                runtime_errors: Vec::new(),
                redeploy_in_flight: false,
            })),
            provision_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn template(&self) -> &TemplateDetails {
        &self.template
    }

    pub async fn get_session_id(&self) -> String {
        self.state.read().await.session_id.clone()
    }

    pub async fn generate_new_session_id(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.state.write().await.session_id = id.clone();
        id
    }

    pub async fn instance_id(&self) -> Option<String> {
        self.state.read().await.instance_id.clone()
    }

    pub async fn preview_url(&self) -> Option<String> {
        self.state.read().await.preview_url.clone()
    }

    pub async fn set_project_name(&self, project_name: &str) -> Result<(), DeploymentManagerError> {
        let instance_id = self.state.read().await.instance_id.clone();
        if let Some(instance_id) = instance_id {
            let mut metadata = self.sandbox.get_metadata(&instance_id).await?;
            metadata.project_name = project_name.to_string();
            self.sandbox.update_metadata(&instance_id, metadata).await?;
        }
        Ok(())
    }

    /// Push files into the sandbox, provisioning an instance on first use.
    /// A redeploy with no files is a no-op that only returns the cached
    /// preview URL. `commit_message` labels the deploy for clients; the
    /// workspace commit itself happens upstream in the file manager.
    pub async fn deploy_to_sandbox(
        &self,
        files: &[SandboxFile],
        redeploy: bool,
        commit_message: Option<String>,
        clear_logs: bool,
        on_event: Option<DeployEventCallback>,
    ) -> Result<Option<String>, DeploymentManagerError> {
        let emit = |event: DeployEvent| {
            if let Some(callback) = &on_event {
                callback(event);
            }
        };
        emit(DeployEvent::Started { commit_message });

        let result = self
            .deploy_inner(files, redeploy, clear_logs, &emit)
            .await;
        match &result {
            Ok(preview_url) => emit(DeployEvent::Completed {
                preview_url: preview_url.clone(),
            }),
            Err(err) => emit(DeployEvent::Error {
                message: err.to_string(),
            }),
        }
        result
    }

    async fn deploy_inner(
        &self,
        files: &[SandboxFile],
        redeploy: bool,
        clear_logs: bool,
        emit: &(dyn Fn(DeployEvent) + Send + Sync),
    ) -> Result<Option<String>, DeploymentManagerError> {
        let (instance_id, cached_preview) = {
            let state = self.state.read().await;
            (state.instance_id.clone(), state.preview_url.clone())
        };

        let instance_id = match instance_id {
            Some(id) => {
                if files.is_empty() && !redeploy {
                    return Ok(cached_preview);
                }
                self.sandbox.deploy(&id, files).await?;
                if clear_logs {
                    self.clear_runtime_errors().await;
                }
                id
            }
            None => {
                let _guard = self.provision_lock.lock().await;
                match self.state.read().await.instance_id.clone() {
                    // Another task won the race while we waited.
                    Some(id) => {
                        self.sandbox.deploy(&id, files).await?;
                        id
                    }
                    None => self.provision(files, emit).await?,
                }
            }
        };

        let preview = self.state.read().await.preview_url.clone();
        tracing::debug!(instance_id, files = files.len(), "Sandbox deploy finished");
        Ok(preview)
    }

    async fn provision(
        &self,
        extra_files: &[SandboxFile],
        emit: &(dyn Fn(DeployEvent) + Send + Sync),
    ) -> Result<String, DeploymentManagerError> {
        let metadata = InstanceMetadata {
            template_name: self.template.name.clone(),
            project_name: self.project_name.clone(),
            start_time: Utc::now(),
            preview_url: None,
            port: None,
            process_id: None,
            do_not_touch_files: self.template.manifest.do_not_touch_files.clone(),
            redacted_files: self.template.manifest.redacted_files.clone(),
        };
        let instance_id = self.sandbox.create_instance(metadata).await?;
        tracing::info!(
            instance_id,
            template = self.template.name,
            "Provisioned sandbox instance"
        );

        self.sandbox.deploy(&instance_id, &self.template.files).await?;

        if self
            .template
            .files
            .iter()
            .any(|f| f.path == BOOTSTRAP_SCRIPT)
        {
            let result = self
                .sandbox
                .exec(
                    &instance_id,
                    &format!("bun {BOOTSTRAP_SCRIPT}"),
                    ExecOptions {
                        cwd: None,
                        timeout: Some(BOOTSTRAP_TIMEOUT),
                    },
                )
                .await?;
            if !result.success() {
                tracing::warn!(
                    exit_code = result.exit_code,
                    stderr = %result.stderr,
                    "Template bootstrap script failed"
                );
            }
            emit(DeployEvent::AfterSetupCommands);
        }

        if !extra_files.is_empty() {
            self.sandbox.deploy(&instance_id, extra_files).await?;
        }

        let process_id = self
            .sandbox
            .start_process(&instance_id, &self.template.manifest.dev_command)
            .await?;
        let preview_url = self.sandbox.expose_port(&instance_id, 0).await?;

        let mut metadata = self.sandbox.get_metadata(&instance_id).await?;
        metadata.preview_url = Some(preview_url.clone());
        metadata.process_id = Some(process_id.clone());
        self.sandbox
            .update_metadata(&instance_id, metadata)
            .await?;

        let mut state = self.state.write().await;
        state.instance_id = Some(instance_id.clone());
        state.preview_url = Some(preview_url);
        state.dev_process_id = Some(process_id);
        Ok(instance_id)
    }

    /// Deploying to Cloudflare is not wired up in the local build.
    pub async fn deploy_to_cloudflare(&self) -> Result<Option<String>, DeploymentManagerError> {
        tracing::info!("Cloudflare deploy requested but no target is configured");
        Ok(None)
    }

    /// Poll the preview URL until it answers.
    pub async fn wait_for_preview(&self) -> bool {
        let Some(url) = self.preview_url().await else {
            return false;
        };
        let client = reqwest::Client::new();
        for _ in 0..PREVIEW_POLL_ATTEMPTS {
            match client
                .get(&url)
                .timeout(Duration::from_secs(2))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => return true,
                _ => tokio::time::sleep(PREVIEW_POLL_INTERVAL).await,
            }
        }
        false
    }

    /// Current runtime errors from the dev process. When the preview is not
    /// deployed, kicks a redeploy in the background and reports a synthetic
    /// error instead.
    pub async fn fetch_runtime_errors(&self, clear: bool) -> Vec<RuntimeError> {
        let (instance_id, process_id, deployed) = {
            let state = self.state.read().await;
            (
                state.instance_id.clone(),
                state.dev_process_id.clone(),
                state.preview_url.is_some(),
            )
        };

        if !deployed {
            self.spawn_background_redeploy().await;
            return vec![RuntimeError {
                message: PREVIEW_UNAVAILABLE_ERROR.to_string(),
                timestamp: Utc::now(),
                severity: ErrorSeverity::Error,
                raw_output: String::new(),
            }];
        }

        if let (Some(instance_id), Some(process_id)) = (instance_id, process_id) {
            match self
                .sandbox
                .drain_process_output(&instance_id, &process_id)
                .await
            {
                Ok(lines) => {
                    let mut new_errors = parse_runtime_errors(&lines);
                    if !new_errors.is_empty() {
                        self.state
                            .write()
                            .await
                            .runtime_errors
                            .append(&mut new_errors);
                    }
                }
                Err(err) => {
                    tracing::warn!("Failed to drain dev process output: {err}");
                }
            }
        }

        let mut state = self.state.write().await;
        let errors = state.runtime_errors.clone();
        if clear {
            state.runtime_errors.clear();
        }
        errors
    }

    async fn clear_runtime_errors(&self) {
        self.state.write().await.runtime_errors.clear();
    }

    async fn spawn_background_redeploy(&self) {
        {
            let mut state = self.state.write().await;
            if state.redeploy_in_flight {
                return;
            }
            state.redeploy_in_flight = true;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(err) = manager.deploy_to_sandbox(&[], true, None, false, None).await {
                tracing::warn!("Background redeploy failed: {err}");
            }
            manager.state.write().await.redeploy_in_flight = false;
        });
    }

    /// Run lint and typecheck inside the sandbox. Analysis failures degrade
    /// to empty reports; the build loop treats that as "no issues".
    pub async fn run_static_analysis(&self, files: Option<&[String]>) -> StaticAnalysisResult {
        let Some(instance_id) = self.instance_id().await else {
            return StaticAnalysisResult::default();
        };

        let file_args = files
            .map(|fs| {
                let mut joined = String::new();
                for f in fs {
                    joined.push(' ');
                    joined.push_str(f);
                }
                joined
            })
            .unwrap_or_default();

        let lint = self
            .run_analysis_command(
                &instance_id,
                &format!("{}{}", self.template.manifest.lint_command, file_args),
                parse_lint_output,
            )
            .await;
        let typecheck = self
            .run_analysis_command(
                &instance_id,
                &self.template.manifest.typecheck_command.clone(),
                parse_typecheck_output,
            )
            .await;

        StaticAnalysisResult { lint, typecheck }
    }

    async fn run_analysis_command(
        &self,
        instance_id: &str,
        command: &str,
        parse: fn(&str) -> Vec<AnalysisIssue>,
    ) -> AnalysisReport {
        match self
            .sandbox
            .exec(
                instance_id,
                command,
                ExecOptions {
                    cwd: None,
                    timeout: Some(ANALYSIS_TIMEOUT),
                },
            )
            .await
        {
            Ok(result) => {
                let combined = format!("{}\n{}", result.stdout, result.stderr);
                let issues = parse(&combined);
                let summary = format!(
                    "{} issue(s) from `{}` (exit {})",
                    issues.len(),
                    command,
                    result.exit_code
                );
                AnalysisReport { issues, summary }
            }
            Err(err) => {
                tracing::warn!(command, "Static analysis failed: {err}");
                AnalysisReport::default()
            }
        }
    }
}

/// tsc `--pretty false` rows: `src/App.tsx(10,5): error TS2304: Cannot find name 'foo'.`
fn parse_typecheck_output(output: &str) -> Vec<AnalysisIssue> {
    let re = Regex::new(r"(?m)^(.+?)\((\d+),(\d+)\): (error|warning) (TS\d+): (.+)$")
        .expect("valid regex");
    re.captures_iter(output)
        .map(|caps| AnalysisIssue {
            file: caps[1].to_string(),
            line: caps[2].parse().unwrap_or(0),
            column: caps[3].parse().unwrap_or(0),
            code: caps[5].to_string(),
            message: caps[6].to_string(),
            severity: if &caps[4] == "error" {
                IssueSeverity::Error
            } else {
                IssueSeverity::Warning
            },
        })
        .collect()
}

/// eslint compact rows: `src/App.tsx: line 3, col 7, Error - Unexpected var. (no-var)`
fn parse_lint_output(output: &str) -> Vec<AnalysisIssue> {
    let re = Regex::new(r"(?m)^(.+?): line (\d+), col (\d+), (Error|Warning) - (.+?)(?: \((.+)\))?$")
        .expect("valid regex");
    re.captures_iter(output)
        .map(|caps| AnalysisIssue {
            file: caps[1].to_string(),
            line: caps[2].parse().unwrap_or(0),
            column: caps[3].parse().unwrap_or(0),
            code: caps
                .get(6)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            message: caps[5].to_string(),
            severity: if &caps[4] == "Error" {
                IssueSeverity::Error
            } else {
                IssueSeverity::Warning
            },
        })
        .collect()
}

fn parse_runtime_errors(lines: &[String]) -> Vec<RuntimeError> {
    lines
        .iter()
        .filter(|line| {
            let lowered = line.to_lowercase();
            lowered.contains("error") || lowered.contains("unhandled") || lowered.contains("panic")
        })
        .map(|line| RuntimeError {
            message: line.trim().to_string(),
            timestamp: Utc::now(),
            severity: ErrorSeverity::Error,
            raw_output: line.clone(),
        })
        .collect()
}

pub mod test_support {
    //! In-memory sandbox used by deployment and agent tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::services::sandbox::{ensure_safe_relative_path, ProcessInfo};

    #[derive(Default)]
    pub struct MockSandboxState {
        pub instances: HashMap<String, InstanceMetadata>,
        pub files: HashMap<String, Vec<u8>>,
        pub exec_log: Vec<String>,
        /// command substring -> scripted result; unmatched commands succeed.
        pub scripted: Vec<(String, ExecResultScript)>,
        pub process_output: Vec<String>,
        next_port: u16,
    }

    #[derive(Clone)]
    pub struct ExecResultScript {
        pub exit_code: i32,
        pub stdout: String,
        pub stderr: String,
        /// Remaining number of times this script applies; `None` = always.
        pub remaining: Option<u32>,
    }

    #[derive(Default)]
    pub struct MockSandbox {
        pub state: Mutex<MockSandboxState>,
    }

    impl MockSandbox {
        pub fn script(&self, needle: &str, exit_code: i32, stderr: &str, times: Option<u32>) {
            self.state.lock().unwrap().scripted.push((
                needle.to_string(),
                ExecResultScript {
                    exit_code,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                    remaining: times,
                },
            ));
        }

        pub fn push_process_output(&self, line: &str) {
            self.state
                .lock()
                .unwrap()
                .process_output
                .push(line.to_string());
        }

        pub fn exec_log(&self) -> Vec<String> {
            self.state.lock().unwrap().exec_log.clone()
        }
    }

    #[async_trait]
    impl SandboxService for MockSandbox {
        async fn create_instance(
            &self,
            metadata: InstanceMetadata,
        ) -> Result<String, SandboxError> {
            let id = uuid::Uuid::new_v4().to_string();
            self.state
                .lock()
                .unwrap()
                .instances
                .insert(id.clone(), metadata);
            Ok(id)
        }

        async fn get_metadata(
            &self,
            instance_id: &str,
        ) -> Result<InstanceMetadata, SandboxError> {
            self.state
                .lock()
                .unwrap()
                .instances
                .get(instance_id)
                .cloned()
                .ok_or_else(|| SandboxError::InstanceNotFound(instance_id.to_string()))
        }

        async fn update_metadata(
            &self,
            instance_id: &str,
            metadata: InstanceMetadata,
        ) -> Result<(), SandboxError> {
            self.state
                .lock()
                .unwrap()
                .instances
                .insert(instance_id.to_string(), metadata);
            Ok(())
        }

        async fn exec(
            &self,
            _instance_id: &str,
            command: &str,
            _options: ExecOptions,
        ) -> Result<ExecResult, SandboxError> {
            let mut state = self.state.lock().unwrap();
            state.exec_log.push(command.to_string());
            for (needle, script) in state.scripted.iter_mut() {
                if command.contains(needle.as_str()) {
                    match &mut script.remaining {
                        Some(0) => continue,
                        Some(n) => *n -= 1,
                        None => {}
                    }
                    return Ok(ExecResult {
                        exit_code: script.exit_code,
                        stdout: script.stdout.clone(),
                        stderr: script.stderr.clone(),
                    });
                }
            }
            Ok(ExecResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn write_file(
            &self,
            instance_id: &str,
            path: &str,
            contents: &[u8],
        ) -> Result<(), SandboxError> {
            ensure_safe_relative_path(path)?;
            self.state
                .lock()
                .unwrap()
                .files
                .insert(format!("{instance_id}/{path}"), contents.to_vec());
            Ok(())
        }

        async fn read_file(
            &self,
            instance_id: &str,
            path: &str,
        ) -> Result<Vec<u8>, SandboxError> {
            ensure_safe_relative_path(path)?;
            self.state
                .lock()
                .unwrap()
                .files
                .get(&format!("{instance_id}/{path}"))
                .cloned()
                .ok_or_else(|| SandboxError::InstanceNotFound(path.to_string()))
        }

        async fn start_process(
            &self,
            _instance_id: &str,
            _command: &str,
        ) -> Result<String, SandboxError> {
            Ok(uuid::Uuid::new_v4().to_string())
        }

        async fn get_process(
            &self,
            _instance_id: &str,
            process_id: &str,
        ) -> Result<ProcessInfo, SandboxError> {
            Ok(ProcessInfo {
                id: process_id.to_string(),
                command: String::new(),
                started_at: Utc::now(),
                running: true,
            })
        }

        async fn kill_process(
            &self,
            _instance_id: &str,
            _process_id: &str,
        ) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn list_processes(
            &self,
            _instance_id: &str,
        ) -> Result<Vec<ProcessInfo>, SandboxError> {
            Ok(Vec::new())
        }

        async fn expose_port(
            &self,
            _instance_id: &str,
            port: u16,
        ) -> Result<String, SandboxError> {
            let mut state = self.state.lock().unwrap();
            let port = if port == 0 {
                state.next_port += 1;
                40_000 + state.next_port
            } else {
                port
            };
            Ok(format!("http://localhost:{port}"))
        }

        async fn unexpose_port(&self, _instance_id: &str, _port: u16) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn set_env_vars(
            &self,
            _instance_id: &str,
            _vars: HashMap<String, String>,
        ) -> Result<(), SandboxError> {
            Ok(())
        }

        async fn get_exposed_ports(&self, _instance_id: &str) -> Result<Vec<u16>, SandboxError> {
            Ok(Vec::new())
        }

        async fn deploy(
            &self,
            instance_id: &str,
            files: &[SandboxFile],
        ) -> Result<(), SandboxError> {
            for file in files {
                self.write_file(instance_id, &file.path, &file.contents)
                    .await?;
            }
            Ok(())
        }

        async fn drain_process_output(
            &self,
            _instance_id: &str,
            _process_id: &str,
        ) -> Result<Vec<String>, SandboxError> {
            Ok(std::mem::take(
                &mut self.state.lock().unwrap().process_output,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockSandbox;
    use super::*;
    use crate::services::templates::TemplateManifest;

    fn template() -> Arc<TemplateDetails> {
        Arc::new(TemplateDetails {
            name: "react-vite".to_string(),
            manifest: TemplateManifest::default(),
            files: vec![SandboxFile::text("package.json", "{}\n")],
        })
    }

    fn manager_with_mock() -> (DeploymentManager, Arc<MockSandbox>) {
        let sandbox = Arc::new(MockSandbox::default());
        let manager = DeploymentManager::new(
            sandbox.clone(),
            template(),
            "proj-abc123".to_string(),
        );
        (manager, sandbox)
    }

    #[tokio::test]
    async fn first_deploy_provisions_and_exposes_preview() {
        let (manager, _sandbox) = manager_with_mock();
        let preview = manager
            .deploy_to_sandbox(&[SandboxFile::text("src/App.tsx", "x\n")], false, None, false, None)
            .await
            .unwrap();
        assert!(preview.unwrap().starts_with("http://localhost:"));
        assert!(manager.instance_id().await.is_some());
    }

    #[tokio::test]
    async fn empty_redeploy_is_noop_with_cached_preview() {
        let (manager, sandbox) = manager_with_mock();
        let first = manager
            .deploy_to_sandbox(&[SandboxFile::text("a.ts", "1\n")], false, None, false, None)
            .await
            .unwrap();
        let execs_before = sandbox.exec_log().len();

        let second = manager.deploy_to_sandbox(&[], false, None, false, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(sandbox.exec_log().len(), execs_before);
    }

    #[tokio::test]
    async fn runtime_errors_synthetic_when_not_deployed() {
        let (manager, _sandbox) = manager_with_mock();
        let errors = manager.fetch_runtime_errors(false).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, PREVIEW_UNAVAILABLE_ERROR);
    }

    #[tokio::test]
    async fn runtime_errors_are_harvested_and_cleared() {
        let (manager, sandbox) = manager_with_mock();
        manager
            .deploy_to_sandbox(&[SandboxFile::text("a.ts", "1\n")], false, None, false, None)
            .await
            .unwrap();
        sandbox.push_process_output("ReferenceError: foo is not defined");
        sandbox.push_process_output("vite dev server running");

        let errors = manager.fetch_runtime_errors(true).await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("ReferenceError"));

        let after_clear = manager.fetch_runtime_errors(false).await;
        assert!(after_clear.is_empty());
    }

    #[tokio::test]
    async fn static_analysis_parses_typecheck_rows() {
        let (manager, sandbox) = manager_with_mock();
        manager
            .deploy_to_sandbox(&[SandboxFile::text("a.ts", "1\n")], false, None, false, None)
            .await
            .unwrap();
        sandbox.script(
            "tsc",
            2,
            "src/App.tsx(10,5): error TS2304: Cannot find name 'foo'.\nsrc/lib.ts(1,1): error TS2307: Cannot find module 'zod' or its corresponding type declarations.",
            None,
        );

        let analysis = manager.run_static_analysis(None).await;
        assert_eq!(analysis.typecheck.issues.len(), 2);
        let first = &analysis.typecheck.issues[0];
        assert_eq!(first.file, "src/App.tsx");
        assert_eq!(first.line, 10);
        assert_eq!(first.code, "TS2304");
        assert_eq!(first.severity, IssueSeverity::Error);
    }

    #[test]
    fn lint_parser_reads_compact_format() {
        let issues = parse_lint_output(
            "src/App.tsx: line 3, col 7, Error - Unexpected var. (no-var)\nsrc/x.ts: line 1, col 1, Warning - Unused import.",
        );
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].code, "no-var");
        assert_eq!(issues[1].severity, IssueSeverity::Warning);
        assert!(issues[1].code.is_empty());
    }
}
