//! Command/file sandbox abstraction used for builds and preview.
//!
//! One concrete backend (`local-deployment`) runs commands on the host under
//! a per-instance directory guard; the trait keeps the agent decoupled from
//! the execution environment.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Path escapes the instance directory: {0}")]
    PathTraversal(String),
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),
    #[error("Process not found: {0}")]
    ProcessNotFound(String),
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
    #[error("Sandbox unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory relative to the instance root.
    pub cwd: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ProcessInfo {
    pub id: String,
    pub command: String,
    #[ts(type = "Date")]
    pub started_at: DateTime<Utc>,
    pub running: bool,
}

/// Persisted as `metadata.json` inside every instance directory.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct InstanceMetadata {
    pub template_name: String,
    pub project_name: String,
    #[ts(type = "Date")]
    pub start_time: DateTime<Utc>,
    pub preview_url: Option<String>,
    pub port: Option<u16>,
    pub process_id: Option<String>,
    pub do_not_touch_files: Vec<String>,
    pub redacted_files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SandboxFile {
    pub path: String,
    pub contents: Vec<u8>,
}

impl SandboxFile {
    pub fn text(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into().into_bytes(),
        }
    }
}

#[async_trait]
pub trait SandboxService: Send + Sync {
    /// Provision a new instance directory and return its id.
    async fn create_instance(
        &self,
        metadata: InstanceMetadata,
    ) -> Result<String, SandboxError>;

    async fn get_metadata(&self, instance_id: &str) -> Result<InstanceMetadata, SandboxError>;

    async fn update_metadata(
        &self,
        instance_id: &str,
        metadata: InstanceMetadata,
    ) -> Result<(), SandboxError>;

    async fn exec(
        &self,
        instance_id: &str,
        command: &str,
        options: ExecOptions,
    ) -> Result<ExecResult, SandboxError>;

    async fn write_file(
        &self,
        instance_id: &str,
        path: &str,
        contents: &[u8],
    ) -> Result<(), SandboxError>;

    async fn read_file(&self, instance_id: &str, path: &str) -> Result<Vec<u8>, SandboxError>;

    /// Spawn a detached process group and return its id.
    async fn start_process(&self, instance_id: &str, command: &str)
        -> Result<String, SandboxError>;

    async fn get_process(
        &self,
        instance_id: &str,
        process_id: &str,
    ) -> Result<ProcessInfo, SandboxError>;

    async fn kill_process(&self, instance_id: &str, process_id: &str) -> Result<(), SandboxError>;

    async fn list_processes(&self, instance_id: &str) -> Result<Vec<ProcessInfo>, SandboxError>;

    /// Returns the preview URL for the exposed port.
    async fn expose_port(&self, instance_id: &str, port: u16) -> Result<String, SandboxError>;

    async fn unexpose_port(&self, instance_id: &str, port: u16) -> Result<(), SandboxError>;

    async fn set_env_vars(
        &self,
        instance_id: &str,
        vars: HashMap<String, String>,
    ) -> Result<(), SandboxError>;

    async fn get_exposed_ports(&self, instance_id: &str) -> Result<Vec<u16>, SandboxError>;

    /// Write a batch of files into the instance directory.
    async fn deploy(
        &self,
        instance_id: &str,
        files: &[SandboxFile],
    ) -> Result<(), SandboxError>;

    /// Drain any output produced by a started process since the last call.
    async fn drain_process_output(
        &self,
        instance_id: &str,
        process_id: &str,
    ) -> Result<Vec<String>, SandboxError>;
}

/// Every path handed to the sandbox must stay inside the instance directory.
pub fn ensure_safe_relative_path(path: &str) -> Result<(), SandboxError> {
    let normalized = path.trim_start_matches('/');
    if normalized.split('/').any(|component| component == "..") {
        return Err(SandboxError::PathTraversal(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_components_are_rejected() {
        assert!(ensure_safe_relative_path("src/App.tsx").is_ok());
        assert!(ensure_safe_relative_path("/src/App.tsx").is_ok());
        assert!(ensure_safe_relative_path("../etc/passwd").is_err());
        assert!(ensure_safe_relative_path("src/../../etc/passwd").is_err());
        assert!(ensure_safe_relative_path("src/..hidden/ok.txt").is_ok());
    }
}
