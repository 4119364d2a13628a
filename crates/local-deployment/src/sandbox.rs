//! Local sandbox backend: every instance is a directory under
//! `<assets>/instances/<id>/`, commands run with that directory as cwd, and
//! long-lived processes are detached process groups whose output is drained
//! into per-process buffers.

use std::{
    collections::HashMap,
    path::PathBuf,
    process::Stdio,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use command_group::AsyncCommandGroup;
use dashmap::DashMap;
use services::services::sandbox::{
    ExecOptions, ExecResult, InstanceMetadata, ProcessInfo, SandboxError, SandboxFile,
    SandboxService, ensure_safe_relative_path,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::Mutex,
};
use uuid::Uuid;

const METADATA_FILE: &str = "metadata.json";
const DEFAULT_EXEC_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

struct ProcessEntry {
    command: String,
    started_at: DateTime<Utc>,
    child: Mutex<command_group::AsyncGroupChild>,
    output: Arc<std::sync::Mutex<Vec<String>>>,
}

pub struct LocalSandboxService {
    root: PathBuf,
    processes: DashMap<String, Arc<ProcessEntry>>,
    exposed_ports: DashMap<String, Vec<u16>>,
    env_vars: DashMap<String, HashMap<String, String>>,
}

impl LocalSandboxService {
    pub fn new() -> Self {
        Self::with_root(utils::assets::instances_dir())
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            processes: DashMap::new(),
            exposed_ports: DashMap::new(),
            env_vars: DashMap::new(),
        }
    }

    fn instance_dir(&self, instance_id: &str) -> Result<PathBuf, SandboxError> {
        ensure_safe_relative_path(instance_id)?;
        let dir = self.root.join(instance_id);
        if !dir.is_dir() {
            return Err(SandboxError::InstanceNotFound(instance_id.to_string()));
        }
        Ok(dir)
    }

    fn resolve(&self, instance_id: &str, path: &str) -> Result<PathBuf, SandboxError> {
        ensure_safe_relative_path(path)?;
        Ok(self
            .instance_dir(instance_id)?
            .join(path.trim_start_matches('/')))
    }

    fn apply_env(&self, instance_id: &str, command: &mut Command) {
        if let Some(vars) = self.env_vars.get(instance_id) {
            for (key, value) in vars.iter() {
                command.env(key, value);
            }
        }
    }

    fn process_key(instance_id: &str, process_id: &str) -> String {
        format!("{instance_id}/{process_id}")
    }
}

impl Default for LocalSandboxService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxService for LocalSandboxService {
    async fn create_instance(&self, metadata: InstanceMetadata) -> Result<String, SandboxError> {
        let instance_id = Uuid::new_v4().simple().to_string();
        let dir = self.root.join(&instance_id);
        tokio::fs::create_dir_all(&dir).await?;
        let payload = serde_json::to_vec_pretty(&metadata)?;
        tokio::fs::write(dir.join(METADATA_FILE), payload).await?;
        tracing::info!(instance_id, project = metadata.project_name, "Instance created");
        Ok(instance_id)
    }

    async fn get_metadata(&self, instance_id: &str) -> Result<InstanceMetadata, SandboxError> {
        let dir = self.instance_dir(instance_id)?;
        let raw = tokio::fs::read(dir.join(METADATA_FILE)).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn update_metadata(
        &self,
        instance_id: &str,
        metadata: InstanceMetadata,
    ) -> Result<(), SandboxError> {
        let dir = self.instance_dir(instance_id)?;
        let payload = serde_json::to_vec_pretty(&metadata)?;
        tokio::fs::write(dir.join(METADATA_FILE), payload).await?;
        Ok(())
    }

    async fn exec(
        &self,
        instance_id: &str,
        command_line: &str,
        options: ExecOptions,
    ) -> Result<ExecResult, SandboxError> {
        let instance_dir = self.instance_dir(instance_id)?;
        let cwd = match &options.cwd {
            Some(sub) => {
                ensure_safe_relative_path(sub)?;
                instance_dir.join(sub)
            }
            None => instance_dir,
        };

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(command_line)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.apply_env(instance_id, &mut command);

        let timeout = options.timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT);
        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| SandboxError::Timeout(timeout))??;

        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn write_file(
        &self,
        instance_id: &str,
        path: &str,
        contents: &[u8],
    ) -> Result<(), SandboxError> {
        let target = self.resolve(instance_id, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, contents).await?;
        Ok(())
    }

    async fn read_file(&self, instance_id: &str, path: &str) -> Result<Vec<u8>, SandboxError> {
        let target = self.resolve(instance_id, path)?;
        Ok(tokio::fs::read(target).await?)
    }

    /// Spawn a detached process group. The command is parsed directly (no
    /// shell) so a runaway dev server cannot smuggle shell operators in.
    async fn start_process(
        &self,
        instance_id: &str,
        command_line: &str,
    ) -> Result<String, SandboxError> {
        let instance_dir = self.instance_dir(instance_id)?;
        let (program, args) = parse_direct_command(command_line)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&instance_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.apply_env(instance_id, &mut command);

        let mut child = command.group_spawn()?;
        let output = Arc::new(std::sync::Mutex::new(Vec::new()));

        if let Some(stdout) = child.inner().stdout.take() {
            spawn_line_reader(stdout, output.clone());
        }
        if let Some(stderr) = child.inner().stderr.take() {
            spawn_line_reader(stderr, output.clone());
        }

        let process_id = Uuid::new_v4().simple().to_string();
        self.processes.insert(
            Self::process_key(instance_id, &process_id),
            Arc::new(ProcessEntry {
                command: command_line.to_string(),
                started_at: Utc::now(),
                child: Mutex::new(child),
                output,
            }),
        );
        tracing::info!(instance_id, process_id, command = command_line, "Process started");
        Ok(process_id)
    }

    async fn get_process(
        &self,
        instance_id: &str,
        process_id: &str,
    ) -> Result<ProcessInfo, SandboxError> {
        let key = Self::process_key(instance_id, process_id);
        let entry = self
            .processes
            .get(&key)
            .map(|e| e.clone())
            .ok_or_else(|| SandboxError::ProcessNotFound(process_id.to_string()))?;
        let running = entry.child.lock().await.try_wait()?.is_none();
        Ok(ProcessInfo {
            id: process_id.to_string(),
            command: entry.command.clone(),
            started_at: entry.started_at,
            running,
        })
    }

    async fn kill_process(&self, instance_id: &str, process_id: &str) -> Result<(), SandboxError> {
        let key = Self::process_key(instance_id, process_id);
        let entry = self
            .processes
            .remove(&key)
            .map(|(_, entry)| entry)
            .ok_or_else(|| SandboxError::ProcessNotFound(process_id.to_string()))?;
        let mut child = entry.child.lock().await;
        if let Err(err) = child.kill().await {
            tracing::debug!("Process {process_id} already gone: {err}");
        }
        Ok(())
    }

    async fn list_processes(&self, instance_id: &str) -> Result<Vec<ProcessInfo>, SandboxError> {
        let prefix = format!("{instance_id}/");
        let mut out = Vec::new();
        for entry in self.processes.iter() {
            if let Some(process_id) = entry.key().strip_prefix(&prefix) {
                let running = entry.value().child.lock().await.try_wait()?.is_none();
                out.push(ProcessInfo {
                    id: process_id.to_string(),
                    command: entry.value().command.clone(),
                    started_at: entry.value().started_at,
                    running,
                });
            }
        }
        Ok(out)
    }

    async fn expose_port(&self, instance_id: &str, port: u16) -> Result<String, SandboxError> {
        self.instance_dir(instance_id)?;
        let port = if port == 0 { pick_free_port()? } else { port };
        self.exposed_ports
            .entry(instance_id.to_string())
            .or_default()
            .push(port);
        Ok(format!("http://127.0.0.1:{port}"))
    }

    async fn unexpose_port(&self, instance_id: &str, port: u16) -> Result<(), SandboxError> {
        if let Some(mut ports) = self.exposed_ports.get_mut(instance_id) {
            ports.retain(|p| *p != port);
        }
        Ok(())
    }

    async fn set_env_vars(
        &self,
        instance_id: &str,
        vars: HashMap<String, String>,
    ) -> Result<(), SandboxError> {
        self.instance_dir(instance_id)?;
        self.env_vars
            .entry(instance_id.to_string())
            .or_default()
            .extend(vars);
        Ok(())
    }

    async fn get_exposed_ports(&self, instance_id: &str) -> Result<Vec<u16>, SandboxError> {
        Ok(self
            .exposed_ports
            .get(instance_id)
            .map(|ports| ports.clone())
            .unwrap_or_default())
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
        instance_id: &str,
        process_id: &str,
    ) -> Result<Vec<String>, SandboxError> {
        let key = Self::process_key(instance_id, process_id);
        let entry = self
            .processes
            .get(&key)
            .map(|e| e.clone())
            .ok_or_else(|| SandboxError::ProcessNotFound(process_id.to_string()))?;
        Ok(std::mem::take(&mut *entry.output.lock().unwrap()))
    }
}

fn spawn_line_reader(
    stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    buffer: Arc<std::sync::Mutex<Vec<String>>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            buffer.lock().unwrap().push(line);
        }
    });
}

fn parse_direct_command(command_line: &str) -> Result<(String, Vec<String>), SandboxError> {
    let trimmed = command_line.trim();
    if trimmed.is_empty() {
        return Err(SandboxError::Unavailable("empty command".to_string()));
    }
    let parts = shlex::split(trimmed)
        .ok_or_else(|| SandboxError::Unavailable("unparseable command".to_string()))?;
    if parts.is_empty() {
        return Err(SandboxError::Unavailable("empty command".to_string()));
    }
    let has_shell_operators = parts.iter().any(|part| {
        matches!(
            part.as_str(),
            "|" | "||" | "&" | "&&" | ";" | ">" | ">>" | "<" | "<<"
        )
    });
    if has_shell_operators {
        return Err(SandboxError::Unavailable(
            "process commands must not contain shell operators".to_string(),
        ));
    }
    let mut iter = parts.into_iter();
    let program = iter.next().expect("non-empty parts");
    Ok((program, iter.collect()))
}

fn pick_free_port() -> Result<u16, SandboxError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> InstanceMetadata {
        InstanceMetadata {
            template_name: "react-vite".to_string(),
            project_name: "proj-test".to_string(),
            start_time: Utc::now(),
            preview_url: None,
            port: None,
            process_id: None,
            do_not_touch_files: Vec::new(),
            redacted_files: Vec::new(),
        }
    }

    async fn sandbox_in_tempdir() -> (LocalSandboxService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (LocalSandboxService::with_root(dir.path().to_path_buf()), dir)
    }

    #[tokio::test]
    async fn exec_runs_with_instance_cwd_and_captures_output() {
        let (sandbox, _dir) = sandbox_in_tempdir().await;
        let instance = sandbox.create_instance(metadata()).await.unwrap();
        sandbox
            .write_file(&instance, "hello.txt", b"hi there\n")
            .await
            .unwrap();

        let result = sandbox
            .exec(&instance, "cat hello.txt", ExecOptions::default())
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hi there\n");

        let failing = sandbox
            .exec(&instance, "cat does-not-exist.txt", ExecOptions::default())
            .await
            .unwrap();
        assert!(!failing.success());
        assert!(!failing.stderr.is_empty());
    }

    #[tokio::test]
    async fn path_traversal_is_rejected_everywhere() {
        let (sandbox, _dir) = sandbox_in_tempdir().await;
        let instance = sandbox.create_instance(metadata()).await.unwrap();

        let write = sandbox
            .write_file(&instance, "../escape.txt", b"nope")
            .await;
        assert!(matches!(write, Err(SandboxError::PathTraversal(_))));

        let read = sandbox.read_file(&instance, "a/../../escape.txt").await;
        assert!(matches!(read, Err(SandboxError::PathTraversal(_))));
    }

    #[tokio::test]
    async fn metadata_roundtrips_through_disk() {
        let (sandbox, _dir) = sandbox_in_tempdir().await;
        let instance = sandbox.create_instance(metadata()).await.unwrap();
        let mut loaded = sandbox.get_metadata(&instance).await.unwrap();
        assert_eq!(loaded.project_name, "proj-test");

        loaded.preview_url = Some("http://127.0.0.1:41234".to_string());
        sandbox
            .update_metadata(&instance, loaded.clone())
            .await
            .unwrap();
        let reloaded = sandbox.get_metadata(&instance).await.unwrap();
        assert_eq!(reloaded.preview_url, loaded.preview_url);
    }

    #[tokio::test]
    async fn start_process_detaches_and_output_is_drained() {
        let (sandbox, _dir) = sandbox_in_tempdir().await;
        let instance = sandbox.create_instance(metadata()).await.unwrap();
        let process_id = sandbox
            .start_process(&instance, "echo started-up")
            .await
            .unwrap();

        // Give the reader task a moment to pull the line in.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let output = sandbox
            .drain_process_output(&instance, &process_id)
            .await
            .unwrap();
        assert_eq!(output, vec!["started-up".to_string()]);
        assert!(sandbox
            .drain_process_output(&instance, &process_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn process_commands_reject_shell_operators() {
        let (sandbox, _dir) = sandbox_in_tempdir().await;
        let instance = sandbox.create_instance(metadata()).await.unwrap();
        let result = sandbox
            .start_process(&instance, "echo hi && rm -rf /")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn expose_port_returns_loopback_preview_url() {
        let (sandbox, _dir) = sandbox_in_tempdir().await;
        let instance = sandbox.create_instance(metadata()).await.unwrap();
        let url = sandbox.expose_port(&instance, 0).await.unwrap();
        assert!(url.starts_with("http://127.0.0.1:"));
        assert_eq!(sandbox.get_exposed_ports(&instance).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exec_timeout_kills_the_command() {
        let (sandbox, _dir) = sandbox_in_tempdir().await;
        let instance = sandbox.create_instance(metadata()).await.unwrap();
        let result = sandbox
            .exec(
                &instance,
                "sleep 5",
                ExecOptions {
                    cwd: None,
                    timeout: Some(std::time::Duration::from_millis(100)),
                },
            )
            .await;
        assert!(matches!(result, Err(SandboxError::Timeout(_))));
    }
}
