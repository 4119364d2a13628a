//! GitHub export: replay the local commit history onto a remote repository
//! through the git data API (blobs → trees → commits → ref force-update),
//! deduplicating blob uploads by content hash.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use base64::Engine;
use chrono::{TimeZone, Utc};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use ts_rs::TS;

use crate::services::workspace::{
    CommitObject, GitObjectRecord, ObjectKind, decode_stored_object, objects,
};

const DEPLOY_BUTTON_PLACEHOLDER: &str = "[cloudflarebutton]";
const DEPLOY_BUTTON_MARKDOWN: &str =
    "[![Deploy to Cloudflare](https://deploy.workers.cloudflare.com/button)](https://deploy.workers.cloudflare.com)";
const DEPLOY_BUTTON_COMMIT_MESSAGE: &str = "docs: Add Cloudflare deploy button to README";
const BLOB_UPLOAD_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum GitHubServiceError {
    #[error("Invalid repository URL: {0}")]
    InvalidRepoUrl(String),
    #[error("Export source has no commits")]
    NoCommits,
    #[error("Malformed workspace objects: {0}")]
    MalformedObjects(String),
    #[error("GitHub API error: {0}")]
    Api(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    /// Accepts `https://github.com/owner/repo(.git)` and `owner/repo`.
    pub fn parse(repo_url: &str) -> Result<Self, GitHubServiceError> {
        let trimmed = repo_url
            .trim_end_matches('/')
            .trim_end_matches(".git");
        let path = trimmed
            .strip_prefix("https://github.com/")
            .or_else(|| trimmed.strip_prefix("http://github.com/"))
            .or_else(|| trimmed.strip_prefix("git@github.com:"))
            .unwrap_or(trimmed);
        let mut parts = path.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => {
                Ok(Self {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                })
            }
            _ => Err(GitHubServiceError::InvalidRepoUrl(repo_url.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GithubExportRequest {
    pub repo_url: String,
    pub token: String,
    pub default_branch: String,
    pub author_name: String,
    pub author_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct GithubExportResult {
    pub repo_url: String,
    pub commits_pushed: usize,
    pub blobs_created: usize,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct RemoteStatus {
    pub compatible: bool,
    pub behind_by: usize,
    pub ahead_by: usize,
    pub diverged_commits: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ExportProgress {
    Started { total_commits: usize },
    CommitPushed { index: usize, total: usize, message: String },
}

pub type ExportProgressCallback = Arc<dyn Fn(ExportProgress) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RemoteTreeEntry {
    pub path: String,
    pub sha: String,
}

#[derive(Debug, Clone)]
pub struct RemoteCommitPayload {
    pub message: String,
    pub tree_sha: String,
    pub parents: Vec<String>,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct RemoteCommitInfo {
    pub sha: String,
    pub message: String,
}

/// Thin client over the git data API; swapped for a recorder in tests.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn create_blob(
        &self,
        repo: &RepoRef,
        token: &str,
        content_base64: &str,
    ) -> Result<String, GitHubServiceError>;

    async fn create_tree(
        &self,
        repo: &RepoRef,
        token: &str,
        entries: &[RemoteTreeEntry],
    ) -> Result<String, GitHubServiceError>;

    async fn create_commit(
        &self,
        repo: &RepoRef,
        token: &str,
        payload: &RemoteCommitPayload,
    ) -> Result<String, GitHubServiceError>;

    async fn get_ref(
        &self,
        repo: &RepoRef,
        token: &str,
        branch: &str,
    ) -> Result<Option<String>, GitHubServiceError>;

    async fn force_update_ref(
        &self,
        repo: &RepoRef,
        token: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), GitHubServiceError>;

    async fn list_commits(
        &self,
        repo: &RepoRef,
        token: &str,
        branch: &str,
    ) -> Result<Vec<RemoteCommitInfo>, GitHubServiceError>;
}

pub struct RestGitHubApi {
    client: reqwest::Client,
    api_base: String,
}

impl RestGitHubApi {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }

    async fn post(
        &self,
        token: &str,
        url: String,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, GitHubServiceError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "vibesdk-export")
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let value: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(GitHubServiceError::Api(format!(
                "{status}: {}",
                value["message"].as_str().unwrap_or("unknown error")
            )));
        }
        Ok(value)
    }

    fn sha_from(value: &serde_json::Value) -> Result<String, GitHubServiceError> {
        value["sha"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GitHubServiceError::Api("response missing sha".to_string()))
    }
}

#[async_trait]
impl GitHubApi for RestGitHubApi {
    async fn create_blob(
        &self,
        repo: &RepoRef,
        token: &str,
        content_base64: &str,
    ) -> Result<String, GitHubServiceError> {
        let url = format!(
            "{}/repos/{}/{}/git/blobs",
            self.api_base, repo.owner, repo.repo
        );
        let value = self
            .post(
                token,
                url,
                json!({ "content": content_base64, "encoding": "base64" }),
            )
            .await?;
        Self::sha_from(&value)
    }

    async fn create_tree(
        &self,
        repo: &RepoRef,
        token: &str,
        entries: &[RemoteTreeEntry],
    ) -> Result<String, GitHubServiceError> {
        let url = format!(
            "{}/repos/{}/{}/git/trees",
            self.api_base, repo.owner, repo.repo
        );
        let tree: Vec<serde_json::Value> = entries
            .iter()
            .map(|entry| {
                json!({
                    "path": entry.path,
                    "mode": "100644",
                    "type": "blob",
                    "sha": entry.sha,
                })
            })
            .collect();
        let value = self.post(token, url, json!({ "tree": tree })).await?;
        Self::sha_from(&value)
    }

    async fn create_commit(
        &self,
        repo: &RepoRef,
        token: &str,
        payload: &RemoteCommitPayload,
    ) -> Result<String, GitHubServiceError> {
        let url = format!(
            "{}/repos/{}/{}/git/commits",
            self.api_base, repo.owner, repo.repo
        );
        let date = Utc
            .timestamp_opt(payload.timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        let signature = json!({
            "name": payload.author_name,
            "email": payload.author_email,
            "date": date,
        });
        let value = self
            .post(
                token,
                url,
                json!({
                    "message": payload.message,
                    "tree": payload.tree_sha,
                    "parents": payload.parents,
                    "author": signature,
                    "committer": signature,
                }),
            )
            .await?;
        Self::sha_from(&value)
    }

    async fn get_ref(
        &self,
        repo: &RepoRef,
        token: &str,
        branch: &str,
    ) -> Result<Option<String>, GitHubServiceError> {
        let url = format!(
            "{}/repos/{}/{}/git/ref/heads/{}",
            self.api_base, repo.owner, repo.repo, branch
        );
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "vibesdk-export")
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value: serde_json::Value = response.json().await?;
        Ok(value["object"]["sha"].as_str().map(str::to_string))
    }

    async fn force_update_ref(
        &self,
        repo: &RepoRef,
        token: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), GitHubServiceError> {
        let existing = self.get_ref(repo, token, branch).await?;
        if existing.is_none() {
            let url = format!(
                "{}/repos/{}/{}/git/refs",
                self.api_base, repo.owner, repo.repo
            );
            self.post(
                token,
                url,
                json!({ "ref": format!("refs/heads/{branch}"), "sha": sha }),
            )
            .await?;
            return Ok(());
        }

        let url = format!(
            "{}/repos/{}/{}/git/refs/heads/{}",
            self.api_base, repo.owner, repo.repo, branch
        );
        let response = self
            .client
            .patch(url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "vibesdk-export")
            .json(&json!({ "sha": sha, "force": true }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let value: serde_json::Value = response.json().await.unwrap_or_default();
            return Err(GitHubServiceError::Api(format!(
                "{status}: {}",
                value["message"].as_str().unwrap_or("ref update failed")
            )));
        }
        Ok(())
    }

    async fn list_commits(
        &self,
        repo: &RepoRef,
        token: &str,
        branch: &str,
    ) -> Result<Vec<RemoteCommitInfo>, GitHubServiceError> {
        let url = format!(
            "{}/repos/{}/{}/commits?sha={}&per_page=100",
            self.api_base, repo.owner, repo.repo, branch
        );
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "vibesdk-export")
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let value: serde_json::Value = response.json().await?;
        let commits = value
            .as_array()
            .ok_or_else(|| GitHubServiceError::Api("commit list is not an array".to_string()))?;
        Ok(commits
            .iter()
            .filter_map(|entry| {
                Some(RemoteCommitInfo {
                    sha: entry["sha"].as_str()?.to_string(),
                    message: entry["commit"]["message"].as_str()?.to_string(),
                })
            })
            .collect())
    }
}

/// In-memory view of an exported object set.
struct LocalHistory {
    /// Oldest → newest.
    commits: Vec<(String, CommitObject)>,
    objects: HashMap<String, (ObjectKind, Vec<u8>)>,
}

impl LocalHistory {
    fn from_records(
        records: &[GitObjectRecord],
        default_branch: &str,
    ) -> Result<Self, GitHubServiceError> {
        let mut objects = HashMap::new();
        let mut refs = HashMap::new();
        for record in records {
            if let Some(oid) = record.path.strip_prefix("objects/") {
                let decoded = decode_stored_object(&record.data)
                    .map_err(|err| GitHubServiceError::MalformedObjects(err.to_string()))?;
                objects.insert(oid.to_string(), decoded);
            } else {
                refs.insert(
                    record.path.clone(),
                    String::from_utf8_lossy(&record.data).to_string(),
                );
            }
        }

        let head = refs
            .get("HEAD")
            .and_then(|value| value.strip_prefix("ref: "))
            .map(str::to_string)
            .unwrap_or_else(|| format!("refs/heads/{default_branch}"));
        let mut cursor = refs.get(&head).cloned();

        let mut commits = Vec::new();
        while let Some(oid) = cursor {
            let (kind, body) = objects
                .get(&oid)
                .ok_or_else(|| GitHubServiceError::MalformedObjects(format!("missing {oid}")))?;
            if *kind != ObjectKind::Commit {
                return Err(GitHubServiceError::MalformedObjects(format!(
                    "{oid} is not a commit"
                )));
            }
            let commit = objects::decode_commit(body)
                .map_err(|err| GitHubServiceError::MalformedObjects(err.to_string()))?;
            cursor = commit.parents.first().cloned();
            commits.push((oid, commit));
        }
        commits.reverse();

        if commits.is_empty() {
            return Err(GitHubServiceError::NoCommits);
        }
        Ok(Self { commits, objects })
    }

    fn commit_files(&self, commit: &CommitObject) -> Result<Vec<(String, Vec<u8>)>, GitHubServiceError> {
        let mut files = Vec::new();
        let mut stack = vec![(commit.tree.clone(), String::new())];
        while let Some((tree_oid, prefix)) = stack.pop() {
            let (kind, body) = self.objects.get(&tree_oid).ok_or_else(|| {
                GitHubServiceError::MalformedObjects(format!("missing tree {tree_oid}"))
            })?;
            if *kind != ObjectKind::Tree {
                return Err(GitHubServiceError::MalformedObjects(format!(
                    "{tree_oid} is not a tree"
                )));
            }
            for entry in objects::decode_tree(body)
                .map_err(|err| GitHubServiceError::MalformedObjects(err.to_string()))?
            {
                let path = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{prefix}/{}", entry.name)
                };
                match entry.kind {
                    ObjectKind::Tree => stack.push((entry.oid, path)),
                    _ => {
                        let (_, blob) = self.objects.get(&entry.oid).ok_or_else(|| {
                            GitHubServiceError::MalformedObjects(format!(
                                "missing blob {}",
                                entry.oid
                            ))
                        })?;
                        files.push((path, blob.clone()));
                    }
                }
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }
}

#[derive(Clone)]
pub struct GitHubService {
    api: Arc<dyn GitHubApi>,
}

impl GitHubService {
    pub fn new(api_base: &str) -> Self {
        Self {
            api: Arc::new(RestGitHubApi::new(api_base)),
        }
    }

    pub fn with_api(api: Arc<dyn GitHubApi>) -> Self {
        Self { api }
    }

    /// Replay every local commit onto the remote repository, creating blobs
    /// only for content not uploaded earlier in the run, then force-update
    /// the target branch to the last pushed commit.
    pub async fn export(
        &self,
        records: &[GitObjectRecord],
        request: &GithubExportRequest,
        progress: Option<ExportProgressCallback>,
    ) -> Result<GithubExportResult, GitHubServiceError> {
        let repo = RepoRef::parse(&request.repo_url)?;
        let mut history = LocalHistory::from_records(records, &request.default_branch)?;
        self.append_deploy_button_commit(&mut history)?;

        let total = history.commits.len();
        if let Some(progress) = &progress {
            progress(ExportProgress::Started { total_commits: total });
        }

        let mut blob_cache: HashMap<String, String> = HashMap::new();
        let mut parent: Option<String> = None;
        let mut blobs_created = 0usize;

        for (index, (_, commit)) in history.commits.iter().enumerate() {
            let files = history.commit_files(commit)?;

            // Upload only cache misses, in parallel.
            let mut misses: Vec<(String, Vec<u8>)> = Vec::new();
            let mut hashes = Vec::with_capacity(files.len());
            for (path, contents) in &files {
                let hash = content_hash(contents);
                if !blob_cache.contains_key(&hash)
                    && !misses.iter().any(|(h, _)| *h == hash)
                {
                    misses.push((hash.clone(), contents.clone()));
                }
                hashes.push((path.clone(), hash));
            }

            let uploads = stream::iter(misses.into_iter().map(|(hash, contents)| {
                let api = self.api.clone();
                let repo = repo.clone();
                let token = request.token.clone();
                async move {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&contents);
                    let sha = api.create_blob(&repo, &token, &encoded).await?;
                    Ok::<(String, String), GitHubServiceError>((hash, sha))
                }
            }))
            .buffer_unordered(BLOB_UPLOAD_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

            for upload in uploads {
                let (hash, sha) = upload?;
                blob_cache.insert(hash, sha);
                blobs_created += 1;
            }

            let entries: Vec<RemoteTreeEntry> = hashes
                .into_iter()
                .map(|(path, hash)| RemoteTreeEntry {
                    sha: blob_cache[&hash].clone(),
                    path,
                })
                .collect();
            let tree_sha = self.api.create_tree(&repo, &request.token, &entries).await?;

            let commit_sha = self
                .api
                .create_commit(
                    &repo,
                    &request.token,
                    &RemoteCommitPayload {
                        message: commit.message.clone(),
                        tree_sha,
                        parents: parent.clone().into_iter().collect(),
                        author_name: commit.author.name.clone(),
                        author_email: commit.author.email.clone(),
                        timestamp: commit.author.timestamp,
                    },
                )
                .await?;

            if let Some(progress) = &progress {
                progress(ExportProgress::CommitPushed {
                    index: index + 1,
                    total,
                    message: commit.message.clone(),
                });
            }
            parent = Some(commit_sha);
        }

        let last = parent.expect("at least one commit was pushed");
        self.api
            .force_update_ref(&repo, &request.token, &request.default_branch, &last)
            .await?;

        tracing::info!(
            repo = %request.repo_url,
            commits = total,
            blobs = blobs_created,
            "GitHub export complete"
        );
        Ok(GithubExportResult {
            repo_url: request.repo_url.clone(),
            commits_pushed: total,
            blobs_created,
            branch: request.default_branch.clone(),
        })
    }

    /// Compare local history against the remote branch by normalized commit
    /// message, ignoring the synthetic deploy-button commit on the remote.
    pub async fn check_remote_status(
        &self,
        records: &[GitObjectRecord],
        request: &GithubExportRequest,
    ) -> Result<RemoteStatus, GitHubServiceError> {
        let repo = RepoRef::parse(&request.repo_url)?;
        let history = LocalHistory::from_records(records, &request.default_branch)?;
        let local: Vec<String> = history
            .commits
            .iter()
            .map(|(_, commit)| commit.message.trim().to_string())
            .collect();

        let mut remote: Vec<String> = self
            .api
            .list_commits(&repo, &request.token, &request.default_branch)
            .await?
            .into_iter()
            .map(|info| info.message.trim().to_string())
            .filter(|message| message != DEPLOY_BUTTON_COMMIT_MESSAGE)
            .collect();
        // The API returns newest first.
        remote.reverse();

        let common = local
            .iter()
            .zip(remote.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let ahead_by = local.len() - common;
        let behind_by = remote.len() - common;
        let diverged_commits: Vec<String> = local[common..]
            .iter()
            .zip(remote[common..].iter())
            .map(|(local_message, _)| local_message.clone())
            .collect();

        Ok(RemoteStatus {
            compatible: diverged_commits.is_empty() && behind_by == 0,
            behind_by,
            ahead_by,
            diverged_commits,
        })
    }

    /// When the final tree carries a README with the deploy-button
    /// placeholder, append a synthetic commit substituting it.
    fn append_deploy_button_commit(
        &self,
        history: &mut LocalHistory,
    ) -> Result<(), GitHubServiceError> {
        let Some((_, last)) = history.commits.last() else {
            return Ok(());
        };
        let files = history.commit_files(last)?;
        let Some((_, readme)) = files.iter().find(|(path, _)| path == "README.md") else {
            return Ok(());
        };
        let Ok(text) = String::from_utf8(readme.clone()) else {
            return Ok(());
        };
        if !text.contains(DEPLOY_BUTTON_PLACEHOLDER) {
            return Ok(());
        }

        let substituted = text.replace(DEPLOY_BUTTON_PLACEHOLDER, DEPLOY_BUTTON_MARKDOWN);
        let blob_oid = objects::hash_object(ObjectKind::Blob, substituted.as_bytes());
        history.objects.insert(
            blob_oid.clone(),
            (ObjectKind::Blob, substituted.into_bytes()),
        );

        // Rebuild a flat tree for the synthetic commit.
        let mut entries: Vec<objects::TreeEntry> = Vec::new();
        for (path, contents) in &files {
            let oid = if path == "README.md" {
                blob_oid.clone()
            } else {
                let oid = objects::hash_object(ObjectKind::Blob, contents);
                history
                    .objects
                    .entry(oid.clone())
                    .or_insert((ObjectKind::Blob, contents.clone()));
                oid
            };
            entries.push(objects::TreeEntry {
                mode: "100644".to_string(),
                kind: ObjectKind::Blob,
                oid,
                name: path.clone(),
            });
        }
        let tree_body = objects::encode_tree(&entries);
        let tree_oid = objects::hash_object(ObjectKind::Tree, &tree_body);
        history
            .objects
            .insert(tree_oid.clone(), (ObjectKind::Tree, tree_body));

        let last_oid = history.commits.last().map(|(oid, _)| oid.clone());
        let author = history.commits.last().map(|(_, c)| c.author.clone()).expect("non-empty");
        let commit = CommitObject {
            tree: tree_oid,
            parents: last_oid.into_iter().collect(),
            author: objects::Signature {
                timestamp: Utc::now().timestamp(),
                ..author
            },
            message: DEPLOY_BUTTON_COMMIT_MESSAGE.to_string(),
        };
        let body = objects::encode_commit(&commit);
        let oid = objects::hash_object(ObjectKind::Commit, &body);
        history.objects.insert(oid.clone(), (ObjectKind::Commit, body));
        history.commits.push((oid, commit));
        Ok(())
    }
}

fn content_hash(contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use db::agent_store::AgentDb;

    use super::*;
    use crate::services::workspace::{StagedFile, Workspace};

    #[derive(Default)]
    struct RecordingApi {
        pub blobs: Mutex<Vec<String>>,
        pub trees: Mutex<usize>,
        pub commits: Mutex<Vec<RemoteCommitPayload>>,
        pub ref_updates: Mutex<Vec<String>>,
        pub remote_commits: Mutex<Vec<RemoteCommitInfo>>,
    }

    #[async_trait]
    impl GitHubApi for RecordingApi {
        async fn create_blob(
            &self,
            _repo: &RepoRef,
            _token: &str,
            content_base64: &str,
        ) -> Result<String, GitHubServiceError> {
            let mut blobs = self.blobs.lock().unwrap();
            blobs.push(content_base64.to_string());
            Ok(format!("blob-{}", blobs.len()))
        }

        async fn create_tree(
            &self,
            _repo: &RepoRef,
            _token: &str,
            _entries: &[RemoteTreeEntry],
        ) -> Result<String, GitHubServiceError> {
            let mut trees = self.trees.lock().unwrap();
            *trees += 1;
            Ok(format!("tree-{trees}"))
        }

        async fn create_commit(
            &self,
            _repo: &RepoRef,
            _token: &str,
            payload: &RemoteCommitPayload,
        ) -> Result<String, GitHubServiceError> {
            let mut commits = self.commits.lock().unwrap();
            commits.push(payload.clone());
            Ok(format!("commit-{}", commits.len()))
        }

        async fn get_ref(
            &self,
            _repo: &RepoRef,
            _token: &str,
            _branch: &str,
        ) -> Result<Option<String>, GitHubServiceError> {
            Ok(None)
        }

        async fn force_update_ref(
            &self,
            _repo: &RepoRef,
            _token: &str,
            branch: &str,
            sha: &str,
        ) -> Result<(), GitHubServiceError> {
            self.ref_updates
                .lock()
                .unwrap()
                .push(format!("{branch}={sha}"));
            Ok(())
        }

        async fn list_commits(
            &self,
            _repo: &RepoRef,
            _token: &str,
            _branch: &str,
        ) -> Result<Vec<RemoteCommitInfo>, GitHubServiceError> {
            Ok(self.remote_commits.lock().unwrap().clone())
        }
    }

    fn request() -> GithubExportRequest {
        GithubExportRequest {
            repo_url: "https://github.com/acme/todo-app".to_string(),
            token: "ghp_test".to_string(),
            default_branch: "main".to_string(),
            author_name: "Vibesdk".to_string(),
            author_email: "vibesdk-bot@users.noreply.github.com".to_string(),
        }
    }

    async fn records_with_three_commits() -> Vec<GitObjectRecord> {
        let store = AgentDb::open_in_memory().await.unwrap();
        let ws = Workspace::new(&store);
        ws.init(None).await.unwrap();
        // Same unchanged file in all three commits; a second file churns.
        ws.commit(
            &[
                StagedFile::text("static.txt", "never changes\n"),
                StagedFile::text("churn.txt", "v1\n"),
            ],
            "first",
        )
        .await
        .unwrap();
        ws.commit(&[StagedFile::text("churn.txt", "v2\n")], "second")
            .await
            .unwrap();
        ws.commit(&[StagedFile::text("churn.txt", "v3\n")], "third")
            .await
            .unwrap();
        ws.export_git_objects().await.unwrap()
    }

    #[test]
    fn repo_ref_parses_common_shapes() {
        let parsed = RepoRef::parse("https://github.com/acme/todo-app.git").unwrap();
        assert_eq!(parsed.owner, "acme");
        assert_eq!(parsed.repo, "todo-app");
        assert!(RepoRef::parse("not a url at all ://").is_err());
    }

    #[tokio::test]
    async fn export_dedups_blobs_and_force_updates_ref() {
        let api = Arc::new(RecordingApi::default());
        let service = GitHubService::with_api(api.clone());
        let records = records_with_three_commits().await;

        let result = service.export(&records, &request(), None).await.unwrap();
        assert_eq!(result.commits_pushed, 3);
        // static.txt uploaded once, churn.txt once per distinct content.
        assert_eq!(result.blobs_created, 4);
        assert_eq!(api.blobs.lock().unwrap().len(), 4);

        let commits = api.commits.lock().unwrap();
        assert_eq!(commits.len(), 3);
        assert!(commits[0].parents.is_empty());
        assert_eq!(commits[1].parents, vec!["commit-1".to_string()]);

        let refs = api.ref_updates.lock().unwrap();
        assert_eq!(refs.as_slice(), ["main=commit-3".to_string()]);
    }

    #[tokio::test]
    async fn readme_placeholder_becomes_extra_commit() {
        let store = AgentDb::open_in_memory().await.unwrap();
        let ws = Workspace::new(&store);
        ws.init(None).await.unwrap();
        ws.commit(
            &[StagedFile::text(
                "README.md",
                "# App\n\n[cloudflarebutton]\n",
            )],
            "first",
        )
        .await
        .unwrap();
        let records = ws.export_git_objects().await.unwrap();

        let api = Arc::new(RecordingApi::default());
        let service = GitHubService::with_api(api.clone());
        let result = service.export(&records, &request(), None).await.unwrap();

        assert_eq!(result.commits_pushed, 2);
        let commits = api.commits.lock().unwrap();
        assert_eq!(commits[1].message, DEPLOY_BUTTON_COMMIT_MESSAGE);
    }

    #[tokio::test]
    async fn remote_status_ignores_deploy_button_commit() {
        let api = Arc::new(RecordingApi::default());
        {
            let mut remote = api.remote_commits.lock().unwrap();
            // Newest first, as the API returns them.
            remote.push(RemoteCommitInfo {
                sha: "r3".to_string(),
                message: DEPLOY_BUTTON_COMMIT_MESSAGE.to_string(),
            });
            remote.push(RemoteCommitInfo {
                sha: "r2".to_string(),
                message: "second ".to_string(),
            });
            remote.push(RemoteCommitInfo {
                sha: "r1".to_string(),
                message: "first".to_string(),
            });
        }
        let service = GitHubService::with_api(api);
        let records = records_with_three_commits().await;

        let status = service
            .check_remote_status(&records, &request())
            .await
            .unwrap();
        assert!(status.compatible);
        assert_eq!(status.behind_by, 0);
        assert_eq!(status.ahead_by, 1);
        assert!(status.diverged_commits.is_empty());
    }
}
