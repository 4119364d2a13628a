//! Content-addressed, version-controlled file store backing every agent.
//!
//! A minimal git: raw objects keyed by hash in the agent store, a ref table
//! with a symbolic HEAD, an index holding the staged blob per tracked path.
//! Commits only happen when the staged state differs from HEAD.

use std::{
    collections::BTreeMap,
    pin::Pin,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use db::agent_store::{
    AgentDb,
    entities::{workspace_index, workspace_object, workspace_ref},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use thiserror::Error;

pub mod objects;

pub use objects::{CommitObject, ObjectError, ObjectKind, Signature, TreeEntry};

const HEAD_REF: &str = "HEAD";
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_AUTHOR_NAME: &str = "Vibesdk";
pub const DEFAULT_AUTHOR_EMAIL: &str = "vibesdk-bot@users.noreply.github.com";

pub type FilesChangedCallback = Arc<dyn Fn(&[String]) + Send + Sync>;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error("Ref not found: {0}")]
    RefNotFound(String),
    #[error("Object not found: {0}")]
    ObjectNotFound(String),
    #[error("Timed out resolving HEAD")]
    HeadTimeout,
}

#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: String,
    pub contents: Vec<u8>,
}

impl StagedFile {
    pub fn text(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into().into_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub oid: String,
    pub message: String,
    pub author: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone)]
pub struct CommitDetails {
    pub oid: String,
    pub message: String,
    pub files: Vec<String>,
    pub file_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub path: String,
    pub head: Option<String>,
    pub stage: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkspaceFile {
    pub path: String,
    pub contents: String,
}

#[derive(Debug, Clone)]
pub struct GitObjectRecord {
    pub path: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResetResult {
    pub files_reset: usize,
}

enum Node {
    File(String),
    Dir(BTreeMap<String, Node>),
}

#[derive(Clone)]
pub struct Workspace {
    pool: DatabaseConnection,
    default_branch: String,
    files_changed: Arc<RwLock<Option<FilesChangedCallback>>>,
}

impl Workspace {
    pub fn new(store: &AgentDb) -> Self {
        Self {
            pool: store.pool.clone(),
            default_branch: "main".to_string(),
            files_changed: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set_files_changed_callback(&self, callback: FilesChangedCallback) {
        *self.files_changed.write().unwrap() = Some(callback);
    }

    /// Idempotent. Creates HEAD pointing at the default branch.
    pub async fn init(&self, default_branch: Option<&str>) -> Result<(), WorkspaceError> {
        let start = Instant::now();
        let branch = default_branch.unwrap_or(&self.default_branch);
        if self.read_ref(HEAD_REF).await?.is_none() {
            self.write_ref(HEAD_REF, &format!("ref: refs/heads/{branch}"))
                .await?;
        }
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            branch,
            "Workspace initialized"
        );
        Ok(())
    }

    pub async fn stage(&self, files: &[StagedFile]) -> Result<(), WorkspaceError> {
        for file in files {
            let path = normalize_path(&file.path);
            let oid = self.put_object(ObjectKind::Blob, &file.contents).await?;
            self.write_index(&path, &oid).await?;
        }
        Ok(())
    }

    pub async fn remove_from_index(&self, paths: &[String]) -> Result<(), WorkspaceError> {
        for path in paths {
            let path = normalize_path(path);
            workspace_index::Entity::delete_many()
                .filter(workspace_index::Column::Path.eq(path))
                .exec(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// For every tracked path, the blob oid at HEAD and in the index. The
    /// working copy is the index itself, so two columns are enough to decide
    /// whether a commit is needed.
    pub async fn status_matrix(&self) -> Result<Vec<StatusRow>, WorkspaceError> {
        let head_files = match self.resolve_head_commit().await? {
            Some(oid) => self.commit_file_oids(&oid).await?,
            None => BTreeMap::new(),
        };
        let index_rows = workspace_index::Entity::find().all(&self.pool).await?;
        let mut index: BTreeMap<String, String> = BTreeMap::new();
        for row in index_rows {
            index.insert(row.path, row.oid);
        }

        let mut paths: Vec<String> = head_files.keys().cloned().collect();
        for path in index.keys() {
            if !head_files.contains_key(path) {
                paths.push(path.clone());
            }
        }
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| StatusRow {
                head: head_files.get(&path).cloned(),
                stage: index.get(&path).cloned(),
                path,
            })
            .collect())
    }

    /// Stage the given files and commit the index if anything differs from
    /// HEAD. Returns `None` when the workspace is already at the staged state.
    pub async fn commit(
        &self,
        files: &[StagedFile],
        message: &str,
    ) -> Result<Option<CommitInfo>, WorkspaceError> {
        self.stage(files).await?;

        let matrix = self.status_matrix().await?;
        if matrix.iter().all(|row| row.head == row.stage) {
            return Ok(None);
        }

        let index_rows = workspace_index::Entity::find().all(&self.pool).await?;
        let mut flat: BTreeMap<String, String> = BTreeMap::new();
        for row in index_rows {
            flat.insert(row.path, row.oid);
        }

        let tree_oid = self.store_tree_from_flat(&flat).await?;
        let parent = self.resolve_head_commit().await?;
        let author = Signature {
            name: DEFAULT_AUTHOR_NAME.to_string(),
            email: DEFAULT_AUTHOR_EMAIL.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let commit = CommitObject {
            tree: tree_oid,
            parents: parent.clone().into_iter().collect(),
            author: author.clone(),
            message: message.to_string(),
        };
        let body = objects::encode_commit(&commit);
        let oid = self.put_object(ObjectKind::Commit, &body).await?;

        let branch = self.current_branch().await?;
        self.write_ref(&branch, &oid).await?;

        Ok(Some(CommitInfo {
            oid,
            message: message.to_string(),
            author: author.to_string(),
            timestamp_ms: author.timestamp * 1000,
        }))
    }

    /// Walk commits from HEAD parent-first. Returns an empty list when the
    /// walk fails for any reason.
    pub async fn log(&self, limit: usize) -> Vec<CommitInfo> {
        match self.log_inner(limit).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("Workspace log failed: {err}");
                Vec::new()
            }
        }
    }

    async fn log_inner(&self, limit: usize) -> Result<Vec<CommitInfo>, WorkspaceError> {
        let mut entries = Vec::new();
        let mut cursor = self.resolve_head_commit().await?;
        while let Some(oid) = cursor {
            if entries.len() >= limit {
                break;
            }
            let commit = self.read_commit(&oid).await?;
            entries.push(CommitInfo {
                oid: oid.clone(),
                message: commit.message.clone(),
                author: commit.author.to_string(),
                timestamp_ms: commit.author.timestamp * 1000,
            });
            cursor = commit.parents.first().cloned();
        }
        Ok(entries)
    }

    pub async fn show(&self, oid: &str) -> Result<CommitDetails, WorkspaceError> {
        let commit = self.read_commit(oid).await?;
        let files: Vec<String> = self.commit_file_oids(oid).await?.into_keys().collect();
        Ok(CommitDetails {
            oid: oid.to_string(),
            message: commit.message,
            file_count: files.len(),
            files,
        })
    }

    /// Move the current branch to `reference` (a branch name, commit oid or
    /// "HEAD"). A hard reset also rebuilds the index from the target commit
    /// and notifies the files-changed callback.
    pub async fn reset(&self, reference: &str, hard: bool) -> Result<ResetResult, WorkspaceError> {
        let oid = self.resolve_ref(reference).await?;
        let branch = self.current_branch().await?;
        self.write_ref(&branch, &oid).await?;

        if !hard {
            return Ok(ResetResult { files_reset: 0 });
        }

        let files = self.commit_file_oids(&oid).await?;
        workspace_index::Entity::delete_many().exec(&self.pool).await?;
        for (path, blob_oid) in &files {
            self.write_index(path, blob_oid).await?;
        }

        let paths: Vec<String> = files.into_keys().collect();
        let callback = self.files_changed.read().unwrap().clone();
        if let Some(callback) = callback {
            callback(&paths);
        }
        Ok(ResetResult {
            files_reset: paths.len(),
        })
    }

    /// HEAD commit oid, or `None` before the first commit. Guarded by a 5 s
    /// watchdog; callers treat the timeout as "no HEAD".
    pub async fn get_head(&self) -> Result<Option<String>, WorkspaceError> {
        match tokio::time::timeout(HEAD_TIMEOUT, self.resolve_head_commit()).await {
            Ok(result) => result,
            Err(_) => Err(WorkspaceError::HeadTimeout),
        }
    }

    pub async fn head_or_none(&self) -> Option<String> {
        match self.get_head().await {
            Ok(head) => head,
            Err(err) => {
                tracing::warn!("Failed to resolve HEAD: {err}");
                None
            }
        }
    }

    /// Decode every text file reachable from the commit. Blobs containing a
    /// NUL byte are treated as binary and skipped.
    pub async fn read_files_from_commit(
        &self,
        oid: &str,
    ) -> Result<Vec<WorkspaceFile>, WorkspaceError> {
        let mut out = Vec::new();
        for (path, blob_oid) in self.commit_file_oids(oid).await? {
            let (_, body) = self.read_object(&blob_oid).await?;
            if objects::is_binary(&body) {
                continue;
            }
            match String::from_utf8(body) {
                Ok(contents) => out.push(WorkspaceFile { path, contents }),
                Err(_) => continue,
            }
        }
        Ok(out)
    }

    /// Read one blob by path at the given commit, raw bytes.
    pub async fn read_file_at_commit(
        &self,
        oid: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, WorkspaceError> {
        let path = normalize_path(path);
        let files = self.commit_file_oids(oid).await?;
        match files.get(&path) {
            Some(blob_oid) => {
                let (_, body) = self.read_object(blob_oid).await?;
                Ok(Some(body))
            }
            None => Ok(None),
        }
    }

    /// Stream out every object and ref for external replay.
    pub async fn export_git_objects(&self) -> Result<Vec<GitObjectRecord>, WorkspaceError> {
        let mut records = Vec::new();
        for row in workspace_object::Entity::find().all(&self.pool).await? {
            records.push(GitObjectRecord {
                path: format!("objects/{}", row.oid),
                data: row.data,
            });
        }
        for row in workspace_ref::Entity::find().all(&self.pool).await? {
            records.push(GitObjectRecord {
                path: row.name,
                data: row.oid.into_bytes(),
            });
        }
        Ok(records)
    }

    /// Inverse of [`Self::export_git_objects`]; used to rebuild a workspace
    /// from an exported object set.
    pub async fn import_git_objects(
        &self,
        records: &[GitObjectRecord],
    ) -> Result<(), WorkspaceError> {
        for record in records {
            if let Some(oid) = record.path.strip_prefix("objects/") {
                let (kind, _) = decode_stored_object(&record.data)?;
                self.put_raw_object(oid, kind, &record.data).await?;
            } else {
                let value = String::from_utf8_lossy(&record.data).to_string();
                self.write_ref(&record.path, &value).await?;
            }
        }
        Ok(())
    }

    // ---- internals ----

    async fn put_object(&self, kind: ObjectKind, body: &[u8]) -> Result<String, WorkspaceError> {
        let oid = objects::hash_object(kind, body);
        let encoded = encode_stored_object(kind, body);
        self.put_raw_object(&oid, kind, &encoded).await?;
        Ok(oid)
    }

    async fn put_raw_object(
        &self,
        oid: &str,
        kind: ObjectKind,
        encoded: &[u8],
    ) -> Result<(), WorkspaceError> {
        let existing = workspace_object::Entity::find_by_id(oid.to_string())
            .one(&self.pool)
            .await?;
        if existing.is_some() {
            // Objects are immutable; identical content is already stored.
            return Ok(());
        }
        let active = workspace_object::ActiveModel {
            oid: Set(oid.to_string()),
            kind: Set(kind.as_str().to_string()),
            data: Set(encoded.to_vec()),
        };
        active.insert(&self.pool).await?;
        Ok(())
    }

    async fn read_object(&self, oid: &str) -> Result<(ObjectKind, Vec<u8>), WorkspaceError> {
        let row = workspace_object::Entity::find_by_id(oid.to_string())
            .one(&self.pool)
            .await?
            .ok_or_else(|| WorkspaceError::ObjectNotFound(oid.to_string()))?;
        decode_stored_object(&row.data)
    }

    async fn read_commit(&self, oid: &str) -> Result<CommitObject, WorkspaceError> {
        let (kind, body) = self.read_object(oid).await?;
        if kind != ObjectKind::Commit {
            return Err(WorkspaceError::ObjectNotFound(format!(
                "{oid} is a {} not a commit",
                kind.as_str()
            )));
        }
        Ok(objects::decode_commit(&body)?)
    }

    async fn read_ref(&self, name: &str) -> Result<Option<String>, WorkspaceError> {
        let row = workspace_ref::Entity::find_by_id(name.to_string())
            .one(&self.pool)
            .await?;
        Ok(row.map(|r| r.oid))
    }

    async fn write_ref(&self, name: &str, value: &str) -> Result<(), WorkspaceError> {
        let existing = workspace_ref::Entity::find_by_id(name.to_string())
            .one(&self.pool)
            .await?;
        match existing {
            Some(model) => {
                let mut active: workspace_ref::ActiveModel = model.into();
                active.oid = Set(value.to_string());
                active.update(&self.pool).await?;
            }
            None => {
                let active = workspace_ref::ActiveModel {
                    name: Set(name.to_string()),
                    oid: Set(value.to_string()),
                };
                active.insert(&self.pool).await?;
            }
        }
        Ok(())
    }

    async fn write_index(&self, path: &str, oid: &str) -> Result<(), WorkspaceError> {
        let existing = workspace_index::Entity::find_by_id(path.to_string())
            .one(&self.pool)
            .await?;
        match existing {
            Some(model) => {
                let mut active: workspace_index::ActiveModel = model.into();
                active.oid = Set(oid.to_string());
                active.update(&self.pool).await?;
            }
            None => {
                let active = workspace_index::ActiveModel {
                    path: Set(path.to_string()),
                    oid: Set(oid.to_string()),
                };
                active.insert(&self.pool).await?;
            }
        }
        Ok(())
    }

    async fn current_branch(&self) -> Result<String, WorkspaceError> {
        match self.read_ref(HEAD_REF).await? {
            Some(value) => match value.strip_prefix("ref: ") {
                Some(branch) => Ok(branch.to_string()),
                None => Ok(format!("refs/heads/{}", self.default_branch)),
            },
            None => Ok(format!("refs/heads/{}", self.default_branch)),
        }
    }

    async fn resolve_head_commit(&self) -> Result<Option<String>, WorkspaceError> {
        let branch = self.current_branch().await?;
        self.read_ref(&branch).await
    }

    async fn resolve_ref(&self, reference: &str) -> Result<String, WorkspaceError> {
        if reference == HEAD_REF {
            return self
                .resolve_head_commit()
                .await?
                .ok_or_else(|| WorkspaceError::RefNotFound(reference.to_string()));
        }
        if let Some(oid) = self.read_ref(reference).await? {
            return Ok(oid);
        }
        let qualified = format!("refs/heads/{reference}");
        if let Some(oid) = self.read_ref(&qualified).await? {
            return Ok(oid);
        }
        // Fall back to treating the ref as a commit oid.
        if workspace_object::Entity::find_by_id(reference.to_string())
            .one(&self.pool)
            .await?
            .is_some()
        {
            return Ok(reference.to_string());
        }
        Err(WorkspaceError::RefNotFound(reference.to_string()))
    }

    /// Flat `path -> blob oid` listing of every file reachable from a commit.
    async fn commit_file_oids(
        &self,
        oid: &str,
    ) -> Result<BTreeMap<String, String>, WorkspaceError> {
        let commit = self.read_commit(oid).await?;
        let mut out = BTreeMap::new();
        self.walk_tree(commit.tree.clone(), String::new(), &mut out)
            .await?;
        Ok(out)
    }

    fn walk_tree<'a>(
        &'a self,
        tree_oid: String,
        prefix: String,
        out: &'a mut BTreeMap<String, String>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), WorkspaceError>> + Send + 'a>> {
        Box::pin(async move {
            let (kind, body) = self.read_object(&tree_oid).await?;
            if kind != ObjectKind::Tree {
                return Err(WorkspaceError::ObjectNotFound(format!(
                    "{tree_oid} is a {} not a tree",
                    kind.as_str()
                )));
            }
            for entry in objects::decode_tree(&body)? {
                let path = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{prefix}/{}", entry.name)
                };
                match entry.kind {
                    ObjectKind::Tree => {
                        self.walk_tree(entry.oid, path, out).await?;
                    }
                    _ => {
                        out.insert(path, entry.oid);
                    }
                }
            }
            Ok(())
        })
    }

    /// Build tree objects bottom-up from the flat index listing and return
    /// the root tree oid.
    async fn store_tree_from_flat(
        &self,
        flat: &BTreeMap<String, String>,
    ) -> Result<String, WorkspaceError> {
        let mut root: BTreeMap<String, Node> = BTreeMap::new();
        for (path, oid) in flat {
            let mut parts: Vec<&str> = path.split('/').collect();
            let file = parts.pop().expect("path has at least one segment");
            let mut cursor = &mut root;
            for part in parts {
                let entry = cursor
                    .entry(part.to_string())
                    .or_insert_with(|| Node::Dir(BTreeMap::new()));
                cursor = match entry {
                    Node::Dir(children) => children,
                    // A file and a directory share a name; the directory wins.
                    node => {
                        *node = Node::Dir(BTreeMap::new());
                        match node {
                            Node::Dir(children) => children,
                            _ => unreachable!(),
                        }
                    }
                };
            }
            cursor.insert(file.to_string(), Node::File(oid.clone()));
        }
        self.store_tree(&root).await
    }

    fn store_tree<'a>(
        &'a self,
        dir: &'a BTreeMap<String, Node>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, WorkspaceError>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut entries = Vec::with_capacity(dir.len());
            for (name, node) in dir {
                match node {
                    Node::File(oid) => entries.push(TreeEntry {
                        mode: "100644".to_string(),
                        kind: ObjectKind::Blob,
                        oid: oid.clone(),
                        name: name.clone(),
                    }),
                    Node::Dir(children) => {
                        let oid = self.store_tree(children).await?;
                        entries.push(TreeEntry {
                            mode: "040000".to_string(),
                            kind: ObjectKind::Tree,
                            oid,
                            name: name.clone(),
                        });
                    }
                }
            }
            let body = objects::encode_tree(&entries);
            self.put_object(ObjectKind::Tree, &body).await
        })
    }
}

pub fn normalize_path(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

fn encode_stored_object(kind: ObjectKind, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 16);
    out.extend_from_slice(kind.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(body.len().to_string().as_bytes());
    out.push(0);
    out.extend_from_slice(body);
    out
}

pub fn decode_stored_object(data: &[u8]) -> Result<(ObjectKind, Vec<u8>), WorkspaceError> {
    let nul = data
        .iter()
        .position(|b| *b == 0)
        .ok_or(ObjectError::MalformedHeader)?;
    let header =
        std::str::from_utf8(&data[..nul]).map_err(|_| ObjectError::MalformedHeader)?;
    let (kind, _len) = header.split_once(' ').ok_or(ObjectError::MalformedHeader)?;
    Ok((ObjectKind::parse(kind)?, data[nul + 1..].to_vec()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    async fn fresh_workspace() -> Workspace {
        let store = AgentDb::open_in_memory().await.unwrap();
        let ws = Workspace::new(&store);
        ws.init(None).await.unwrap();
        ws
    }

    #[tokio::test]
    async fn first_commit_has_no_parent_and_advances_head() {
        let ws = fresh_workspace().await;
        assert_eq!(ws.get_head().await.unwrap(), None);

        let info = ws
            .commit(
                &[StagedFile::text("src/App.tsx", "export default 1;\n")],
                "feat: Initial Phase",
            )
            .await
            .unwrap()
            .expect("first commit");
        assert_eq!(ws.get_head().await.unwrap(), Some(info.oid.clone()));
        assert!(info.author.contains(DEFAULT_AUTHOR_NAME));
    }

    #[tokio::test]
    async fn identical_commit_is_a_noop() {
        let ws = fresh_workspace().await;
        let files = [StagedFile::text("src/App.tsx", "same contents\n")];
        let first = ws.commit(&files, "feat: once").await.unwrap();
        assert!(first.is_some());

        let second = ws.commit(&files, "feat: twice").await.unwrap();
        assert!(second.is_none());

        let log = ws.log(10).await;
        assert_eq!(log.len(), 1);
        assert_eq!(ws.get_head().await.unwrap().unwrap(), first.unwrap().oid);
    }

    #[tokio::test]
    async fn leading_slash_paths_are_normalized() {
        let ws = fresh_workspace().await;
        let info = ws
            .commit(&[StagedFile::text("/src/main.ts", "x\n")], "feat: add")
            .await
            .unwrap()
            .unwrap();
        let details = ws.show(&info.oid).await.unwrap();
        assert_eq!(details.files, vec!["src/main.ts".to_string()]);
    }

    #[tokio::test]
    async fn log_walks_parent_first() {
        let ws = fresh_workspace().await;
        ws.commit(&[StagedFile::text("a.txt", "1\n")], "first")
            .await
            .unwrap();
        ws.commit(&[StagedFile::text("a.txt", "2\n")], "second")
            .await
            .unwrap();
        ws.commit(&[StagedFile::text("b.txt", "3\n")], "third")
            .await
            .unwrap();

        let log = ws.log(10).await;
        let messages: Vec<&str> = log.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn reset_hard_rebuilds_index_and_fires_callback() {
        let ws = fresh_workspace().await;
        let first = ws
            .commit(&[StagedFile::text("a.txt", "1\n")], "first")
            .await
            .unwrap()
            .unwrap();
        ws.commit(
            &[
                StagedFile::text("a.txt", "2\n"),
                StagedFile::text("b.txt", "x\n"),
            ],
            "second",
        )
        .await
        .unwrap();

        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = notified.clone();
        ws.set_files_changed_callback(Arc::new(move |files| {
            notified_clone.store(files.len(), Ordering::SeqCst);
        }));

        let result = ws.reset(&first.oid, true).await.unwrap();
        assert_eq!(result.files_reset, 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(ws.get_head().await.unwrap(), Some(first.oid));

        // A commit of the reset contents is now a no-op again.
        let redo = ws
            .commit(&[StagedFile::text("a.txt", "1\n")], "noop")
            .await
            .unwrap();
        assert!(redo.is_none());
    }

    #[tokio::test]
    async fn binary_blobs_are_skipped_when_reading_text() {
        let ws = fresh_workspace().await;
        let info = ws
            .commit(
                &[
                    StagedFile::text("readme.md", "hello\n"),
                    StagedFile {
                        path: "logo.png".to_string(),
                        contents: vec![0x89, b'P', b'N', b'G', 0x00, 0x01],
                    },
                ],
                "feat: mixed",
            )
            .await
            .unwrap()
            .unwrap();

        let files = ws.read_files_from_commit(&info.oid).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "readme.md");
    }

    #[tokio::test]
    async fn export_import_roundtrip_preserves_log() {
        let ws = fresh_workspace().await;
        ws.commit(&[StagedFile::text("a.txt", "1\n")], "first")
            .await
            .unwrap();
        ws.commit(&[StagedFile::text("a.txt", "2\n")], "second")
            .await
            .unwrap();
        let source_log = ws.log(10).await;

        let records = ws.export_git_objects().await.unwrap();

        let other_store = AgentDb::open_in_memory().await.unwrap();
        let other = Workspace::new(&other_store);
        other.import_git_objects(&records).await.unwrap();
        let imported_log = other.log(10).await;

        let key = |log: &[CommitInfo]| -> Vec<(String, String, i64)> {
            log.iter()
                .map(|c| (c.oid.clone(), c.message.clone(), c.timestamp_ms))
                .collect()
        };
        assert_eq!(key(&source_log), key(&imported_log));
    }

    #[tokio::test]
    async fn nested_directories_roundtrip() {
        let ws = fresh_workspace().await;
        let info = ws
            .commit(
                &[
                    StagedFile::text("src/components/Button.tsx", "b\n"),
                    StagedFile::text("src/index.ts", "i\n"),
                    StagedFile::text("package.json", "{}\n"),
                ],
                "feat: tree",
            )
            .await
            .unwrap()
            .unwrap();
        let details = ws.show(&info.oid).await.unwrap();
        assert_eq!(details.file_count, 3);
        assert!(details.files.contains(&"src/components/Button.tsx".to_string()));

        let contents = ws
            .read_file_at_commit(&info.oid, "src/index.ts")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contents, b"i\n");
    }
}
