//! Typed overlay on the workspace, keyed by logical file path.
//!
//! Tracks, for every generated file, the current contents, the purpose the
//! generator attached to it, and the unified diff produced by the last write.
//! Downstream callers hand that diff back to the model for tool-call display.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use ts_rs::TS;
use utils::diff::create_unified_diff;

use crate::services::workspace::{
    CommitInfo, StagedFile, Workspace, WorkspaceError, normalize_path,
};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct FileState {
    pub file_path: String,
    pub file_contents: String,
    pub file_purpose: String,
    pub last_diff: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct GeneratedFile {
    pub file_path: String,
    pub file_contents: String,
    pub file_purpose: String,
}

pub type FileMap = Arc<RwLock<BTreeMap<String, FileState>>>;

#[derive(Clone)]
pub struct FileManager {
    workspace: Workspace,
    files: FileMap,
}

impl FileManager {
    pub fn new(workspace: Workspace, files: FileMap) -> Self {
        Self { workspace, files }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn file_map(&self) -> FileMap {
        self.files.clone()
    }

    pub async fn get_file(&self, path: &str) -> Option<FileState> {
        self.files.read().await.get(&normalize_path(path)).cloned()
    }

    pub async fn get_all_files(&self) -> Vec<FileState> {
        self.files.read().await.values().cloned().collect()
    }

    /// Generated code files minus anything the template marked as redacted
    /// or do-not-touch.
    pub async fn get_relevant_files(
        &self,
        redacted: &[String],
        do_not_touch: &[String],
    ) -> Vec<FileState> {
        self.files
            .read()
            .await
            .values()
            .filter(|state| {
                !redacted.contains(&state.file_path) && !do_not_touch.contains(&state.file_path)
            })
            .cloned()
            .collect()
    }

    pub async fn list_generated_paths(&self) -> Vec<String> {
        self.files.read().await.keys().cloned().collect()
    }

    pub async fn save_file(
        &self,
        file: &GeneratedFile,
        commit_message: &str,
    ) -> Result<FileState, WorkspaceError> {
        let (mut states, _) = self.save_files(std::slice::from_ref(file), commit_message).await?;
        Ok(states.remove(0))
    }

    /// Write several files through to the workspace in a single commit and
    /// update the file map. Each returned state carries the unified diff of
    /// new-vs-previous contents (a full add for new files).
    pub async fn save_files(
        &self,
        files: &[GeneratedFile],
        commit_message: &str,
    ) -> Result<(Vec<FileState>, Option<CommitInfo>), WorkspaceError> {
        let mut staged = Vec::with_capacity(files.len());
        let mut states = Vec::with_capacity(files.len());
        {
            let mut map = self.files.write().await;
            for file in files {
                let path = normalize_path(&file.file_path);
                let previous = match map.get(&path) {
                    Some(state) => state.file_contents.clone(),
                    None => self.previous_from_head(&path).await?.unwrap_or_default(),
                };
                let last_diff =
                    create_unified_diff(&path, &previous, &file.file_contents);
                let state = FileState {
                    file_path: path.clone(),
                    file_contents: file.file_contents.clone(),
                    file_purpose: file.file_purpose.clone(),
                    last_diff,
                };
                map.insert(path.clone(), state.clone());
                staged.push(StagedFile::text(path, file.file_contents.clone()));
                states.push(state);
            }
        }

        let commit = self.workspace.commit(&staged, commit_message).await?;
        Ok((states, commit))
    }

    /// Remove files from the map and the staging index. The caller is
    /// responsible for removing them from the sandbox; no commit is made
    /// here.
    pub async fn delete_files(&self, paths: &[String]) -> Result<(), WorkspaceError> {
        let normalized: Vec<String> = paths.iter().map(|p| normalize_path(p)).collect();
        {
            let mut map = self.files.write().await;
            for path in &normalized {
                map.remove(path);
            }
        }
        self.workspace.remove_from_index(&normalized).await
    }

    /// Refresh map contents from HEAD after a reset, keeping the recorded
    /// purposes for paths that survive.
    pub async fn sync_from_head(&self) -> Result<(), WorkspaceError> {
        let Some(head) = self.workspace.head_or_none().await else {
            return Ok(());
        };
        let head_files = self.workspace.read_files_from_commit(&head).await?;
        let mut map = self.files.write().await;
        let mut next = BTreeMap::new();
        for file in head_files {
            let purpose = map
                .get(&file.path)
                .map(|state| state.file_purpose.clone())
                .unwrap_or_default();
            next.insert(
                file.path.clone(),
                FileState {
                    file_path: file.path,
                    file_contents: file.contents,
                    file_purpose: purpose,
                    last_diff: String::new(),
                },
            );
        }
        *map = next;
        Ok(())
    }

    async fn previous_from_head(&self, path: &str) -> Result<Option<String>, WorkspaceError> {
        let Some(head) = self.workspace.head_or_none().await else {
            return Ok(None);
        };
        let bytes = self.workspace.read_file_at_commit(&head, path).await?;
        Ok(bytes.and_then(|b| String::from_utf8(b).ok()))
    }
}

#[cfg(test)]
mod tests {
    use db::agent_store::AgentDb;

    use super::*;

    async fn fresh_manager() -> FileManager {
        let store = AgentDb::open_in_memory().await.unwrap();
        let workspace = Workspace::new(&store);
        workspace.init(None).await.unwrap();
        FileManager::new(workspace, Arc::new(RwLock::new(BTreeMap::new())))
    }

    fn generated(path: &str, contents: &str) -> GeneratedFile {
        GeneratedFile {
            file_path: path.to_string(),
            file_contents: contents.to_string(),
            file_purpose: "test file".to_string(),
        }
    }

    #[tokio::test]
    async fn new_file_gets_full_add_diff() {
        let manager = fresh_manager().await;
        let state = manager
            .save_file(&generated("src/App.tsx", "one\ntwo\n"), "feat: add app")
            .await
            .unwrap();
        assert!(state.last_diff.contains("+one"));
        assert!(state.last_diff.contains("+two"));
    }

    #[tokio::test]
    async fn rewrite_diffs_against_previous_contents() {
        let manager = fresh_manager().await;
        manager
            .save_file(&generated("src/App.tsx", "one\ntwo\n"), "feat: add")
            .await
            .unwrap();
        let state = manager
            .save_file(&generated("src/App.tsx", "one\nthree\n"), "fix: edit")
            .await
            .unwrap();
        assert!(state.last_diff.contains("-two"));
        assert!(state.last_diff.contains("+three"));
        // File is retrievable from HEAD with identical bytes.
        let head = manager.workspace().head_or_none().await.unwrap();
        let bytes = manager
            .workspace()
            .read_file_at_commit(&head, "src/App.tsx")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"one\nthree\n");
    }

    #[tokio::test]
    async fn save_files_makes_one_commit() {
        let manager = fresh_manager().await;
        let (states, commit) = manager
            .save_files(
                &[generated("a.ts", "a\n"), generated("b.ts", "b\n")],
                "feat: Phase One\n\nTwo files",
            )
            .await
            .unwrap();
        assert_eq!(states.len(), 2);
        assert!(commit.is_some());
        assert_eq!(manager.workspace().log(10).await.len(), 1);
    }

    #[tokio::test]
    async fn relevant_files_excludes_protected_paths() {
        let manager = fresh_manager().await;
        manager
            .save_files(
                &[generated("src/a.ts", "a\n"), generated("wrangler.json", "{}\n")],
                "feat: files",
            )
            .await
            .unwrap();
        let relevant = manager
            .get_relevant_files(&["wrangler.json".to_string()], &[])
            .await;
        assert_eq!(relevant.len(), 1);
        assert_eq!(relevant[0].file_path, "src/a.ts");
    }

    #[tokio::test]
    async fn delete_files_removes_map_entry_without_commit() {
        let manager = fresh_manager().await;
        manager
            .save_file(&generated("src/tmp.ts", "x\n"), "feat: tmp")
            .await
            .unwrap();
        let log_before = manager.workspace().log(10).await.len();

        manager
            .delete_files(&["src/tmp.ts".to_string()])
            .await
            .unwrap();
        assert!(manager.get_file("src/tmp.ts").await.is_none());
        assert_eq!(manager.workspace().log(10).await.len(), log_before);
    }
}
