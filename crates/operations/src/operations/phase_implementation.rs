//! Phase implementation: stream file generation for one phase. Files arrive
//! as `<file>` blocks and are surfaced through callbacks as they stream;
//! the residual text may carry a JSON payload with follow-up commands and
//! deletions.

use crate::{
    client::{ChatMessage, InferenceClient, InferenceError},
    context::InferenceContext,
    format::{FileBlockEvent, FileBlockParser, parse_json_payload},
    operations::{IssueSnapshot, render_files},
    schemas::{CommandsPayload, GeneratedFileOutput, PhaseConcept, PhaseImplementationOutcome},
};
use services::services::file_manager::FileState;
use std::sync::Mutex;

const SYSTEM_PROMPT: &str = "You implement one phase of a generated \
application. Emit every file in full as\n<file path=\"...\" \
purpose=\"...\">\n...contents...\n</file>\nAfter the last file you may add \
a ```json block {\"commands\": [...], \"deleted_files\": [...]} for shell \
commands to run and files to delete.";

pub struct FileCallbacks<'a> {
    pub on_file_start: &'a (dyn Fn(&str, &str) + Send + Sync),
    pub on_file_chunk: &'a (dyn Fn(&str, &str) + Send + Sync),
    pub on_file_complete: &'a (dyn Fn(&GeneratedFileOutput) + Send + Sync),
}

pub async fn implement(
    client: &InferenceClient,
    ctx: &InferenceContext,
    phase: &PhaseConcept,
    relevant_files: &[FileState],
    issues: &IssueSnapshot,
    callbacks: FileCallbacks<'_>,
) -> Result<PhaseImplementationOutcome, InferenceError> {
    let mut prompt = format!(
        "Phase: {}\nDescription: {}\n\nTarget files:\n",
        phase.name, phase.description
    );
    for file in &phase.files {
        prompt.push_str(&format!(
            "- {} ({}){}\n",
            file.path,
            file.purpose,
            file.changes
                .as_deref()
                .map(|c| format!(" — {c}"))
                .unwrap_or_default()
        ));
    }
    prompt.push_str(&format!("\nCurrent issues:\n{}", issues.render()));
    prompt.push_str(&format!(
        "\nExisting project files:\n{}",
        render_files(relevant_files)
    ));

    let parser = Mutex::new(FileBlockParser::new());
    let outcome = Mutex::new(PhaseImplementationOutcome::default());

    let handle_events = |events: Vec<FileBlockEvent>| {
        for event in events {
            match event {
                FileBlockEvent::FileStarted { path, purpose } => {
                    (callbacks.on_file_start)(&path, &purpose);
                }
                FileBlockEvent::FileChunk { path, delta } => {
                    (callbacks.on_file_chunk)(&path, &delta);
                }
                FileBlockEvent::FileCompleted { path, purpose, contents } => {
                    let file = GeneratedFileOutput {
                        path,
                        purpose,
                        contents,
                    };
                    (callbacks.on_file_complete)(&file);
                    outcome.lock().unwrap().files.push(file);
                }
            }
        }
    };

    client
        .stream(
            ctx,
            vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            &|chunk| {
                let events = parser.lock().unwrap().push(chunk);
                handle_events(events);
            },
        )
        .await?;

    let (final_events, residual) = {
        let parser = std::mem::take(&mut *parser.lock().unwrap());
        parser.finish()
    };
    handle_events(final_events);

    let mut outcome = outcome.into_inner().unwrap();
    if residual.contains("commands") || residual.contains("deleted_files") {
        match parse_json_payload::<CommandsPayload>(&residual) {
            Ok(payload) => {
                outcome.commands = payload.commands;
                outcome.deleted_files = payload.deleted_files;
            }
            Err(err) => {
                tracing::debug!("No command payload in residual output: {err}");
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::client::test_support::ScriptedBackend;
    use crate::schemas::FileConcept;

    use super::*;

    fn phase() -> PhaseConcept {
        PhaseConcept {
            name: "Core UI".to_string(),
            description: "initial skeleton".to_string(),
            last_phase: false,
            files: vec![FileConcept {
                path: "src/App.tsx".to_string(),
                purpose: "root".to_string(),
                changes: None,
            }],
            install_commands: Vec::new(),
        }
    }

    #[tokio::test]
    async fn streams_files_and_collects_commands() {
        let response = "<file path=\"src/App.tsx\" purpose=\"root\">\nexport default function App() {}\n</file>\n```json\n{\"commands\": [\"bun install zod\"], \"deleted_files\": [\"src/old.ts\"]}\n```";
        let backend = ScriptedBackend::new([response.to_string()]);
        let client = InferenceClient::with_backend(Arc::new(backend));
        let ctx = InferenceContext::new("m", "f");

        let started = Arc::new(Mutex::new(Vec::new()));
        let chunks = Arc::new(Mutex::new(String::new()));
        let completed = Arc::new(Mutex::new(Vec::new()));

        let started_cb = started.clone();
        let chunks_cb = chunks.clone();
        let completed_cb = completed.clone();
        let outcome = implement(
            &client,
            &ctx,
            &phase(),
            &[],
            &IssueSnapshot::default(),
            FileCallbacks {
                on_file_start: &move |path, _| started_cb.lock().unwrap().push(path.to_string()),
                on_file_chunk: &move |_, delta| chunks_cb.lock().unwrap().push_str(delta),
                on_file_complete: &move |file| {
                    completed_cb.lock().unwrap().push(file.path.clone())
                },
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].contents, "export default function App() {}");
        assert_eq!(outcome.commands, vec!["bun install zod"]);
        assert_eq!(outcome.deleted_files, vec!["src/old.ts"]);
        assert_eq!(*started.lock().unwrap(), vec!["src/App.tsx"]);
        assert_eq!(*completed.lock().unwrap(), vec!["src/App.tsx"]);
        assert_eq!(*chunks.lock().unwrap(), "export default function App() {}");
    }
}
