//! Fast smart code fixer: one cheap-model pass over all relevant files and
//! the current issue snapshot, returning full replacements for any files it
//! wants to change.

use services::services::file_manager::FileState;

use crate::{
    client::{ChatMessage, InferenceClient, InferenceError},
    context::InferenceContext,
    format::parse_all_file_blocks,
    operations::{IssueSnapshot, render_files},
    schemas::GeneratedFileOutput,
};

const SYSTEM_PROMPT: &str = "You are a fast code fixer. Given project files \
and current issues, emit a <file path=\"...\" purpose=\"...\"> block with \
the complete new contents for every file you change. Emit nothing for files \
you leave alone. Do not explain.";

pub async fn fix(
    client: &InferenceClient,
    ctx: &InferenceContext,
    files: &[FileState],
    issues: &IssueSnapshot,
) -> Result<Vec<GeneratedFileOutput>, InferenceError> {
    if issues.is_empty() {
        return Ok(Vec::new());
    }
    let prompt = format!(
        "Issues:\n{}\nProject files:\n{}",
        issues.render(),
        render_files(files)
    );
    let raw = client
        .complete_fast(ctx, vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
        .await?;
    let (parsed, _) = parse_all_file_blocks(&raw);
    Ok(parsed
        .into_iter()
        .map(|file| GeneratedFileOutput {
            path: file.path,
            purpose: file.purpose,
            contents: file.contents,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use services::services::deployment_manager::{
        AnalysisIssue, AnalysisReport, IssueSeverity, StaticAnalysisResult,
    };

    use crate::client::test_support::ScriptedBackend;

    use super::*;

    fn issues() -> IssueSnapshot {
        IssueSnapshot {
            runtime_errors: Vec::new(),
            static_analysis: StaticAnalysisResult {
                lint: AnalysisReport::default(),
                typecheck: AnalysisReport {
                    issues: vec![AnalysisIssue {
                        file: "src/App.tsx".to_string(),
                        line: 1,
                        column: 1,
                        code: "TS2304".to_string(),
                        message: "Cannot find name 'foo'".to_string(),
                        severity: IssueSeverity::Error,
                    }],
                    summary: String::new(),
                },
            },
        }
    }

    #[tokio::test]
    async fn no_issues_short_circuits_without_inference() {
        let backend = ScriptedBackend::new([] as [String; 0]);
        let client = InferenceClient::with_backend(Arc::new(backend));
        let ctx = InferenceContext::new("m", "f");
        let fixed = fix(&client, &ctx, &[], &IssueSnapshot::default())
            .await
            .unwrap();
        assert!(fixed.is_empty());
    }

    #[tokio::test]
    async fn returns_changed_files_only() {
        let backend = ScriptedBackend::new([
            "<file path=\"src/App.tsx\" purpose=\"root\">\nfixed\n</file>".to_string(),
        ]);
        let client = InferenceClient::with_backend(Arc::new(backend));
        let ctx = InferenceContext::new("m", "f");
        let fixed = fix(&client, &ctx, &[], &issues()).await.unwrap();
        assert_eq!(fixed.len(), 1);
        assert_eq!(fixed[0].contents, "fixed");
    }
}
