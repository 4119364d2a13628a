//! Single-file regeneration, used when one generated file keeps a phase
//! from validating. Callers pass an increasing `retry_index`; the prompt
//! hardens as retries accumulate.

use services::services::file_manager::FileState;

use crate::{
    client::{ChatMessage, InferenceClient, InferenceError},
    context::InferenceContext,
    format::parse_all_file_blocks,
    operations::IssueSnapshot,
    schemas::GeneratedFileOutput,
};

pub const MAX_REGENERATION_RETRIES: u32 = 3;

const SYSTEM_PROMPT: &str = "You rewrite one broken file of a generated \
application. Respond with exactly one <file path=\"...\" purpose=\"...\"> \
block containing the complete replacement contents.";

pub async fn regenerate(
    client: &InferenceClient,
    ctx: &InferenceContext,
    file: &FileState,
    issues: &IssueSnapshot,
    retry_index: u32,
) -> Result<GeneratedFileOutput, InferenceError> {
    let mut prompt = format!(
        "File to regenerate: {}\nPurpose: {}\n\nCurrent contents:\n{}\n\nIssues:\n{}",
        file.file_path,
        file.file_purpose,
        file.file_contents,
        issues.render()
    );
    if retry_index > 0 {
        prompt.push_str(&format!(
            "\nThis is retry {retry_index} of {MAX_REGENERATION_RETRIES}; previous \
attempts did not fix the issues. Rewrite the file from scratch."
        ));
    }

    let raw = client
        .complete(ctx, vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
        .await?;
    let (files, _) = parse_all_file_blocks(&raw);
    let parsed = files
        .into_iter()
        .next()
        .ok_or_else(|| InferenceError::Malformed("no file block in response".to_string()))?;

    Ok(GeneratedFileOutput {
        // The model occasionally renames the file; pin it to the request.
        path: file.file_path.clone(),
        purpose: if parsed.purpose.is_empty() {
            file.file_purpose.clone()
        } else {
            parsed.purpose
        },
        contents: parsed.contents,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::client::test_support::ScriptedBackend;

    use super::*;

    #[tokio::test]
    async fn regenerated_file_keeps_requested_path() {
        let backend = ScriptedBackend::new([
            "<file path=\"src/Wrong.tsx\" purpose=\"fixed\">\nnew contents\n</file>".to_string(),
        ]);
        let client = InferenceClient::with_backend(Arc::new(backend));
        let ctx = InferenceContext::new("m", "f");
        let file = FileState {
            file_path: "src/App.tsx".to_string(),
            file_contents: "old".to_string(),
            file_purpose: "root".to_string(),
            last_diff: String::new(),
        };

        let output = regenerate(&client, &ctx, &file, &IssueSnapshot::default(), 1)
            .await
            .unwrap();
        assert_eq!(output.path, "src/App.tsx");
        assert_eq!(output.contents, "new contents");
    }
}
