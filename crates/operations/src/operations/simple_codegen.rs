//! One-shot code generation outside the phase loop: a free-form description
//! becomes one or more complete files. Used for small additions that do not
//! warrant a full phase.

use services::services::file_manager::FileState;

use crate::{
    client::{ChatMessage, InferenceClient, InferenceError},
    context::InferenceContext,
    format::parse_all_file_blocks,
    operations::render_files,
    schemas::GeneratedFileOutput,
};

const SYSTEM_PROMPT: &str = "You write code for a generated application. \
Emit every file you create or change in full as\n<file path=\"...\" \
purpose=\"...\">\n...contents...\n</file>\nNo explanations.";

pub async fn generate(
    client: &InferenceClient,
    ctx: &InferenceContext,
    description: &str,
    existing_files: &[FileState],
) -> Result<Vec<GeneratedFileOutput>, InferenceError> {
    let prompt = format!(
        "Request:\n{description}\n\nExisting project files:\n{}",
        render_files(existing_files)
    );
    let raw = client
        .complete(ctx, vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
        .await?;
    let (files, _) = parse_all_file_blocks(&raw);
    if files.is_empty() {
        return Err(InferenceError::Malformed(
            "no file blocks in response".to_string(),
        ));
    }
    Ok(files
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

    use crate::client::test_support::ScriptedBackend;

    use super::*;

    #[tokio::test]
    async fn parses_generated_files() {
        let backend = ScriptedBackend::new([
            "<file path=\"src/util.ts\" purpose=\"helper\">\nexport const x = 1;\n</file>"
                .to_string(),
        ]);
        let client = InferenceClient::with_backend(Arc::new(backend));
        let ctx = InferenceContext::new("m", "f");
        let files = generate(&client, &ctx, "add a helper", &[]).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/util.ts");
    }

    #[tokio::test]
    async fn empty_response_is_malformed() {
        let backend = ScriptedBackend::new(["I cannot help with that.".to_string()]);
        let client = InferenceClient::with_backend(Arc::new(backend));
        let ctx = InferenceContext::new("m", "f");
        let err = generate(&client, &ctx, "add a helper", &[]).await.unwrap_err();
        assert!(matches!(err, InferenceError::Malformed(_)));
    }
}
