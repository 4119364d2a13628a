//! Setup assistance: predict bootstrap commands for a fresh project, propose
//! alternatives for failing install commands, and write the README.

use crate::{
    client::{ChatMessage, InferenceClient, InferenceError},
    context::InferenceContext,
    format::parse_json_payload,
    schemas::{Blueprint, SetupCommandsPayload},
};

const SETUP_PROMPT: &str = "Given a project blueprint and the template's \
package.json, list the shell commands needed to finish setting the project \
up (extra dependencies, generators). Respond with JSON: {\"commands\": \
[...]}. Return an empty list when the template already covers everything.";

const ASSISTANT_PROMPT: &str = "A setup command failed in a generated \
project. Propose replacement commands that achieve the same goal (for \
example an alternative package name). Respond with JSON: {\"commands\": \
[...]}.";

const README_PROMPT: &str = "Write the README.md for this generated \
project: short intro, feature list, getting-started. End the intro with \
the literal placeholder [cloudflarebutton] on its own line. Respond with \
markdown only.";

pub async fn analyze_setup_commands(
    client: &InferenceClient,
    ctx: &InferenceContext,
    blueprint: &Blueprint,
    package_json: &str,
) -> Result<Vec<String>, InferenceError> {
    let prompt = format!(
        "Blueprint:\n{}\n\npackage.json:\n{package_json}",
        serde_json::to_string_pretty(blueprint)
            .map_err(|err| InferenceError::Malformed(err.to_string()))?
    );
    let raw = client
        .complete_fast(ctx, vec![ChatMessage::system(SETUP_PROMPT), ChatMessage::user(prompt)])
        .await?;
    let payload: SetupCommandsPayload = parse_json_payload(&raw)?;
    Ok(payload.commands)
}

/// The AI-assisted retry path for failed install commands.
pub async fn project_setup_assistant(
    client: &InferenceClient,
    ctx: &InferenceContext,
    failed_command: &str,
    error_output: &str,
) -> Result<Vec<String>, InferenceError> {
    let prompt = format!("Failed command: {failed_command}\nError output:\n{error_output}");
    let raw = client
        .complete_fast(
            ctx,
            vec![ChatMessage::system(ASSISTANT_PROMPT), ChatMessage::user(prompt)],
        )
        .await?;
    let payload: SetupCommandsPayload = parse_json_payload(&raw)?;
    Ok(payload.commands)
}

pub async fn generate_readme(
    client: &InferenceClient,
    ctx: &InferenceContext,
    blueprint: &Blueprint,
) -> Result<String, InferenceError> {
    let prompt = serde_json::to_string_pretty(blueprint)
        .map_err(|err| InferenceError::Malformed(err.to_string()))?;
    client
        .complete_fast(ctx, vec![ChatMessage::system(README_PROMPT), ChatMessage::user(prompt)])
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::client::test_support::ScriptedBackend;

    use super::*;

    #[tokio::test]
    async fn assistant_parses_alternative_commands() {
        let backend =
            ScriptedBackend::new([r#"{"commands": ["bun install known-pkg"]}"#.to_string()]);
        let client = InferenceClient::with_backend(Arc::new(backend));
        let ctx = InferenceContext::new("m", "f");

        let commands = project_setup_assistant(
            &client,
            &ctx,
            "bun install unknown-pkg",
            "error: package not found",
        )
        .await
        .unwrap();
        assert_eq!(commands, vec!["bun install known-pkg"]);
    }
}
