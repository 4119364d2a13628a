//! Next-phase planning: given the blueprint, completed phases and current
//! issues, decide the next bounded step of generation, or signal that the
//! project is complete by returning no files.

use serde::Deserialize;

use crate::{
    client::{ChatMessage, InferenceClient, InferenceError},
    context::InferenceContext,
    format::parse_json_payload,
    operations::IssueSnapshot,
    schemas::{Blueprint, PhaseConcept},
};

const SYSTEM_PROMPT: &str = "You plan the next implementation phase of a \
generated application. Respond with a JSON object: {\"done\": bool, \
\"phase\": {name, description, last_phase, files[{path,purpose,changes}], \
install_commands}}. Set done=true (or return a phase with no files) when \
the roadmap is complete.";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NextPhasePayload {
    done: bool,
    phase: Option<PhaseConcept>,
}

#[allow(clippy::too_many_arguments)]
pub async fn generate(
    client: &InferenceClient,
    ctx: &InferenceContext,
    query: &str,
    blueprint: &Blueprint,
    completed_phases: &[String],
    issues: &IssueSnapshot,
    user_context: Option<&str>,
) -> Result<Option<PhaseConcept>, InferenceError> {
    let mut prompt = format!(
        "User request: {query}\n\nBlueprint:\n{}\n\nCompleted phases:\n",
        serde_json::to_string_pretty(blueprint)
            .map_err(|err| InferenceError::Malformed(err.to_string()))?
    );
    if completed_phases.is_empty() {
        prompt.push_str("(none)\n");
    }
    for name in completed_phases {
        prompt.push_str(&format!("- {name}\n"));
    }
    prompt.push_str(&format!("\nCurrent issues:\n{}", issues.render()));
    if let Some(user_context) = user_context {
        prompt.push_str(&format!("\nUser guidance for this phase:\n{user_context}\n"));
    }

    let raw = client
        .complete(ctx, vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
        .await?;
    let payload: NextPhasePayload = parse_json_payload(&raw)?;

    if payload.done {
        return Ok(None);
    }
    Ok(payload.phase.filter(|phase| !phase.files.is_empty()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::client::test_support::ScriptedBackend;

    use super::*;

    #[tokio::test]
    async fn done_payload_means_no_next_phase() {
        let backend = ScriptedBackend::new([r#"{"done": true}"#.to_string()]);
        let client = InferenceClient::with_backend(Arc::new(backend));
        let ctx = InferenceContext::new("m", "f");

        let next = generate(
            &client,
            &ctx,
            "q",
            &Blueprint::default(),
            &[],
            &IssueSnapshot::default(),
            None,
        )
        .await
        .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn phase_without_files_counts_as_done() {
        let backend = ScriptedBackend::new([
            r#"{"done": false, "phase": {"name": "Polish", "description": "nothing left"}}"#
                .to_string(),
        ]);
        let client = InferenceClient::with_backend(Arc::new(backend));
        let ctx = InferenceContext::new("m", "f");

        let next = generate(
            &client,
            &ctx,
            "q",
            &Blueprint::default(),
            &["Core UI".to_string()],
            &IssueSnapshot::default(),
            Some("make it dark mode"),
        )
        .await
        .unwrap();
        assert!(next.is_none());
    }
}
