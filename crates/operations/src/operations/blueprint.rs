//! Blueprint generation: user query → structured project plan, streamed so
//! the client can render the plan as it is written.

use crate::{
    client::{ChatMessage, ChunkCallback, InferenceClient, InferenceError},
    context::InferenceContext,
    format::parse_json_payload,
    schemas::Blueprint,
};

const SYSTEM_PROMPT: &str = "You are the project planner for an application \
generator. Produce a single JSON object describing the project blueprint: \
title, description, detailed_description, color_palette, views, user_flow, \
data_flow, architecture, pitfalls, frameworks, implementation_roadmap and \
initial_phase (name, description, last_phase, files[{path,purpose}], \
install_commands). Respond with JSON only.";

pub async fn generate(
    client: &InferenceClient,
    ctx: &InferenceContext,
    query: &str,
    template_name: &str,
    on_chunk: ChunkCallback<'_>,
) -> Result<Blueprint, InferenceError> {
    let messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Template: {template_name}\nUser request: {query}"
        )),
    ];
    let raw = client.stream(ctx, messages, on_chunk).await?;
    parse_json_payload(&raw)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::client::test_support::ScriptedBackend;

    use super::*;

    #[tokio::test]
    async fn streams_and_parses_blueprint_json() {
        let backend = ScriptedBackend::new([serde_json::json!({
            "title": "Todo List",
            "description": "A todo app",
            "initial_phase": {
                "name": "Core UI",
                "description": "todo list skeleton",
                "files": [{"path": "src/App.tsx", "purpose": "root"}]
            }
        })
        .to_string()]);
        let client = InferenceClient::with_backend(Arc::new(backend));
        let ctx = InferenceContext::new("m", "f");

        let chunks = Arc::new(Mutex::new(String::new()));
        let chunks_clone = chunks.clone();
        let blueprint = generate(&client, &ctx, "build a todo list", "react-vite", &move |c| {
            chunks_clone.lock().unwrap().push_str(c);
        })
        .await
        .unwrap();

        assert_eq!(blueprint.title, "Todo List");
        let initial = blueprint.initial_phase.unwrap();
        assert_eq!(initial.files[0].path, "src/App.tsx");
        assert!(!chunks.lock().unwrap().is_empty());
    }
}
