//! User conversation processing: turn an incoming chat message plus running
//! history into an assistant reply, and drive deep-debug exchanges.

use crate::{
    client::{ChatMessage, ChunkCallback, InferenceClient, InferenceError},
    context::InferenceContext,
    operations::IssueSnapshot,
};

const CONVERSATION_PROMPT: &str = "You are the assistant embedded in an \
application generator. Answer the user's question about their generated \
project. Keep replies short; the build loop applies code changes, not you.";

const DEEP_DEBUG_PROMPT: &str = "You are running a deep-debug session over \
a generated application. Work through the reported issues, reasoning about \
likely root causes and concrete fixes, one step at a time.";

pub async fn process_user_message(
    client: &InferenceClient,
    ctx: &InferenceContext,
    history: &[ChatMessage],
    message: &str,
    on_chunk: ChunkCallback<'_>,
) -> Result<String, InferenceError> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(CONVERSATION_PROMPT));
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(message));
    client.stream(ctx, messages, on_chunk).await
}

pub async fn deep_debug_step(
    client: &InferenceClient,
    ctx: &InferenceContext,
    transcript: &[ChatMessage],
    issues: &IssueSnapshot,
) -> Result<String, InferenceError> {
    let mut messages = Vec::with_capacity(transcript.len() + 2);
    messages.push(ChatMessage::system(DEEP_DEBUG_PROMPT));
    messages.extend_from_slice(transcript);
    messages.push(ChatMessage::user(format!(
        "Current issues:\n{}",
        issues.render()
    )));
    client.complete(ctx, messages).await
}
