//! Chat-completions client for an OpenAI-compatible provider, with token
//! streaming and cooperative cancellation. The backend is a trait so tests
//! (and the fake agent scenarios) can script responses.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use services::services::config::InferenceConfig;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::InferenceContext;

#[derive(Debug, Error)]
pub enum InferenceError {
    /// HTTP 429 from the provider; surfaced to the client as its own
    /// websocket message kind rather than a generic error.
    #[error("Inference provider rate limit exceeded")]
    RateLimited,
    /// The in-flight call was cancelled through the build's abort handle.
    #[error("Inference aborted")]
    Aborted,
    #[error("Malformed model output: {0}")]
    Malformed(String),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl InferenceError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, InferenceError::Aborted)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, InferenceError::RateLimited)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, ts_rs::TS)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

pub type ChunkCallback<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, InferenceError>;

    /// Stream the response, invoking `on_chunk` for every delta. Returns the
    /// full concatenated text. Must observe `cancel` between chunks.
    async fn stream(
        &self,
        request: &ChatRequest,
        on_chunk: ChunkCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, InferenceError>;
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireStreamEvent {
    choices: Vec<WireStreamChoice>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    delta: WireStreamDelta,
}

#[derive(Deserialize, Default)]
struct WireStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

pub struct HttpChatBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpChatBackend {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    fn request_builder(&self) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    fn map_status(status: reqwest::StatusCode, body: String) -> InferenceError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            InferenceError::RateLimited
        } else {
            InferenceError::Provider(format!("{status}: {body}"))
        }
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String, InferenceError> {
        let response = self
            .request_builder()
            .json(&WireRequest {
                model: &request.model,
                messages: &request.messages,
                temperature: request.temperature,
                stream: false,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, body));
        }

        let parsed: WireResponse = response.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        on_chunk: ChunkCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, InferenceError> {
        let response = self
            .request_builder()
            .json(&WireRequest {
                model: &request.model,
                messages: &request.messages,
                temperature: request.temperature,
                stream: true,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, body));
        }

        let mut full = String::new();
        let mut pending = String::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            if cancel.is_cancelled() {
                return Err(InferenceError::Aborted);
            }
            let chunk = chunk?;
            pending.push_str(&String::from_utf8_lossy(&chunk));

            // SSE frames are newline-delimited `data: {...}` lines.
            while let Some(newline) = pending.find('\n') {
                let line = pending[..newline].trim().to_string();
                pending.drain(..=newline);
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(full);
                }
                match serde_json::from_str::<WireStreamEvent>(data) {
                    Ok(event) => {
                        if let Some(delta) = event
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|choice| choice.delta.content)
                        {
                            full.push_str(&delta);
                            on_chunk(&delta);
                        }
                    }
                    Err(err) => {
                        tracing::debug!("Skipping unparseable stream frame: {err}");
                    }
                }
            }
        }
        Ok(full)
    }
}

#[derive(Clone)]
pub struct InferenceClient {
    backend: Arc<dyn ChatBackend>,
}

impl InferenceClient {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            backend: Arc::new(HttpChatBackend::new(config)),
        }
    }

    pub fn with_backend(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    pub async fn complete(
        &self,
        ctx: &InferenceContext,
        messages: Vec<ChatMessage>,
    ) -> Result<String, InferenceError> {
        self.complete_with_model(ctx, &ctx.model.clone(), messages)
            .await
    }

    pub async fn complete_fast(
        &self,
        ctx: &InferenceContext,
        messages: Vec<ChatMessage>,
    ) -> Result<String, InferenceError> {
        self.complete_with_model(ctx, &ctx.fast_model.clone(), messages)
            .await
    }

    async fn complete_with_model(
        &self,
        ctx: &InferenceContext,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<String, InferenceError> {
        if ctx.cancellation.is_cancelled() {
            return Err(InferenceError::Aborted);
        }
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            temperature: 0.2,
        };
        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(InferenceError::Aborted),
            result = self.backend.complete(&request) => result,
        }
    }

    pub async fn stream(
        &self,
        ctx: &InferenceContext,
        messages: Vec<ChatMessage>,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<String, InferenceError> {
        if ctx.cancellation.is_cancelled() {
            return Err(InferenceError::Aborted);
        }
        let request = ChatRequest {
            model: ctx.model.clone(),
            messages,
            temperature: 0.2,
        };
        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(InferenceError::Aborted),
            result = self.backend.stream(&request, on_chunk, &ctx.cancellation) => result,
        }
    }
}

pub mod test_support {
    //! Scripted backend used by operation and agent tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct ScriptedBackend {
        responses: Mutex<VecDeque<String>>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedBackend {
        pub fn new(responses: impl IntoIterator<Item = String>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn push_response(&self, response: impl Into<String>) {
            self.responses.lock().unwrap().push_back(response.into());
        }

        fn next_response(&self, request: &ChatRequest) -> Result<String, InferenceError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| InferenceError::Provider("no scripted response".to_string()))
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, request: &ChatRequest) -> Result<String, InferenceError> {
            self.next_response(request)
        }

        async fn stream(
            &self,
            request: &ChatRequest,
            on_chunk: ChunkCallback<'_>,
            cancel: &CancellationToken,
        ) -> Result<String, InferenceError> {
            let full = self.next_response(request)?;
            // Feed in small chunks so streaming consumers are exercised.
            let chars: Vec<char> = full.chars().collect();
            for window in chars.chunks(16) {
                if cancel.is_cancelled() {
                    return Err(InferenceError::Aborted);
                }
                let piece: String = window.iter().collect();
                on_chunk(&piece);
                tokio::task::yield_now().await;
            }
            Ok(full)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::test_support::ScriptedBackend;
    use super::*;

    #[tokio::test]
    async fn scripted_stream_delivers_chunks_and_full_text() {
        let backend = ScriptedBackend::new(["hello streaming world".to_string()]);
        let client = InferenceClient::with_backend(Arc::new(backend));
        let ctx = InferenceContext::new("m", "f");

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let full = client
            .stream(&ctx, vec![ChatMessage::user("hi")], &move |chunk| {
                seen_clone.fetch_add(chunk.len(), Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert_eq!(full, "hello streaming world");
        assert_eq!(seen.load(Ordering::SeqCst), full.len());
    }

    #[tokio::test]
    async fn cancelled_context_aborts_before_calling_backend() {
        let backend = ScriptedBackend::new(["never used".to_string()]);
        let client = InferenceClient::with_backend(Arc::new(backend));
        let ctx = InferenceContext::new("m", "f");
        ctx.cancellation.cancel();

        let err = client
            .complete(&ctx, vec![ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(err.is_aborted());
    }
}
