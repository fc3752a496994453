//! Runtime abstractions for completion providers.
//!
//! The conversation core only ever sees [`AIProvider`]: a prompt goes in,
//! completion text comes out, or a [`ProviderError`] that can be told apart
//! as "prompt too large" versus anything else.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod providers;

pub use providers::{ApiFlavor, OpenAIProvider};

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stop: Option<Vec<String>>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 256,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop: Option<Vec<String>>,
    /// Opaque end-user identifier forwarded for abuse tracking.
    pub user: Option<String>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, params: &GenerationParams) -> Self {
        Self {
            prompt: prompt.into(),
            model: params.model.clone(),
            max_tokens: Some(params.max_tokens),
            temperature: Some(params.temperature),
            top_p: Some(params.top_p),
            frequency_penalty: Some(params.frequency_penalty),
            presence_penalty: Some(params.presence_penalty),
            stop: params.stop.clone(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: None,
            finish_reason: Some("stop".to_string()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("prompt exceeds the model context: {0}")]
    PromptTooLarge(String),
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("response decode error: {0}")]
    Decode(String),
    #[error("completion timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("provider configuration error: {0}")]
    Configuration(String),
    #[error("mock provider has no queued response")]
    MockQueueEmpty,
    #[error("provider error: {0}")]
    Message(String),
}

impl ProviderError {
    /// Whether shrinking the prompt could make the same request succeed.
    pub fn is_prompt_too_large(&self) -> bool {
        matches!(self, Self::PromptTooLarge(_))
    }
}

#[async_trait]
pub trait AIProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, req: CompletionRequest) -> Result<CompletionResponse, ProviderError>;
}

/// Scripted provider: replays queued results in order and keeps every
/// request it was given.
#[derive(Debug, Default)]
pub struct MockProvider {
    generate_queue: Mutex<VecDeque<Result<CompletionResponse, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_generate(&self, result: Result<CompletionResponse, ProviderError>) {
        self.generate_queue
            .lock()
            .expect("mock generate queue poisoned")
            .push_back(result);
    }

    pub fn enqueue_text(&self, content: impl Into<String>) {
        self.enqueue_generate(Ok(CompletionResponse::text(content)));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .expect("mock request log poisoned")
            .clone()
    }

    pub fn pending(&self) -> usize {
        self.generate_queue
            .lock()
            .expect("mock generate queue poisoned")
            .len()
    }
}

#[async_trait]
impl AIProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(&self, req: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.requests
            .lock()
            .expect("mock request log poisoned")
            .push(req);
        self.generate_queue
            .lock()
            .expect("mock generate queue poisoned")
            .pop_front()
            .unwrap_or(Err(ProviderError::MockQueueEmpty))
    }
}
