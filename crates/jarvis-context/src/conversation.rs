//! Conversation controller
//!
//! Drives one exchange: record the pending turn, render the context, ask
//! the completion provider, and store the answer. A "prompt too large"
//! reply evicts the oldest turn and retries; the loop stops once only the
//! pending turn is left. Any other provider failure yields the fallback
//! message and removes the pending turn.

use std::sync::Arc;
use std::time::Duration;

use jarvis_runtime::{AIProvider, CompletionRequest, GenerationParams, ProviderError};
use tracing::{debug, error, warn};

use crate::error::{ConversationError, ConversationResult, MemoryError};
use crate::memory::{ConversationMemory, MemoryBuffer};
use crate::turn::Turn;

pub const DEFAULT_FALLBACK_MESSAGE: &str = "I'm sorry, I'm not feeling well. I'll be back soon.";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub generation: GenerationParams,
    /// Upper bound on a single completion call
    pub timeout: Duration,
    /// Shown to the user when the provider fails for any reason other than prompt size
    pub fallback_message: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            generation: GenerationParams::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    AwaitingReply,
}

/// What the end user gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The model's answer with speaker prefixes removed.
    Answer { text: String, thought: Option<String> },
    /// The provider failed; the turn was not recorded.
    Fallback(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Self::Answer { text, .. } => text,
            Self::Fallback(text) => text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

enum CompletionFailure {
    Exhausted,
    Endpoint(ProviderError),
    Memory(MemoryError),
}

/// One conversation with one user. Calls must be sequential.
pub struct Conversation<M = MemoryBuffer> {
    user_id: String,
    memory: M,
    provider: Arc<dyn AIProvider>,
    config: ConversationConfig,
    state: ConversationState,
}

impl<M: ConversationMemory> Conversation<M> {
    pub fn new(
        user_id: impl Into<String>,
        memory: M,
        provider: Arc<dyn AIProvider>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            memory,
            provider,
            config,
            state: ConversationState::Idle,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn into_memory(self) -> M {
        self.memory
    }

    /// Handle one user message.
    ///
    /// Only [`ConversationError::ContextExhausted`] and archive failures
    /// surface as errors; every provider failure other than prompt size
    /// becomes [`Reply::Fallback`].
    pub async fn handle_input(&mut self, text: &str) -> ConversationResult<Reply> {
        let question = self.memory.labels().label_question(text);
        self.memory.record(Turn::asked(question))?;

        self.state = ConversationState::AwaitingReply;
        let outcome = self.request_completion().await;
        self.state = ConversationState::Idle;

        let raw = match outcome {
            Ok(raw) => raw,
            Err(failure) => {
                self.memory.discard_pending();
                return match failure {
                    CompletionFailure::Exhausted => Err(ConversationError::ContextExhausted),
                    CompletionFailure::Memory(err) => Err(err.into()),
                    CompletionFailure::Endpoint(err) => {
                        error!(
                            user_id = %self.user_id,
                            provider = self.provider.name(),
                            error = %err,
                            "completion failed, replying with fallback"
                        );
                        Ok(Reply::Fallback(self.config.fallback_message.clone()))
                    }
                };
            }
        };

        let labels = self.memory.labels().clone();
        let reply = match self.memory.complete_pending(&raw)? {
            Some(turn) => Reply::Answer {
                text: labels.strip(turn.answer()),
                thought: Some(turn.thought().to_string()).filter(|t| !t.is_empty()),
            },
            // Not reached: eviction never removes the newest turn, which is
            // the pending one here.
            None => Reply::Answer {
                text: labels.strip(&raw),
                thought: None,
            },
        };
        Ok(reply)
    }

    async fn request_completion(&mut self) -> Result<String, CompletionFailure> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let prompt = self.memory.render();
            debug!(
                user_id = %self.user_id,
                attempt,
                context_size = self.memory.estimate_size(),
                turns = self.memory.len(),
                "requesting completion"
            );

            let request = CompletionRequest::new(prompt, &self.config.generation)
                .with_user(self.user_id.clone());

            let result =
                match tokio::time::timeout(self.config.timeout, self.provider.generate(request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout {
                        timeout_ms: self.config.timeout.as_millis() as u64,
                    }),
                };

            match result {
                Ok(response) => return Ok(response.content),
                Err(err) if err.is_prompt_too_large() => {
                    // The pending turn is the newest; only older turns may go.
                    if self.memory.len() <= 1 {
                        warn!(
                            user_id = %self.user_id,
                            attempt,
                            error = %err,
                            "prompt too large with no history left to evict"
                        );
                        return Err(CompletionFailure::Exhausted);
                    }
                    warn!(
                        user_id = %self.user_id,
                        attempt,
                        error = %err,
                        "prompt too large, evicting oldest turn and retrying"
                    );
                    self.memory
                        .evict_oldest()
                        .map_err(CompletionFailure::Memory)?;
                }
                Err(err) => return Err(CompletionFailure::Endpoint(err)),
            }
        }
    }
}
