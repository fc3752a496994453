//! Memory configuration and speaker labels

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};

/// Maximum number of turns kept in the hot buffer.
pub const DEFAULT_CAPACITY: usize = 50;

/// Model context limit minus the tokens reserved for the reply.
pub const DEFAULT_TOKEN_BUDGET: usize = 4097 - 1024;

/// Characters per token in the budget proxy.
pub const CHARS_PER_TOKEN: usize = 4;

pub const DEFAULT_PREAMBLE: &str = "The following is a conversation with an AI assistant. \
The assistant is curious, helpful, creative, very witty and a bit sarcastic.";

/// Speaker names used to label questions, answers and thoughts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerLabels {
    pub user: String,
    pub assistant: String,
}

impl Default for SpeakerLabels {
    fn default() -> Self {
        Self {
            user: "Human".to_string(),
            assistant: "AI".to_string(),
        }
    }
}

impl SpeakerLabels {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }

    /// `"<user>: "`
    pub fn user_prefix(&self) -> String {
        format!("{}: ", self.user)
    }

    /// `"<assistant>: "`, also the open-ended marker for an in-flight turn.
    pub fn answer_prefix(&self) -> String {
        format!("{}: ", self.assistant)
    }

    /// `"<assistant> thinks: "`
    pub fn thought_prefix(&self) -> String {
        format!("{} thinks: ", self.assistant)
    }

    pub fn label_question(&self, text: &str) -> String {
        format!("{}{}", self.user_prefix(), text)
    }

    /// Removes every speaker prefix and surrounding whitespace, leaving the
    /// text an end user should see.
    pub fn strip(&self, text: &str) -> String {
        text.replace(&self.answer_prefix(), "")
            .replace(&self.user_prefix(), "")
            .trim()
            .to_string()
    }
}

/// Memory buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum turns retained
    pub capacity: usize,
    /// Token budget for the rendered context
    pub token_budget: usize,
    /// Persona / instructions placed before every turn
    pub preamble: String,
    pub labels: SpeakerLabels,
    /// Speaker name used in seed files, rewritten to `labels.user` on load
    pub seed_speaker: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            token_budget: DEFAULT_TOKEN_BUDGET,
            preamble: DEFAULT_PREAMBLE.to_string(),
            labels: SpeakerLabels::default(),
            seed_speaker: "Human".to_string(),
        }
    }
}

impl MemoryConfig {
    pub fn new(capacity: usize, token_budget: usize) -> Self {
        Self {
            capacity,
            token_budget,
            ..Default::default()
        }
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    pub fn with_labels(mut self, labels: SpeakerLabels) -> Self {
        self.labels = labels;
        self
    }

    /// Size ceiling compared against `estimate_size`.
    pub fn size_limit(&self) -> usize {
        self.token_budget.saturating_mul(CHARS_PER_TOKEN)
    }
}

/// Reads the persona file when present, otherwise falls back to [`DEFAULT_PREAMBLE`].
pub fn load_preamble(path: Option<&Path>) -> MemoryResult<String> {
    match path {
        Some(path) if path.exists() => {
            std::fs::read_to_string(path).map_err(|source| MemoryError::PersonaRead {
                path: path.to_path_buf(),
                source,
            })
        }
        _ => Ok(DEFAULT_PREAMBLE.to_string()),
    }
}
