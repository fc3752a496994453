//! Dialogue turn types

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::SpeakerLabels;

/// Format used when a turn's timestamp is rendered into the context.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One question/answer exchange. An empty answer marks the in-flight turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    question: String,
    answer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    thought: String,
    #[serde(default)]
    timestamp: Option<NaiveDateTime>,
}

impl Turn {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pending turn holding `question`, stamped now.
    pub fn asked(question: impl Into<String>) -> Self {
        let mut turn = Self::new();
        turn.set_question(question);
        turn
    }

    /// Sets the question and stamps the current local time.
    pub fn set_question(&mut self, question: impl Into<String>) {
        self.question = question.into();
        self.timestamp = Some(Local::now().naive_local());
    }

    pub fn set_answer(&mut self, answer: impl Into<String>) {
        self.answer = answer.into();
    }

    pub fn set_thought(&mut self, thought: impl Into<String>) {
        self.thought = thought.into();
    }

    pub fn with_timestamp(mut self, timestamp: Option<NaiveDateTime>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn thought(&self) -> &str {
        &self.thought
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamp
    }

    pub fn is_pending(&self) -> bool {
        self.answer.is_empty()
    }

    /// Splits a raw completion into thought and answer.
    ///
    /// Text from the thought prefix up to the answer prefix is the thought,
    /// text from the answer prefix onward is the answer; both keep their
    /// prefixes and lose trailing newlines. Without a thought prefix (or
    /// without an answer prefix after it) the whole trimmed reply is the
    /// answer and the thought is cleared.
    pub fn populate_from_raw_reply(&mut self, raw: &str, labels: &SpeakerLabels) {
        let thought_prefix = labels.thought_prefix();
        let answer_prefix = labels.answer_prefix();

        if let Some(thought_start) = raw.find(&thought_prefix) {
            let search_from = thought_start + thought_prefix.len();
            if let Some(offset) = raw[search_from..].find(&answer_prefix) {
                let answer_start = search_from + offset;
                self.thought = raw[thought_start..answer_start]
                    .trim_end_matches('\n')
                    .to_string();
                self.answer = raw[answer_start..].trim_end_matches('\n').to_string();
                return;
            }
        }

        self.thought.clear();
        self.answer = raw.trim().to_string();
    }
}
