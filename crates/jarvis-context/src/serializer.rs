//! Context window rendering and size estimation

use std::fmt::Write;

use crate::config::SpeakerLabels;
use crate::turn::{Turn, TIMESTAMP_FORMAT};

/// Size charged for the open-ended marker of an in-flight turn.
pub const PENDING_MARKER_SIZE: usize = 8;

/// Renders a preamble and an ordered run of turns into one prompt.
///
/// The serializer only borrows; rendering twice over the same turns gives
/// the same string.
#[derive(Debug, Clone)]
pub struct ContextSerializer<'a, I> {
    preamble: &'a str,
    turns: I,
    labels: &'a SpeakerLabels,
}

impl<'a, I> ContextSerializer<'a, I>
where
    I: Iterator<Item = &'a Turn> + Clone,
{
    pub fn new(preamble: &'a str, turns: I, labels: &'a SpeakerLabels) -> Self {
        Self {
            preamble,
            turns,
            labels,
        }
    }

    /// Preamble, a blank line, then per turn: timestamp, question, and
    /// either the answer plus a blank line or the bare answer prefix for a
    /// pending turn.
    pub fn render(&self) -> String {
        let answer_prefix = self.labels.answer_prefix();
        let mut out = String::with_capacity(self.estimate_size() + 64);

        out.push_str(self.preamble);
        out.push_str("\n\n");

        for turn in self.turns.clone() {
            if let Some(timestamp) = turn.timestamp() {
                // Writing into a String cannot fail.
                let _ = writeln!(out, "{}", timestamp.format(TIMESTAMP_FORMAT));
            }
            out.push_str(turn.question());
            out.push('\n');
            if turn.is_pending() {
                out.push_str(&answer_prefix);
            } else {
                out.push_str(turn.answer());
                out.push_str("\n\n");
            }
        }

        out
    }

    /// Character-count proxy for the rendered size. Timestamps are not
    /// charged.
    pub fn estimate_size(&self) -> usize {
        self.preamble.chars().count() + self.turns.clone().map(turn_size).sum::<usize>()
    }
}

/// Contribution of a single turn to [`ContextSerializer::estimate_size`].
pub fn turn_size(turn: &Turn) -> usize {
    let answer = if turn.is_pending() {
        PENDING_MARKER_SIZE
    } else {
        turn.answer().chars().count() + 2
    };
    turn.question().chars().count() + 1 + answer
}
