//! Conversation memory trait and the bounded buffer implementation

use std::collections::VecDeque;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::archive::{read_archive, ArchiveRecord, ArchiveSink};
use crate::config::{MemoryConfig, SpeakerLabels};
use crate::error::MemoryResult;
use crate::serializer::{turn_size, ContextSerializer};
use crate::turn::Turn;

/// Memory backend abstraction used by the conversation controller.
pub trait ConversationMemory: Send {
    /// Append a turn, evicting older turns as needed.
    fn record(&mut self, turn: Turn) -> MemoryResult<()>;

    /// Fill the in-flight turn from a raw completion. `None` when no turn is pending.
    fn complete_pending(&mut self, raw_reply: &str) -> MemoryResult<Option<Turn>>;

    /// Drop the in-flight turn without archiving it.
    fn discard_pending(&mut self) -> Option<Turn>;

    /// Render the context window sent to the model
    fn render(&self) -> String;

    /// Size proxy for the rendered context
    fn estimate_size(&self) -> usize;

    /// Archive and drop the oldest turn. No-op when empty.
    fn evict_oldest(&mut self) -> MemoryResult<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn labels(&self) -> &SpeakerLabels;
}

/// Bounded, ordered buffer of turns for one conversation.
///
/// After every mutation the buffer holds at most `capacity` turns and its
/// estimated size stays within the token budget, except that the newest
/// turn is always kept even if it alone exceeds the budget. Evicted turns
/// go to the archive first and are only dropped once archived.
pub struct MemoryBuffer {
    turns: VecDeque<Turn>,
    config: MemoryConfig,
    archive: Box<dyn ArchiveSink>,
}

impl std::fmt::Debug for MemoryBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBuffer")
            .field("turns", &self.turns)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryBuffer {
    pub fn new(config: MemoryConfig, archive: impl ArchiveSink + 'static) -> Self {
        Self {
            turns: VecDeque::with_capacity(config.capacity),
            config,
            archive: Box::new(archive),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Effective capacity; a buffer always has room for the newest turn.
    pub fn capacity(&self) -> usize {
        self.config.capacity.max(1)
    }

    pub fn preamble(&self) -> &str {
        &self.config.preamble
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> + '_ {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn latest(&self) -> Option<&Turn> {
        self.turns.back()
    }

    pub fn serializer(&self) -> ContextSerializer<'_, std::collections::vec_deque::Iter<'_, Turn>> {
        ContextSerializer::new(&self.config.preamble, self.turns.iter(), &self.config.labels)
    }

    /// Append a turn, then evict oldest turns until both capacity and budget hold.
    /// If an archive write fails during budget eviction the new turn is not kept.
    pub fn append(&mut self, turn: Turn) -> MemoryResult<()> {
        while self.turns.len() >= self.capacity() {
            self.evict_oldest()?;
        }
        self.turns.push_back(turn);
        if let Err(err) = self.enforce_budget() {
            // Only older turns are evicted, so the back is still the new turn.
            self.turns.pop_back();
            return Err(err);
        }
        Ok(())
    }

    /// Appends previously saved turns in order, e.g. from a session snapshot.
    pub fn restore(&mut self, turns: impl IntoIterator<Item = Turn>) -> MemoryResult<()> {
        for turn in turns {
            self.append(turn)?;
        }
        Ok(())
    }

    pub fn evict_oldest(&mut self) -> MemoryResult<()> {
        let Some(oldest) = self.turns.front() else {
            return Ok(());
        };
        self.archive.archive(oldest)?;
        self.turns.pop_front();
        Ok(())
    }

    fn enforce_budget(&mut self) -> MemoryResult<()> {
        let limit = self.config.size_limit();
        let mut size = self.serializer().estimate_size();

        while size > limit && self.turns.len() > 1 {
            debug!(context_size = size, limit, "context over budget, evicting oldest turn");
            let freed = self.turns.front().map_or(0, turn_size);
            self.evict_oldest()?;
            size -= freed;
        }

        if size > limit {
            warn!(
                context_size = size,
                limit, "newest turn alone exceeds the context budget"
            );
        }
        Ok(())
    }

    /// Seed the buffer from a JSONL archive or few-shot file.
    ///
    /// Only the last `min(max_turns, capacity)` records are kept; earlier
    /// ones are read and dropped without being archived again. Every line
    /// is parsed before anything is appended, so a malformed line leaves
    /// the buffer untouched. A missing file loads nothing.
    pub fn load_from_archive(&mut self, path: &Path, max_turns: usize) -> MemoryResult<usize> {
        let Some(reader) = read_archive(path)? else {
            debug!(path = %path.display(), "no archive to load");
            return Ok(0);
        };

        let keep = max_turns.min(self.capacity());
        let mut recent: VecDeque<Turn> = VecDeque::with_capacity(keep);
        let mut read = 0usize;

        for record in reader {
            let record = record?;
            read += 1;
            if keep == 0 || record.completion.trim().is_empty() {
                continue;
            }
            if recent.len() == keep {
                recent.pop_front();
            }
            recent.push_back(self.turn_from_record(record));
        }

        let loaded = recent.len();
        self.restore(recent)?;

        info!(path = %path.display(), read, loaded, "loaded turns from archive");
        Ok(loaded)
    }

    fn turn_from_record(&self, record: ArchiveRecord) -> Turn {
        let seed_prefix = format!("{}: ", self.config.seed_speaker);
        let question = match record.prompt.strip_prefix(&seed_prefix) {
            Some(text) => self.config.labels.label_question(text),
            None => record.prompt,
        };

        let mut turn = Turn::asked(question);
        turn.populate_from_raw_reply(&record.completion, &self.config.labels);
        turn
    }
}

impl ConversationMemory for MemoryBuffer {
    fn record(&mut self, turn: Turn) -> MemoryResult<()> {
        self.append(turn)
    }

    fn complete_pending(&mut self, raw_reply: &str) -> MemoryResult<Option<Turn>> {
        let labels = self.config.labels.clone();
        let Some(turn) = self.turns.back_mut().filter(|turn| turn.is_pending()) else {
            return Ok(None);
        };

        turn.populate_from_raw_reply(raw_reply, &labels);
        // Stored answers carry the speaker prefix so later renders stay labelled.
        let answer_prefix = labels.answer_prefix();
        if !turn.answer().starts_with(&answer_prefix) {
            let answer = format!("{answer_prefix}{}", turn.answer());
            turn.set_answer(answer);
        }
        let completed = turn.clone();

        self.enforce_budget()?;
        Ok(Some(completed))
    }

    fn discard_pending(&mut self) -> Option<Turn> {
        if self.turns.back().is_some_and(Turn::is_pending) {
            self.turns.pop_back()
        } else {
            None
        }
    }

    fn render(&self) -> String {
        self.serializer().render()
    }

    fn estimate_size(&self) -> usize {
        self.serializer().estimate_size()
    }

    fn evict_oldest(&mut self) -> MemoryResult<()> {
        MemoryBuffer::evict_oldest(self)
    }

    fn len(&self) -> usize {
        MemoryBuffer::len(self)
    }

    fn labels(&self) -> &SpeakerLabels {
        &self.config.labels
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::archive::{JsonlArchive, MemoryArchive};
    use crate::error::MemoryError;

    fn answered(question: &str, answer: &str) -> Turn {
        let mut turn = Turn::asked(question).with_timestamp(None);
        turn.set_answer(answer);
        turn
    }

    fn buffer(capacity: usize, token_budget: usize) -> (MemoryBuffer, MemoryArchive) {
        let archive = MemoryArchive::new();
        let config = MemoryConfig::new(capacity, token_budget).with_preamble("P");
        (MemoryBuffer::new(config, archive.clone()), archive)
    }

    struct FailingArchive;

    impl ArchiveSink for FailingArchive {
        fn archive(&mut self, _turn: &Turn) -> MemoryResult<()> {
            Err(MemoryError::ArchiveWrite {
                path: "/dev/full".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            })
        }
    }

    #[test]
    fn capacity_evicts_oldest_into_archive() {
        let (mut memory, archive) = buffer(2, 10_000);

        memory.append(answered("Human: 1", "AI: one")).unwrap();
        memory.append(answered("Human: 2", "AI: two")).unwrap();
        memory.append(answered("Human: 3", "AI: three")).unwrap();

        let questions: Vec<_> = memory.turns().map(Turn::question).collect();
        assert_eq!(questions, vec!["Human: 2", "Human: 3"]);

        let records = archive.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prompt, "Human: 1");
        assert_eq!(records[0].completion, "AI: one");
    }

    #[test]
    fn budget_evicts_until_it_fits() {
        // limit = 10 * 4 = 40; each turn below costs 9 + 1 + 10 + 2 = 22
        let (mut memory, archive) = buffer(50, 10);

        memory.append(answered("Human: aa", "AI: aaaaaa")).unwrap();
        memory.append(answered("Human: bb", "AI: bbbbbb")).unwrap();

        assert_eq!(memory.len(), 1);
        assert!(memory.estimate_size() <= memory.config().size_limit());
        assert_eq!(archive.records()[0].prompt, "Human: aa");
    }

    #[test]
    fn oversized_turn_is_kept_alone() {
        let (mut memory, archive) = buffer(50, 1);

        memory.append(answered("Human: a", "AI: b")).unwrap();
        memory.append(answered("Human: c", "AI: d")).unwrap();
        memory
            .append(answered("Human: far too long for a four char budget", "AI: ok"))
            .unwrap();

        assert_eq!(memory.len(), 1);
        assert_eq!(
            memory.latest().unwrap().question(),
            "Human: far too long for a four char budget"
        );
        assert_eq!(archive.records().len(), 2);
    }

    #[test]
    fn evict_on_empty_is_noop() {
        let (mut memory, archive) = buffer(2, 100);
        memory.evict_oldest().unwrap();
        assert!(memory.is_empty());
        assert!(archive.records().is_empty());
    }

    #[test]
    fn failed_archive_keeps_turn() {
        let config = MemoryConfig::new(1, 10_000);
        let mut memory = MemoryBuffer::new(config, FailingArchive);
        memory.append(answered("Human: keep", "AI: me")).unwrap();

        let err = memory.append(answered("Human: next", "AI: turn")).unwrap_err();

        assert!(matches!(err, MemoryError::ArchiveWrite { .. }));
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.latest().unwrap().question(), "Human: keep");
    }

    #[test]
    fn failed_budget_eviction_drops_new_turn() {
        let config = MemoryConfig::new(50, 10).with_preamble("P");
        let mut memory = MemoryBuffer::new(config, FailingArchive);
        memory.append(answered("Human: a", "AI: a")).unwrap();

        let err = memory
            .append(Turn::asked("Human: this pending question is long").with_timestamp(None))
            .unwrap_err();

        assert!(matches!(err, MemoryError::ArchiveWrite { .. }));
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.latest().unwrap().question(), "Human: a");
        assert!(!memory.latest().unwrap().is_pending());
    }

    #[test]
    fn complete_pending_labels_answer_and_rechecks_budget() {
        // limit 40: 1 + (8 + 1 + 5 + 2) + (8 + 1 + 8) = 34 fits
        let (mut memory, archive) = buffer(50, 10);
        memory.append(answered("Human: a", "AI: a")).unwrap();
        memory.append(Turn::asked("Human: b").with_timestamp(None)).unwrap();
        assert_eq!(memory.len(), 2);

        let completed = memory
            .complete_pending("a reply long enough to overflow")
            .unwrap()
            .unwrap();

        assert_eq!(completed.answer(), "AI: a reply long enough to overflow");
        assert_eq!(memory.len(), 1);
        assert_eq!(archive.records().len(), 1);
        assert!(!memory.latest().unwrap().is_pending());
    }

    #[test]
    fn complete_pending_without_pending_turn_is_none() {
        let (mut memory, _) = buffer(5, 1_000);
        memory.append(answered("Human: a", "AI: b")).unwrap();

        assert!(memory.complete_pending("AI: c").unwrap().is_none());
        assert_eq!(memory.latest().unwrap().answer(), "AI: b");
    }

    #[test]
    fn discard_pending_only_removes_inflight_turn() {
        let (mut memory, archive) = buffer(5, 1_000);
        memory.append(answered("Human: a", "AI: b")).unwrap();
        assert!(memory.discard_pending().is_none());

        memory.append(Turn::asked("Human: c")).unwrap();
        let dropped = memory.discard_pending().unwrap();

        assert_eq!(dropped.question(), "Human: c");
        assert_eq!(memory.len(), 1);
        assert!(archive.records().is_empty());
    }

    #[test]
    fn load_keeps_most_recent_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.jsonl");
        let lines: String = (0..60)
            .map(|i| format!("{{\"prompt\":\"Human: q{i}\",\"completion\":\"AI: a{i}\"}}\n"))
            .collect();
        fs::write(&path, lines).unwrap();

        let (mut memory, archive) = buffer(50, 100_000);
        let loaded = memory.load_from_archive(&path, 50).unwrap();

        assert_eq!(loaded, 50);
        assert_eq!(memory.len(), 50);
        assert_eq!(memory.turns().next().unwrap().question(), "Human: q10");
        assert_eq!(memory.latest().unwrap().answer(), "AI: a59");
        assert!(archive.records().is_empty());
    }

    #[test]
    fn load_relabels_seed_speaker_and_splits_thoughts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.jsonl");
        fs::write(
            &path,
            "{\"prompt\": \"Human: Hello, my name is Yusuf\", \"completion\": \"Jarvis thinks: A friendly person.\\nJarvis: Hi Yusuf.\\n\"}\n",
        )
        .unwrap();

        let config = MemoryConfig::new(50, 10_000).with_labels(SpeakerLabels::new("Me", "Jarvis"));
        let mut memory = MemoryBuffer::new(config, MemoryArchive::new());
        memory.load_from_archive(&path, 50).unwrap();

        let turn = memory.latest().unwrap();
        assert_eq!(turn.question(), "Me: Hello, my name is Yusuf");
        assert_eq!(turn.thought(), "Jarvis thinks: A friendly person.");
        assert_eq!(turn.answer(), "Jarvis: Hi Yusuf.");
    }

    #[test]
    fn load_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (mut memory, _) = buffer(5, 1_000);

        let loaded = memory
            .load_from_archive(&dir.path().join("absent.jsonl"), 5)
            .unwrap();

        assert_eq!(loaded, 0);
        assert!(memory.is_empty());
    }

    #[test]
    fn load_malformed_line_leaves_buffer_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.jsonl");
        fs::write(
            &path,
            "{\"prompt\":\"Human: a\",\"completion\":\"AI: b\"}\n{\"prompt\": oops\n",
        )
        .unwrap();

        let (mut memory, _) = buffer(5, 1_000);
        memory.append(answered("Human: existing", "AI: turn")).unwrap();

        let err = memory.load_from_archive(&path, 5).unwrap_err();

        assert!(matches!(err, MemoryError::Parse { line: 2, .. }));
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.latest().unwrap().question(), "Human: existing");
    }

    #[test]
    fn archived_turn_round_trips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let archive = JsonlArchive::for_user(dir.path(), "Human");
        let path = archive.path().to_path_buf();

        let mut memory = MemoryBuffer::new(MemoryConfig::new(1, 10_000), archive);
        memory.append(answered("Human: first", "AI: reply one")).unwrap();
        memory.append(answered("Human: second", "AI: reply two")).unwrap();

        let (mut reloaded, _) = buffer(5, 10_000);
        reloaded.load_from_archive(&path, 5).unwrap();

        let turn = reloaded.latest().unwrap();
        assert_eq!(turn.question(), "Human: first");
        assert_eq!(turn.answer(), "AI: reply one");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn turn_strategy() -> impl Strategy<Value = (String, String)> {
            ("[a-z ]{0,40}", "[a-z ]{0,60}")
        }

        proptest! {
            #[test]
            fn append_preserves_capacity_and_budget(
                capacity in 1usize..8,
                token_budget in 1usize..64,
                turns in proptest::collection::vec(turn_strategy(), 1..40),
            ) {
                let (mut memory, archive) = buffer(capacity, token_budget);
                let limit = memory.config().size_limit();

                for (i, (question, answer)) in turns.iter().enumerate() {
                    let mut turn = Turn::asked(format!("Human: {i} {question}"));
                    if !answer.is_empty() {
                        turn.set_answer(format!("AI: {answer}"));
                    }
                    memory.append(turn).unwrap();

                    prop_assert!(memory.len() <= capacity);
                    prop_assert!(memory.len() >= 1);
                    prop_assert!(memory.estimate_size() <= limit || memory.len() == 1);
                }

                // Every evicted turn is archived once, oldest first.
                let archived: Vec<_> = archive.records().into_iter().map(|r| r.prompt).collect();
                let expected: Vec<_> = turns
                    .iter()
                    .enumerate()
                    .take(turns.len() - memory.len())
                    .map(|(i, (question, _))| format!("Human: {i} {question}"))
                    .collect();
                prop_assert_eq!(archived, expected);
            }
        }
    }
}
