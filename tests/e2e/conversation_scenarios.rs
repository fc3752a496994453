use std::fs;
use std::path::Path;
use std::sync::Arc;

use jarvis_context::{
    read_archive, ArchiveRecord, Conversation, ConversationConfig, ConversationMemory,
    JsonlArchive, MemoryBuffer, MemoryConfig, MemoryResult, Reply, SpeakerLabels, Turn,
};
use jarvis_runtime::{MockProvider, ProviderError};

fn archived(path: &Path) -> Vec<ArchiveRecord> {
    read_archive(path)
        .expect("archive should open")
        .map(|reader| reader.collect::<MemoryResult<Vec<_>>>().expect("archive should parse"))
        .unwrap_or_default()
}

fn answered(question: &str, answer: &str) -> Turn {
    let mut turn = Turn::asked(question);
    turn.set_answer(answer);
    turn
}

#[test]
fn capacity_two_keeps_last_two_and_archives_first() {
    let dir = tempfile::tempdir().unwrap();
    let archive = JsonlArchive::for_user(dir.path(), "alice");
    let path = archive.path().to_path_buf();
    let mut memory = MemoryBuffer::new(MemoryConfig::new(2, 10_000), archive);

    memory.append(answered("Human: one", "AI: 1")).unwrap();
    memory.append(answered("Human: two", "AI: 2")).unwrap();
    memory.append(answered("Human: three", "AI: 3")).unwrap();

    let kept: Vec<_> = memory.turns().map(Turn::question).collect();
    assert_eq!(kept, vec!["Human: two", "Human: three"]);
    assert_eq!(
        archived(&path),
        vec![ArchiveRecord {
            prompt: "Human: one".to_string(),
            completion: "AI: 1".to_string()
        }]
    );
}

#[test]
fn oversized_turn_evicts_everything_else() {
    let dir = tempfile::tempdir().unwrap();
    let archive = JsonlArchive::for_user(dir.path(), "bob");
    let path = archive.path().to_path_buf();
    let mut memory = MemoryBuffer::new(MemoryConfig::new(50, 2), archive);

    memory.append(answered("Human: a", "AI: b")).unwrap();
    memory.append(answered("Human: c", "AI: d")).unwrap();
    memory
        .append(answered("Human: this turn alone is bigger than eight chars", "AI: yes"))
        .unwrap();

    assert_eq!(memory.len(), 1);
    assert_eq!(
        memory.latest().unwrap().question(),
        "Human: this turn alone is bigger than eight chars"
    );
    let prompts: Vec<_> = archived(&path).into_iter().map(|r| r.prompt).collect();
    assert_eq!(prompts, vec!["Human: a", "Human: c"]);
}

#[test]
fn raw_reply_splits_thought_and_answer() {
    let mut turn = Turn::new();
    turn.populate_from_raw_reply("AI thinks: curious.\nAI: Hello there.", &SpeakerLabels::default());

    assert_eq!(turn.thought(), "AI thinks: curious.");
    assert_eq!(turn.answer(), "AI: Hello there.");
}

#[test]
fn loading_sixty_records_keeps_last_fifty() {
    let dir = tempfile::tempdir().unwrap();
    let seed = dir.path().join("training.jsonl");
    let lines: String = (1..=60)
        .map(|i| format!("{{\"prompt\": \"Human: line {i}\", \"completion\": \"AI: reply {i}\"}}\n"))
        .collect();
    fs::write(&seed, lines).unwrap();

    let archive = JsonlArchive::for_user(dir.path(), "carol");
    let archive_path = archive.path().to_path_buf();
    let mut memory = MemoryBuffer::new(MemoryConfig::default(), archive);

    let loaded = memory.load_from_archive(&seed, 50).unwrap();

    assert_eq!(loaded, 50);
    let questions: Vec<_> = memory.turns().map(Turn::question).collect();
    let expected: Vec<_> = (11..=60).map(|i| format!("Human: line {i}")).collect();
    assert_eq!(questions, expected);
    assert!(!archive_path.exists());
}

#[tokio::test]
async fn two_size_failures_then_success() {
    let dir = tempfile::tempdir().unwrap();
    let archive = JsonlArchive::for_user(dir.path(), "dave");
    let path = archive.path().to_path_buf();

    let config = MemoryConfig::new(50, 10_000).with_labels(SpeakerLabels::new("dave", "AI"));
    let mut memory = MemoryBuffer::new(config, archive);
    for i in 0..4 {
        memory
            .append(answered(&format!("dave: q{i}"), &format!("AI: a{i}")))
            .unwrap();
    }

    let provider = Arc::new(MockProvider::new());
    provider.enqueue_generate(Err(ProviderError::PromptTooLarge("too long".to_string())));
    provider.enqueue_generate(Err(ProviderError::PromptTooLarge("too long".to_string())));
    provider.enqueue_text("AI thinks: persistent.\nAI: Here you go.");

    let mut conversation =
        Conversation::new("dave", memory, provider.clone(), ConversationConfig::default());

    let reply = conversation.handle_input("one more").await.unwrap();

    assert_eq!(
        reply,
        Reply::Answer {
            text: "Here you go.".to_string(),
            thought: Some("AI thinks: persistent.".to_string())
        }
    );
    assert_eq!(provider.requests().len(), 3);

    let prompts: Vec<_> = archived(&path).into_iter().map(|r| r.prompt).collect();
    assert_eq!(prompts, vec!["dave: q0", "dave: q1"]);

    let memory = conversation.into_memory();
    assert_eq!(memory.len(), 3);
    let latest = memory.latest().unwrap();
    assert_eq!(latest.question(), "dave: one more");
    assert_eq!(latest.answer(), "AI: Here you go.");

    let rendered = memory.render();
    assert_eq!(rendered, memory.render());
    assert!(rendered.ends_with("dave: one more\nAI: Here you go.\n\n"));
}
