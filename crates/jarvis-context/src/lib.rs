//! Jarvis Context - bounded conversational memory
//!
//! This crate provides:
//! - Dialogue turns with optional internal thoughts
//! - A bounded memory buffer with capacity and token-budget eviction
//! - Deterministic context rendering and size estimation
//! - JSONL archival of evicted turns and seeding from archives
//! - The conversation controller that talks to a completion provider

pub mod archive;
pub mod config;
pub mod conversation;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod turn;

pub use archive::{read_archive, ArchiveRecord, ArchiveSink, JsonlArchive, MemoryArchive};
pub use config::{load_preamble, MemoryConfig, SpeakerLabels, DEFAULT_PREAMBLE};
pub use conversation::{Conversation, ConversationConfig, ConversationState, Reply};
pub use error::{ConversationError, ConversationResult, MemoryError, MemoryResult};
pub use memory::{ConversationMemory, MemoryBuffer};
pub use serializer::ContextSerializer;
pub use turn::Turn;

/// Prelude for common imports
pub mod prelude {
    pub use crate::archive::{ArchiveSink, JsonlArchive};
    pub use crate::config::{MemoryConfig, SpeakerLabels};
    pub use crate::conversation::{Conversation, ConversationConfig, Reply};
    pub use crate::error::{ConversationError, MemoryError};
    pub use crate::memory::{ConversationMemory, MemoryBuffer};
    pub use crate::turn::Turn;
}
