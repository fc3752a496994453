//! Error types for conversational memory

use std::path::PathBuf;

use thiserror::Error;

/// Memory and archive error type
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Malformed archive record at line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to append to archive {}: {source}", .path.display())]
    ArchiveWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read archive {}: {source}", .path.display())]
    ArchiveRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read persona file {}: {source}", .path.display())]
    PersonaRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Conversation controller error type
#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("Prompt is still too large with only the pending turn left in memory")]
    ContextExhausted,

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Result type for conversation operations
pub type ConversationResult<T> = Result<T, ConversationError>;
