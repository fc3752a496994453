use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use jarvis_context::{
    load_preamble, Conversation, ConversationConfig, ConversationError, ConversationMemory,
    JsonlArchive, MemoryBuffer, MemoryConfig, MemoryError, SpeakerLabels, Turn,
};
use jarvis_runtime::{AIProvider, GenerationParams, ProviderError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "jarvis",
    version,
    about = "Chat with a completion model that remembers the conversation",
    long_about = "Jarvis keeps a bounded memory of recent exchanges, renders it into every prompt, \
                  and archives older exchanges as JSONL few-shot data"
)]
pub struct Cli {
    #[arg(long, global = true, env = "USER_ID", default_value = "Me", help = "Speaker label and archive key for this user")]
    pub user: String,
    #[arg(long, global = true, env = "ASSISTANT_NAME", default_value = "Jarvis", help = "Speaker label of the assistant")]
    pub assistant: String,
    #[arg(long, global = true, env = "JARVIS_DATA_DIR", default_value = ".", help = "Directory holding per-user archives")]
    pub data_dir: PathBuf,
    #[arg(long, global = true, env = "JARVIS_PERSONA_FILE", help = "Plain-text persona preamble")]
    pub persona: Option<PathBuf>,
    #[arg(long, global = true, env = "JARVIS_SEED_FILE", help = "JSONL few-shot file loaded at startup")]
    pub seed: Option<PathBuf>,
    #[arg(long, global = true, env = "JARVIS_SESSION_FILE", help = "JSON snapshot restored at startup and saved on exit")]
    pub session: Option<PathBuf>,
    #[arg(long, global = true, env = "CONTEXT_TOKEN_LIMIT", default_value_t = jarvis_context::config::DEFAULT_TOKEN_BUDGET)]
    pub token_limit: usize,
    #[arg(long, global = true, env = "MEMORY_SIZE", default_value_t = jarvis_context::config::DEFAULT_CAPACITY)]
    pub memory_size: usize,
    #[arg(long, global = true, env = "TEMPERATURE", default_value_t = 0.7)]
    pub temperature: f32,
    #[arg(long, global = true, env = "TOP_PROB", default_value_t = 1.0)]
    pub top_p: f32,
    #[arg(long, global = true, env = "MAX_TOKENS", default_value_t = 256)]
    pub max_tokens: u32,
    #[arg(long, global = true, env = "ENGINE", help = "Model or Azure deployment name")]
    pub engine: Option<String>,
    #[arg(long, global = true, env = "REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Start an interactive chat (default)")]
    Chat,
    #[command(about = "Send one message and print the reply")]
    Ask {
        #[arg(help = "Message text")]
        text: String,
    },
    #[command(about = "Print the context window that would be sent next")]
    Context,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
    #[error("conversation error: {0}")]
    Conversation(#[from] ConversationError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("session file {}: {source}", .path.display())]
    Session {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session decode error: {0}")]
    SessionFormat(#[from] serde_json::Error),
}

impl Cli {
    pub fn labels(&self) -> SpeakerLabels {
        SpeakerLabels::new(self.user.clone(), self.assistant.clone())
    }

    pub fn memory_config(&self, preamble: String) -> MemoryConfig {
        MemoryConfig::new(self.memory_size, self.token_limit)
            .with_preamble(preamble)
            .with_labels(self.labels())
    }

    pub fn conversation_config(&self) -> ConversationConfig {
        ConversationConfig {
            generation: GenerationParams {
                model: self.engine.clone(),
                temperature: self.temperature,
                top_p: self.top_p,
                max_tokens: self.max_tokens,
                ..GenerationParams::default()
            },
            timeout: Duration::from_secs(self.timeout_secs),
            ..ConversationConfig::default()
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        JsonlArchive::user_path(&self.data_dir, &self.user)
    }
}

/// Saved turns of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user_id: String,
    pub turns: Vec<Turn>,
}

impl SessionSnapshot {
    pub fn capture(user_id: &str, memory: &MemoryBuffer) -> Self {
        Self {
            user_id: user_id.to_string(),
            turns: memory.turns().filter(|turn| !turn.is_pending()).cloned().collect(),
        }
    }

    /// Missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, CliError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CliError::Session {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CliError> {
        let session_error = |source| CliError::Session {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(session_error)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(session_error)
    }
}

/// Builds the user's memory: persona, archive, then either the saved
/// session for this user or the seed file.
pub fn build_memory(cli: &Cli) -> Result<MemoryBuffer, CliError> {
    let preamble = load_preamble(cli.persona.as_deref())?;
    let archive = JsonlArchive::for_user(&cli.data_dir, &cli.user);
    let mut memory = MemoryBuffer::new(cli.memory_config(preamble), archive);

    let snapshot = match cli.session.as_deref() {
        Some(path) => SessionSnapshot::load(path)?.filter(|s| s.user_id == cli.user),
        None => None,
    };

    if let Some(snapshot) = snapshot {
        info!(user_id = %cli.user, turns = snapshot.turns.len(), "restoring session");
        memory.restore(snapshot.turns)?;
    } else if let Some(seed) = cli.seed.as_deref() {
        memory.load_from_archive(seed, cli.memory_size)?;
    }

    Ok(memory)
}

pub fn build_conversation(
    cli: &Cli,
    provider: Arc<dyn AIProvider>,
) -> Result<Conversation<MemoryBuffer>, CliError> {
    let memory = build_memory(cli)?;
    Ok(Conversation::new(
        cli.user.clone(),
        memory,
        provider,
        cli.conversation_config(),
    ))
}

/// Writes the session snapshot when one is configured.
pub fn persist_session(cli: &Cli, memory: &MemoryBuffer) -> Result<(), CliError> {
    if let Some(path) = cli.session.as_deref() {
        SessionSnapshot::capture(&cli.user, memory).save(path)?;
        info!(path = %path.display(), "session saved");
    }
    Ok(())
}

pub fn describe_context(memory: &MemoryBuffer) -> String {
    format!(
        "{}\n\n[{} turns, estimated size {} of {}]",
        memory.render(),
        memory.len(),
        memory.estimate_size(),
        memory.config().size_limit()
    )
}

/// Runs the non-interactive subcommands.
pub async fn run(cli: &Cli, provider: Arc<dyn AIProvider>) -> Result<String, CliError> {
    match &cli.command {
        Some(Commands::Ask { text }) => {
            let mut conversation = build_conversation(cli, provider)?;
            let reply = conversation.handle_input(text).await?;
            persist_session(cli, conversation.memory())?;
            Ok(reply.text().to_string())
        }
        Some(Commands::Context) => Ok(describe_context(&build_memory(cli)?)),
        Some(Commands::Chat) | None => Ok(String::new()),
    }
}
