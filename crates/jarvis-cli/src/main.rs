use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use jarvis_cli::{build_conversation, describe_context, persist_session, Cli, CliError, Commands};
use jarvis_context::{Conversation, ConversationError, MemoryBuffer, Reply};
use jarvis_runtime::{AIProvider, OpenAIProvider};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REPL_COMMANDS: &[&str] = &["context", "help", "exit", "quit"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Say(String),
    Context,
    Help,
    Exit,
    Empty,
}

#[derive(Default)]
struct ReplHelper;

impl Helper for ReplHelper {}
impl Hinter for ReplHelper {
    type Hint = String;
}
impl Highlighter for ReplHelper {}
impl Validator for ReplHelper {}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let pos = pos.min(line.len());
        let input = &line[..pos];
        // Commands are whole lines; anything after a space is a message.
        if input.contains(char::is_whitespace) {
            return Ok((pos, Vec::new()));
        }

        let pairs = complete_candidates(input)
            .into_iter()
            .map(|candidate| Pair {
                display: candidate.to_string(),
                replacement: candidate.to_string(),
            })
            .collect();
        Ok((0, pairs))
    }
}

fn parse_command(line: &str) -> ReplCommand {
    match line.trim() {
        "" => ReplCommand::Empty,
        "exit" | "quit" => ReplCommand::Exit,
        "help" | "?" => ReplCommand::Help,
        "context" => ReplCommand::Context,
        text => ReplCommand::Say(text.to_string()),
    }
}

fn help_text() -> String {
    [
        "Type a message to talk to the assistant.",
        "Commands:",
        "  context       Show the context window sent with the next message",
        "  help          Show this help",
        "  exit | quit   Save the session (if configured) and exit",
    ]
    .join("\n")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so they do not interleave with replies.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "jarvis_cli=info,jarvis_context=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Context) = cli.command {
        let memory = jarvis_cli::build_memory(&cli)?;
        println!("{}", describe_context(&memory));
        return Ok(());
    }

    let provider: Arc<dyn AIProvider> = Arc::new(OpenAIProvider::from_env()?);
    tracing::info!(
        "Starting Jarvis v{} for user {}",
        env!("CARGO_PKG_VERSION"),
        cli.user
    );

    if let Some(Commands::Ask { .. }) = cli.command {
        let output = jarvis_cli::run(&cli, provider).await?;
        println!("{output}");
        return Ok(());
    }

    let mut conversation = build_conversation(&cli, provider)?;
    repl(&cli, &mut conversation).await?;
    persist_session(&cli, conversation.memory())?;
    Ok(())
}

async fn repl(cli: &Cli, conversation: &mut Conversation<MemoryBuffer>) -> anyhow::Result<()> {
    let mut editor = Editor::<ReplHelper, rustyline::history::DefaultHistory>::new()?;
    editor.set_helper(Some(ReplHelper));
    let history = history_file();
    let _ = editor.load_history(&history);

    println!(
        "{}",
        format!("Chatting with {} as {}. Type `help`.", cli.assistant, cli.user).bright_green()
    );
    let prompt = format!("{}> ", cli.user);
    loop {
        match editor.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(trimmed);
                match run_repl_command(cli, conversation, parse_command(trimmed)).await {
                    Ok(should_exit) => {
                        if should_exit {
                            break;
                        }
                    }
                    Err(err) => eprintln!("{} {}", "error:".red(), error_notice(&cli.user, &err)),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(err) => {
                eprintln!("{} {err}", "error:".red());
                break;
            }
        }
    }

    if let Err(err) = editor.save_history(&history) {
        eprintln!("{} failed to save history: {err}", "warning:".yellow());
    }
    Ok(())
}

async fn run_repl_command(
    cli: &Cli,
    conversation: &mut Conversation<MemoryBuffer>,
    command: ReplCommand,
) -> Result<bool, CliError> {
    match command {
        ReplCommand::Empty => {}
        ReplCommand::Exit => return Ok(true),
        ReplCommand::Help => println!("{}", help_text()),
        ReplCommand::Context => println!("{}", describe_context(conversation.memory()).dimmed()),
        ReplCommand::Say(text) => match conversation.handle_input(&text).await {
            Ok(Reply::Answer { text, thought }) => {
                if let Some(thought) = thought {
                    println!("{}", thought.dimmed());
                }
                println!("{} {}", format!("{}:", cli.assistant).bright_cyan(), text);
            }
            Ok(Reply::Fallback(text)) => {
                println!("{} {}", format!("{}:", cli.assistant).yellow(), text);
            }
            Err(ConversationError::ContextExhausted) => {
                eprintln!(
                    "{} that message is too long to send; try something shorter",
                    "warning:".yellow()
                );
            }
            Err(err) => return Err(err.into()),
        },
    }
    Ok(false)
}

/// Logs the full error; the chat user only sees a generic line.
fn error_notice(user_id: &str, err: &CliError) -> &'static str {
    tracing::error!(user_id, error = %err, "repl command failed");
    "something went wrong, see the log for details"
}

fn history_file() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".jarvis-history");
    }
    PathBuf::from(".jarvis-history")
}

fn complete_candidates(prefix: &str) -> BTreeSet<&'static str> {
    REPL_COMMANDS
        .iter()
        .copied()
        .filter(|command| command.starts_with(prefix))
        .collect()
}
