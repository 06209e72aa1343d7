use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use genchat_contracts::chat::{parse_intent, ChatContent, ChatTurn, CHAT_HELP_COMMANDS};
use genchat_contracts::events::EventWriter;
use genchat_contracts::models::PerformanceMode;
use genchat_engine::agent::{ProgressSnapshot, RuntimeKind};
use genchat_engine::backend::BackendKind;
use genchat_engine::settings::Settings;
use genchat_engine::{build_session, ChatSession, TurnEvent, TurnOutcome};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "genchat",
    version,
    about = "Chat with an agent that generates and edits images and videos"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat. Type /help for commands.
    Chat(ChatArgs),
    /// Answer one prompt and exit.
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// fast or pro; overrides GENCHAT_MODE.
    #[arg(long)]
    mode: Option<PerformanceMode>,
    /// fal or dryrun.
    #[arg(long, default_value = "fal")]
    backend: BackendKind,
    /// llm or scripted.
    #[arg(long, default_value = "llm")]
    runtime: RuntimeKind,
    #[arg(long)]
    media_dir: Option<PathBuf>,
    /// Append session events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Start from a JSON message list.
    #[arg(long)]
    history: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    prompt: String,
    /// Attach a local image to the prompt.
    #[arg(long)]
    upload: Option<PathBuf>,
    #[command(flatten)]
    session: SessionArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("genchat error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => run_once(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("genchat_engine=info,genchat_cli=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn open_session(args: &SessionArgs) -> Result<ChatSession> {
    let mut settings = Settings::from_env();
    if let Some(mode) = args.mode {
        settings.mode = mode;
    }
    if let Some(dir) = args.media_dir.as_ref() {
        settings.media_dir = dir.clone();
    }
    let events = args.events.as_ref().map(EventWriter::for_new_session);
    let mut session = build_session(&settings, args.backend, args.runtime, events)?;
    info!(
        backend = args.backend.as_str(),
        runtime = args.runtime.as_str(),
        mode = %settings.mode,
        media_dir = %settings.media_dir.display(),
        "session ready"
    );

    if let Some(path) = args.history.as_ref() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let messages: Value = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        let loaded = session.load_history(&messages);
        info!(turns = loaded, path = %path.display(), "history loaded");
    }
    Ok(session)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut session = open_session(&args.session)?;
    let stdin = io::stdin();
    let mut line = String::new();

    println!("genchat started ({}). Type /help for commands.", session.preferences().describe());

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => continue,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "set_mode" | "set_aspect_ratio" | "set_steps" | "set_seed" | "set_negative_prompt" => {
                for (setting, value) in &intent.settings_update {
                    let raw = value_as_non_empty_string(Some(value)).unwrap_or_default();
                    match session.apply_setting(setting, &raw) {
                        Ok(prefs) => println!("Settings: {}", prefs.describe()),
                        Err(err) => println!("{err:#}"),
                    }
                }
            }
            "attach_upload" => {
                let Some(path) = value_as_non_empty_string(intent.command_args.get("path")) else {
                    println!("/upload requires a path");
                    continue;
                };
                match session.attach_upload(&path) {
                    Ok(resolved) => println!("Attached {resolved} to your next message."),
                    Err(err) => println!("Upload failed: {err:#}"),
                }
            }
            "clear_upload" => match session.clear_upload() {
                Some(path) => println!("Detached {path}"),
                None => println!("Nothing attached."),
            },
            "reset" => {
                session.reset();
                println!("Conversation cleared.");
            }
            "history" => {
                if session.history().is_empty() {
                    println!("(no messages yet)");
                }
                for turn in session.history() {
                    print_turn(turn, true);
                }
            }
            "unknown" => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
            _ => {
                let prompt = intent.prompt.clone().unwrap_or_else(|| intent.raw.clone());
                if let Err(err) = chat_turn(&mut session, &prompt) {
                    println!("{err:#}");
                }
            }
        }
    }
    Ok(())
}

fn run_once(args: RunArgs) -> Result<i32> {
    let mut session = open_session(&args.session)?;
    if let Some(path) = args.upload.as_ref() {
        session.attach_upload(path)?;
    }
    let outcome = chat_turn(&mut session, &args.prompt)?;
    Ok(if outcome.error.is_some() { 1 } else { 0 })
}

/// Sends one message, redrawing a single progress line until the answer
/// arrives, then prints the assistant turns.
fn chat_turn(session: &mut ChatSession, prompt: &str) -> Result<TurnOutcome> {
    let mut progress = ProgressLine::default();
    let mut finished = None;
    for event in session.send(prompt)? {
        match event {
            TurnEvent::Progress(snapshot) => progress.draw(&snapshot)?,
            TurnEvent::Finished(outcome) => finished = Some(outcome),
        }
    }
    progress.clear()?;
    let outcome = finished.context("agent run ended without a result")?;
    for turn in &outcome.turns {
        print_turn(turn, false);
    }
    Ok(outcome)
}

#[derive(Default)]
struct ProgressLine {
    width: usize,
}

impl ProgressLine {
    fn draw(&mut self, snapshot: &ProgressSnapshot) -> Result<()> {
        let line = snapshot.render();
        let width = line.chars().count();
        let pad = self.width.saturating_sub(width);
        print!("\r{line}{}", " ".repeat(pad));
        io::stdout().flush()?;
        self.width = width;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        if self.width > 0 {
            print!("\r{}\r", " ".repeat(self.width));
            io::stdout().flush()?;
            self.width = 0;
        }
        Ok(())
    }
}

fn print_turn(turn: &ChatTurn, with_role: bool) {
    let prefix = if with_role {
        format!("{}: ", turn.role.label())
    } else {
        String::new()
    };
    match &turn.content {
        ChatContent::Text(text) => println!("{prefix}{text}"),
        ChatContent::Media(media) => {
            let kind = media.kind().map(|kind| kind.as_str()).unwrap_or("file");
            println!("{prefix}[{kind}] {} ({})", media.path, media.mime_type);
        }
    }
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(text) => text.trim().to_string(),
        Value::Null => return None,
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
