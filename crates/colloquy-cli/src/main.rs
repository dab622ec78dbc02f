//! colloquy - terminal chat client for OpenAI-compatible and Ollama models

mod commands;
mod config;
mod utils;

use clap::Parser;
use colloquy_ai::ProviderGateway;
use colloquy_ai::providers::{ollama, openai};
use colloquy_chat::{
    ChatEvent, ConversationStore, GenerationController, GenerationHandle, JsonFileStore, MemoryStore,
    ResponseStatus, Role, SessionManager,
};
use commands::Command;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// colloquy - chat with language models from the terminal
#[derive(Parser, Debug)]
#[command(name = "colloquy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Provider for new conversations (openai, ollama)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model for new conversations
    #[arg(short, long)]
    model: Option<String>,

    /// Directory holding saved conversations
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Send a single message to a new conversation, print the reply and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Keep conversations in memory only
    #[arg(long)]
    ephemeral: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// List saved conversations and exit
    #[arg(long)]
    list: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so the transcript on stdout stays clean
    let filter = if args.verbose {
        EnvFilter::new("colloquy=debug,colloquy_ai=debug,colloquy_chat=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut cfg = config::Config::load();

    // CLI takes precedence over the file
    if let Some(provider) = args.provider {
        cfg.provider = Some(provider);
    }
    if let Some(model) = args.model {
        cfg.model = Some(model);
    }
    if let Some(dir) = args.data_dir {
        cfg.data_dir = Some(dir);
    }

    let store: Arc<dyn ConversationStore> = if args.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        let dir = cfg.data_dir();
        tracing::debug!("Conversations stored in {}", dir.display());
        Arc::new(JsonFileStore::new(dir))
    };

    let gateway = build_gateway(&cfg);
    let default_model = cfg.default_model();
    if let Some(ref model) = default_model {
        if gateway.provider(&model.provider_id).is_err() {
            eprintln!(
                "Warning: unknown provider '{}' (available: {})",
                model.provider_id,
                gateway.provider_ids().join(", ")
            );
        }
    }

    let controller = GenerationController::new(gateway, store, cfg.generation_config());
    let session = SessionManager::open(controller, default_model).await?;

    if args.list {
        println!("{}", commands::format_conversations(&session.summaries()));
        return Ok(());
    }

    let mut repl = Repl::new(session);

    if let Some(prompt) = args.command {
        repl.session.new_conversation();
        repl.stdin_open = false;
        repl.send(&prompt).await?;
        return Ok(());
    }

    repl.run().await
}

fn build_gateway(cfg: &config::Config) -> ProviderGateway {
    let openai_url = cfg
        .openai
        .base_url
        .clone()
        .unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string());
    let ollama_url = cfg
        .ollama
        .base_url
        .clone()
        .unwrap_or_else(|| ollama::DEFAULT_BASE_URL.to_string());

    ProviderGateway::new()
        .with_provider(Arc::new(openai::OpenAIProvider::new(openai_url, cfg.openai_api_key())))
        .with_provider(Arc::new(ollama::OllamaProvider::new(ollama_url)))
}

enum Flow {
    Continue,
    Quit,
}

/// Interactive loop over stdin lines
struct Repl {
    session: SessionManager,
    events: broadcast::Receiver<ChatEvent>,
    lines: Lines<BufReader<Stdin>>,
    stdin_open: bool,
    /// Context for the next message, from /attach
    attachment: Option<String>,
}

impl Repl {
    fn new(session: SessionManager) -> Self {
        let events = session.controller().subscribe();
        Self {
            session,
            events,
            lines: BufReader::new(tokio::io::stdin()).lines(),
            stdin_open: true,
            attachment: None,
        }
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        // Show minimal startup info (only if TTY)
        if std::io::IsTerminal::is_terminal(&io::stderr()) {
            let model = self
                .session
                .active()
                .read(|c| c.model())
                .map(|m| m.to_string())
                .unwrap_or_else(|| "no model selected".to_string());
            eprintln!("colloquy ({})  /help for commands", model);
            eprintln!();
        }

        loop {
            self.print_notices();
            print!("> ");
            io::stdout().flush()?;

            let line = tokio::select! {
                line = self.lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            };
            let Some(line) = line else {
                // EOF
                break;
            };

            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            let flow = match commands::parse_command(input) {
                Some(command) => self.execute(command).await?,
                None => {
                    self.send(input).await?;
                    Flow::Continue
                }
            };
            if let Flow::Quit = flow {
                break;
            }
        }

        // Don't leave a reply half-written on disk
        self.session.cancel_and_wait().await;
        Ok(())
    }

    async fn send(&mut self, text: &str) -> anyhow::Result<()> {
        let context = self.attachment.take();
        let result = self.session.send(text, context.as_deref()).await;
        self.follow_result(result).await
    }

    async fn execute(&mut self, command: Command) -> anyhow::Result<Flow> {
        match command {
            Command::Help => println!("{}", commands::help_message()),
            Command::Quit => return Ok(Flow::Quit),
            Command::New => {
                self.session.new_conversation();
                println!("Started a new conversation.");
            }
            Command::List => println!("{}", commands::format_conversations(&self.session.summaries())),
            Command::Switch(n) => {
                if let Some(id) = self.conversation_at(n) {
                    match self.session.switch_to(id) {
                        Ok(live) => println!("{}", commands::format_history(&live.snapshot())),
                        Err(e) => eprintln!("Error: {}", e.user_message()),
                    }
                }
            }
            Command::Delete(n) => {
                if let Some(id) = self.conversation_at(n) {
                    match self.session.delete(id).await {
                        Ok(()) => println!("Deleted conversation {}.", n),
                        Err(e) => eprintln!("Error: {}", e.user_message()),
                    }
                }
            }
            Command::ClearAll => {
                let count = self.session.summaries().len();
                print!("Delete all {} conversations? [y/N] ", count);
                io::stdout().flush()?;
                let answer = self.lines.next_line().await?.unwrap_or_default();
                if matches!(answer.trim(), "y" | "Y" | "yes") {
                    self.session.clear_all().await;
                    println!("Deleted all conversations.");
                }
            }
            Command::History => {
                println!("{}", commands::format_history(&self.session.active().snapshot()));
            }
            Command::Regen(n) => {
                let turn_id = match n {
                    Some(n) => self.turn_at(n),
                    None => self.last_reply(),
                };
                if let Some(turn_id) = turn_id {
                    let result = self.session.regenerate(turn_id).await;
                    self.follow_result(result).await?;
                }
            }
            Command::Edit(n, text) => {
                if let Some(turn_id) = self.turn_at(n) {
                    let result = self.session.edit_and_resend(turn_id, &text).await;
                    self.follow_result(result).await?;
                }
            }
            Command::Page(n, version) => {
                if let Some(turn_id) = self.turn_at(n) {
                    match self.session.select_response(turn_id, version - 1).await {
                        Ok(()) => self.print_turn(turn_id),
                        Err(e) => eprintln!("Error: {}", e.user_message()),
                    }
                }
            }
            Command::Keep(n) => {
                if let Some(turn_id) = self.turn_at(n) {
                    match self.session.clear_alternates(turn_id).await {
                        Ok(()) => println!("Kept the shown version of message {}.", n),
                        Err(e) => eprintln!("Error: {}", e.user_message()),
                    }
                }
            }
            Command::Models(provider) => self.list_models(provider).await,
            Command::Model(model) => {
                let gateway = self.session.controller().gateway();
                if gateway.provider(&model.provider_id).is_err() {
                    eprintln!(
                        "Unknown provider '{}' (available: {})",
                        model.provider_id,
                        gateway.provider_ids().join(", ")
                    );
                } else {
                    self.session.select_model(model.clone()).await;
                    println!("Using {}", model);
                }
            }
            Command::Attach(path) => match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    println!(
                        "Attached {} ({} chars) to the next message.",
                        path,
                        content.chars().count()
                    );
                    self.attachment = Some(content);
                }
                Err(e) => eprintln!("Error reading {}: {}", path, e),
            },
            Command::Cancel => {
                if !self.session.cancel() {
                    println!("Nothing is being generated.");
                }
            }
            Command::Usage(usage) => println!("Usage: {}", usage),
            Command::Unknown(cmd) => {
                println!("Unknown command: /{}", cmd);
                println!("Type /help for available commands.");
            }
        }
        Ok(Flow::Continue)
    }

    /// Stream a started generation, or report why none started
    async fn follow_result(
        &mut self,
        result: colloquy_chat::Result<Option<GenerationHandle>>,
    ) -> anyhow::Result<()> {
        match result {
            Ok(Some(handle)) => self.follow(handle).await?,
            // No model: the controller recorded a failed reply instead
            Ok(None) => {
                if let Some(turn_id) = self.last_reply() {
                    self.print_failed(turn_id);
                }
            }
            Err(e) => eprintln!("Error: {}", e.user_message()),
        }
        Ok(())
    }

    /// Print fragments of one generation until it finishes. Ctrl-C and
    /// /cancel stop it; other input is ignored meanwhile.
    async fn follow(&mut self, handle: GenerationHandle) -> anyhow::Result<()> {
        let turn_id = handle.turn_id();
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Ok(ChatEvent::Fragment { turn_id: t, delta, .. }) if t == turn_id => {
                        print!("{}", delta);
                        io::stdout().flush()?;
                    }
                    Ok(ChatEvent::GenerationFinished { turn_id: t, status, .. }) if t == turn_id => {
                        match status {
                            ResponseStatus::Cancelled => println!("\n[cancelled]"),
                            ResponseStatus::Failed => {
                                println!();
                                self.print_failed(turn_id);
                            }
                            ResponseStatus::Completed | ResponseStatus::Streaming => println!(),
                        }
                        return Ok(());
                    }
                    Ok(event) => self.notice(&event),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Display skipped {} events", n);
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
                _ = tokio::signal::ctrl_c() => handle.cancel(),
                line = self.lines.next_line(), if self.stdin_open => match line? {
                    None => self.stdin_open = false,
                    Some(line) => match commands::parse_command(&line) {
                        Some(Command::Cancel) => handle.cancel(),
                        _ if line.trim().is_empty() => {}
                        _ => eprintln!("[still generating; /cancel or Ctrl-C to stop]"),
                    },
                },
            }
        }
    }

    /// Report events that arrived while idle
    fn print_notices(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.notice(&event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    fn notice(&self, event: &ChatEvent) {
        if let ChatEvent::PersistFailed { message, .. } = event {
            eprintln!("[warning: could not save conversation: {}]", message);
        }
    }

    fn print_failed(&self, turn_id: Uuid) {
        let text = self
            .session
            .active()
            .read(|c| c.turn(turn_id).map(|t| t.text().to_string()))
            .unwrap_or_default();
        println!("[error] {}", text);
    }

    fn print_turn(&self, turn_id: Uuid) {
        let Some(text) = self
            .session
            .active()
            .read(|c| c.turn(turn_id).map(|t| t.text().to_string()))
        else {
            return;
        };
        print!("{}", commands::format_document(&colloquy_chat::render(&text)));
        io::stdout().flush().ok();
    }

    async fn list_models(&self, provider: Option<String>) {
        let gateway = self.session.controller().gateway();
        let providers: Vec<String> = match provider {
            Some(p) => vec![p],
            None => gateway.provider_ids().into_iter().map(str::to_string).collect(),
        };
        let current = self
            .session
            .active()
            .read(|c| c.model())
            .or_else(|| self.session.default_model());

        for provider_id in providers {
            match self.session.controller().list_models(&provider_id).await {
                Ok(models) => println!(
                    "{}\n",
                    commands::format_models(&provider_id, &models, current.as_ref())
                ),
                Err(e) => eprintln!("{}: {}\n", provider_id, e.user_message()),
            }
        }
    }

    /// Nth conversation of /list
    fn conversation_at(&self, n: usize) -> Option<Uuid> {
        let id = self.session.summaries().get(n - 1).map(|s| s.id);
        if id.is_none() {
            eprintln!("No conversation {}; see /list", n);
        }
        id
    }

    /// Nth turn of /history
    fn turn_at(&self, n: usize) -> Option<Uuid> {
        let id = self
            .session
            .active()
            .read(|c| c.turns().get(n - 1).map(|t| t.id()));
        if id.is_none() {
            eprintln!("No message {}; see /history", n);
        }
        id
    }

    fn last_reply(&self) -> Option<Uuid> {
        let id = self.session.active().read(|c| {
            c.turns()
                .iter()
                .rev()
                .find(|t| t.role() == Role::Assistant)
                .map(|t| t.id())
        });
        if id.is_none() {
            eprintln!("Nothing to regenerate yet");
        }
        id
    }
}
