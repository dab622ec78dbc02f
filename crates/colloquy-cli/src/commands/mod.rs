//! Slash commands for interactive mode

mod model;
mod session;

pub use model::format_models;
pub use session::{format_conversations, format_document, format_history};

use colloquy_ai::ModelRef;

/// A parsed slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// Start a new conversation
    New,
    /// List stored conversations
    List,
    /// Switch to the Nth conversation of `/list`
    Switch(usize),
    /// Delete the Nth conversation of `/list`
    Delete(usize),
    ClearAll,
    /// Show the active conversation
    History,
    /// Regenerate turn N of `/history`, or the last reply
    Regen(Option<usize>),
    /// Replace the text of user turn N and resend it
    Edit(usize, String),
    /// Show version I of assistant turn N
    Page(usize, usize),
    /// Drop every version of turn N except the shown one
    Keep(usize),
    /// List models of one provider, or of all of them
    Models(Option<String>),
    /// Use this model for the active and future conversations
    Model(ModelRef),
    /// Attach a file's contents as context to the next message
    Attach(String),
    Cancel,
    Quit,
    /// Recognized command with bad arguments; carries the usage line
    Usage(&'static str),
    Unknown(String),
}

/// Parse a slash command. Returns `None` for ordinary chat input.
pub fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let (command, args) = match rest.split_once(char::is_whitespace) {
        Some((command, args)) => (command, args.trim()),
        None => (rest, ""),
    };
    let command = command.to_lowercase();

    Some(match command.as_str() {
        "help" | "h" | "?" => Command::Help,
        "new" | "n" => Command::New,
        "list" | "ls" => Command::List,
        "switch" | "sw" => match number(args) {
            Some(n) => Command::Switch(n),
            None => Command::Usage("/switch <N>"),
        },
        "delete" | "del" => match number(args) {
            Some(n) => Command::Delete(n),
            None => Command::Usage("/delete <N>"),
        },
        "clear-all" => Command::ClearAll,
        "history" | "hist" => Command::History,
        "regen" | "r" => {
            if args.is_empty() {
                Command::Regen(None)
            } else {
                match number(args) {
                    Some(n) => Command::Regen(Some(n)),
                    None => Command::Usage("/regen [N]"),
                }
            }
        }
        "edit" | "e" => match args.split_once(char::is_whitespace) {
            Some((n, text)) if !text.trim().is_empty() => match number(n) {
                Some(n) => Command::Edit(n, text.trim().to_string()),
                None => Command::Usage("/edit <N> <new text>"),
            },
            _ => Command::Usage("/edit <N> <new text>"),
        },
        "page" | "p" => {
            let mut parts = args.split_whitespace();
            match (parts.next().and_then(number), parts.next().and_then(number), parts.next()) {
                (Some(turn), Some(version), None) => Command::Page(turn, version),
                _ => Command::Usage("/page <N> <version>"),
            }
        }
        "keep" => match number(args) {
            Some(n) => Command::Keep(n),
            None => Command::Usage("/keep <N>"),
        },
        "models" => Command::Models((!args.is_empty()).then(|| args.to_string())),
        "model" | "m" => match model_ref(args) {
            Some(model) => Command::Model(model),
            None => Command::Usage("/model <provider> <model>"),
        },
        "attach" | "a" => {
            if args.is_empty() {
                Command::Usage("/attach <file>")
            } else {
                Command::Attach(args.to_string())
            }
        }
        "cancel" | "stop" => Command::Cancel,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(command),
    })
}

/// 1-based positive number
fn number(s: &str) -> Option<usize> {
    s.trim().parse().ok().filter(|n| *n > 0)
}

/// `provider model` or `provider/model`
fn model_ref(args: &str) -> Option<ModelRef> {
    let mut parts = args.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(provider), Some(model), None) => Some(ModelRef::new(provider, model)),
        (Some(single), None, None) => {
            let (provider, model) = single.split_once('/')?;
            (!provider.is_empty() && !model.is_empty()).then(|| ModelRef::new(provider, model))
        }
        _ => None,
    }
}

pub fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?           Show this help message
  /new, /n                Start a new conversation
  /list, /ls              List conversations
  /switch <N>             Switch to conversation N
  /delete <N>             Delete conversation N
  /clear-all              Delete every conversation
  /history                Show the active conversation
  /regen [N]              Generate another version of reply N (default: last)
  /edit <N> <text>        Replace message N and resend it
  /page <N> <version>     Show another version of reply N
  /keep <N>               Keep only the shown version of reply N
  /models [provider]      List available models
  /model <provider> <id>  Use a model (also: provider/id)
  /attach <file>          Send a file as context with the next message
  /cancel                 Stop the reply being generated (or press Ctrl-C)
  /quit, /q               Exit

Anything else is sent to the model."#
        .to_string()
}
