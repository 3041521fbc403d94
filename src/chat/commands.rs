//! Slash command parsing for the chat REPL.
//!
//! Input that starts with `/` controls the session instead of being sent to the assistant.

use std::path::PathBuf;

use crate::export::ExportFormat;
use crate::session::ChatMode;

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Start a fresh conversation.
    Clear,

    /// Create a share link, optionally with a lifetime in hours.
    Share(Option<u64>),

    /// Show a shared conversation by token.
    Open(String),

    /// Export the conversation to a file.
    Export {
        /// The export format.
        format: ExportFormat,
        /// Where to write it.
        path: PathBuf,
    },

    /// Attach an image file to the next message.
    Image(PathBuf),

    /// Set the reply language.
    Language(String),

    /// Set the chat mode.
    Mode(ChatMode),

    /// Display session statistics.
    Stats,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it should be sent as a
/// message.
///
/// # Examples
///
/// ```
/// # use palaver::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/lang es").is_some());
/// assert!(parse_command("Hello there!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "clear" | "new" => ChatCommand::Clear,
        "share" => match argument {
            None => ChatCommand::Share(None),
            Some(arg) => match arg.parse::<u64>() {
                Ok(hours) if hours > 0 => ChatCommand::Share(Some(hours)),
                _ => ChatCommand::Invalid("/share expects a positive number of hours".to_string()),
            },
        },
        "open" => match argument {
            Some(token) => ChatCommand::Open(token.to_string()),
            None => ChatCommand::Invalid("/open requires a share token".to_string()),
        },
        "export" => parse_export(argument),
        "image" => match argument {
            Some(path) => ChatCommand::Image(PathBuf::from(path)),
            None => ChatCommand::Invalid("/image requires a file path".to_string()),
        },
        "lang" | "language" => match argument {
            Some(code) => ChatCommand::Language(code.to_lowercase()),
            None => ChatCommand::Invalid("/lang requires a language code".to_string()),
        },
        "mode" => match argument.map(str::parse::<ChatMode>) {
            Some(Ok(mode)) => ChatCommand::Mode(mode),
            Some(Err(_)) => ChatCommand::Invalid(
                "/mode expects mixed, text-only or image-analysis".to_string(),
            ),
            None => ChatCommand::Invalid("/mode requires a mode".to_string()),
        },
        "stats" | "status" => ChatCommand::Stats,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

fn parse_export(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::Invalid("/export requires a format and a file path".to_string());
    };
    let mut parts = arg.splitn(2, ' ');
    let format = parts.next().unwrap_or_default();
    let Ok(format) = format.parse::<ExportFormat>() else {
        return ChatCommand::Invalid(format!(
            "Unknown export format {format:?} (use txt, json, or pdf)"
        ));
    };
    match parts.next().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(path) => ChatCommand::Export {
            format,
            path: PathBuf::from(path),
        },
        None => ChatCommand::Invalid("/export requires a file path".to_string()),
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /clear                   Start a new conversation
  /share [hours]           Create a share link (default lifetime from config)
  /open <token>            Show a shared conversation
  /export <fmt> <file>     Export the conversation as txt, json, or pdf
  /image <file>            Attach an image to your next message
  /lang <code>             Reply language: en, es, fr, de, zh, ja
  /mode <mode>             mixed, text-only, or image-analysis
  /stats                   Show session statistics
  /help                    Show this help message
  /quit                    Exit the chat

Press Ctrl-C while waiting for a reply to cancel it."#
}
