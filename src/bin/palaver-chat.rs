//! Interactive terminal chat.
//!
//! This binary provides a REPL over the same orchestrator the HTTP server uses.  Configuration
//! comes from the environment just as for `palaver-server`.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage with default settings
//! palaver-chat
//!
//! # Replies in Spanish, text only
//! palaver-chat --language es --mode text-only
//!
//! # Disable colors (useful for piping output)
//! palaver-chat --no-color
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/image <file>` - Attach an image to the next message
//! - `/share [hours]` - Create a share link
//! - `/export <format> <file>` - Save the conversation
//! - `/quit` - Exit the application

use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use palaver::chat::{
    ChatArgs, ChatConfig, Control, PlainTextRenderer, Renderer, ReplSession, parse_command,
};
use palaver::config::AppConfig;
use palaver::orchestrator::Orchestrator;
use palaver::session::language_name;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("palaver-chat [OPTIONS]");
    let config = ChatConfig::from_args(args)?;

    // Logs go to stderr and stay quiet unless RUST_LOG asks for more.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut app_config = AppConfig::from_env()?;
    if config.rules.is_some() {
        app_config = app_config.with_filter_rules(config.rules.clone());
    }
    let orchestrator = Arc::new(Orchestrator::from_config(&app_config)?);
    let mut session = ReplSession::start(Arc::clone(&orchestrator), &config).await?;
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let mut rl = DefaultEditor::new()?;

    // Ctrl-C while a reply is pending cancels that request.
    let session_id = session.session_id().to_string();
    ctrlc::set_handler(move || {
        let _ = orchestrator.cancel(&session_id);
    })?;

    println!(
        "Palaver (language: {}, mode: {})",
        language_name(&config.language).unwrap_or("English"),
        config.mode
    );
    println!("Type /help for commands, /quit to exit\n");

    loop {
        let prompt = if session.pending_image().is_some() {
            "You [+image]: "
        } else {
            "You: "
        };
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(command) = parse_command(line) {
                    if session.execute(command, &mut renderer).await == Control::Quit {
                        println!("Goodbye!");
                        break;
                    }
                    continue;
                }

                session.send(line, &mut renderer).await;
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C at the prompt; nothing is pending.
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    Ok(())
}
