//! Interactive terminal chat built on the [`Orchestrator`](crate::orchestrator::Orchestrator).
//!
//! This module provides a REPL over the same session, sharing and export operations the HTTP
//! API exposes. It supports:
//!
//! - Text messages with an optional attached image
//! - Slash commands for sharing, exporting and session settings
//! - Cancelling a pending reply with Ctrl-C
//!
//! # Architecture
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: Drives one orchestrator session from REPL input
//! - [`commands`]: Slash command parsing

mod commands;
mod config;
mod session;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use session::{Control, ReplSession};
