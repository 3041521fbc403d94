//! Output rendering for the chat REPL.
//!
//! The [`Renderer`] trait hides how turns, warnings and statistics reach the terminal.
//! [`PlainTextRenderer`] writes them with optional ANSI styling.

use std::io::{self, Write};

use crate::conversation::{Role, Turn};
use crate::orchestrator::{SessionStats, TurnReply};
use crate::session::{TurnState, language_name};
use crate::share::{ShareLink, SharedConversation};
use crate::utils::time::rfc3339;

/// ANSI escape code for dim text (used for timestamps and attachments).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the user label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for warnings).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for green text (used for the assistant label).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for magenta text (used for share links).
const ANSI_MAGENTA: &str = "\x1b[35m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print the assistant's half of a completed exchange, plus any warnings.
    fn print_reply(&mut self, reply: &TurnReply);

    /// Print a single stored turn.
    fn print_turn(&mut self, turn: &Turn);

    /// Print a newly created share link.
    fn print_share(&mut self, link: &ShareLink);

    /// Print a shared conversation in full.
    fn print_shared(&mut self, shared: &SharedConversation);

    /// Print session statistics.
    fn print_stats(&mut self, stats: &SessionStats);

    /// Print a warning.
    fn print_warning(&mut self, warning: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when the user cancels a pending request.
    fn print_interrupted(&mut self);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    use_color: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer on stdout/stderr with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer on stdout/stderr with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            out: Box::new(io::stdout()),
            err: Box::new(io::stderr()),
            use_color,
        }
    }

    /// Creates a renderer that writes everything, errors included, to `writer`.
    pub fn with_writer<W: Write + Clone + Send + 'static>(writer: W, use_color: bool) -> Self {
        Self {
            out: Box::new(writer.clone()),
            err: Box::new(writer),
            use_color,
        }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.use_color {
            format!("{color}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_reply(&mut self, reply: &TurnReply) {
        self.print_turn(&reply.assistant);
        for warning in &reply.warnings {
            self.print_warning(warning);
        }
        if reply.truncated > 0 {
            let note = format!(
                "({} older message(s) dropped to make room)",
                reply.truncated
            );
            let note = self.paint(ANSI_DIM, &note);
            self.line(&note);
        }
    }

    fn print_turn(&mut self, turn: &Turn) {
        let text = format_turn(turn, self.use_color);
        self.line(&text);
    }

    fn print_share(&mut self, link: &ShareLink) {
        let url = self.paint(ANSI_MAGENTA, &link.url);
        self.line(&format!("Share link: {url}"));
        self.line(&format!("  token:   {}", link.token));
        self.line(&format!("  expires: {}", rfc3339(link.expires_at)));
    }

    fn print_shared(&mut self, shared: &SharedConversation) {
        let header = format!(
            "Shared conversation {} ({} messages, viewed {} time(s), expires {})",
            shared.link.chat_id,
            shared.conversation.len(),
            shared.view_count,
            rfc3339(shared.link.expires_at),
        );
        let header = self.paint(ANSI_DIM, &header);
        self.line(&header);
        for turn in shared.conversation.history() {
            self.print_turn(turn);
        }
    }

    fn print_stats(&mut self, stats: &SessionStats) {
        for line in format_stats(stats) {
            self.line(&line);
        }
    }

    fn print_warning(&mut self, warning: &str) {
        let text = self.paint(ANSI_YELLOW, &format!("Warning: {warning}"));
        self.line(&text);
    }

    fn print_error(&mut self, error: &str) {
        let text = self.paint(ANSI_RED, &format!("Error: {error}"));
        let _ = writeln!(self.err, "{text}");
        let _ = self.err.flush();
    }

    fn print_info(&mut self, info: &str) {
        self.line(info);
    }

    fn print_interrupted(&mut self) {
        self.line("[cancelled]");
    }
}

/// Formats one turn as `Label [time]: text`, noting an attached image.
pub fn format_turn(turn: &Turn, use_color: bool) -> String {
    let (color, label) = match turn.role {
        Role::User => (ANSI_CYAN, "You"),
        Role::Assistant => (ANSI_GREEN, "Assistant"),
    };
    let stamp = format!("[{}]", rfc3339(turn.timestamp));
    let mut out = if use_color {
        format!("{color}{label}{ANSI_RESET} {ANSI_DIM}{stamp}{ANSI_RESET}: {}", turn.text)
    } else {
        format!("{label} {stamp}: {}", turn.text)
    };
    if let Some(image) = &turn.image {
        let note = format!("[image {} {} bytes]", image.mime_type, image.byte_len);
        out.push(' ');
        if use_color {
            out.push_str(&format!("{ANSI_DIM}{note}{ANSI_RESET}"));
        } else {
            out.push_str(&note);
        }
    }
    out
}

/// Formats session statistics, one line per entry.
pub fn format_stats(stats: &SessionStats) -> Vec<String> {
    let state = match &stats.state {
        TurnState::Idle => "idle".to_string(),
        TurnState::AwaitingResponse => "waiting for the assistant".to_string(),
        TurnState::Blocked { category } => format!("last message blocked ({category})"),
    };
    let language = language_name(&stats.language).unwrap_or("unknown");
    vec![
        "    Session Statistics:".to_string(),
        format!("      Session: {}", stats.session_id),
        format!("      Conversation: {}", stats.conversation.chat_id),
        format!(
            "      Messages: {} ({} yours, {} assistant)",
            stats.conversation.total_messages,
            stats.conversation.user_messages,
            stats.conversation.assistant_messages
        ),
        format!("      Images shared: {}", stats.conversation.images_shared),
        format!("      Remaining capacity: {} messages", stats.remaining_turns),
        format!("      Language: {} ({})", language, stats.language),
        format!("      Mode: {}", stats.mode),
        format!("      State: {state}"),
    ]
}
