//! Conversation export.
//!
//! Every format is a pure function of the conversation and the export timestamp, so exporting
//! the same inputs twice yields the same bytes.  Errors are raised before any output is
//! produced.

mod json;
mod pdf;
mod text;

use std::str::FromStr;

use time::OffsetDateTime;

use crate::conversation::Conversation;
use crate::error::{Error, Result};
use crate::observability::{EXPORT_BYTES, EXPORTS};

pub use json::{ExportDocument, parse_json};

/// Title used at the top of text and PDF exports.
pub const EXPORT_TITLE: &str = "Multi-Modal AI Chatbot - Conversation Export";

/// A supported export representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    /// Human-readable plain text.
    PlainText,
    /// Structured JSON that can be parsed back with [`parse_json`].
    Json,
    /// A paginated PDF document.
    Pdf,
}

impl ExportFormat {
    /// All supported formats.
    pub const ALL: [ExportFormat; 3] = [ExportFormat::PlainText, ExportFormat::Json, ExportFormat::Pdf];

    /// File extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::PlainText => "txt",
            ExportFormat::Json => "json",
            ExportFormat::Pdf => "pdf",
        }
    }

    /// MIME type for downloads.
    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::PlainText => "text/plain; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Pdf => "application/pdf",
        }
    }

    /// Suggested download name, e.g. `chat_1a2b3c4d.pdf`.
    pub fn file_name(self, chat_id: &str) -> String {
        let short: String = chat_id.chars().take(8).collect();
        format!("chat_{short}.{}", self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "txt" | "text" | "plain" | "plain-text" => Ok(ExportFormat::PlainText),
            "json" => Ok(ExportFormat::Json),
            "pdf" => Ok(ExportFormat::Pdf),
            _ => Err(Error::invalid_format(s)),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Export bytes plus the conversation id a download is named after.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportedFile {
    /// Identifier of the exported conversation.
    pub chat_id: String,
    /// Format of `bytes`.
    pub format: ExportFormat,
    /// The rendered export.
    pub bytes: Vec<u8>,
}

impl ExportedFile {
    /// Renders `conversation` in `format`.
    pub fn render(
        conversation: &Conversation,
        format: ExportFormat,
        exported_at: OffsetDateTime,
    ) -> Result<Self> {
        Ok(Self {
            chat_id: conversation.id().to_string(),
            format,
            bytes: export(conversation, format, exported_at)?,
        })
    }

    /// Suggested download name.
    pub fn file_name(&self) -> String {
        self.format.file_name(&self.chat_id)
    }
}

/// Serializes `conversation` in `format`.
pub fn export(
    conversation: &Conversation,
    format: ExportFormat,
    exported_at: OffsetDateTime,
) -> Result<Vec<u8>> {
    let bytes = match format {
        ExportFormat::PlainText => text::render(conversation, exported_at).into_bytes(),
        ExportFormat::Json => json::render(conversation, exported_at)?,
        ExportFormat::Pdf => pdf::render(conversation, exported_at),
    };
    EXPORTS.click();
    EXPORT_BYTES.count(bytes.len() as u64);
    Ok(bytes)
}

/// Parses `format` and exports.  Unknown formats fail with [`Error::InvalidFormat`].
pub fn export_named(
    conversation: &Conversation,
    format: &str,
    exported_at: OffsetDateTime,
) -> Result<Vec<u8>> {
    export(conversation, format.parse()?, exported_at)
}
