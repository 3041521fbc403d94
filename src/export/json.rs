use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::conversation::{Conversation, Turn};
use crate::error::{Error, Result};

const EXPORT_VERSION: u8 = 1;

/// The JSON export document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDocument {
    /// Format version.
    pub version: u8,
    /// Identifier of the exported conversation.
    pub chat_id: String,
    /// When the export was produced.
    #[serde(with = "crate::utils::time")]
    pub exported_at: OffsetDateTime,
    /// Number of turns in `messages`.
    pub total_messages: usize,
    /// The turns, oldest first.
    pub messages: Vec<Turn>,
}

pub(super) fn render(conversation: &Conversation, exported_at: OffsetDateTime) -> Result<Vec<u8>> {
    let document = ExportDocument {
        version: EXPORT_VERSION,
        chat_id: conversation.id().to_string(),
        exported_at,
        total_messages: conversation.len(),
        messages: conversation.history().to_vec(),
    };
    serde_json::to_vec_pretty(&document).map_err(|err| {
        Error::serialization("failed to serialize conversation", Some(Box::new(err)))
    })
}

/// Parses a JSON export produced by [`export`](super::export).
pub fn parse_json(bytes: &[u8]) -> Result<ExportDocument> {
    let document: ExportDocument = serde_json::from_slice(bytes).map_err(|err| {
        Error::validation(format!("not a conversation export: {err}"), None)
    })?;
    if document.version != EXPORT_VERSION {
        return Err(Error::validation(
            format!("unsupported export version {}", document.version),
            Some("version".to_string()),
        ));
    }
    if document.total_messages != document.messages.len() {
        return Err(Error::validation(
            format!(
                "export claims {} messages but contains {}",
                document.total_messages,
                document.messages.len()
            ),
            Some("total_messages".to_string()),
        ));
    }
    Ok(document)
}
