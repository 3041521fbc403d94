//! The per-session conversation log.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Who produced a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person chatting.
    User,
    /// The model.
    Assistant,
}

impl Role {
    /// Capitalized display label.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A reference to an image that accompanied a turn.
///
/// The bytes themselves are never kept in the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Opaque identifier for the image.
    pub id: String,
    /// MIME type detected at upload.
    pub mime_type: String,
    /// Size of the image in bytes.
    pub byte_len: usize,
}

/// One message in a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced the turn.
    pub role: Role,
    /// The text of the turn.  May be empty for image-only user turns.
    #[serde(default)]
    pub text: String,
    /// An attached image, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    /// When the turn was produced.
    #[serde(with = "crate::utils::time")]
    pub timestamp: OffsetDateTime,
}

impl Turn {
    /// A text-only user turn.
    pub fn user(text: impl Into<String>, timestamp: OffsetDateTime) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: None,
            timestamp,
        }
    }

    /// A text-only assistant turn.
    pub fn assistant(text: impl Into<String>, timestamp: OffsetDateTime) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            image: None,
            timestamp,
        }
    }

    /// Attaches an image reference.
    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    /// True when the turn carries an image.
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Counts describing a conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStats {
    /// The conversation identifier.
    pub chat_id: String,
    /// Total turns.
    pub total_messages: usize,
    /// Turns produced by the user.
    pub user_messages: usize,
    /// Turns produced by the assistant.
    pub assistant_messages: usize,
    /// Turns carrying an image.
    pub images_shared: usize,
}

/// An ordered, append-only log of turns with a size limit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    id: String,
    turns: Vec<Turn>,
    max_turns: usize,
}

impl Conversation {
    /// Creates an empty conversation with a fresh identifier.
    pub fn new(max_turns: usize) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), max_turns)
    }

    /// Creates an empty conversation with the given identifier.
    pub fn with_id(id: impl Into<String>, max_turns: usize) -> Self {
        Self {
            id: id.into(),
            turns: Vec::new(),
            max_turns,
        }
    }

    /// The conversation identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Appends one turn.
    pub fn append(&mut self, turn: Turn) -> Result<()> {
        if self.remaining() == 0 {
            return Err(Error::capacity("conversation is full", self.max_turns));
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Appends a user turn and its reply together, or neither.
    pub fn append_exchange(&mut self, user: Turn, assistant: Turn) -> Result<()> {
        if self.remaining() < 2 {
            return Err(Error::capacity("conversation is full", self.max_turns));
        }
        self.turns.push(user);
        self.turns.push(assistant);
        Ok(())
    }

    /// All turns, oldest first.
    pub fn history(&self) -> &[Turn] {
        &self.turns
    }

    /// The most recent `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// How many more turns fit.
    pub fn remaining(&self) -> usize {
        self.max_turns.saturating_sub(self.turns.len())
    }

    /// The size limit.
    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Drops the oldest `n` turns and returns how many were dropped.
    pub fn evict_oldest(&mut self, n: usize) -> usize {
        let n = n.min(self.turns.len());
        self.turns.drain(..n);
        n
    }

    /// Evicts the oldest turns until `needed` more fit.
    pub fn make_room(&mut self, needed: usize) -> usize {
        let needed = needed.min(self.max_turns);
        let shortfall = needed.saturating_sub(self.remaining());
        self.evict_oldest(shortfall)
    }

    /// The number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True when there are no turns.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// An independent copy of the conversation as it is now.
    pub fn snapshot(&self) -> Conversation {
        self.clone()
    }

    /// Counts by role and attachment.
    pub fn stats(&self) -> ConversationStats {
        ConversationStats {
            chat_id: self.id.clone(),
            total_messages: self.turns.len(),
            user_messages: self.turns.iter().filter(|t| t.role == Role::User).count(),
            assistant_messages: self
                .turns
                .iter()
                .filter(|t| t.role == Role::Assistant)
                .count(),
            images_shared: self.turns.iter().filter(|t| t.has_image()).count(),
        }
    }
}
