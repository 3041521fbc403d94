//! Request and response bodies for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::conversation::Turn;
use crate::share::ShareLink;

/// Response to `POST /api/sessions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreated {
    /// The new session's id.
    pub session_id: String,
}

/// An image sent inline with a message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageUpload {
    /// Original file name; its extension is checked.
    pub filename: String,
    /// Base64 bytes, optionally as a `data:` URL.
    pub data: String,
}

/// Body of `POST /api/sessions/{id}/messages`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SendMessage {
    /// The message text.
    #[serde(default)]
    pub text: String,
    /// An optional image.
    #[serde(default)]
    pub image: Option<ImageUpload>,
}

/// Response to `GET /api/sessions/{id}/messages`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageList {
    /// The session id.
    pub session_id: String,
    /// Turns, oldest first.
    pub messages: Vec<Turn>,
}

/// Body of `PUT /api/sessions/{id}/settings`.  Absent fields are left unchanged.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// Reply language code.
    pub language: Option<String>,
    /// Chat mode name.
    pub mode: Option<String>,
}

/// Body of `POST /api/sessions/{id}/share`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateShare {
    /// Lifetime in hours.  Defaults to the configured share lifetime.
    pub hours: Option<u64>,
}

/// Response to `POST /api/sessions/{id}/clear`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Cleared {
    /// Id of the new, empty conversation.
    pub chat_id: String,
}

/// Response to `POST /api/sessions/{id}/cancel`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Cancelled {
    /// Whether a request was in flight.
    pub cancelled: bool,
}

/// Response to `GET /shared/{token}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SharedView {
    /// The link.
    pub link: ShareLink,
    /// The shared turns.
    pub messages: Vec<Turn>,
    /// Views so far, including this one.
    pub view_count: u64,
}

/// Response to `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Health {
    /// Always `healthy`.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Seconds since start.
    pub uptime: u64,
    /// Live sessions.
    pub sessions: usize,
    /// Live share links.
    pub shares: usize,
}
