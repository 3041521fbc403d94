//! External collaborators: the language model and the translation service.
//!
//! The orchestrator only sees the [`Assistant`] and [`Translator`] traits; the reqwest-backed
//! clients live in the submodules.

mod gemini;
mod http;
mod translate;

use async_trait::async_trait;

use crate::conversation::Turn;
use crate::error::Result;
use crate::session::ChatMode;
use crate::upload::ImagePayload;

pub use gemini::{DEFAULT_GEMINI_URL, DEFAULT_TEXT_MODEL, DEFAULT_VISION_MODEL, GeminiClient};
pub use translate::{DEFAULT_TRANSLATE_URL, GoogleTranslateClient};

/// Everything the assistant needs to answer one turn.
#[derive(Clone, Copy, Debug)]
pub struct AssistantRequest<'a> {
    /// Prior turns, oldest first.  Does not include the current prompt.
    pub history: &'a [Turn],
    /// The user's message for this turn.  May be empty when only an image was sent.
    pub prompt: &'a str,
    /// Image attached to this turn, if any.
    pub image: Option<&'a ImagePayload>,
    /// How the session wants the assistant to behave.
    pub mode: ChatMode,
}

impl<'a> AssistantRequest<'a> {
    /// A text-only request in mixed mode.
    pub fn text(history: &'a [Turn], prompt: &'a str) -> Self {
        Self {
            history,
            prompt,
            image: None,
            mode: ChatMode::Mixed,
        }
    }

    /// Attaches an image.
    pub fn with_image(mut self, image: &'a ImagePayload) -> Self {
        self.image = Some(image);
        self
    }

    /// Sets the chat mode.
    pub fn with_mode(mut self, mode: ChatMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A hosted model that answers chat turns.
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Produces the assistant's reply to `request`.
    async fn respond(&self, request: AssistantRequest<'_>) -> Result<String>;
}

/// A hosted translation service.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translates `text` from `source` to `target` (ISO 639-1 codes).
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String>;

    /// Returns the ISO 639-1 code of the language `text` is written in.
    async fn detect_language(&self, text: &str) -> Result<String>;
}

/// A translator that returns text unchanged.  Used when no translation service is configured.
///
/// ```
/// # use palaver::collaborator::{IdentityTranslator, Translator};
/// # tokio_test::block_on(async {
/// let translator = IdentityTranslator;
/// assert_eq!(translator.translate("hola", "es", "en").await.unwrap(), "hola");
/// # });
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTranslator;

#[async_trait]
impl Translator for IdentityTranslator {
    async fn translate(&self, text: &str, _: &str, _: &str) -> Result<String> {
        Ok(text.to_string())
    }

    async fn detect_language(&self, _: &str) -> Result<String> {
        Ok("en".to_string())
    }
}
