//! The chat orchestrator.
//!
//! Ties the content filter, conversation store, share manager, export formatter and the
//! external collaborators together.  Every session-scoped operation runs under that session's
//! lock, so turns within one session are serialized while different sessions proceed
//! independently.
//!
//! A turn moves the session through `Idle -> AwaitingResponse -> Idle`.  Input rejected by the
//! content filter leaves the session in `Blocked`.  The conversation is only modified after the
//! assistant has answered; any failure along the way leaves history exactly as it was.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::MutexGuard;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::collaborator::{
    Assistant, AssistantRequest, GeminiClient, GoogleTranslateClient, Translator,
};
use crate::config::{AppConfig, CapacityPolicy};
use crate::conversation::{ConversationStats, ImageRef, Turn};
use crate::error::{Error, Result};
use crate::export::{ExportFormat, ExportedFile};
use crate::filter::{ContentFilter, Verdict};
use crate::observability::{
    ASSISTANT_DURATION, ASSISTANT_ERRORS, ASSISTANT_REQUESTS, TRANSLATION_ERRORS, TRANSLATIONS,
    TURN_DURATION, TURNS_BLOCKED, TURNS_CANCELLED, TURNS_COMPLETED, TURNS_FAILED, TURNS_STARTED,
};
use crate::session::{
    ChatMode, ChatSession, DEFAULT_LANGUAGE, SessionHandle, SessionRegistry, TurnState,
};
use crate::share::{ShareLink, ShareManager, ShareStats, SharedConversation};
use crate::upload::{ImagePayload, Upload, UploadPolicy};
use crate::utils::{Clock, SystemClock};

/// One message from the user.
#[derive(Clone, Debug, Default)]
pub struct UserInput {
    /// The message text.  May be empty if an image is attached.
    pub text: String,
    /// An attached image, not yet validated.
    pub image: Option<Upload>,
}

impl UserInput {
    /// A text-only message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    /// Attaches an image.
    pub fn with_image(mut self, image: Upload) -> Self {
        self.image = Some(image);
        self
    }
}

/// The outcome of a successful turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReply {
    /// The conversation the turn was appended to.
    pub chat_id: String,
    /// The stored user turn.
    pub user: Turn,
    /// The stored assistant turn.
    pub assistant: Turn,
    /// Advisory content warnings about the reply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Oldest turns dropped to make room for this exchange.
    #[serde(default)]
    pub truncated: usize,
}

/// A snapshot of one session for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// The session id.
    pub session_id: String,
    /// Counts for the current conversation.
    pub conversation: ConversationStats,
    /// Turns that still fit.
    pub remaining_turns: usize,
    /// Where the session is in its turn cycle.
    pub state: TurnState,
    /// The reply language.
    pub language: String,
    /// The chat mode.
    pub mode: ChatMode,
}

#[derive(Clone, Debug)]
struct TurnSettings {
    request_timeout: Duration,
    capacity_policy: CapacityPolicy,
    context_window: Option<usize>,
    filter_responses: bool,
    share_ttl: Duration,
    upload: UploadPolicy,
}

/// Coordinates sessions, collaborators, sharing and export.
pub struct Orchestrator {
    assistant: Arc<dyn Assistant>,
    translator: Arc<dyn Translator>,
    filter: Arc<ContentFilter>,
    shares: Arc<ShareManager>,
    sessions: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
    settings: TurnSettings,
}

impl Orchestrator {
    /// Assembles an orchestrator from its collaborators.
    pub fn new(
        config: &AppConfig,
        assistant: Arc<dyn Assistant>,
        translator: Arc<dyn Translator>,
        filter: ContentFilter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shares = Arc::new(ShareManager::new(
            config.base_url.clone(),
            config.max_shares,
            Arc::clone(&clock),
        ));
        let sessions = Arc::new(SessionRegistry::new(
            config.max_turns,
            config.session_idle_timeout,
            Arc::clone(&clock),
        ));
        Self {
            assistant,
            translator,
            filter: Arc::new(filter),
            shares,
            sessions,
            clock,
            settings: TurnSettings {
                request_timeout: config.request_timeout,
                capacity_policy: config.capacity_policy,
                context_window: config.context_window,
                filter_responses: config.filter_responses,
                share_ttl: config.share_ttl,
                upload: config.upload.clone(),
            },
        }
    }

    /// Builds the production collaborators described by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let assistant = GeminiClient::with_options(
            config.gemini_api_key.clone(),
            config.gemini_base_url.clone(),
            Some(config.request_timeout),
        )?
        .with_text_model(config.text_model.clone())
        .with_vision_model(config.vision_model.clone());
        let translator = GoogleTranslateClient::with_options(
            config.translate_api_key.clone(),
            config.translate_base_url.clone(),
            Some(config.request_timeout),
        )?;
        let filter = match &config.filter_rules {
            Some(path) => ContentFilter::from_path(path)?,
            None => ContentFilter::with_default_rules(),
        };
        tracing::info!(
            rules = filter.len(),
            text_model = %config.text_model,
            vision_model = %config.vision_model,
            capacity_policy = %config.capacity_policy,
            max_turns = config.max_turns,
            "orchestrator configured"
        );
        Ok(Self::new(
            config,
            Arc::new(assistant),
            Arc::new(translator),
            filter,
            Arc::new(SystemClock),
        ))
    }

    /// The session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// The share manager.
    pub fn shares(&self) -> &Arc<ShareManager> {
        &self.shares
    }

    /// The content filter.
    pub fn filter(&self) -> &ContentFilter {
        &self.filter
    }

    /// Upload limits applied to attachments.
    pub fn upload_policy(&self) -> &UploadPolicy {
        &self.settings.upload
    }

    /// Starts a new session and returns its id.
    pub fn create_session(&self) -> String {
        self.sessions.create().id().to_string()
    }

    /// Ends a session, cancelling any in-flight turn.
    pub fn end_session(&self, session_id: &str) -> Result<()> {
        self.sessions.end(session_id)
    }

    /// Runs one turn: filter, ask the assistant, translate, and append.
    pub async fn send(&self, session_id: &str, input: UserInput) -> Result<TurnReply> {
        let handle = self.sessions.get(session_id)?;
        TURNS_STARTED.click();
        let start = Instant::now();
        let mut session = lock(&handle).await;
        let result = self.run_turn(&handle, &mut session, input).await;
        drop(session);
        TURN_DURATION.add(start.elapsed().as_secs_f64());

        match &result {
            Ok(reply) => {
                TURNS_COMPLETED.click();
                tracing::info!(
                    session_id,
                    chat_id = %reply.chat_id,
                    truncated = reply.truncated,
                    "turn completed"
                );
            }
            Err(err) if err.is_blocked() => {
                TURNS_BLOCKED.click();
                tracing::info!(session_id, category = ?err.blocked_category(), "turn blocked");
            }
            Err(err) if err.is_cancelled() => {
                TURNS_CANCELLED.click();
                tracing::info!(session_id, "turn cancelled");
            }
            Err(err) => {
                TURNS_FAILED.click();
                tracing::warn!(session_id, error = %err, "turn failed");
            }
        }
        result
    }

    async fn run_turn(
        &self,
        handle: &SessionHandle,
        session: &mut ChatSession,
        input: UserInput,
    ) -> Result<TurnReply> {
        let text = input.text.trim();
        let image = self.validate_input(session.mode(), text, input.image.as_ref())?;

        if let Verdict::Blocked { category } = self.filter.check(text) {
            session.set_state(TurnState::Blocked {
                category: category.clone(),
            });
            return Err(Error::blocked(category));
        }

        let remaining = session.conversation().remaining();
        if self.settings.capacity_policy == CapacityPolicy::Reject && remaining < 2 {
            session.set_state(TurnState::Idle);
            return Err(Error::capacity(
                "conversation is full; clear it to continue",
                session.conversation().max_turns(),
            ));
        }

        session.set_state(TurnState::AwaitingResponse);
        let outcome = self
            .ask_assistant(handle, session, text, image.as_ref())
            .await;
        let reply = match outcome {
            Ok(reply) => reply,
            Err(err) => {
                session.set_state(match err.blocked_category() {
                    Some(category) => TurnState::Blocked {
                        category: category.to_string(),
                    },
                    None => TurnState::Idle,
                });
                return Err(err);
            }
        };

        let reply = if self.settings.filter_responses {
            self.filter.redact(&reply)
        } else {
            reply
        };
        let warnings = self.filter.warnings(&reply);
        let reply = self.translate_reply(reply, session.language()).await;

        let now = self.clock.now();
        let mut user = Turn::user(text, now);
        if let Some(image) = &image {
            user = user.with_image(ImageRef {
                id: Uuid::new_v4().to_string(),
                mime_type: image.mime_type.clone(),
                byte_len: image.data.len(),
            });
        }
        let assistant = Turn::assistant(reply, now);

        let conversation = session.conversation_mut();
        let truncated = conversation.make_room(2);
        if truncated > 0 {
            tracing::debug!(chat_id = %conversation.id(), truncated, "oldest turns evicted");
        }
        conversation.append_exchange(user.clone(), assistant.clone())?;
        let chat_id = conversation.id().to_string();
        session.set_state(TurnState::Idle);

        Ok(TurnReply {
            chat_id,
            user,
            assistant,
            warnings,
            truncated,
        })
    }

    fn validate_input(
        &self,
        mode: ChatMode,
        text: &str,
        image: Option<&Upload>,
    ) -> Result<Option<ImagePayload>> {
        match (mode, image) {
            (ChatMode::TextOnly, Some(_)) => {
                return Err(Error::validation(
                    "images are not accepted in text-only mode",
                    Some("image".to_string()),
                ));
            }
            (ChatMode::ImageAnalysis, None) => {
                return Err(Error::validation(
                    "image analysis mode requires an image",
                    Some("image".to_string()),
                ));
            }
            (_, None) if text.is_empty() => {
                return Err(Error::validation(
                    "message is empty",
                    Some("text".to_string()),
                ));
            }
            _ => {}
        }
        image
            .map(|upload| self.settings.upload.validate_image(upload))
            .transpose()
    }

    async fn ask_assistant(
        &self,
        handle: &SessionHandle,
        session: &ChatSession,
        prompt: &str,
        image: Option<&ImagePayload>,
    ) -> Result<String> {
        let conversation = session.conversation();
        let history = match self.settings.context_window {
            Some(window) => conversation.recent(window),
            None => conversation.history(),
        };
        let request = AssistantRequest {
            history,
            prompt,
            image,
            mode: session.mode(),
        };

        let cancel = handle.begin_turn();
        let timeout = self.settings.request_timeout;
        ASSISTANT_REQUESTS.click();
        let start = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::cancelled("request cancelled by user")),
            outcome = tokio::time::timeout(timeout, self.assistant.respond(request)) => {
                outcome.unwrap_or_else(|_| {
                    Err(Error::timeout(
                        format!("assistant did not answer within {}s", timeout.as_secs_f64()),
                        Some(timeout.as_secs_f64()),
                    ))
                })
            }
        };
        handle.end_turn();
        ASSISTANT_DURATION.add(start.elapsed().as_secs_f64());
        if result.is_err() {
            ASSISTANT_ERRORS.click();
        }
        result
    }

    /// Translates an English reply into `language`.  Failures fall back to the original text.
    async fn translate_reply(&self, reply: String, language: &str) -> String {
        if language == DEFAULT_LANGUAGE || reply.is_empty() {
            return reply;
        }
        TRANSLATIONS.click();
        let translated = tokio::time::timeout(
            self.settings.request_timeout,
            self.translator.translate(&reply, DEFAULT_LANGUAGE, language),
        )
        .await;
        match translated {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                TRANSLATION_ERRORS.click();
                tracing::warn!(language, error = %err, "translation failed; using original reply");
                reply
            }
            Err(_) => {
                TRANSLATION_ERRORS.click();
                tracing::warn!(language, "translation timed out; using original reply");
                reply
            }
        }
    }

    /// Cancels the session's in-flight turn.  Returns whether there was one.
    pub fn cancel(&self, session_id: &str) -> Result<bool> {
        let handle = self.sessions.get(session_id)?;
        let cancelled = handle.cancel();
        if cancelled {
            tracing::debug!(session_id, "cancellation requested");
        }
        Ok(cancelled)
    }

    /// The session's conversation history.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>> {
        let handle = self.sessions.get(session_id)?;
        let session = lock(&handle).await;
        Ok(session.conversation().history().to_vec())
    }

    /// Clears the session's conversation and returns the new conversation id.
    pub async fn clear(&self, session_id: &str) -> Result<String> {
        let handle = self.sessions.get(session_id)?;
        let mut session = lock(&handle).await;
        session.clear();
        tracing::debug!(session_id, chat_id = %session.conversation().id(), "conversation cleared");
        Ok(session.conversation().id().to_string())
    }

    /// Sets the reply language.
    pub async fn set_language(&self, session_id: &str, language: &str) -> Result<()> {
        let handle = self.sessions.get(session_id)?;
        let mut session = lock(&handle).await;
        session.set_language(language)
    }

    /// Sets the chat mode.
    pub async fn set_mode(&self, session_id: &str, mode: ChatMode) -> Result<()> {
        let handle = self.sessions.get(session_id)?;
        let mut session = lock(&handle).await;
        session.set_mode(mode);
        Ok(())
    }

    /// Describes the session.
    pub async fn stats(&self, session_id: &str) -> Result<SessionStats> {
        let handle = self.sessions.get(session_id)?;
        let session = lock(&handle).await;
        Ok(SessionStats {
            session_id: session_id.to_string(),
            conversation: session.conversation().stats(),
            remaining_turns: session.conversation().remaining(),
            state: session.state().clone(),
            language: session.language().to_string(),
            mode: session.mode(),
        })
    }

    /// Shares the session's conversation as it is now.  `ttl` defaults to the configured
    /// share lifetime.
    pub async fn share(&self, session_id: &str, ttl: Option<Duration>) -> Result<ShareLink> {
        let handle = self.sessions.get(session_id)?;
        let session = lock(&handle).await;
        if session.conversation().is_empty() {
            return Err(Error::validation(
                "there is nothing to share yet",
                Some("conversation".to_string()),
            ));
        }
        self.shares.create(
            session.conversation(),
            ttl.unwrap_or(self.settings.share_ttl),
        )
    }

    /// Resolves a share token.
    pub fn resolve_share(&self, token: &str) -> Result<SharedConversation> {
        self.shares.resolve(token)
    }

    /// Metadata about a share.
    pub fn share_stats(&self, token: &str) -> Result<ShareStats> {
        self.shares.stats(token)
    }

    /// Exports the session's conversation.
    pub async fn export(&self, session_id: &str, format: ExportFormat) -> Result<ExportedFile> {
        let handle = self.sessions.get(session_id)?;
        let session = lock(&handle).await;
        ExportedFile::render(session.conversation(), format, self.clock.now())
    }

    /// Exports a shared snapshot.  Counts as a view.
    pub fn export_shared(&self, token: &str, format: ExportFormat) -> Result<ExportedFile> {
        let shared = self.shares.resolve(token)?;
        ExportedFile::render(&shared.conversation, format, self.clock.now())
    }

    /// Periodically sweeps expired shares and evicts idle sessions until `cancel` fires.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = this.shares.sweep();
                        let evicted = this.sessions.evict_idle();
                        if swept + evicted > 0 {
                            tracing::debug!(swept, evicted, "maintenance pass");
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sessions", &self.sessions)
            .field("shares", &self.shares)
            .field("filter_rules", &self.filter.len())
            .finish_non_exhaustive()
    }
}

/// Locks a session.  Holding the lock means no turn is in progress, so a session left
/// `AwaitingResponse` by an abandoned turn is reset to `Idle`.
async fn lock(handle: &SessionHandle) -> MutexGuard<'_, ChatSession> {
    let mut session = handle.lock().await;
    if session.state().is_awaiting() {
        session.set_state(TurnState::Idle);
        handle.end_turn();
    }
    session
}
