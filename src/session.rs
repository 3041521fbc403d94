//! Chat sessions.
//!
//! A [`ChatSession`] owns one conversation plus the per-user settings that shape how turns are
//! handled.  Sessions live in a [`SessionRegistry`] keyed by id; each is wrapped in a
//! [`SessionHandle`] whose async mutex serializes turns.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::error::{Error, Result};
use crate::observability::{SESSIONS_CREATED, SESSIONS_EVICTED};
use crate::utils::Clock;

/// Languages a session may request replies in, as (code, name).
pub const SUPPORTED_LANGUAGES: [(&str, &str); 6] = [
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("zh", "Chinese"),
    ("ja", "Japanese"),
];

/// The language replies are produced in before translation.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Returns the display name for a supported language code.
pub fn language_name(code: &str) -> Option<&'static str> {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// How the assistant should treat a session's input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatMode {
    /// Text with optional images.
    #[default]
    Mixed,
    /// Text only; image uploads are refused.
    TextOnly,
    /// Every turn must carry an image to analyze.
    ImageAnalysis,
}

impl ChatMode {
    /// All modes.
    pub const ALL: [ChatMode; 3] = [ChatMode::Mixed, ChatMode::TextOnly, ChatMode::ImageAnalysis];

    /// The canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            ChatMode::Mixed => "mixed",
            ChatMode::TextOnly => "text-only",
            ChatMode::ImageAnalysis => "image-analysis",
        }
    }
}

impl FromStr for ChatMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mixed" => Ok(ChatMode::Mixed),
            "text" | "text-only" | "text_only" => Ok(ChatMode::TextOnly),
            "image" | "image-analysis" | "image_analysis" => Ok(ChatMode::ImageAnalysis),
            _ => Err(Error::validation(
                format!("unknown chat mode {s:?}; expected mixed, text-only or image-analysis"),
                Some("mode".to_string()),
            )),
        }
    }
}

impl std::fmt::Display for ChatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a session is in its turn cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnState {
    /// Ready for input.
    #[default]
    Idle,
    /// Waiting on the assistant.
    AwaitingResponse,
    /// The last input was rejected by the content filter.
    Blocked {
        /// The matching filter category.
        category: String,
    },
}

impl TurnState {
    /// True while a collaborator call is outstanding.
    pub fn is_awaiting(&self) -> bool {
        matches!(self, TurnState::AwaitingResponse)
    }
}

/// A single user's conversation and settings.
#[derive(Clone, Debug)]
pub struct ChatSession {
    conversation: Conversation,
    state: TurnState,
    language: String,
    mode: ChatMode,
}

impl ChatSession {
    /// Creates a session whose conversation holds at most `max_turns` turns.
    pub fn new(max_turns: usize) -> Self {
        Self {
            conversation: Conversation::new(max_turns),
            state: TurnState::Idle,
            language: DEFAULT_LANGUAGE.to_string(),
            mode: ChatMode::default(),
        }
    }

    /// The conversation.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// The conversation, mutably.
    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    /// The turn state.
    pub fn state(&self) -> &TurnState {
        &self.state
    }

    /// Moves to `state`.
    pub fn set_state(&mut self, state: TurnState) {
        self.state = state;
    }

    /// The reply language.
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Sets the reply language.  Only [`SUPPORTED_LANGUAGES`] are accepted.
    pub fn set_language(&mut self, code: &str) -> Result<()> {
        let code = code.trim().to_ascii_lowercase();
        if language_name(&code).is_none() {
            return Err(Error::validation(
                format!(
                    "unsupported language {code:?}; expected one of {}",
                    SUPPORTED_LANGUAGES
                        .iter()
                        .map(|(c, _)| *c)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                Some("language".to_string()),
            ));
        }
        self.language = code;
        Ok(())
    }

    /// The chat mode.
    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    /// Sets the chat mode.
    pub fn set_mode(&mut self, mode: ChatMode) {
        self.mode = mode;
    }

    /// Starts a fresh conversation with a new id, keeping settings.
    pub fn clear(&mut self) {
        self.conversation = Conversation::new(self.conversation.max_turns());
        self.state = TurnState::Idle;
    }
}

/// A registered session.
///
/// The async mutex is held for the whole of a turn, so turns in one session run one at a time
/// in arrival order.
#[derive(Debug)]
pub struct SessionHandle {
    id: String,
    session: AsyncMutex<ChatSession>,
    last_active: Mutex<OffsetDateTime>,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl SessionHandle {
    fn new(id: String, session: ChatSession, now: OffsetDateTime) -> Self {
        Self {
            id,
            session: AsyncMutex::new(session),
            last_active: Mutex::new(now),
            in_flight: Mutex::new(None),
        }
    }

    /// The session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for exclusive access to the session.
    pub async fn lock(&self) -> MutexGuard<'_, ChatSession> {
        self.session.lock().await
    }

    /// True if a turn or other operation currently holds the session.
    pub fn is_busy(&self) -> bool {
        self.session.try_lock().is_err()
    }

    /// When the session was last used.
    pub fn last_active(&self) -> OffsetDateTime {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn touch(&self, now: OffsetDateTime) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Registers a new in-flight turn and returns the token that cancels it.
    pub(crate) fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        token
    }

    pub(crate) fn end_turn(&self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Cancels the in-flight turn, if any.  Returns whether there was one.
    pub fn cancel(&self) -> bool {
        match self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// All live sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    clock: Arc<dyn Clock>,
    max_turns: usize,
    idle_timeout: Duration,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(max_turns: usize, idle_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
            max_turns,
            idle_timeout,
        }
    }

    /// Creates and registers a new session.
    pub fn create(&self) -> Arc<SessionHandle> {
        self.insert(Uuid::new_v4().to_string(), ChatSession::new(self.max_turns))
    }

    fn insert(&self, id: String, session: ChatSession) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle::new(id.clone(), session, self.clock.now()));
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&handle));
        SESSIONS_CREATED.click();
        tracing::debug!(session_id = %handle.id, "session created");
        handle
    }

    /// Looks up a session and marks it active.
    pub fn get(&self, id: &str) -> Result<Arc<SessionHandle>> {
        let handle = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| {
                Error::not_found(
                    format!("no session {id}"),
                    Some("session".to_string()),
                    Some(id.to_string()),
                )
            })?;
        handle.touch(self.clock.now());
        Ok(handle)
    }

    /// Looks up `id`, creating a session under that id if there is none.
    pub fn get_or_create(&self, id: &str) -> Arc<SessionHandle> {
        match self.get(id) {
            Ok(handle) => handle,
            Err(_) => self.insert(id.to_string(), ChatSession::new(self.max_turns)),
        }
    }

    /// Ends a session, cancelling any in-flight turn.
    pub fn end(&self, id: &str) -> Result<()> {
        let handle = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| {
                Error::not_found(
                    format!("no session {id}"),
                    Some("session".to_string()),
                    Some(id.to_string()),
                )
            })?;
        handle.cancel();
        tracing::debug!(session_id = %id, "session ended");
        Ok(())
    }

    /// Drops sessions idle for longer than the timeout.  Sessions in use are kept.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let idle_timeout = self.idle_timeout;
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, handle| {
            let idle = now - handle.last_active() > idle_timeout;
            !idle || handle.is_busy()
        });
        let evicted = before - sessions.len();
        drop(sessions);
        if evicted > 0 {
            SESSIONS_EVICTED.count(evicted as u64);
            tracing::debug!(evicted, "idle sessions evicted");
        }
        evicted
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("max_turns", &self.max_turns)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::conversation::Turn;
    use crate::utils::ManualClock;

    fn registry() -> (SessionRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 12:00 UTC)));
        (
            SessionRegistry::new(10, Duration::from_secs(60), clock.clone()),
            clock,
        )
    }

    #[test]
    fn modes() {
        assert_eq!("text".parse::<ChatMode>().unwrap(), ChatMode::TextOnly);
        assert_eq!(
            "Image-Analysis".parse::<ChatMode>().unwrap(),
            ChatMode::ImageAnalysis
        );
        for mode in ChatMode::ALL {
            assert_eq!(mode.to_string().parse::<ChatMode>().unwrap(), mode);
        }
        assert!("voice".parse::<ChatMode>().unwrap_err().is_validation());
    }

    #[test]
    fn languages() {
        let mut session = ChatSession::new(4);
        assert_eq!(session.language(), "en");
        session.set_language("ES").unwrap();
        assert_eq!(session.language(), "es");
        assert!(session.set_language("xx").unwrap_err().is_validation());
        assert_eq!(session.language(), "es");
        assert_eq!(language_name("ja"), Some("Japanese"));
    }

    #[test]
    fn clear_starts_a_new_conversation() {
        let mut session = ChatSession::new(4);
        let old_id = session.conversation().id().to_string();
        session
            .conversation_mut()
            .append(Turn::user("hi", datetime!(2024-01-01 00:00 UTC)))
            .unwrap();
        session.set_state(TurnState::Blocked {
            category: "violence".to_string(),
        });
        session.set_mode(ChatMode::TextOnly);
        session.clear();
        assert!(session.conversation().is_empty());
        assert_ne!(session.conversation().id(), old_id);
        assert_eq!(session.conversation().max_turns(), 4);
        assert_eq!(session.state(), &TurnState::Idle);
        assert_eq!(session.mode(), ChatMode::TextOnly);
    }

    #[test]
    fn turn_state_serializes_with_tag() {
        let json = serde_json::to_value(TurnState::Blocked {
            category: "hate".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"state": "blocked", "category": "hate"}));
    }

    #[test]
    fn get_and_end() {
        let (registry, _) = registry();
        let handle = registry.create();
        assert_eq!(registry.get(handle.id()).unwrap().id(), handle.id());
        registry.end(handle.id()).unwrap();
        assert!(registry.get(handle.id()).unwrap_err().is_not_found());
        assert!(registry.end(handle.id()).unwrap_err().is_not_found());
    }

    #[test]
    fn get_or_create_reuses() {
        let (registry, _) = registry();
        let a = registry.get_or_create("fixed");
        let b = registry.get_or_create("fixed");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn evicts_idle_but_not_busy() {
        let (registry, clock) = registry();
        let idle = registry.create();
        let busy = registry.create();
        let fresh_id = {
            clock.advance(Duration::from_secs(30));
            registry.create().id().to_string()
        };
        let guard = busy.lock().await;
        clock.advance(Duration::from_secs(45));

        assert_eq!(registry.evict_idle(), 1);
        assert!(registry.get(idle.id()).is_err());
        assert!(registry.get(&fresh_id).is_ok());
        drop(guard);

        clock.advance(Duration::from_secs(61));
        assert_eq!(registry.evict_idle(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn cancel_only_affects_in_flight_turns() {
        let (registry, _) = registry();
        let handle = registry.create();
        assert!(!handle.cancel());
        let token = handle.begin_turn();
        assert!(handle.cancel());
        assert!(token.is_cancelled());
        handle.end_turn();
        assert!(!handle.cancel());
        let next = handle.begin_turn();
        assert!(!next.is_cancelled());
    }
}
