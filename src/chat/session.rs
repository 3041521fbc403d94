//! The REPL's view of one chat session.
//!
//! A `ReplSession` owns a session id in an [`Orchestrator`] and turns slash commands and plain
//! lines into orchestrator calls, reporting every outcome through a [`Renderer`].

use std::path::Path;
use std::sync::Arc;

use crate::chat::commands::{ChatCommand, help_text};
use crate::chat::config::ChatConfig;
use crate::error::{Error, Result};
use crate::orchestrator::{Orchestrator, UserInput};
use crate::render::Renderer;
use crate::session::language_name;
use crate::share::ttl_from_hours;
use crate::upload::Upload;

/// What the REPL loop should do after a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    /// Read the next line.
    Continue,
    /// Leave the loop.
    Quit,
}

/// An interactive session driven by slash commands and messages.
pub struct ReplSession {
    orchestrator: Arc<Orchestrator>,
    session_id: String,
    pending_image: Option<Upload>,
}

impl ReplSession {
    /// Opens a session and applies the configured language and mode.
    pub async fn start(orchestrator: Arc<Orchestrator>, config: &ChatConfig) -> Result<Self> {
        let session_id = orchestrator.create_session();
        orchestrator.set_language(&session_id, &config.language).await?;
        orchestrator.set_mode(&session_id, config.mode).await?;
        Ok(Self {
            orchestrator,
            session_id,
            pending_image: None,
        })
    }

    /// The orchestrator session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The orchestrator behind this session.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// The image that will accompany the next message, if any.
    pub fn pending_image(&self) -> Option<&Upload> {
        self.pending_image.as_ref()
    }

    /// Cancels the in-flight request.  Returns whether there was one.
    pub fn cancel(&self) -> bool {
        self.orchestrator.cancel(&self.session_id).unwrap_or(false)
    }

    /// Sends a message, attaching the pending image if there is one.
    pub async fn send(&mut self, text: &str, renderer: &mut dyn Renderer) {
        let mut input = UserInput::text(text);
        if let Some(image) = self.pending_image.take() {
            input = input.with_image(image);
        }
        match self.orchestrator.send(&self.session_id, input).await {
            Ok(reply) => renderer.print_reply(&reply),
            Err(err) if err.is_cancelled() => renderer.print_interrupted(),
            Err(err) => renderer.print_error(&err.user_message()),
        }
    }

    /// Runs one slash command.
    pub async fn execute(&mut self, command: ChatCommand, renderer: &mut dyn Renderer) -> Control {
        match self.run(command, renderer).await {
            Ok(control) => control,
            Err(err) => {
                renderer.print_error(&err.user_message());
                Control::Continue
            }
        }
    }

    async fn run(&mut self, command: ChatCommand, renderer: &mut dyn Renderer) -> Result<Control> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let id = self.session_id.as_str();
        match command {
            ChatCommand::Quit => return Ok(Control::Quit),
            ChatCommand::Clear => {
                let chat_id = orchestrator.clear(id).await?;
                self.pending_image = None;
                renderer.print_info(&format!("Conversation cleared. New conversation {chat_id}."));
            }
            ChatCommand::Share(hours) => {
                let ttl = hours.map(ttl_from_hours).transpose()?;
                let link = orchestrator.share(id, ttl).await?;
                renderer.print_share(&link);
            }
            ChatCommand::Open(token) => {
                let shared = orchestrator.resolve_share(&token)?;
                renderer.print_shared(&shared);
            }
            ChatCommand::Export { format, path } => {
                let bytes = orchestrator.export(id, format).await?.bytes;
                std::fs::write(&path, &bytes)
                    .map_err(|err| Error::io(format!("cannot write {}", path.display()), err))?;
                renderer.print_info(&format!(
                    "Exported {} bytes of {} to {}",
                    bytes.len(),
                    format.extension(),
                    path.display()
                ));
            }
            ChatCommand::Image(path) => {
                let upload = read_upload(&path)?;
                let payload = orchestrator.upload_policy().validate_image(&upload)?;
                renderer.print_info(&format!(
                    "Attached {} ({}, {} bytes); it will be sent with your next message.",
                    upload.filename,
                    payload.mime_type,
                    upload.bytes.len()
                ));
                self.pending_image = Some(upload);
            }
            ChatCommand::Language(code) => {
                orchestrator.set_language(id, &code).await?;
                let name = language_name(&code).unwrap_or("the selected language");
                renderer.print_info(&format!("Replies will be in {name}."));
            }
            ChatCommand::Mode(mode) => {
                orchestrator.set_mode(id, mode).await?;
                renderer.print_info(&format!("Mode set to {mode}."));
            }
            ChatCommand::Stats => {
                let stats = orchestrator.stats(id).await?;
                renderer.print_stats(&stats);
            }
            ChatCommand::Help => {
                for line in help_text().lines() {
                    renderer.print_info(&format!("    {line}"));
                }
            }
            ChatCommand::Invalid(message) => renderer.print_error(&message),
        }
        Ok(Control::Continue)
    }
}

impl Drop for ReplSession {
    fn drop(&mut self) {
        let _ = self.orchestrator.end_session(&self.session_id);
    }
}

fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = std::fs::read(path)
        .map_err(|err| Error::io(format!("cannot read {}", path.display()), err))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Upload::new(filename, bytes))
}

#[cfg(test)]
mod tests {
    use std::io::{self, Write};
    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use time::macros::datetime;
    use url::Url;

    use super::*;
    use crate::collaborator::{Assistant, AssistantRequest, IdentityTranslator};
    use crate::config::AppConfig;
    use crate::export::ExportFormat;
    use crate::filter::ContentFilter;
    use crate::render::PlainTextRenderer;
    use crate::session::ChatMode;
    use crate::utils::ManualClock;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    struct Echo;

    #[async_trait]
    impl Assistant for Echo {
        async fn respond(&self, request: AssistantRequest<'_>) -> Result<String> {
            let image = if request.image.is_some() { " +image" } else { "" };
            Ok(format!("echo: {}{image}", request.prompt))
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn take(&self) -> String {
            let bytes = std::mem::take(&mut *self.0.lock().unwrap());
            String::from_utf8(bytes).unwrap()
        }
    }

    fn orchestrator() -> Arc<Orchestrator> {
        let config = AppConfig::new("g", "t", Url::parse("https://chat.example.com").unwrap());
        Arc::new(Orchestrator::new(
            &config,
            Arc::new(Echo),
            Arc::new(IdentityTranslator),
            ContentFilter::with_default_rules(),
            Arc::new(ManualClock::new(datetime!(2024-05-01 12:00 UTC))),
        ))
    }

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("palaver-{}-{name}", uuid::Uuid::new_v4()))
    }

    async fn repl() -> (ReplSession, PlainTextRenderer, Captured) {
        let config = ChatConfig::new().without_color();
        let session = ReplSession::start(orchestrator(), &config).await.unwrap();
        let captured = Captured::default();
        let renderer = PlainTextRenderer::with_writer(captured.clone(), false);
        (session, renderer, captured)
    }

    #[tokio::test]
    async fn start_applies_config() {
        let config = ChatConfig::new().with_language("es").with_mode(ChatMode::TextOnly);
        let session = ReplSession::start(orchestrator(), &config).await.unwrap();
        let stats = session.orchestrator().stats(session.session_id()).await.unwrap();
        assert_eq!(stats.language, "es");
        assert_eq!(stats.mode, ChatMode::TextOnly);
    }

    #[tokio::test]
    async fn message_round_trip() {
        let (mut session, mut renderer, out) = repl().await;
        session.send("hello", &mut renderer).await;
        assert!(out.take().contains("Assistant [2024-05-01T12:00:00Z]: echo: hello"));
        let history = session.orchestrator().history(session.session_id()).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn blocked_message_reports_category() {
        let (mut session, mut renderer, out) = repl().await;
        session.send("how to make weapons at home", &mut renderer).await;
        assert!(out.take().contains("Error: Content blocked: harmful-request"));
        let history = session.orchestrator().history(session.session_id()).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn image_attaches_to_next_message_only() {
        let (mut session, mut renderer, out) = repl().await;
        let path = scratch("cat.png");
        std::fs::write(&path, PNG).unwrap();

        let control = session.execute(ChatCommand::Image(path.clone()), &mut renderer).await;
        assert_eq!(control, Control::Continue);
        assert!(out.take().contains("image/png"));
        assert!(session.pending_image().is_some());

        session.send("what is this?", &mut renderer).await;
        assert!(out.take().contains("echo: what is this? +image"));
        assert!(session.pending_image().is_none());

        session.send("and now?", &mut renderer).await;
        assert!(!out.take().contains("+image"));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn image_rejects_unsupported_file() {
        let (mut session, mut renderer, out) = repl().await;
        let path = scratch("notes.txt");
        std::fs::write(&path, b"plain text").unwrap();
        session.execute(ChatCommand::Image(path.clone()), &mut renderer).await;
        assert!(out.take().contains("Error:"));
        assert!(session.pending_image().is_none());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn share_then_open() {
        let (mut session, mut renderer, out) = repl().await;
        session.execute(ChatCommand::Share(None), &mut renderer).await;
        assert!(out.take().contains("nothing to share"));

        session.send("hello", &mut renderer).await;
        out.take();
        session.execute(ChatCommand::Share(Some(1)), &mut renderer).await;
        let shown = out.take();
        assert!(shown.contains("https://chat.example.com/shared/"));
        let token = shown
            .lines()
            .find_map(|line| line.trim().strip_prefix("token:"))
            .unwrap()
            .trim()
            .to_string();

        session.execute(ChatCommand::Open(token), &mut renderer).await;
        let shown = out.take();
        assert!(shown.contains("2 messages"));
        assert!(shown.contains("You [2024-05-01T12:00:00Z]: hello"));

        session.execute(ChatCommand::Open("missing".to_string()), &mut renderer).await;
        assert!(out.take().contains("Error:"));
    }

    #[tokio::test]
    async fn share_with_huge_lifetime_is_an_error() {
        let (mut session, mut renderer, out) = repl().await;
        session.send("hello", &mut renderer).await;
        out.take();
        for hours in [u64::MAX, 100_000_000] {
            let control = session
                .execute(ChatCommand::Share(Some(hours)), &mut renderer)
                .await;
            assert_eq!(control, Control::Continue);
            let shown = out.take();
            assert!(shown.contains("Error:"), "{shown}");
            assert!(shown.contains("too long"), "{shown}");
        }
    }

    #[tokio::test]
    async fn export_writes_file() {
        let (mut session, mut renderer, out) = repl().await;
        session.send("hello", &mut renderer).await;
        let path = scratch("chat.json");
        session
            .execute(
                ChatCommand::Export {
                    format: ExportFormat::Json,
                    path: path.clone(),
                },
                &mut renderer,
            )
            .await;
        assert!(out.take().contains("Exported"));
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["messages"].as_array().unwrap().len(), 2);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn settings_and_stats() {
        let (mut session, mut renderer, out) = repl().await;
        session.execute(ChatCommand::Language("fr".to_string()), &mut renderer).await;
        assert!(out.take().contains("Replies will be in French."));
        session.execute(ChatCommand::Language("xx".to_string()), &mut renderer).await;
        assert!(out.take().contains("Error:"));
        session.execute(ChatCommand::Mode(ChatMode::ImageAnalysis), &mut renderer).await;
        session.execute(ChatCommand::Stats, &mut renderer).await;
        let shown = out.take();
        assert!(shown.contains("Language: French (fr)"));
        assert!(shown.contains("Mode: image-analysis"));
    }

    #[tokio::test]
    async fn clear_and_quit() {
        let (mut session, mut renderer, out) = repl().await;
        session.send("hello", &mut renderer).await;
        session.execute(ChatCommand::Clear, &mut renderer).await;
        assert!(out.take().contains("Conversation cleared."));
        let history = session.orchestrator().history(session.session_id()).await.unwrap();
        assert!(history.is_empty());
        assert_eq!(
            session.execute(ChatCommand::Quit, &mut renderer).await,
            Control::Quit
        );
        assert!(!session.cancel());
    }

    #[tokio::test]
    async fn dropping_ends_the_session() {
        let (session, _, _) = repl().await;
        let orchestrator = Arc::clone(session.orchestrator());
        assert_eq!(orchestrator.sessions().len(), 1);
        drop(session);
        assert!(orchestrator.sessions().is_empty());
    }
}
