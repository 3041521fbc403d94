//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved settings the REPL
//! starts a session with.

use std::path::PathBuf;

use arrrg_derive::CommandLine;

use crate::error::{Error, Result};
use crate::session::{ChatMode, DEFAULT_LANGUAGE, language_name};

/// Command-line arguments for the palaver-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Reply language.
    #[arrrg(optional, "Reply language: en, es, fr, de, zh, ja (default: en)", "CODE")]
    pub language: Option<String>,

    /// Chat mode.
    #[arrrg(optional, "Chat mode: mixed, text-only, image-analysis (default: mixed)", "MODE")]
    pub mode: Option<String>,

    /// Content filter rules file.
    #[arrrg(optional, "YAML file of content filter rules (overrides PALAVER_FILTER_RULES)", "PATH")]
    pub rules: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Resolved settings for an interactive chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Language replies are translated into.
    pub language: String,

    /// How input is interpreted.
    pub mode: ChatMode,

    /// Filter rules to load instead of the configured ones.
    pub rules: Option<PathBuf>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Language: en
    /// - Mode: mixed
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            mode: ChatMode::default(),
            rules: None,
            use_color: true,
        }
    }

    /// Sets the reply language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Sets the chat mode.
    pub fn with_mode(mut self, mode: ChatMode) -> Self {
        self.mode = mode;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Resolves command-line arguments, rejecting unknown languages and modes.
    pub fn from_args(args: ChatArgs) -> Result<Self> {
        let mut config = ChatConfig::new();
        if let Some(language) = args.language {
            let language = language.to_lowercase();
            if language_name(&language).is_none() {
                return Err(Error::validation(
                    format!("unsupported language {language:?}"),
                    Some("language".to_string()),
                ));
            }
            config.language = language;
        }
        if let Some(mode) = args.mode {
            config.mode = mode.parse()?;
        }
        config.rules = args.rules.map(PathBuf::from);
        config.use_color = !args.no_color;
        Ok(config)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}
