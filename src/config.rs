//! Process configuration.
//!
//! Every option the service understands is enumerated in [`AppConfig`].  It is read from the
//! environment once at startup and validated as a whole; a missing required variable is a
//! fatal [`Error::Configuration`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use arrrg_derive::CommandLine;
use url::Url;

use crate::collaborator::{DEFAULT_TEXT_MODEL, DEFAULT_VISION_MODEL};
use crate::error::{Error, Result};
use crate::upload::{DEFAULT_MAX_AUDIO_BYTES, DEFAULT_MAX_IMAGE_BYTES, UploadPolicy};

/// Default upper bound on turns per conversation.
pub const DEFAULT_MAX_TURNS: usize = 200;
/// Default time a share link stays resolvable.
pub const DEFAULT_SHARE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default upper bound on live share links.
pub const DEFAULT_MAX_SHARES: usize = 10_000;
/// Default time budget for one collaborator call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Default inactivity after which a session is evicted.
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(30 * 60);
/// Default period of the maintenance task.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// What to do when a conversation has no room for the next exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// Refuse the turn with a capacity error.
    Reject,
    /// Drop the oldest turns once the new exchange has succeeded.
    #[default]
    TruncateOldest,
}

impl FromStr for CapacityPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(CapacityPolicy::Reject),
            "truncate" | "truncate-oldest" | "truncate_oldest" => {
                Ok(CapacityPolicy::TruncateOldest)
            }
            _ => Err(Error::configuration(
                format!("unknown capacity policy {s:?}; expected reject or truncate-oldest"),
                Some("PALAVER_CAPACITY_POLICY".to_string()),
            )),
        }
    }
}

impl std::fmt::Display for CapacityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityPolicy::Reject => f.write_str("reject"),
            CapacityPolicy::TruncateOldest => f.write_str("truncate-oldest"),
        }
    }
}

/// Fully resolved service configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Key for the Gemini API.
    pub gemini_api_key: String,
    /// Override for the Gemini endpoint.
    pub gemini_base_url: Option<String>,
    /// Model for text turns.
    pub text_model: String,
    /// Model for image turns.
    pub vision_model: String,
    /// Key for the translation API.
    pub translate_api_key: String,
    /// Override for the translation endpoint.
    pub translate_base_url: Option<String>,
    /// Public base URL that share links are built on.
    pub base_url: Url,
    /// Time budget for one collaborator call.
    pub request_timeout: Duration,
    /// Upper bound on turns per conversation.
    pub max_turns: usize,
    /// Behaviour when a conversation is full.
    pub capacity_policy: CapacityPolicy,
    /// Number of prior turns sent as context.  `None` sends the whole history.
    pub context_window: Option<usize>,
    /// Default lifetime of share links.
    pub share_ttl: Duration,
    /// Upper bound on live share links.
    pub max_shares: usize,
    /// Inactivity after which a session is evicted.
    pub session_idle_timeout: Duration,
    /// Period of the share sweep and session eviction task.
    pub sweep_interval: Duration,
    /// Upload size limits.
    pub upload: UploadPolicy,
    /// Whether model output is redacted with the content filter.
    pub filter_responses: bool,
    /// YAML file of filter rules; `None` uses the built-in rules.
    pub filter_rules: Option<PathBuf>,
}

impl AppConfig {
    /// Creates a configuration with the required values and defaults for everything else.
    pub fn new(
        gemini_api_key: impl Into<String>,
        translate_api_key: impl Into<String>,
        base_url: Url,
    ) -> Self {
        Self {
            gemini_api_key: gemini_api_key.into(),
            gemini_base_url: None,
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            translate_api_key: translate_api_key.into(),
            translate_base_url: None,
            base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_turns: DEFAULT_MAX_TURNS,
            capacity_policy: CapacityPolicy::default(),
            context_window: None,
            share_ttl: DEFAULT_SHARE_TTL,
            max_shares: DEFAULT_MAX_SHARES,
            session_idle_timeout: DEFAULT_SESSION_IDLE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            upload: UploadPolicy::default(),
            filter_responses: false,
            filter_rules: None,
        }
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &str| {
            get(name).ok_or_else(|| {
                Error::configuration(
                    format!("required environment variable {name} is not set"),
                    Some(name.to_string()),
                )
            })
        };

        let gemini_api_key = require("GEMINI_API_KEY")?;
        let translate_api_key = require("TRANSLATE_API_KEY")?;
        let base_url = require("BASE_URL")?;
        let base_url = Url::parse(base_url.trim()).map_err(|err| {
            Error::configuration(
                format!("BASE_URL is not a valid URL: {err}"),
                Some("BASE_URL".to_string()),
            )
        })?;

        let mut config = Self::new(gemini_api_key, translate_api_key, base_url);
        config.gemini_base_url = get("GEMINI_BASE_URL");
        config.translate_base_url = get("TRANSLATE_BASE_URL");
        if let Some(model) = get("GEMINI_TEXT_MODEL") {
            config.text_model = model;
        }
        if let Some(model) = get("GEMINI_VISION_MODEL") {
            config.vision_model = model;
        }
        if let Some(secs) = parse_var::<u64>(&get, "PALAVER_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(turns) = parse_var(&get, "PALAVER_MAX_TURNS")? {
            config.max_turns = turns;
        }
        if let Some(policy) = get("PALAVER_CAPACITY_POLICY") {
            config.capacity_policy = policy.parse()?;
        }
        config.context_window = parse_var(&get, "PALAVER_CONTEXT_WINDOW")?;
        if let Some(hours) = parse_var::<u64>(&get, "PALAVER_SHARE_TTL_HOURS")? {
            config.share_ttl = hours
                .checked_mul(60 * 60)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    Error::configuration(
                        "share lifetime is too long",
                        Some("PALAVER_SHARE_TTL_HOURS".to_string()),
                    )
                })?;
        }
        if let Some(shares) = parse_var(&get, "PALAVER_MAX_SHARES")? {
            config.max_shares = shares;
        }
        if let Some(secs) = parse_var::<u64>(&get, "PALAVER_SESSION_IDLE_SECS")? {
            config.session_idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&get, "PALAVER_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(bytes) = parse_var(&get, "PALAVER_MAX_IMAGE_BYTES")? {
            config.upload.max_image_bytes = bytes;
        }
        if let Some(bytes) = parse_var(&get, "PALAVER_MAX_AUDIO_BYTES")? {
            config.upload.max_audio_bytes = bytes;
        }
        if let Some(enabled) = get("PALAVER_FILTER_RESPONSES") {
            config.filter_responses = parse_bool("PALAVER_FILTER_RESPONSES", &enabled)?;
        }
        config.filter_rules = get("PALAVER_FILTER_RULES").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            (self.max_turns == 0, "PALAVER_MAX_TURNS"),
            (self.max_shares == 0, "PALAVER_MAX_SHARES"),
            (self.request_timeout.is_zero(), "PALAVER_REQUEST_TIMEOUT_SECS"),
            (self.share_ttl.is_zero(), "PALAVER_SHARE_TTL_HOURS"),
            (self.session_idle_timeout.is_zero(), "PALAVER_SESSION_IDLE_SECS"),
            (self.sweep_interval.is_zero(), "PALAVER_SWEEP_INTERVAL_SECS"),
            (self.upload.max_image_bytes == 0, "PALAVER_MAX_IMAGE_BYTES"),
            (self.upload.max_audio_bytes == 0, "PALAVER_MAX_AUDIO_BYTES"),
            (self.context_window == Some(0), "PALAVER_CONTEXT_WINDOW"),
        ];
        if let Some((_, name)) = positive.iter().find(|(bad, _)| *bad) {
            return Err(Error::configuration(
                format!("{name} must be greater than zero"),
                Some(name.to_string()),
            ));
        }
        // Room for at least one user/assistant exchange.
        if self.max_turns < 2 {
            return Err(Error::configuration(
                "PALAVER_MAX_TURNS must allow at least one exchange",
                Some("PALAVER_MAX_TURNS".to_string()),
            ));
        }
        if self.base_url.cannot_be_a_base() {
            return Err(Error::configuration(
                "BASE_URL must be an absolute http(s) URL",
                Some("BASE_URL".to_string()),
            ));
        }
        Ok(())
    }

    /// Sets the share-link base URL.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    /// Sets the collaborator time budget.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the turn limit.
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Sets the capacity policy.
    pub fn with_capacity_policy(mut self, policy: CapacityPolicy) -> Self {
        self.capacity_policy = policy;
        self
    }

    /// Sets how many prior turns are sent as context.
    pub fn with_context_window(mut self, window: Option<usize>) -> Self {
        self.context_window = window;
        self
    }

    /// Sets the default share lifetime.
    pub fn with_share_ttl(mut self, ttl: Duration) -> Self {
        self.share_ttl = ttl;
        self
    }

    /// Sets the share limit.
    pub fn with_max_shares(mut self, max_shares: usize) -> Self {
        self.max_shares = max_shares;
        self
    }

    /// Sets the session inactivity timeout.
    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    /// Sets the maintenance period.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the upload limits.
    pub fn with_upload_policy(mut self, upload: UploadPolicy) -> Self {
        self.upload = upload;
        self
    }

    /// Enables or disables redaction of model output.
    pub fn with_filter_responses(mut self, enabled: bool) -> Self {
        self.filter_responses = enabled;
        self
    }

    /// Sets the filter rule file.
    pub fn with_filter_rules(mut self, path: Option<PathBuf>) -> Self {
        self.filter_rules = path;
        self
    }
}

fn parse_var<T: FromStr>(get: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>> {
    match get(name) {
        Some(value) => value.trim().parse::<T>().map(Some).map_err(|_| {
            Error::configuration(
                format!("{name} has invalid value {value:?}"),
                Some(name.to_string()),
            )
        }),
        None => Ok(None),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::configuration(
            format!("{name} has invalid value {value:?}"),
            Some(name.to_string()),
        )),
    }
}

/// Command-line arguments for palaver-server.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ServerArgs {
    /// Address to listen on.
    #[arrrg(optional, "Address to listen on (default: 127.0.0.1:8000)", "ADDR")]
    pub listen: Option<String>,

    /// Emit logs as JSON.
    #[arrrg(flag, "Emit logs as JSON")]
    pub json_logs: bool,
}

impl ServerArgs {
    /// The listen address, with the default applied.
    pub fn listen_addr(&self) -> &str {
        self.listen.as_deref().unwrap_or("127.0.0.1:8000")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("GEMINI_API_KEY", "g"),
        ("TRANSLATE_API_KEY", "t"),
        ("BASE_URL", "https://chat.example.com/app"),
    ];

    #[test]
    fn defaults() {
        let config = AppConfig::from_lookup(env(&REQUIRED)).unwrap();
        assert_eq!(config.gemini_api_key, "g");
        assert_eq!(config.translate_api_key, "t");
        assert_eq!(config.base_url.as_str(), "https://chat.example.com/app");
        assert_eq!(config.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(config.capacity_policy, CapacityPolicy::TruncateOldest);
        assert_eq!(config.share_ttl, DEFAULT_SHARE_TTL);
        assert_eq!(config.upload.max_image_bytes, DEFAULT_MAX_IMAGE_BYTES);
        assert_eq!(config.upload.max_audio_bytes, DEFAULT_MAX_AUDIO_BYTES);
        assert_eq!(config.text_model, DEFAULT_TEXT_MODEL);
        assert!(config.context_window.is_none());
        assert!(!config.filter_responses);
    }

    #[test]
    fn missing_required_variable() {
        for skip in REQUIRED.iter().map(|(k, _)| *k) {
            let pairs: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != skip).collect();
            let err = AppConfig::from_lookup(env(&pairs)).unwrap_err();
            assert!(err.is_configuration());
            assert!(err.to_string().contains(skip), "{err}");
        }
    }

    #[test]
    fn blank_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[0] = ("GEMINI_API_KEY", "  ");
        assert!(AppConfig::from_lookup(env(&pairs)).unwrap_err().is_configuration());
    }

    #[test]
    fn overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PALAVER_MAX_TURNS", "10"),
            ("PALAVER_CAPACITY_POLICY", "reject"),
            ("PALAVER_CONTEXT_WINDOW", "5"),
            ("PALAVER_SHARE_TTL_HOURS", "2"),
            ("PALAVER_FILTER_RESPONSES", "yes"),
            ("PALAVER_FILTER_RULES", "/etc/palaver/rules.yaml"),
            ("PALAVER_MAX_IMAGE_BYTES", "1024"),
            ("GEMINI_TEXT_MODEL", "gemini-x"),
        ]);
        let config = AppConfig::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.max_turns, 10);
        assert_eq!(config.capacity_policy, CapacityPolicy::Reject);
        assert_eq!(config.context_window, Some(5));
        assert_eq!(config.share_ttl, Duration::from_secs(7200));
        assert!(config.filter_responses);
        assert_eq!(
            config.filter_rules,
            Some(PathBuf::from("/etc/palaver/rules.yaml"))
        );
        assert_eq!(config.upload.max_image_bytes, 1024);
        assert_eq!(config.text_model, "gemini-x");
    }

    #[test]
    fn invalid_values() {
        for (name, value) in [
            ("PALAVER_MAX_TURNS", "lots"),
            ("PALAVER_MAX_TURNS", "1"),
            ("PALAVER_SHARE_TTL_HOURS", "0"),
            ("PALAVER_SHARE_TTL_HOURS", "18446744073709551615"),
            ("PALAVER_CAPACITY_POLICY", "drop-newest"),
            ("PALAVER_FILTER_RESPONSES", "maybe"),
            ("BASE_URL", "not a url"),
        ] {
            let mut pairs = REQUIRED.to_vec();
            pairs.retain(|(k, _)| *k != name);
            pairs.push((name, value));
            let err = AppConfig::from_lookup(env(&pairs)).unwrap_err();
            assert!(err.is_configuration(), "{name}={value}: {err}");
        }
    }

    #[test]
    fn builder_pattern() {
        let config = AppConfig::new("g", "t", Url::parse("http://localhost:8000").unwrap())
            .with_max_turns(4)
            .with_capacity_policy(CapacityPolicy::Reject)
            .with_share_ttl(Duration::from_secs(60))
            .with_filter_responses(true);
        assert_eq!(config.max_turns, 4);
        assert_eq!(config.capacity_policy, CapacityPolicy::Reject);
        assert!(config.filter_responses);
        config.validate().unwrap();
    }

    #[test]
    fn capacity_policy_names() {
        assert_eq!("Reject".parse::<CapacityPolicy>().unwrap(), CapacityPolicy::Reject);
        assert_eq!(
            "truncate".parse::<CapacityPolicy>().unwrap(),
            CapacityPolicy::TruncateOldest
        );
        assert_eq!(CapacityPolicy::TruncateOldest.to_string(), "truncate-oldest");
    }
}
