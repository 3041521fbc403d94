use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};

use super::Translator;
use super::http::{build_client, process_error_response, send_error};
use crate::error::{Error, Result};

/// Default Cloud Translation endpoint.
pub const DEFAULT_TRANSLATE_URL: &str = "https://translation.googleapis.com/";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the Cloud Translation v2 REST API, authenticated with an API key.
#[derive(Clone)]
pub struct GoogleTranslateClient {
    api_key: String,
    client: ReqwestClient,
    base_url: String,
    timeout: Duration,
}

impl GoogleTranslateClient {
    /// Create a client against the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_options(api_key, None, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(
        api_key: impl Into<String>,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::configuration(
                "translation API key is empty",
                Some("TRANSLATE_API_KEY".to_string()),
            ));
        }
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let mut base_url = base_url.unwrap_or_else(|| DEFAULT_TRANSLATE_URL.to_string());
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            api_key,
            client: build_client(timeout)?,
            base_url,
            timeout,
        })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let url = format!("{}language/translate/v2{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(process_error_response(response).await);
        }

        response.json::<R>().await.map_err(|e| {
            Error::malformed_response(format!("Failed to parse translation response: {}", e))
        })
    }
}

impl std::fmt::Debug for GoogleTranslateClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleTranslateClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct TranslateBody<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Serialize)]
struct DetectBody<'a> {
    q: &'a str,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: String,
}

#[derive(Deserialize)]
struct Translations {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Detection {
    language: String,
}

#[derive(Deserialize)]
struct Detections {
    detections: Vec<Vec<Detection>>,
}

#[async_trait]
impl Translator for GoogleTranslateClient {
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String> {
        if text.is_empty() || source == target {
            return Ok(text.to_string());
        }
        let body = TranslateBody {
            q: text,
            source,
            target,
            format: "text",
        };
        let envelope: Envelope<Translations> = self.post("", &body).await?;
        envelope
            .data
            .translations
            .into_iter()
            .next()
            .map(|t| t.translated_text)
            .ok_or_else(|| Error::malformed_response("translation response was empty"))
    }

    async fn detect_language(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::validation(
                "cannot detect the language of empty text",
                Some("text".to_string()),
            ));
        }
        let envelope: Envelope<Detections> = self.post("/detect", &DetectBody { q: text }).await?;
        envelope
            .data
            .detections
            .into_iter()
            .flatten()
            .next()
            .map(|d| d.language)
            .ok_or_else(|| Error::malformed_response("detection response was empty"))
    }
}
