use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};

use super::http::{build_client, process_error_response, send_error};
use super::{Assistant, AssistantRequest};
use crate::conversation::Role;
use crate::error::{Error, Result};
use crate::session::ChatMode;

/// Default Gemini endpoint.
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";
/// Model used for text-only turns.
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
/// Model used when the turn carries an image.
pub const DEFAULT_VISION_MODEL: &str = "gemini-2.5-pro";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const CHAT_INSTRUCTION: &str = "You are a helpful, knowledgeable AI assistant. You can engage \
in natural conversations, answer questions, provide explanations, and help with various tasks. \
Provide helpful, accurate, and engaging responses.";
const ANALYSIS_INSTRUCTION: &str = "You are an expert image analyst. Describe what you see, \
identify objects, people, text, or any other notable elements, and provide context and insights \
about the image.";
const DEFAULT_ANALYSIS_PROMPT: &str = "Analyze this image in detail. Describe what you see, \
identify objects, people, text, or any other notable elements. Provide context and insights \
about the image.";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Category reported when Gemini's own safety layer refuses a prompt or answer.
pub(crate) const MODEL_SAFETY: &str = "model-safety";

/// Client for the Gemini `generateContent` API.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    client: ReqwestClient,
    base_url: String,
    text_model: String,
    vision_model: String,
    timeout: Duration,
}

impl GeminiClient {
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
                "Gemini API key is empty",
                Some("GEMINI_API_KEY".to_string()),
            ));
        }
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let mut base_url = base_url.unwrap_or_else(|| DEFAULT_GEMINI_URL.to_string());
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            api_key,
            client: build_client(timeout)?,
            base_url,
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            timeout,
        })
    }

    /// Sets the model used for text turns.
    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    /// Sets the model used for turns that carry an image.
    pub fn with_vision_model(mut self, model: impl Into<String>) -> Self {
        self.vision_model = model.into();
        self
    }

    /// The model a request will be routed to.
    pub fn model_for(&self, request: &AssistantRequest<'_>) -> &str {
        if request.image.is_some() {
            &self.vision_model
        } else {
            &self.text_model
        }
    }

    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let key = HeaderValue::from_str(&self.api_key).map_err(|_| {
            Error::configuration(
                "Gemini API key contains invalid characters",
                Some("GEMINI_API_KEY".to_string()),
            )
        })?;
        headers.insert("x-goog-api-key", key);
        Ok(headers)
    }

    async fn generate(&self, model: &str, body: &GenerateContentRequest) -> Result<String> {
        let url = format!("{}models/{}:generateContent", self.base_url, model);
        let response = self
            .client
            .post(&url)
            .headers(self.default_headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(process_error_response(response).await);
        }

        let parsed = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| {
                Error::malformed_response(format!("Failed to parse response: {}", e))
            })?;
        parsed.into_text()
    }
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("text_model", &self.text_model)
            .field("vision_model", &self.vision_model)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Assistant for GeminiClient {
    async fn respond(&self, request: AssistantRequest<'_>) -> Result<String> {
        let model = self.model_for(&request).to_string();
        let body = GenerateContentRequest::from_request(&request);
        tracing::debug!(
            model = %model,
            history = request.history.len(),
            image = request.image.is_some(),
            "calling gemini"
        );
        self.generate(&model, &body).await
    }
}

////////////////////////////////////////////// wire //////////////////////////////////////////////

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    safety_settings: Vec<SafetySetting>,
}

impl GenerateContentRequest {
    fn from_request(request: &AssistantRequest<'_>) -> Self {
        // Gemini wants the first content to come from the user; a truncated window may open on
        // a model reply.
        let history = request
            .history
            .iter()
            .skip_while(|turn| turn.role == Role::Assistant);
        let mut contents = Vec::with_capacity(request.history.len() + 1);
        for turn in history {
            let text = if turn.text.is_empty() {
                "(shared an image)".to_string()
            } else {
                turn.text.clone()
            };
            contents.push(Content {
                role: Some(wire_role(turn.role)),
                parts: vec![Part::Text { text }],
            });
        }

        let mut parts = Vec::with_capacity(2);
        if let Some(image) = request.image {
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type.clone(),
                    data: STANDARD.encode(&image.data),
                },
            });
        }
        let prompt = match (request.image.is_some(), request.prompt.trim()) {
            (true, "") => DEFAULT_ANALYSIS_PROMPT.to_string(),
            (true, prompt) if request.mode == ChatMode::ImageAnalysis => {
                format!("Analyze this image and answer: {prompt}")
            }
            (_, prompt) => prompt.to_string(),
        };
        parts.push(Part::Text { text: prompt });
        contents.push(Content {
            role: Some("user"),
            parts,
        });

        let instruction = match request.mode {
            ChatMode::ImageAnalysis => ANALYSIS_INSTRUCTION,
            ChatMode::Mixed | ChatMode::TextOnly => CHAT_INSTRUCTION,
        };
        Self {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text {
                    text: instruction.to_string(),
                }],
            },
            contents,
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                })
                .collect(),
        }
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            tracing::info!(reason = %reason, "gemini blocked the prompt");
            return Err(Error::blocked(MODEL_SAFETY));
        }
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(Error::malformed_response("response contained no candidates"));
        };
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            if matches!(
                candidate.finish_reason.as_deref(),
                Some("SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII")
            ) {
                return Err(Error::blocked(MODEL_SAFETY));
            }
            return Err(Error::malformed_response("response contained no text"));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use time::macros::datetime;

    use super::*;
    use crate::conversation::Turn;
    use crate::upload::ImagePayload;

    #[derive(Clone, Default)]
    struct Seen {
        calls: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    async fn spawn_stub(status: StatusCode, reply: Value) -> (String, Seen) {
        let seen = Seen::default();
        let app = Router::new()
            .route(
                "/models/:call",
                post(
                    move |State(seen): State<Seen>,
                          Path(call): Path<String>,
                          headers: AxumHeaders,
                          Json(body): Json<Value>| {
                        let reply = reply.clone();
                        async move {
                            let key = headers
                                .get("x-goog-api-key")
                                .and_then(|v| v.to_str().ok())
                                .map(String::from);
                            seen.calls.lock().unwrap().push((call, key, body));
                            (status, Json(reply))
                        }
                    },
                ),
            )
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), seen)
    }

    fn text_reply(text: &str) -> Value {
        json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }]
        })
    }

    #[test]
    fn client_creation() {
        let client = GeminiClient::new("test-key").unwrap();
        assert_eq!(client.base_url, DEFAULT_GEMINI_URL);
        assert_eq!(client.timeout, DEFAULT_TIMEOUT);

        let client = GeminiClient::with_options(
            "test-key",
            Some("https://custom.example.com/v1".to_string()),
            Some(Duration::from_secs(5)),
        )
        .unwrap()
        .with_text_model("flash")
        .with_vision_model("pro");
        assert_eq!(client.base_url, "https://custom.example.com/v1/");
        assert_eq!(client.text_model, "flash");
        assert!(!format!("{client:?}").contains("test-key"));

        assert!(GeminiClient::new("  ").unwrap_err().is_configuration());
    }

    #[test]
    fn request_body_shape() {
        let at = datetime!(2024-01-01 00:00 UTC);
        let history = vec![Turn::user("hello", at), Turn::assistant("hi there", at)];
        let image = ImagePayload {
            mime_type: "image/png".to_string(),
            data: vec![1, 2, 3],
        };
        let request = AssistantRequest::text(&history, "")
            .with_image(&image)
            .with_mode(ChatMode::ImageAnalysis);
        let body = serde_json::to_value(GenerateContentRequest::from_request(&request)).unwrap();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        let parts = contents[2]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], "AQID");
        assert_eq!(parts[1]["text"], DEFAULT_ANALYSIS_PROMPT);
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
        assert!(body["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn history_never_opens_with_a_model_turn() {
        let at = datetime!(2024-01-01 00:00 UTC);
        let history = vec![
            Turn::assistant("earlier answer", at),
            Turn::user("next question", at),
            Turn::assistant("next answer", at),
        ];
        let request = AssistantRequest::text(&history, "and now?");
        let body = serde_json::to_value(GenerateContentRequest::from_request(&request)).unwrap();
        let contents = body["contents"].as_array().unwrap();
        let roles: Vec<_> = contents.iter().map(|c| c["role"].as_str().unwrap()).collect();
        assert_eq!(roles, ["user", "model", "user"]);
        assert_eq!(contents[0]["parts"][0]["text"], "next question");

        let history = vec![Turn::assistant("only a reply", at)];
        let request = AssistantRequest::text(&history, "hi");
        let body = serde_json::to_value(GenerateContentRequest::from_request(&request)).unwrap();
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[tokio::test]
    async fn respond_routes_by_image() {
        let (base, seen) = spawn_stub(StatusCode::OK, text_reply("A cat.")).await;
        let client = GeminiClient::with_options("k", Some(base), None).unwrap();

        let reply = client
            .respond(AssistantRequest::text(&[], "hello"))
            .await
            .unwrap();
        assert_eq!(reply, "A cat.");

        let image = ImagePayload {
            mime_type: "image/jpeg".to_string(),
            data: vec![0xff, 0xd8, 0xff],
        };
        client
            .respond(AssistantRequest::text(&[], "what?").with_image(&image))
            .await
            .unwrap();

        let calls = seen.calls.lock().unwrap();
        assert_eq!(calls[0].0, "gemini-2.5-flash:generateContent");
        assert_eq!(calls[0].1.as_deref(), Some("k"));
        assert_eq!(calls[1].0, "gemini-2.5-pro:generateContent");
    }

    #[tokio::test]
    async fn safety_block_is_blocked() {
        let (base, _) = spawn_stub(
            StatusCode::OK,
            json!({"candidates": [], "promptFeedback": {"blockReason": "SAFETY"}}),
        )
        .await;
        let client = GeminiClient::with_options("k", Some(base), None).unwrap();
        let err = client
            .respond(AssistantRequest::text(&[], "something"))
            .await
            .unwrap_err();
        assert_eq!(err.blocked_category(), Some(MODEL_SAFETY));
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let (base, _) = spawn_stub(
            StatusCode::TOO_MANY_REQUESTS,
            json!({"error": {"code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED"}}),
        )
        .await;
        let client = GeminiClient::with_options("k", Some(base), None).unwrap();
        let err = client
            .respond(AssistantRequest::text(&[], "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimit { .. }));
        assert!(err.is_collaborator());

        let (base, _) = spawn_stub(
            StatusCode::BAD_REQUEST,
            json!({"error": {"code": 400, "message": "bad", "status": "INVALID_ARGUMENT"}}),
        )
        .await;
        let client = GeminiClient::with_options("k", Some(base), None).unwrap();
        let err = client
            .respond(AssistantRequest::text(&[], "x"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(400));
        assert_eq!(err.to_string(), "INVALID_ARGUMENT: bad");
    }

    #[tokio::test]
    async fn empty_candidates_are_malformed() {
        let (base, _) = spawn_stub(StatusCode::OK, json!({"candidates": []})).await;
        let client = GeminiClient::with_options("k", Some(base), None).unwrap();
        let err = client
            .respond(AssistantRequest::text(&[], "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }
}
