//! Gemini adapter for [`TurnGenerator`].
//!
//! Calls the Generative Language API `generateContent` endpoint once per turn,
//! with Google Search grounding when enabled. Citations are read from the
//! grounding metadata of the first candidate.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::GeminiSettings;
use crate::error::{LlmErrorKind, Result, TutorError};
use crate::generator::{system_instruction, TurnGenerator, TurnReply, TurnRequest};
use crate::session::{Sender, Source};

/// Turn generator backed by Google Gemini.
#[derive(Clone)]
pub struct GeminiGenerator {
    settings: GeminiSettings,
    api_key: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for GeminiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiGenerator")
            .field("settings", &self.settings)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl GeminiGenerator {
    /// Creates a generator with an explicit API key.
    #[must_use]
    pub fn new(settings: GeminiSettings, api_key: impl Into<String>) -> Self {
        Self {
            settings,
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Creates a generator reading the API key from `settings.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if the variable is unset or empty.
    pub fn from_settings(settings: &GeminiSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                TutorError::config_validation(
                    format!("{} is not set", settings.api_key_env),
                    format!(
                        "Export {} with a Gemini API key, or change gemini.apiKeyEnv in eco.json",
                        settings.api_key_env
                    ),
                )
            })?;
        Ok(Self::new(settings.clone(), api_key))
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.model
        )
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers
    }
}

#[async_trait]
impl TurnGenerator for GeminiGenerator {
    async fn generate(&self, request: TurnRequest<'_>) -> Result<TurnReply> {
        let body = build_request(&request, self.settings.web_search);
        debug!(
            model = %self.settings.model,
            stage = %request.stage,
            history = request.history.len(),
            "Calling Gemini generateContent"
        );

        let response = self
            .http
            .post(self.endpoint())
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(TutorError::llm_api_error(
                LlmErrorKind::from_status(status.as_u16()),
                format!("HTTP {status}: {}", truncate(&error_body, 300)),
            ));
        }

        let payload: GenerateContentResponse = response.json().await.map_err(|e| {
            TutorError::llm_api_error(LlmErrorKind::InvalidResponse, e.to_string())
        })?;
        parse_reply(payload)
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TutorError {
    if e.is_timeout() {
        TutorError::llm_api_error(LlmErrorKind::Network, format!("Request timed out: {e}"))
    } else if e.is_connect() {
        TutorError::llm_api_error(LlmErrorKind::Network, format!("Connection failed: {e}"))
    } else if e.is_request() {
        TutorError::llm_api_error(LlmErrorKind::Other, format!("Request error: {e}"))
    } else {
        TutorError::llm_api_error(LlmErrorKind::Network, format!("Network error: {e}"))
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(idx, _)| &text[..idx])
}

/// Builds the `generateContent` body.
///
/// Gemini conversations must open with a user turn, so tutor turns that come
/// before the first student message (the greeting) are moved into the system
/// instruction.
fn build_request(request: &TurnRequest<'_>, web_search: bool) -> Value {
    let mut system = system_instruction(request);
    let mut contents = Vec::new();
    for (sender, text) in request.turns() {
        match sender {
            Sender::Ai if contents.is_empty() => {
                system.push_str("\n\nYou opened the conversation with: ");
                system.push_str(text);
            }
            Sender::Ai => contents.push(json!({"role": "model", "parts": [{"text": text}]})),
            Sender::User => contents.push(json!({"role": "user", "parts": [{"text": text}]})),
        }
    }
    contents.push(json!({"role": "user", "parts": [{"text": request.user_text}]}));

    let mut body = json!({
        "systemInstruction": {"parts": [{"text": system}]},
        "contents": contents,
    });
    if web_search {
        body["tools"] = json!([{"googleSearch": {}}]);
    }
    body
}

// ============================================================================
// Response payload
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Debug, Deserialize)]
struct WebChunk {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

fn parse_reply(payload: GenerateContentResponse) -> Result<TurnReply> {
    let candidate = payload.candidates.into_iter().next().ok_or_else(|| {
        TutorError::llm_api_error(LlmErrorKind::InvalidResponse, "response has no candidates")
    })?;

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(TutorError::llm_api_error(
            LlmErrorKind::InvalidResponse,
            "candidate has no text",
        ));
    }

    let sources = candidate
        .grounding_metadata
        .map(|meta| {
            meta.grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.web)
                .filter_map(|web| {
                    let uri = web.uri?;
                    let title = web.title.unwrap_or_else(|| uri.clone());
                    Some(Source { uri, title })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(TurnReply { text, sources })
}
