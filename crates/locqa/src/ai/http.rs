//! OpenAI-compatible chat completion backend.
//!
//! One client serves every tier; the model name travels with each request.
//! Endpoint: POST {endpoint}/chat/completions (non-streaming, JSON mode).
//!
//! Status mapping:
//! - 408, 429, 5xx, timeouts and connection failures are `Transient`
//! - any other non-success status is `Fatal`
//! - a 2xx body without message content is `Malformed`

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::model::ModelId;
use super::provider::{AiError, AiProvider, TierRequest};
use crate::config::AiConfig;
use crate::error::LocqaError;
use crate::secrets::resolve_secret;

/// Longest response excerpt kept in error messages.
const SNIPPET_CHARS: usize = 300;

#[derive(Debug)]
pub struct HttpAiProvider {
    client: reqwest::Client,
    url_chat: String,
}

impl HttpAiProvider {
    /// Builds the provider from the `ai` config section, resolving the API
    /// key from `api_key_file` or `api_key_env`.
    pub fn from_config(config: &AiConfig) -> Result<Self, LocqaError> {
        let api_key = resolve_secret(config.api_key_file.as_deref(), config.api_key_env.as_deref())?;
        Ok(Self::new(&config.endpoint, &api_key, config.timeout())?)
    }

    /// Builds the client with a bearer header and request timeout.
    ///
    /// # Errors
    /// - [`AiError::Fatal`] if the endpoint is not http(s) or the key is not a
    ///   valid header value
    /// - [`AiError::Fatal`] if the HTTP client cannot be built
    pub fn new(endpoint: &str, api_key: &SecretString, timeout: Duration) -> Result<Self, AiError> {
        let endpoint = endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(AiError::Fatal(format!("invalid AI endpoint '{}'", endpoint)));
        }

        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
            .map_err(|e| AiError::Fatal(format!("invalid API key header: {}", e)))?;
        auth.set_sensitive(true);

        let mut headers = header::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| AiError::Fatal(format!("failed to build HTTP client: {}", e)))?;

        let url_chat = format!("{}/chat/completions", endpoint.trim_end_matches('/'));
        info!(endpoint = %endpoint, timeout_secs = timeout.as_secs(), "HTTP AI provider initialized");

        Ok(Self { client, url_chat })
    }
}

#[async_trait]
impl AiProvider for HttpAiProvider {
    async fn invoke(&self, model: ModelId, request: &TierRequest) -> Result<String, AiError> {
        let started = Instant::now();
        let body = ChatCompletionRequest::new(model, request);

        debug!(
            tier = %request.tier,
            model = %model,
            prompt_len = request.prompt.len(),
            "POST {}", self.url_chat
        );

        let resp = self
            .client
            .post(&self.url_chat)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    AiError::Transient(e.to_string())
                } else {
                    AiError::Fatal(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(SNIPPET_CHARS).collect();
            error!(
                %status,
                model = %model,
                latency_ms = started.elapsed().as_millis(),
                "Chat completion returned non-success status"
            );
            return Err(classify_status(status, &snippet));
        }

        let out: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| AiError::Malformed(format!("undecodable response body: {}", e)))?;

        let content = out
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AiError::Malformed("response has no message content".to_string()))?;

        debug!(
            model = %model,
            latency_ms = started.elapsed().as_millis(),
            "Chat completion finished"
        );
        Ok(content)
    }
}

fn classify_status(status: StatusCode, snippet: &str) -> AiError {
    let message = format!("HTTP {}: {}", status.as_u16(), snippet);
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        AiError::Transient(message)
    } else {
        AiError::Fatal(message)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'static str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    response_format: ResponseFormat,
}

impl<'a> ChatCompletionRequest<'a> {
    fn new(model: ModelId, request: &'a TierRequest) -> Self {
        Self {
            model: model.as_str(),
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
