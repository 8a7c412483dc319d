//! OCR engine client for OpenAI-compatible chat endpoints.
//!
//! vLLM, SGLang and Ollama all expose `/v1/chat/completions`; the page image
//! travels inline as a base64 data URL next to a fixed recognition prompt.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::{OcrConfig, OcrEngineKind};
use crate::contract::{OcrPageIn, OcrPageOut};
use crate::error::OcrError;

pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

const RETRYABLE_STATUSES: [u16; 7] = [408, 425, 429, 500, 502, 503, 504];

pub fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUSES.contains(&status.as_u16())
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Model identifier; part of every OCR effect key.
    fn model(&self) -> &str;

    async fn recognize(&self, page: &OcrPageIn, png: &[u8]) -> Result<OcrPageOut, OcrError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Value,
}

/// Chat-completions client with bounded retries.
pub struct ChatOcrEngine {
    client: Client,
    url: String,
    engine: OcrEngineKind,
    model: String,
    backoff: Duration,
}

impl ChatOcrEngine {
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OcrError::InvalidConfig {
                field: "http_client",
                value: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: config.completions_url(),
            engine: config.engine,
            model: config.model.clone(),
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Base delay; attempt `n` waits `n × backoff` before the next try.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_body<'a>(&'a self, page: &OcrPageIn, png: &[u8]) -> ChatRequest<'a> {
        let data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        );
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    json!({"type": "image_url", "image_url": {"url": data_url}}),
                    json!({"type": "text", "text": page.prompt}),
                ],
            }],
            temperature: 0.0,
        }
    }

    /// POST once per attempt until success, a fatal status, or the budget runs out.
    async fn post_with_retry(&self, body: &ChatRequest<'_>) -> Result<Value, OcrError> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.post(&self.url).json(body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        debug!(attempt, url = %self.url, "OCR request succeeded");
                        return resp
                            .json::<Value>()
                            .await
                            .map_err(|e| OcrError::InvalidResponse(e.to_string()));
                    }
                    let text = resp.text().await.unwrap_or_default();
                    if !is_retryable_status(status) {
                        return Err(OcrError::Http {
                            status: status.as_u16(),
                            body: text,
                        });
                    }
                    last_error = format!("HTTP {}", status.as_u16());
                }
                Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                    last_error = e.to_string();
                }
                Err(e) => return Err(OcrError::InvalidResponse(e.to_string())),
            }

            if attempt < MAX_ATTEMPTS {
                warn!(attempt, error = %last_error, url = %self.url, "OCR request failed, retrying");
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }

        Err(OcrError::EndpointUnreachable {
            url: self.url.clone(),
            attempts: MAX_ATTEMPTS,
            message: last_error,
        })
    }
}

#[async_trait]
impl OcrEngine for ChatOcrEngine {
    fn model(&self) -> &str {
        &self.model
    }

    async fn recognize(&self, page: &OcrPageIn, png: &[u8]) -> Result<OcrPageOut, OcrError> {
        let body = self.request_body(page, png);
        let raw = self.post_with_retry(&body).await?;
        let text_md = extract_text(&raw)?;

        let mut engine_meta = Map::new();
        engine_meta.insert("engine".into(), json!(self.engine.as_str()));
        engine_meta.insert("model".into(), json!(self.model));

        Ok(OcrPageOut {
            text_md,
            tables: Vec::new(),
            confidence: None,
            engine_meta,
            raw,
        })
    }
}

/// Pull the recognized text out of `choices[0].message.content`.
///
/// Content is either a plain string or a list of `{type: "text", text}` parts,
/// which are joined with newlines.
pub fn extract_text(raw: &Value) -> Result<String, OcrError> {
    let response: ChatResponse = serde_json::from_value(raw.clone())
        .map_err(|e| OcrError::InvalidResponse(e.to_string()))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| OcrError::InvalidResponse("no choices".to_string()))?;

    match choice.message.content {
        Value::String(text) => Ok(text),
        Value::Array(parts) => Ok(parts
            .iter()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")),
        Value::Null => Ok(String::new()),
        other => Err(OcrError::InvalidResponse(format!(
            "unsupported message content: {}",
            other
        ))),
    }
}
