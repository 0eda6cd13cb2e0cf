//! Recognition backend: one chat-completions call per region.
//!
//! The request is a single user message with two parts, the fixed
//! instruction text and the region as an inline `data:image/png;base64`
//! URL. The answer's `choices[0].message.content` must itself be a JSON
//! object with at least a `text` field. The front-matter fields the model
//! reports are kept as [`OcrMetadata`] when they parse; a mistyped field is
//! dropped rather than failing the region.

use crate::config::ServiceConfig;
use crate::document::OcrMetadata;
use crate::error::{RegionError, ServiceError};
use crate::pipeline::encode::EncodedImage;
use crate::prompts::OCR_PROMPT;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Parsed model answer for one region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub metadata: OcrMetadata,
}

/// What the backend's own `/health` answered.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendHealth {
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("inference backend unreachable: {0}")]
    Unreachable(String),
    #[error("inference backend health check timed out: {0}")]
    TimedOut(String),
    #[error("inference backend health check failed: {0}")]
    Other(String),
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Transcribe one encoded region.
    async fn transcribe(&self, image: &EncodedImage) -> Result<Transcription, RegionError>;

    /// Probe the backend's health endpoint.
    async fn health(&self) -> Result<BackendHealth, HealthError>;
}

/// OpenAI-compatible `/v1/chat/completions` client.
#[derive(Debug, Clone)]
pub struct ChatCompletionsBackend {
    client: reqwest::Client,
    health_client: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    api_timeout_secs: u64,
}

impl ChatCompletionsBackend {
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InvalidConfig(format!("inference client: {e}")))?;
        let health_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.health_connect_timeout_ms))
            .timeout(Duration::from_millis(config.health_timeout_ms))
            .build()
            .map_err(|e| ServiceError::InvalidConfig(format!("health client: {e}")))?;

        Ok(Self {
            client,
            health_client,
            endpoint: config.inference_endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            api_timeout_secs: config.api_timeout_secs,
        })
    }

    fn payload(&self, image: &EncodedImage) -> Value {
        json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": OCR_PROMPT },
                    { "type": "image_url", "image_url": { "url": image.data_url() } }
                ]
            }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }
}

/// Pull the transcription out of a chat-completions response body.
pub fn parse_completion(body: &Value) -> Result<Transcription, RegionError> {
    let content = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| RegionError::Protocol("missing choices[0].message.content".into()))?;

    let parsed: Value = serde_json::from_str(content)
        .map_err(|e| RegionError::Protocol(format!("content is not JSON: {e}")))?;
    let fields = parsed
        .as_object()
        .ok_or_else(|| RegionError::Protocol("content is not a JSON object".into()))?;

    let text = match fields.get("text") {
        Some(Value::String(s)) => s.clone(),
        // Blank regions come back as `"text": null`.
        Some(Value::Null) => String::new(),
        Some(other) => {
            return Err(RegionError::Protocol(format!(
                "text field is not a string: {other}"
            )))
        }
        None => return Err(RegionError::Protocol("content has no text field".into())),
    };

    Ok(Transcription {
        text,
        metadata: front_matter(fields),
    })
}

/// Read the front-matter fields, skipping any with an unexpected type.
fn front_matter(fields: &serde_json::Map<String, Value>) -> OcrMetadata {
    let flag = |name: &str| match fields.get(name)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().to_ascii_lowercase().parse().ok(),
        _ => None,
    };
    let rotation = fields.get("rotation_correction").and_then(|v| match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });

    OcrMetadata {
        primary_language: fields
            .get("primary_language")
            .and_then(Value::as_str)
            .map(str::to_string),
        is_rotation_valid: flag("is_rotation_valid"),
        rotation_correction: rotation.and_then(|r| i32::try_from(r).ok()),
        is_table: flag("is_table"),
        is_diagram: flag("is_diagram"),
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

#[async_trait]
impl InferenceBackend for ChatCompletionsBackend {
    async fn transcribe(&self, image: &EncodedImage) -> Result<Transcription, RegionError> {
        let url = format!("{}/v1/chat/completions", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&self.payload(image))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RegionError::Timeout {
                        secs: self.api_timeout_secs,
                    }
                } else {
                    RegionError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RegionError::Status {
                status: status.as_u16(),
                body: truncate(body, 512),
            });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| RegionError::Protocol(format!("response is not JSON: {e}")))?;
        let transcription = parse_completion(&body)?;
        debug!(
            "Transcribed {}×{} region → {} chars",
            image.width,
            image.height,
            transcription.text.len()
        );
        Ok(transcription)
    }

    async fn health(&self) -> Result<BackendHealth, HealthError> {
        let url = format!("{}/health", self.endpoint);
        let resp = self.health_client.get(&url).send().await.map_err(|e| {
            if e.is_connect() {
                HealthError::Unreachable(e.to_string())
            } else if e.is_timeout() {
                HealthError::TimedOut(e.to_string())
            } else {
                HealthError::Other(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                HealthError::TimedOut(e.to_string())
            } else {
                HealthError::Other(e.to_string())
            }
        })?;

        Ok(BackendHealth {
            status,
            body,
            content_type,
        })
    }
}
