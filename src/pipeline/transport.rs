use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;

use super::types::GenerationOptions;

#[derive(Error, Debug)]
pub enum TransportError {
    /// Rate-limited or temporarily unavailable (HTTP 429/503). Retryable.
    #[error("Model endpoint overloaded (status {status}): {message}")]
    Overloaded { status: u16, message: String },

    /// Connection or timeout failure. Retryable.
    #[error("Network error: {0}")]
    Network(String),

    /// Server-side fatal error surfaced with a structured payload.
    /// Not retryable — it will not resolve by retrying.
    #[error("Model server error: {0}")]
    Server(String),

    /// Any other HTTP failure. Not retryable.
    #[error("HTTP error (status {status}): {body}")]
    Http { status: u16, body: String },

    /// Endpoint answered with something that is not its own wire format.
    #[error("Malformed transport response: {0}")]
    ResponseParsing(String),

    /// Retry ceiling hit; carries the final underlying failure.
    #[error("Retry budget exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Overloaded { .. } | Self::Network(_))
    }
}

/// One role-tagged message in a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A serialized generation request: model identifier, conversation so far,
/// structured-output demand, and decoding options.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Ask the endpoint to constrain output to JSON.
    pub structured: bool,
    pub options: GenerationOptions,
}

/// Remote text-generation endpoint. Implementations own their own retry
/// discipline; a returned error is terminal for the call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, request: &ChatRequest) -> Result<String, TransportError>;

    async fn list_models(&self) -> Result<Vec<String>, TransportError> {
        Ok(Vec::new())
    }
}

/// Retry discipline for retryable transport failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: config::MAX_TRANSPORT_ATTEMPTS,
            base_delay: Duration::from_secs_f64(config::BASE_BACKOFF_SECS),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: base delay doubling per attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Drive a single-shot call under this policy. Retryable failures back
    /// off and retry up to the attempt ceiling; fatal failures propagate
    /// immediately; an exhausted budget is terminal and carries the last
    /// underlying error.
    pub async fn run<F, Fut>(&self, mut attempt_fn: F) -> Result<String, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<String, TransportError>>,
    {
        let mut last_error: Option<TransportError> = None;

        for attempt in 0..self.max_attempts {
            match attempt_fn().await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "Transport call failed, backing off"
                    );
                    last_error = Some(e);
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(TransportError::RetriesExhausted {
            attempts: self.max_attempts,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt recorded".to_string()),
        })
    }
}

/// Request body for Ollama /api/chat
#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: &'a GenerationOptions,
}

/// Response body from Ollama /api/chat
#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
}

#[derive(Deserialize)]
struct OllamaChatMessage {
    content: String,
}

/// Structured error payload some endpoints attach to failure statuses.
#[derive(Deserialize)]
struct OllamaErrorBody {
    error: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

/// HTTP transport against a local Ollama instance, with exponential-backoff
/// retry on overload and network failures.
pub struct OllamaTransport {
    base_url: String,
    client: reqwest::Client,
    policy: RetryPolicy,
    timeout_secs: u64,
}

impl OllamaTransport {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            policy: RetryPolicy::default(),
            timeout_secs,
        }
    }

    /// Default Ollama instance at localhost:11434.
    pub fn default_local() -> Self {
        Self::new("http://localhost:11434", config::REQUEST_TIMEOUT_SECS)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<String, TransportError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest {
            model: &request.model,
            messages: &request.messages,
            stream: false,
            format: request.structured.then_some("json"),
            options: &request.options,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    TransportError::Network(format!("cannot reach {}", self.base_url))
                } else if e.is_timeout() {
                    TransportError::Network(format!(
                        "request timed out after {}s",
                        self.timeout_secs
                    ))
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 503 {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OllamaErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| {
                    if status.as_u16() == 429 {
                        "Too Many Requests".to_string()
                    } else {
                        "Service Unavailable".to_string()
                    }
                });
            return Err(TransportError::Overloaded {
                status: status.as_u16(),
                message,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // A structured 500 payload is a fatal server-side failure.
            if status.as_u16() == 500 {
                if let Ok(err) = serde_json::from_str::<OllamaErrorBody>(&body) {
                    return Err(TransportError::Server(err.error));
                }
            }
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| TransportError::ResponseParsing(e.to_string()))?;

        Ok(parsed.message.content)
    }
}

#[async_trait]
impl Transport for OllamaTransport {
    async fn call(&self, request: &ChatRequest) -> Result<String, TransportError> {
        self.policy.run(|| self.send_once(request)).await
    }

    async fn list_models(&self) -> Result<Vec<String>, TransportError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_connect() {
                TransportError::Network(format!("cannot reach {}", self.base_url))
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| TransportError::ResponseParsing(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

/// Mock transport for testing — replays a fixed response and records every
/// request it receives.
pub struct MockTransport {
    response: String,
    calls: std::sync::Mutex<Vec<ChatRequest>>,
}

impl MockTransport {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn recorded_calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, request: &ChatRequest) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        Ok(self.response.clone())
    }
}

/// Mock transport that replays a scripted sequence of outcomes, one per call.
/// Calls past the end of the script repeat the final entry.
pub struct ScriptedTransport {
    script: std::sync::Mutex<Vec<Result<String, String>>>,
    calls: std::sync::Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<String, String>>) -> Self {
        assert!(!script.is_empty(), "script must have at least one entry");
        Self {
            script: std::sync::Mutex::new(script),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn recorded_calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(&self, request: &ChatRequest) -> Result<String, TransportError> {
        let mut calls = self.calls.lock().unwrap();
        let index = calls.len();
        calls.push(request.clone());

        let script = self.script.lock().unwrap();
        let entry = script.get(index).unwrap_or_else(|| {
            script.last().expect("script is non-empty")
        });
        match entry {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(TransportError::Server(message.clone())),
        }
    }
}
