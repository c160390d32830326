use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::config;

use super::prompts::PromptSet;
use super::transport::{ChatMessage, ChatRequest, Transport};
use super::types::{GenerationOptions, RecoveryStage, StructuredOutcome, StructuredSchema};
use super::PipelineError;

/// Why a response failed to become a validated document.
#[derive(Error, Debug)]
pub enum ParseFailure {
    /// Not recoverable JSON by any cascade stage.
    #[error("JSON parse error: {0}")]
    Parse(String),

    /// Parsed JSON that does not satisfy the schema.
    #[error("Schema validation error: {0}")]
    Validation(String),
}

/// Client that makes a best-effort JSON generator behave like a structured
/// API. One primary call, a fixed cascade of parse recoveries, exactly one
/// repair round-trip, then content salvage and a verbatim-text fallback.
/// Each stage is cheaper to trust than the next is lossy; the order is fixed
/// so failures are auditable.
pub struct StructuredClient {
    transport: Arc<dyn Transport>,
    prompts: Arc<PromptSet>,
    model: String,
}

impl StructuredClient {
    pub fn new(transport: Arc<dyn Transport>, prompts: Arc<PromptSet>, model: &str) -> Self {
        Self {
            transport,
            prompts,
            model: model.to_string(),
        }
    }

    /// Generate a document matching schema `T` from `prompt`.
    ///
    /// The returned outcome carries the recovery stage that produced the
    /// document, so callers and tests can tell a clean parse from a salvage.
    pub async fn generate<T: StructuredSchema>(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<StructuredOutcome<T>, PipelineError> {
        let schema_json = T::schema_json().to_string();
        let enforced = self.prompts.render(
            "json_enforcement",
            &[("prompt", prompt), ("schema_json", &schema_json)],
        )?;

        let mut request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(enforced)],
            structured: true,
            options: options.clone(),
        };

        let first_response = self.transport.call(&request).await?;

        let first_failure = match parse_and_validate::<T>(&first_response) {
            Ok(doc) => {
                return Ok(StructuredOutcome {
                    doc,
                    stage: RecoveryStage::Parsed,
                })
            }
            Err(e) => e,
        };

        // Exactly one repair round-trip: tell the model what broke, in the
        // same conversation, and re-run the full parse cascade on its answer.
        let mut last_response = first_response;
        let mut last_failure = first_failure;
        for _ in 0..config::REPAIR_ROUND_TRIPS {
            tracing::warn!(error = %last_failure, "Structured parse failed, issuing repair round-trip");

            let repair = self
                .prompts
                .render("repair", &[("error", &last_failure.to_string())])?;
            request.messages.push(ChatMessage::user(repair));

            last_response = self.transport.call(&request).await?;
            match parse_and_validate::<T>(&last_response) {
                Ok(doc) => {
                    return Ok(StructuredOutcome {
                        doc,
                        stage: RecoveryStage::Repaired,
                    })
                }
                Err(e) => last_failure = e,
            }
        }

        // Heuristic salvage: pull a `content` value out of the malformed text.
        if let Some(doc) = salvage_content::<T>(&last_response) {
            tracing::info!("Recovered content field from malformed structured response");
            return Ok(StructuredOutcome {
                doc,
                stage: RecoveryStage::Salvaged,
            });
        }

        // Most lossy fallback: the fence-stripped raw text, verbatim.
        let stripped = strip_fence_markers(&last_response);
        if stripped.is_empty() {
            return Err(PipelineError::UnrecoverableOutput(last_failure.to_string()));
        }
        match T::from_content_only(stripped, None) {
            Some(doc) => {
                tracing::warn!("Using raw response text as content fallback");
                Ok(StructuredOutcome {
                    doc,
                    stage: RecoveryStage::Fallback,
                })
            }
            None => Err(PipelineError::UnrecoverableOutput(last_failure.to_string())),
        }
    }
}

/// Robustly extract and validate a schema object from raw model output.
/// Handles fenced code blocks, surrounding prose, control characters inside
/// strings, truncation-induced missing braces, and common field aliases.
pub fn parse_and_validate<T: StructuredSchema>(content: &str) -> Result<T, ParseFailure> {
    let cleaned = unwrap_fenced_block(content.trim());

    // Bound a candidate object between the first `{` and the last `}`.
    let candidate = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => cleaned.as_str(),
    };

    let value = parse_permissive(candidate)
        .or_else(|| repair_truncated(candidate))
        .or_else(|| rescue_largest_span(&cleaned))
        .ok_or_else(|| ParseFailure::Parse("No recoverable JSON structure found".to_string()))?;

    let value = normalize_aliases(value);
    serde_json::from_value::<T>(value).map_err(|e| ParseFailure::Validation(e.to_string()))
}

/// If the response is wrapped in fenced code blocks, return the body of the
/// last block; models often restate a correction after a failed attempt, and
/// the final block is the one adjacent to the answer.
fn unwrap_fenced_block(text: &str) -> String {
    if !text.contains("```") {
        return text.to_string();
    }
    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fence pattern is valid");
    fence
        .captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| text.to_string())
}

/// Parse JSON while tolerating raw control characters inside string values,
/// which strict parsers reject but models routinely emit.
fn parse_permissive(candidate: &str) -> Option<Value> {
    serde_json::from_str(&escape_control_chars(candidate)).ok()
}

/// Escape unescaped control characters that appear inside JSON strings.
fn escape_control_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                out.push(c);
                escaped = false;
                continue;
            }
            match c {
                '\\' => {
                    out.push(c);
                    escaped = true;
                }
                '"' => {
                    out.push(c);
                    in_string = false;
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }

    out
}

/// Responses cut off by the token limit end mid-object. Append the number of
/// closing braces implied by depth counting and re-parse.
fn repair_truncated(candidate: &str) -> Option<Value> {
    let open = candidate.matches('{').count();
    let close = candidate.matches('}').count();
    if open <= close {
        return None;
    }
    let repaired = format!("{}{}", candidate, "}".repeat(open - close));
    parse_permissive(&repaired)
}

/// Last parse resort: the largest `{...}` span anywhere in the text.
fn rescue_largest_span(text: &str) -> Option<Value> {
    let span = Regex::new(r"(?s)\{.*\}").expect("span pattern is valid");
    span.find(text)
        .and_then(|m| parse_permissive(m.as_str()))
}

/// Map common field aliases onto the schema's names and unwrap one level of
/// accidentally double-encoded `content`.
fn normalize_aliases(mut value: Value) -> Value {
    let Some(obj) = value.as_object_mut() else {
        return value;
    };

    if !obj.contains_key("content") {
        if let Some(text) = obj.remove("text") {
            obj.insert("content".to_string(), text);
        }
    }
    if !obj.contains_key("thought_process") {
        if let Some(thoughts) = obj.remove("thoughts") {
            obj.insert("thought_process".to_string(), thoughts);
        }
    }

    if let Some(Value::String(content)) = obj.get("content") {
        let trimmed = content.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') && trimmed.contains("\"content\"") {
            if let Ok(Value::Object(inner)) = serde_json::from_str::<Value>(trimmed) {
                if let Some(inner_content) = inner.get("content") {
                    obj.insert("content".to_string(), inner_content.clone());
                }
            }
        }
    }

    value
}

/// Pull a usable `content` value out of text that failed strict validation.
/// Only applies to schemas whose sole required textual field is `content`.
fn salvage_content<T: StructuredSchema>(response: &str) -> Option<T> {
    let cleaned = unwrap_fenced_block(response.trim());
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }

    let value = parse_permissive(&cleaned[start..=end])?;
    let value = normalize_aliases(value);
    let obj = value.as_object()?;
    let content = obj.get("content")?;
    let content = match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let thought_process = obj
        .get("thought_process")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    T::from_content_only(content, thought_process)
}

/// Strip leading/trailing fence markers without touching the body.
fn strip_fence_markers(response: &str) -> String {
    let mut text = response.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim().to_string()
}
