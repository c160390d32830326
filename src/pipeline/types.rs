use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Sampling and decoding parameters for a single pipeline run.
/// Immutable once constructed; serialized verbatim into the transport
/// request's `options` object (pipeline-only flags are skipped).
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// Context window size in tokens.
    pub num_ctx: usize,
    /// Output token cap; None leaves the server default in place.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub repeat_penalty: f32,
    /// Skip the review pass entirely.
    #[serde(skip)]
    pub fast_mode: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 0.9,
            top_k: 40,
            num_ctx: 4096,
            num_predict: None,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            repeat_penalty: 1.1,
            fast_mode: false,
        }
    }
}

/// Default task when the caller supplies no instruction at all.
pub const DEFAULT_INSTRUCTION: &str = "Summarize the following text in detail.";

/// User-supplied instruction layering for one run.
/// File-sourced overrides are ordered; the inline override always lands after
/// them in the combined prompt, giving it the highest effective priority.
#[derive(Debug, Clone, Default)]
pub struct InstructionSet {
    pub user_override_texts: Vec<String>,
    pub inline_instruction: Option<String>,
}

impl InstructionSet {
    /// The instruction the pipeline renders into the generation prompt.
    pub fn effective_instruction(&self) -> &str {
        match self.inline_instruction.as_deref() {
            Some(s) if !s.trim().is_empty() => s,
            _ => DEFAULT_INSTRUCTION,
        }
    }
}

/// One bounded slice of the input document. `sequence_index` reconstructs
/// document order after independent per-window processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub sequence_index: usize,
}

/// Flexible document container — the canonical unit produced per generation
/// call and merged across windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexDoc {
    /// Internal reasoning/planning block. Advisory; never required downstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_process: Option<String>,
    /// The main markdown content.
    pub content: String,
}

impl FlexDoc {
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            thought_process: None,
            content: content.into(),
        }
    }
}

/// Final output of a pipeline run, handed to the external document sink.
#[derive(Debug, Clone, Serialize)]
pub struct DocResult {
    pub input_id: String,
    pub final_doc: FlexDoc,
}

/// A target schema for structured generation: `content` required,
/// `thought_process` optional. `FlexDoc` is the one concrete schema today;
/// the client is generic over anything shaped this way.
pub trait StructuredSchema: DeserializeOwned + Send {
    /// Machine-readable field description embedded into the JSON-enforcement
    /// prompt sent to the model.
    fn schema_json() -> serde_json::Value;

    /// Build a minimal valid document from a bare `content` value, when the
    /// schema's only required textual field is `content`. Schemas with other
    /// required fields return None, which disables the textual fallbacks.
    fn from_content_only(content: String, thought_process: Option<String>) -> Option<Self>;
}

impl StructuredSchema for FlexDoc {
    fn schema_json() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "thought_process": {
                    "type": "string",
                    "description": "Internal reasoning/planning block. Use this to analyze the request before generating content."
                },
                "content": {
                    "type": "string",
                    "description": "The main markdown content."
                }
            },
            "required": ["content"]
        })
    }

    fn from_content_only(content: String, thought_process: Option<String>) -> Option<Self> {
        Some(Self {
            thought_process,
            content,
        })
    }
}

/// Which recovery stage produced a structured document. The caller only
/// consumes the document; the stage exists so every cascade step is
/// observable in logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStage {
    /// First response parsed and validated directly.
    Parsed,
    /// Valid only after the repair round-trip.
    Repaired,
    /// Content pulled out of malformed JSON by bracket isolation.
    Salvaged,
    /// Raw response text used verbatim as content.
    Fallback,
}

/// A validated document together with the stage that produced it.
#[derive(Debug, Clone)]
pub struct StructuredOutcome<T> {
    pub doc: T,
    pub stage: RecoveryStage,
}

/// Side channel for human-readable progress notifications. Purely an effect:
/// pipeline behavior must be identical whatever sink is attached.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, message: &str);
}

/// Sink that discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn notify(&self, _message: &str) {}
}
