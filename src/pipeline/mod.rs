//! Adaptive document generation pipeline.
//!
//! Turns arbitrary-length input text into a structured Markdown document by
//! way of an unreliable JSON-emitting model endpoint. Input that fits the
//! model context is processed in one shot; oversized input is split into
//! overlapping windows, processed sequentially, and merged back together.
//! All model output passes through a resilient structured-output client that
//! recovers from malformed JSON instead of failing the run.

pub mod client;
pub mod instructions;
pub mod prompts;
pub mod runner;
pub mod segmenter;
pub mod transport;
pub mod types;

pub use client::*;
pub use instructions::{effective_instructions, layer_instructions, redact_prohibited, Stage};
pub use prompts::{PromptError, PromptSet};
pub use runner::*;
pub use segmenter::*;
pub use transport::{
    ChatMessage, ChatRequest, OllamaTransport, RetryPolicy, Transport, TransportError,
};
pub use types::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Prompt rendering error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Unrecoverable model output: {0}")]
    UnrecoverableOutput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
