//! Clarion: adaptive document generation from arbitrary-length text.
//!
//! Feed it raw text and an instruction; it picks a processing strategy
//! (one-shot or overlapping windows), drives a local model through a
//! resilient structured-output client, and renders the result as Markdown.

pub mod config;
pub mod pipeline;
pub mod render;
