/// Application-level constants
pub const APP_NAME: &str = "Clarion";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    format!("{}=info", env!("CARGO_PKG_NAME"))
}

/// Approximate characters per model token. Token estimates divide character
/// counts by this before comparing against the context window.
pub const CHARS_PER_TOKEN: usize = 4;

/// Tokens reserved out of the context window for the prompt scaffolding and
/// the model's own output.
pub const CONTEXT_RESERVE_TOKENS: usize = 2000;

/// Minimum input token budget, regardless of how small the context window is.
pub const FLOOR_TOKENS: usize = 1000;

/// Character overlap between adjacent hard-sliced windows.
pub const DEFAULT_OVERLAP_CHARS: usize = 500;

/// Draft content at or below this length is returned without a review pass —
/// there is nothing meaningful to edit.
pub const MIN_REVIEWABLE_CONTENT: usize = 10;

/// Per-request timeout in seconds. Long enough to cover cold model loading
/// on a first call.
pub const REQUEST_TIMEOUT_SECS: u64 = 1200;

/// Transport attempt ceiling for retryable failures.
pub const MAX_TRANSPORT_ATTEMPTS: u32 = 5;

/// Base backoff delay in seconds; doubles per attempt.
pub const BASE_BACKOFF_SECS: f64 = 2.0;

/// Number of repair round-trips issued after a failed parse or validation.
/// The recovery protocol is defined for exactly one.
pub const REPAIR_ROUND_TRIPS: u32 = 1;

/// Safe input budget in tokens for a given context window size.
pub fn safe_input_tokens(num_ctx: usize) -> usize {
    FLOOR_TOKENS.max(num_ctx.saturating_sub(CONTEXT_RESERVE_TOKENS))
}

/// Estimate the token count of a text from its character length.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}
