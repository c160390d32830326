//! Final Markdown rendering with a last-line failsafe for model output that
//! slipped through the structured client as stringified JSON.

use crate::pipeline::FlexDoc;

/// Keys checked, in order, when unwrapping a stringified-JSON content field.
const CONTENT_KEYS: &[&str] = &["content", "text", "markdown", "output"];

/// Render a generated document to the Markdown text written to disk.
///
/// If the content field itself holds a JSON object (the model double-encoded
/// its answer and every earlier recovery stage passed it through verbatim),
/// the first string value under a known key is used instead.
pub fn render_markdown(doc: &FlexDoc) -> String {
    let content = doc.content.trim();

    if let Some(inner) = unwrap_stringified_json(content) {
        tracing::warn!("Content field held stringified JSON; unwrapped for rendering");
        return inner;
    }

    content.to_string()
}

fn unwrap_stringified_json(content: &str) -> Option<String> {
    if !(content.starts_with('{') && content.ends_with('}')) {
        return None;
    }

    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    let object = value.as_object()?;

    for key in CONTENT_KEYS {
        if let Some(text) = object.get(*key).and_then(|v| v.as_str()) {
            return Some(text.to_string());
        }
    }

    None
}
