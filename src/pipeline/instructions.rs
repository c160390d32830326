use std::collections::BTreeMap;
use std::fmt;

use super::types::InstructionSet;

/// Marker substituted for denylisted instruction fragments.
pub const REDACTION_MARKER: &str = "[REDACTED_PROHIBITED]";

/// Literal phrases that attempt to break structured output or evidence rules.
/// This is a textual mitigation only — it defends against verbatim phrase
/// injection, not against paraphrase.
const PROHIBITED_PHRASES: &[&str] = &[
    "ignore previous guidelines",
    "return plain text",
    "no json",
    "ignore evidence",
];

/// Prompt roles the pipeline issues instructions for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Outline,
    Map,
    Reduce,
    Final,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outline => write!(f, "outline"),
            Self::Map => write!(f, "map"),
            Self::Reduce => write!(f, "reduce"),
            Self::Final => write!(f, "final"),
        }
    }
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Outline, Stage::Map, Stage::Reduce, Stage::Final];

    /// Built-in base instruction for this stage.
    pub fn base_prompt(&self) -> &'static str {
        match self {
            Self::Outline => {
                "You are an expert scientific documentation architect.\n\
                 Analyze the following text segments and PROPOSE a strict JSON outline for a comprehensive scientific document.\n\
                 Focus on extracting: Background, Methods, Findings, Discussion.\n\
                 Return ONLY JSON."
            }
            Self::Map => {
                "You are a precise data extractor.\n\
                 Extract all relevant scientific facts, claims, methods, and definitions from the provided text chunk.\n\
                 Match extraction to the provided OUTLINE.\n\
                 For every item, you MUST provide precise evidence (segment_ids).\n\
                 Return ONLY JSON."
            }
            Self::Reduce => {
                "You are a synthesis engine.\n\
                 Merge the provided extracted fragments into a unified set of lists.\n\
                 Deduplicate similar claims.\n\
                 Preserve ALL distinct evidence references.\n\
                 Return ONLY JSON."
            }
            Self::Final => {
                "You are a scientific writer.\n\
                 Rewrite the structured data into a flowing, professional scientific document.\n\
                 Adhere STRICTLY to the provided structure.\n\
                 Preserve ALL citation links (evidence).\n\
                 Return ONLY JSON."
            }
        }
    }
}

/// Layer user overrides onto each role's base instruction.
///
/// Precedence is positional: the base text comes first, file-sourced override
/// blocks next, the inline override last — models weight trailing text most
/// heavily, so the inline override effectively wins. Nothing replaces
/// anything outright; the only destructive step is denylist redaction.
pub fn layer_instructions(
    base_by_role: &BTreeMap<Stage, String>,
    instructions: &InstructionSet,
) -> BTreeMap<Stage, String> {
    let additional = build_override_block(instructions);
    let additional = redact_prohibited(&additional);

    base_by_role
        .iter()
        .map(|(stage, base)| (*stage, format!("{base}\n{additional}")))
        .collect()
}

/// Convenience wrapper over the built-in base prompts.
pub fn effective_instructions(instructions: &InstructionSet) -> BTreeMap<Stage, String> {
    let base = Stage::ALL
        .iter()
        .map(|s| (*s, s.base_prompt().to_string()))
        .collect();
    layer_instructions(&base, instructions)
}

/// Combine file overrides and the inline override into one trailing block,
/// file content first so the inline text keeps the last word.
fn build_override_block(instructions: &InstructionSet) -> String {
    let mut block = String::new();

    let file_content = instructions.user_override_texts.join("\n");
    if !file_content.trim().is_empty() {
        block.push_str(&format!("\n\n## User Instructions (File)\n{file_content}"));
    }

    if let Some(inline) = instructions.inline_instruction.as_deref() {
        if !inline.trim().is_empty() {
            block.push_str(&format!(
                "\n\n## User Instructions (Inline - Highest Priority)\n{inline}"
            ));
        }
    }

    block
}

/// Replace denylisted phrases with the redaction marker. Matching is
/// case-insensitive; replacement covers the lower, UPPER, and Title casings
/// of each phrase. Emits one warning per detected phrase; never fails.
pub fn redact_prohibited(text: &str) -> String {
    let mut result = text.to_string();
    let lowered = text.to_lowercase();

    for phrase in PROHIBITED_PHRASES {
        if lowered.contains(phrase) {
            tracing::warn!(
                phrase = %phrase,
                "Prohibited instruction fragment detected and neutralized"
            );
            result = result.replace(phrase, REDACTION_MARKER);
            result = result.replace(&phrase.to_uppercase(), REDACTION_MARKER);
            result = result.replace(&title_case(phrase), REDACTION_MARKER);
        }
    }

    result
}

/// Uppercase the first letter of every whitespace-separated word.
fn title_case(phrase: &str) -> String {
    phrase
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
