use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Unknown prompt template: {0}")]
    UnknownTemplate(String),

    #[error("Unresolved variable `{variable}` in template `{template}`")]
    UnresolvedVariable { template: String, variable: String },
}

/// Guardrails prepended to every generation prompt.
const SYSTEM_GUIDELINES: &str = "\
GUIDELINES:
- Ground every statement in the provided source text. Do not invent facts.
- Produce well-structured Markdown: headings, lists, and tables where they help.
- Preserve exact values (numbers, dates, names) verbatim from the source.
- If the source is ambiguous, say so rather than guessing.";

/// Main generation prompt: instruction + guidelines + source block.
const GENERATION: &str = "\
{{ system_guidelines }}

TASK:
{{ instruction }}

SOURCE TEXT:
<document>
{{ context }}
</document>

Produce the requested document from the source text above.";

/// Second-pass prompt treating the model as an editor of its own draft.
const REVIEW: &str = "\
You are an exacting editor. Review the draft below for structure, clarity,
and fidelity. Fix formatting problems, tighten prose, and keep every factual
detail intact. Return the full improved document, not a critique.

DRAFT:
{{ draft_content }}";

/// Wrapper that turns any prompt into a schema-enforced JSON request.
const JSON_ENFORCEMENT: &str = "\
{{ prompt }}

RESPONSE FORMAT — ABSOLUTE:
Respond with a single JSON object and nothing else. No prose before or after,
no code fences. The object must conform to this schema:
{{ schema_json }}

Put the requested document in the \"content\" field as Markdown. You may use
the optional \"thought_process\" field to plan before writing.";

/// Follow-up sent after a malformed response, carrying the concrete error.
const REPAIR: &str = "\
Your previous response could not be parsed as valid JSON matching the schema.
Error: {{ error }}

Respond again with ONLY the corrected JSON object. No explanation, no code
fences, no text outside the object.";

/// Named prompt templates with `{{ var }}` substitution.
///
/// Constructed once at startup and passed into the pipeline — an explicit
/// dependency rather than process-wide state, so tests can swap templates.
/// Rendering is a pure function of (name, variables).
pub struct PromptSet {
    templates: BTreeMap<String, String>,
}

impl PromptSet {
    /// The built-in template set the binary ships with.
    pub fn builtin() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert("system_guidelines".to_string(), SYSTEM_GUIDELINES.to_string());
        templates.insert("generation".to_string(), GENERATION.to_string());
        templates.insert("review".to_string(), REVIEW.to_string());
        templates.insert("json_enforcement".to_string(), JSON_ENFORCEMENT.to_string());
        templates.insert("repair".to_string(), REPAIR.to_string());
        Self { templates }
    }

    /// Add or replace a template.
    pub fn with_template(mut self, name: &str, text: &str) -> Self {
        self.templates.insert(name.to_string(), text.to_string());
        self
    }

    /// Render `name`, substituting every `{{ var }}` occurrence. A template
    /// variable left unresolved after substitution is an error.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| PromptError::UnknownTemplate(name.to_string()))?;

        let mut rendered = template.clone();
        for (var, value) in vars {
            rendered = rendered.replace(&format!("{{{{ {var} }}}}"), value);
            rendered = rendered.replace(&format!("{{{{{var}}}}}"), value);
        }

        if let Some(start) = rendered.find("{{") {
            let rest = &rendered[start + 2..];
            let variable = rest
                .split("}}")
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            return Err(PromptError::UnresolvedVariable {
                template: name.to_string(),
                variable,
            });
        }

        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_has_all_pipeline_templates() {
        let prompts = PromptSet::builtin();
        for name in [
            "system_guidelines",
            "generation",
            "review",
            "json_enforcement",
            "repair",
        ] {
            assert!(
                prompts.templates.contains_key(name),
                "missing template {name}"
            );
        }
    }

    #[test]
    fn generation_template_substitutes_all_vars() {
        let prompts = PromptSet::builtin();
        let rendered = prompts
            .render(
                "generation",
                &[
                    ("system_guidelines", "GUIDE"),
                    ("instruction", "Summarize."),
                    ("context", "The quick brown fox."),
                ],
            )
            .unwrap();
        assert!(rendered.contains("GUIDE"));
        assert!(rendered.contains("Summarize."));
        assert!(rendered.contains("The quick brown fox."));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn unknown_template_is_error() {
        let prompts = PromptSet::builtin();
        assert!(matches!(
            prompts.render("nonexistent", &[]),
            Err(PromptError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn unresolved_variable_is_error() {
        let prompts = PromptSet::builtin();
        let err = prompts.render("repair", &[]).unwrap_err();
        match err {
            PromptError::UnresolvedVariable { template, variable } => {
                assert_eq!(template, "repair");
                assert_eq!(variable, "error");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn custom_template_overrides_builtin() {
        let prompts = PromptSet::builtin().with_template("review", "Edit: {{ draft_content }}");
        let rendered = prompts
            .render("review", &[("draft_content", "my draft")])
            .unwrap();
        assert_eq!(rendered, "Edit: my draft");
    }

    #[test]
    fn rendering_is_pure() {
        let prompts = PromptSet::builtin();
        let vars = [("error", "missing brace")];
        assert_eq!(
            prompts.render("repair", &vars).unwrap(),
            prompts.render("repair", &vars).unwrap()
        );
    }
}
