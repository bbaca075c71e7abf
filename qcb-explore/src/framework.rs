//! Research framework: function enumeration and prompt templates
//!
//! The framework is configuration. The built-in default is Entman's framing
//! theory with its four functions; a TOML file can replace it:
//!
//! ```toml
//! name = "Entman's Framing Theory"
//! description = "..."
//! coding_prompt = "... {article_title} ... {article_content} ..."   # optional
//! decision_context = "..."                                         # optional
//!
//! [[functions]]
//! label = "PROBLEM_DEFINITION"
//! description = "How the issue is framed as a problem"
//! ```

use crate::error::{CodebookError, CodebookResult};
use crate::types::{Candidate, Code, Function};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;

const TITLE_PLACEHOLDER: &str = "{article_title}";
const CONTENT_PLACEHOLDER: &str = "{article_content}";

/// Quotes shown per code in the tie-break prompt
const DECISION_PROMPT_MAX_QUOTES: usize = 10;

/// One analytical function of the framework
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// Research framework loaded from TOML or built in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchFramework {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub functions: Vec<FunctionDef>,
    /// Coding prompt template with `{article_title}` / `{article_content}`
    #[serde(default)]
    pub coding_prompt: Option<String>,
    /// System context for tie-break decisions
    #[serde(default)]
    pub decision_context: Option<String>,
}

impl ResearchFramework {
    /// Entman's framing theory (four framing functions)
    pub fn entman() -> Self {
        let functions = [
            ("PROBLEM_DEFINITION", "How the issue is framed as a problem"),
            ("CAUSAL_ATTRIBUTION", "What or who is identified as the cause"),
            ("MORAL_EVALUATION", "Value judgments made about the issue"),
            ("TREATMENT_ADVOCACY", "What solutions or actions are promoted"),
        ]
        .into_iter()
        .map(|(label, description)| FunctionDef {
            label: label.to_string(),
            description: description.to_string(),
        })
        .collect();

        Self {
            name: "Entman's Framing Theory".to_string(),
            description: "Frames select aspects of a perceived reality and make them salient \
                          to promote a problem definition, causal interpretation, moral \
                          evaluation and treatment recommendation."
                .to_string(),
            functions,
            coding_prompt: None,
            decision_context: None,
        }
    }

    /// Load a framework from a TOML file
    pub fn from_toml_file(path: &Path) -> CodebookResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            qcb_common::Error::Config(format!(
                "Read framework {} failed: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a framework from TOML text
    pub fn from_toml_str(content: &str) -> CodebookResult<Self> {
        let framework: ResearchFramework =
            toml::from_str(content).map_err(qcb_common::Error::from)?;
        framework.validate()?;
        Ok(framework)
    }

    /// Check the function enumeration and the prompt template
    pub fn validate(&self) -> CodebookResult<()> {
        if self.name.trim().is_empty() {
            return Err(CodebookError::Validation(
                "Framework name must not be empty".to_string(),
            ));
        }
        if self.functions.is_empty() {
            return Err(CodebookError::Validation(
                "Framework must define at least one function".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for function in &self.functions {
            let label = function.label.trim();
            if label.is_empty() {
                return Err(CodebookError::Validation(
                    "Function label must not be empty".to_string(),
                ));
            }
            if label != function.label {
                return Err(CodebookError::Validation(format!(
                    "Function label '{}' has surrounding whitespace",
                    function.label
                )));
            }
            if !seen.insert(label) {
                return Err(CodebookError::Validation(format!(
                    "Duplicate function label '{}'",
                    label
                )));
            }
        }

        if let Some(template) = &self.coding_prompt {
            if !template.contains(CONTENT_PLACEHOLDER) {
                return Err(CodebookError::Validation(format!(
                    "coding_prompt must contain {}",
                    CONTENT_PLACEHOLDER
                )));
            }
        }

        Ok(())
    }

    /// The configured function enumeration
    pub fn function_set(&self) -> FunctionSet {
        FunctionSet {
            labels: self.functions.iter().map(|f| f.label.clone()).collect(),
        }
    }

    /// System context for article coding
    pub fn framework_context(&self) -> String {
        let functions: Vec<String> = self
            .functions
            .iter()
            .map(|f| format!("- {}: {}", f.label, f.description))
            .collect();

        format!(
            "You are analyzing this article using {} with these functions:\n{}\n\n\
             Research Framework: {}\nDescription: {}",
            self.name,
            functions.join("\n"),
            self.name,
            self.description
        )
    }

    /// Coding prompt for one article
    pub fn coding_prompt(&self, title: &str, content: &str) -> String {
        let template = match &self.coding_prompt {
            Some(template) => template.clone(),
            None => self.default_coding_prompt(),
        };
        render_template(&template, title, content)
    }

    fn default_coding_prompt(&self) -> String {
        let functions: Vec<String> = self
            .functions
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{}. {} - {}", i + 1, f.label, f.description))
            .collect();
        let labels: Vec<&str> = self.functions.iter().map(|f| f.label.as_str()).collect();

        format!(
            "You are analyzing text using {} with these {} functions:\n\n{}\n\n\
             Article Title: {}\nArticle Content: {}\n\n\
             Identify codes for each function with supporting quotes taken verbatim from the \
             article. Respond with JSON:\n\n\
             {{\"codes\": [{{\"name\": \"Code name\", \"function\": \"{}\", \
             \"evidence\": [\"quote 1\", \"quote 2\"], \"explanation\": \"Brief explanation\"}}]}}",
            self.name,
            self.functions.len(),
            functions.join("\n"),
            TITLE_PLACEHOLDER,
            CONTENT_PLACEHOLDER,
            labels.join("|")
        )
    }

    /// JSON schema for the coding response (root object with a `codes` array)
    pub fn response_schema(&self) -> Value {
        let labels: Vec<&str> = self.functions.iter().map(|f| f.label.as_str()).collect();
        json!({
            "type": "object",
            "properties": {
                "codes": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "function": {"type": "string", "enum": labels},
                            "evidence": {"type": "array", "items": {"type": "string"}},
                            "explanation": {"type": "string"}
                        },
                        "required": ["name", "function", "evidence", "explanation"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["codes"],
            "additionalProperties": false
        })
    }

    /// System context for tie-break decisions
    pub fn decision_context(&self) -> String {
        if let Some(context) = &self.decision_context {
            return context.clone();
        }

        "You are an expert qualitative researcher comparing pairs of codes in a codebook.\n\n\
         You distinguish conceptual similarity from superficial word overlap, weigh evidence \
         quality and uniqueness across sources, and keep clear boundaries between distinct \
         phenomena so the codebook stays free of redundancy.\n\n\
         Operations available:\n\
         - MERGE: the codes describe the same concept; optionally propose a better name\n\
         - UPDATE: the existing code should absorb the evidence and be renamed or reclassified\n\
         - CREATE_NEW: the codes describe distinct concepts worth keeping separate\n\
         - NO_ACTION: the existing code already covers the candidate"
            .to_string()
    }

    /// Tie-break prompt comparing a committed code with a candidate
    pub fn decision_prompt(&self, existing: &Code, candidate: &Candidate) -> String {
        let existing_quotes: Vec<&str> = existing
            .evidence
            .iter()
            .take(DECISION_PROMPT_MAX_QUOTES)
            .map(|e| e.quote.as_str())
            .collect();
        let candidate_quotes: Vec<&str> = candidate
            .evidence
            .iter()
            .take(DECISION_PROMPT_MAX_QUOTES)
            .map(|e| e.quote.as_str())
            .collect();
        let labels: Vec<&str> = self.functions.iter().map(|f| f.label.as_str()).collect();

        format!(
            "EXISTING CODE:\n- Name: {}\n- Function: {}\n- Evidence: {}\n- Created: {}\n\n\
             CANDIDATE CODE:\n- Name: {}\n- Function: {}\n- Evidence: {}\n\n\
             The two codes are semantically similar but classified under different functions. \
             Decide the best operation:\n\n\
             1. MERGE - same concept; fold the candidate's evidence into the existing code\n\
             2. UPDATE - same concept, but the existing code needs a new name and/or function\n\
             3. CREATE_NEW - distinct concepts worth keeping separate\n\
             4. NO_ACTION - the existing code already covers this adequately\n\n\
             Respond with ONLY valid JSON:\n\
             {{\"operation\": \"MERGE|UPDATE|CREATE_NEW|NO_ACTION\", \"confidence\": 0.0-1.0, \
             \"reasoning\": \"Brief explanation\", \"new_name\": \"optional new name\", \
             \"function\": \"optional, one of {}\"}}",
            existing.name,
            existing.function,
            quote_list(&existing_quotes),
            existing.created_at.to_rfc3339(),
            candidate.name,
            candidate.function,
            quote_list(&candidate_quotes),
            labels.join("|")
        )
    }

    /// JSON schema for the tie-break response
    pub fn decision_schema(&self) -> Value {
        let labels: Vec<&str> = self.functions.iter().map(|f| f.label.as_str()).collect();
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["MERGE", "UPDATE", "CREATE_NEW", "NO_ACTION"]
                },
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "reasoning": {"type": "string"},
                "new_name": {"type": "string"},
                "function": {"type": "string", "enum": labels}
            },
            "required": ["operation", "confidence", "reasoning"]
        })
    }
}

impl Default for ResearchFramework {
    fn default() -> Self {
        Self::entman()
    }
}

fn quote_list(quotes: &[&str]) -> String {
    if quotes.is_empty() {
        return "(none)".to_string();
    }
    quotes
        .iter()
        .map(|q| format!("\"{}\"", q))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Substitute placeholders without re-scanning substituted text
fn render_template(template: &str, title: &str, content: &str) -> String {
    template
        .split(CONTENT_PLACEHOLDER)
        .map(|part| part.replace(TITLE_PLACEHOLDER, title))
        .collect::<Vec<_>>()
        .join(content)
}

/// Validated function enumeration
///
/// The only producer of [`Function`] values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSet {
    labels: Vec<String>,
}

impl FunctionSet {
    /// Validate a label (exact match after trimming; no case coercion)
    pub fn parse(&self, label: &str) -> CodebookResult<Function> {
        let label = label.trim();
        if self.labels.iter().any(|l| l == label) {
            Ok(Function::from_validated(label))
        } else {
            Err(CodebookError::Validation(format!(
                "Function '{}' is not one of [{}]",
                label,
                self.labels.join(", ")
            )))
        }
    }

    pub fn contains(&self, function: &Function) -> bool {
        self.labels.iter().any(|l| l == function.as_str())
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}
