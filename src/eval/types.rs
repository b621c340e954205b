//! Data model shared by the matcher, resolver, evaluator and aggregator.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How strictly expected and actual argument values are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLevel {
    Exact,
    #[default]
    Fuzzy,
    TypeOnly,
}

impl MatchLevel {
    pub fn label(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::TypeOnly => "type_only",
        }
    }
}

impl fmt::Display for MatchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn from_passed(passed: bool) -> Self {
        if passed { Self::Pass } else { Self::Fail }
    }

    pub fn is_pass(self) -> bool {
        self == Self::Pass
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

/// A tool invocation, either expected by a test case or emitted by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSpec {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallSpec {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Compact `name({"k":"v"})` rendering for diagnostics.
    pub fn signature(&self) -> String {
        let args = serde_json::to_string(&self.arguments).unwrap_or_else(|_| "{}".to_string());
        format!("{}({args})", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One chat turn. Fields other than `role` and `content` (for example
/// `tool_calls` or `tool_call_id` in multi-turn cases) are passed through
/// to the backend untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            extra: Map::new(),
        }
    }
}

/// A tool the model may call. Accepts both the OpenAI wrapped shape
/// (`{"type": "function", "function": {...}}`) and the flat shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ToolDeclarationShape")]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Deserialize)]
struct FlatToolDeclaration {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "empty_object_schema")]
    parameters: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ToolDeclarationShape {
    Wrapped { function: FlatToolDeclaration },
    Flat(FlatToolDeclaration),
}

impl From<ToolDeclarationShape> for ToolDeclaration {
    fn from(shape: ToolDeclarationShape) -> Self {
        let flat = match shape {
            ToolDeclarationShape::Wrapped { function } => function,
            ToolDeclarationShape::Flat(flat) => flat,
        };
        Self {
            name: flat.name,
            description: flat.description,
            parameters: flat.parameters,
        }
    }
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    pub fn to_openai(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

fn default_category() -> String {
    "uncategorized".to_string()
}

/// One declarative evaluation case, read-only for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
    #[serde(default)]
    pub expected_tool_calls: Vec<ToolCallSpec>,
    #[serde(default)]
    pub match_level: MatchLevel,
    #[serde(default)]
    pub is_negative: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TestCase {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Per-field outcome of an argument comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub key: String,
    pub passed: bool,
    pub score: f64,
    pub rationale: String,
}

/// Outcome of comparing one expected argument mapping to one actual mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentMatch {
    pub passed: bool,
    pub score: f64,
    pub fields: Vec<FieldMatch>,
}

/// One expected call paired with the actual call chosen for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMatchResult {
    pub expected: ToolCallSpec,
    pub actual: ToolCallSpec,
    pub name_matched: bool,
    pub argument_score: f64,
    pub passed: bool,
    pub fields: Vec<FieldMatch>,
    /// Argument keys the model supplied that the expectation does not mention.
    #[serde(default)]
    pub unexpected_arguments: Vec<String>,
}

/// The frozen outcome of one test case execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub test_case_id: String,
    pub category: String,
    pub tags: Vec<String>,
    pub backend: String,
    pub model_id: String,
    pub match_level: MatchLevel,
    pub is_negative: bool,
    pub verdict: Verdict,
    pub matched_calls: Vec<CallMatchResult>,
    pub missing_calls: Vec<ToolCallSpec>,
    pub extra_calls: Vec<ToolCallSpec>,
    pub latency_ms: f64,
    pub tokens_per_sec: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub raw_model_output: Value,
    pub error: Option<String>,
}

impl EvalResult {
    pub fn passed(&self) -> bool {
        self.verdict.is_pass()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether the model picked the right tools (or correctly refused).
    pub fn tool_name_correct(&self) -> bool {
        if self.is_error() {
            return false;
        }
        if self.is_negative {
            return self.extra_calls.is_empty();
        }
        self.missing_calls.is_empty()
    }

    /// Fraction of expected argument fields that matched, counting every
    /// field of a missing call as a miss.
    pub fn argument_accuracy(&self) -> f64 {
        let mut total = 0usize;
        let mut hits = 0usize;
        for pair in &self.matched_calls {
            total += pair.fields.len();
            hits += pair.fields.iter().filter(|f| f.passed).count();
        }
        for call in &self.missing_calls {
            total += call.arguments.len();
        }

        if total == 0 {
            return if self.tool_name_correct() { 1.0 } else { 0.0 };
        }
        hits as f64 / total as f64
    }

    /// Total argument keys the model supplied beyond what was expected.
    pub fn unexpected_argument_count(&self) -> usize {
        self.matched_calls
            .iter()
            .map(|pair| pair.unexpected_arguments.len())
            .sum()
    }

    /// One line per paired call carrying unexpected argument keys. These
    /// never affect the verdict.
    pub fn unexpected_argument_notes(&self) -> Vec<String> {
        self.matched_calls
            .iter()
            .filter(|pair| !pair.unexpected_arguments.is_empty())
            .map(|pair| {
                format!(
                    "unexpected arguments in {}: {}",
                    pair.actual.name,
                    pair.unexpected_arguments.join(", ")
                )
            })
            .collect()
    }

    /// Human-readable reasons this case failed, empty for a pass.
    pub fn failure_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if let Some(error) = &self.error {
            reasons.push(format!("backend error: {error}"));
            return reasons;
        }
        for call in &self.missing_calls {
            reasons.push(format!("missing call {}", call.signature()));
        }
        for call in &self.extra_calls {
            if self.is_negative {
                reasons.push(format!("expected no tool call, got {}", call.signature()));
            } else {
                reasons.push(format!("extra call {}", call.signature()));
            }
        }
        for pair in self.matched_calls.iter().filter(|pair| !pair.passed) {
            for field in pair.fields.iter().filter(|f| !f.passed) {
                reasons.push(format!(
                    "{}.{}: {}",
                    pair.expected.name, field.key, field.rationale
                ));
            }
        }
        reasons
    }
}
