//! Argument comparison under the three match levels.

use serde_json::{Map, Value};
use tracing::debug;

use super::types::{ArgumentMatch, FieldMatch, MatchLevel};

/// Minimum token-sort ratio (0-100) for a fuzzy string field to pass.
pub const FUZZY_STRING_THRESHOLD: f64 = 80.0;

/// Compares every key of `expected` against `actual` under `level`.
///
/// Keys only present in `actual` are ignored. An empty `expected` mapping
/// passes trivially, which lets a case assert "tool called, arguments
/// unconstrained".
pub fn match_arguments(
    expected: &Map<String, Value>,
    actual: &Map<String, Value>,
    level: MatchLevel,
) -> ArgumentMatch {
    let fields = expected
        .iter()
        .map(|(key, exp)| match actual.get(key) {
            Some(act) => match_field(key, exp, act, level),
            None => FieldMatch {
                key: key.clone(),
                passed: false,
                score: 0.0,
                rationale: "missing from actual arguments".to_string(),
            },
        })
        .collect::<Vec<_>>();

    let passed = fields.iter().all(|f| f.passed);
    let score = match level {
        MatchLevel::Fuzzy if !fields.is_empty() => {
            fields.iter().map(|f| f.score).sum::<f64>() / fields.len() as f64
        }
        _ if passed => 1.0,
        _ => 0.0,
    };

    ArgumentMatch {
        passed,
        score,
        fields,
    }
}

fn match_field(key: &str, expected: &Value, actual: &Value, level: MatchLevel) -> FieldMatch {
    let (passed, score, rationale) = match level {
        MatchLevel::Exact => {
            let eq = values_equal(expected, actual);
            (eq, bool_score(eq), equality_rationale(eq, expected, actual))
        }
        MatchLevel::TypeOnly => {
            let same = json_kind(expected) == json_kind(actual);
            let rationale = if same {
                format!("both {}", json_kind(expected))
            } else {
                format!(
                    "expected {} but got {}",
                    json_kind(expected),
                    json_kind(actual)
                )
            };
            (same, bool_score(same), rationale)
        }
        MatchLevel::Fuzzy => fuzzy_field(key, expected, actual),
    };

    FieldMatch {
        key: key.to_string(),
        passed,
        score,
        rationale,
    }
}

fn fuzzy_field(key: &str, expected: &Value, actual: &Value) -> (bool, f64, String) {
    match (expected, actual) {
        (Value::String(exp), Value::String(act)) => {
            let ratio = token_sort_ratio(exp, act);
            let passed = ratio >= FUZZY_STRING_THRESHOLD;
            (
                passed,
                ratio / 100.0,
                format!("token-sort ratio {ratio:.1} (threshold {FUZZY_STRING_THRESHOLD:.0})"),
            )
        }
        (Value::String(_), _) => (
            false,
            0.0,
            format!("expected string but got {}", json_kind(actual)),
        ),
        (Value::Array(_) | Value::Object(_), _) => {
            debug!(
                field = key,
                kind = json_kind(expected),
                "fuzzy match cannot compare nested values, using structural equality"
            );
            let eq = values_equal(expected, actual);
            (
                eq,
                bool_score(eq),
                format!(
                    "structural equality fallback: {}",
                    equality_rationale(eq, expected, actual)
                ),
            )
        }
        _ => {
            let eq = values_equal(expected, actual);
            (eq, bool_score(eq), equality_rationale(eq, expected, actual))
        }
    }
}

fn bool_score(passed: bool) -> f64 {
    if passed { 1.0 } else { 0.0 }
}

fn equality_rationale(eq: bool, expected: &Value, actual: &Value) -> String {
    if eq {
        "equal".to_string()
    } else {
        format!("expected {expected} but got {actual}")
    }
}

/// Canonical JSON equality: numbers by value (`50 == 50.0`), strings
/// byte-for-byte, arrays element-wise, objects by key set.
pub fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
                return x == y;
            }
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => expected == actual,
    }
}

pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Order-independent string similarity on a 0-100 scale.
///
/// Both inputs are lowercased, split on whitespace, sorted and re-joined;
/// the joined strings are then scored with the indel ratio
/// `200 * lcs / (len_a + len_b)`.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let left = sorted_tokens(a);
    let right = sorted_tokens(b);
    indel_ratio(&left, &right)
}

fn sorted_tokens(text: &str) -> Vec<char> {
    let lower = text.to_lowercase();
    let mut tokens = lower.split_whitespace().collect::<Vec<_>>();
    tokens.sort_unstable();
    tokens.join(" ").chars().collect()
}

fn indel_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * lcs_len(a, b) as f64 / total as f64
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
