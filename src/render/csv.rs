//! One CSV row per evaluation result.

use crate::eval::types::EvalResult;

const HEADER: [&str; 16] = [
    "id",
    "category",
    "verdict",
    "latency_ms",
    "backend",
    "model",
    "match_level",
    "tool_name_correct",
    "argument_accuracy",
    "missing",
    "extra",
    "tokens_per_sec",
    "error",
    "prompt_tokens",
    "completion_tokens",
    "unexpected_args",
];

pub fn results_csv<'a>(results: impl IntoIterator<Item = &'a EvalResult>) -> String {
    let mut out = String::new();
    push_row(&mut out, HEADER.iter().map(|h| h.to_string()));
    for result in results {
        push_row(
            &mut out,
            [
                result.test_case_id.clone(),
                result.category.clone(),
                result.verdict.label().to_string(),
                format!("{:.1}", result.latency_ms),
                result.backend.clone(),
                result.model_id.clone(),
                result.match_level.to_string(),
                result.tool_name_correct().to_string(),
                format!("{:.3}", result.argument_accuracy()),
                result.missing_calls.len().to_string(),
                result.extra_calls.len().to_string(),
                format!("{:.1}", result.tokens_per_sec),
                result.error.clone().unwrap_or_default(),
                result.prompt_tokens.to_string(),
                result.completion_tokens.to_string(),
                result.unexpected_argument_count().to_string(),
            ],
        );
    }
    out
}

fn push_row(out: &mut String, fields: impl IntoIterator<Item = String>) {
    for (idx, field) in fields.into_iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(&escape(&field));
    }
    out.push_str("\r\n");
}

fn escape(field: &str) -> String {
    if !field.contains([',', '"', '\n', '\r']) {
        return field.to_string();
    }
    format!("\"{}\"", field.replace('"', "\"\""))
}
