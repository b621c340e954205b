use std::time::Instant;

use serde_json::{Value, json};
use tracing::{debug, warn};

use super::pairing::resolve;
use super::types::{EvalResult, TestCase, Verdict};
use crate::backends::ModelBackend;

/// Runs one test case against `backend` and scores the outcome.
///
/// The backend is invoked exactly once. Backend failures are folded into a
/// failing result with `error` set, so this never returns an error.
pub async fn evaluate(case: &TestCase, backend: &dyn ModelBackend) -> EvalResult {
    let mut result = EvalResult {
        test_case_id: case.id.clone(),
        category: case.category.clone(),
        tags: case.tags.clone(),
        backend: backend.name().to_string(),
        model_id: backend.model_id().to_string(),
        match_level: case.match_level,
        is_negative: case.is_negative,
        verdict: Verdict::Fail,
        matched_calls: Vec::new(),
        missing_calls: Vec::new(),
        extra_calls: Vec::new(),
        latency_ms: 0.0,
        tokens_per_sec: 0.0,
        prompt_tokens: 0,
        completion_tokens: 0,
        raw_model_output: Value::Null,
        error: None,
    };

    let started = Instant::now();
    let invocation = match backend.invoke(&case.messages, &case.tools).await {
        Ok(invocation) => invocation,
        Err(err) => {
            warn!(case = %case.id, backend = backend.name(), error = %err, "backend request failed");
            result.latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            result.raw_model_output = json!({"error": err.to_string()});
            result.error = Some(err.to_string());
            result.missing_calls = case.expected_tool_calls.clone();
            return result;
        }
    };

    result.latency_ms = invocation.latency_ms;
    result.tokens_per_sec = invocation.tokens_per_sec;
    result.prompt_tokens = invocation.usage.prompt_tokens;
    result.completion_tokens = invocation.usage.completion_tokens;
    result.raw_model_output = invocation.raw;

    if case.is_negative {
        result.verdict = Verdict::from_passed(invocation.calls.is_empty());
        result.extra_calls = invocation.calls;
    } else {
        let pairing = resolve(&case.expected_tool_calls, &invocation.calls, case.match_level);
        result.verdict = Verdict::from_passed(pairing.passed());
        result.matched_calls = pairing.matched;
        result.missing_calls = pairing.missing;
        result.extra_calls = pairing.extra;
    }

    debug!(
        case = %case.id,
        verdict = result.verdict.label(),
        matched = result.matched_calls.len(),
        missing = result.missing_calls.len(),
        extra = result.extra_calls.len(),
        latency_ms = result.latency_ms,
        "case evaluated"
    );
    result
}
