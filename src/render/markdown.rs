use std::collections::BTreeSet;

use minijinja::context;
use serde::Serialize;

use super::{RunReport, env, failure_rows};
use crate::error::EvalError;
use crate::eval::aggregate::Metrics;
use crate::suites::SuiteInfo;

#[derive(Serialize)]
struct ComparisonRow<'a> {
    label: String,
    overall: &'a Metrics,
}

#[derive(Serialize)]
struct CategoryRow {
    name: String,
    cells: Vec<String>,
}

pub fn summary_markdown(report: &RunReport, show_failures: bool) -> Result<String, EvalError> {
    let summary = &report.summary;
    let tmpl = env()?.get_template("summary.md.j2")?;
    let body = tmpl.render(context! {
        backend => report.backend,
        model_id => report.model_id,
        overall => summary.overall,
        categories => summary.categories,
        tags => summary.tags,
        show_failures => show_failures,
        failures => failure_rows(summary),
    })?;
    Ok(body)
}

pub fn comparison_markdown(reports: &[RunReport]) -> Result<String, EvalError> {
    let rows = reports
        .iter()
        .map(|report| ComparisonRow {
            label: report.label(),
            overall: &report.summary.overall,
        })
        .collect::<Vec<_>>();

    let names = reports
        .iter()
        .flat_map(|report| report.summary.categories.iter().map(|c| c.category.as_str()))
        .collect::<BTreeSet<_>>();
    let categories = names
        .into_iter()
        .map(|name| CategoryRow {
            name: name.to_string(),
            cells: reports
                .iter()
                .map(|report| {
                    report
                        .summary
                        .categories
                        .iter()
                        .find(|c| c.category == name)
                        .map(|c| format!("{:.1}%", c.metrics.pass_rate * 100.0))
                        .unwrap_or_else(|| "-".to_string())
                })
                .collect(),
        })
        .collect::<Vec<_>>();

    let tmpl = env()?.get_template("comparison.md.j2")?;
    Ok(tmpl.render(context! {
        rows => rows,
        categories => categories,
    })?)
}

pub fn suites_markdown(suites: &[SuiteInfo]) -> String {
    let mut out = String::new();
    out.push_str("# Test suites\n\n");
    out.push_str("| Suite | Cases | Rejected |\n");
    out.push_str("|-------|-------|----------|\n");
    for suite in suites {
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            suite.name, suite.cases, suite.rejected
        ));
    }
    out
}

pub fn rejected_markdown(rejected: &[EvalError]) -> String {
    if rejected.is_empty() {
        return String::new();
    }
    let mut out = format!("\n## Skipped invalid cases ({})\n\n", rejected.len());
    for err in rejected {
        out.push_str(&format!("- {err}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::aggregate::aggregate;
    use crate::eval::types::{CallMatchResult, EvalResult, FieldMatch, MatchLevel, ToolCallSpec, Verdict};
    use serde_json::{Value, json};

    fn result(id: &str, category: &str, passed: bool) -> EvalResult {
        EvalResult {
            test_case_id: id.to_string(),
            category: category.to_string(),
            tags: vec!["weather".to_string()],
            backend: "ollama".to_string(),
            model_id: "llama3.1".to_string(),
            match_level: MatchLevel::Fuzzy,
            is_negative: false,
            verdict: Verdict::from_passed(passed),
            matched_calls: Vec::new(),
            missing_calls: if passed {
                Vec::new()
            } else {
                vec![ToolCallSpec::new("get_weather", json!({"location": "Paris"}))]
            },
            extra_calls: Vec::new(),
            latency_ms: 120.0,
            tokens_per_sec: 25.0,
            prompt_tokens: 60,
            completion_tokens: 8,
            raw_model_output: Value::Null,
            error: None,
        }
    }

    fn report(model: &str, results: &[EvalResult]) -> RunReport {
        let mut summary = aggregate(results);
        summary.model_id = model.to_string();
        RunReport::new(summary, "f".repeat(64), "2026-01-01T00:00:00Z".to_string())
    }

    #[test]
    fn summary_lists_metrics_categories_and_failures() {
        let report = report(
            "llama3.1",
            &[result("simple_weather_01", "simple", true), result("parallel_weather_01", "parallel", false)],
        );

        let md = summary_markdown(&report, true).expect("markdown");

        assert!(md.contains("# Tool-call evaluation: ollama / llama3.1"));
        assert!(md.contains("| Pass rate | 50.0% |"));
        assert!(md.contains("| parallel | 1 | 0 | 0.0% |"));
        assert!(md.contains("| weather | 2 | 50.0% |"));
        assert!(md.contains("### parallel_weather_01 (parallel, fuzzy)"));
        assert!(md.contains(r#"- missing call get_weather({"location":"Paris"})"#));
    }

    #[test]
    fn failure_details_note_unexpected_arguments() {
        let mut failed = result("simple_weather_02", "simple", false);
        failed.missing_calls.clear();
        failed.matched_calls = vec![CallMatchResult {
            expected: ToolCallSpec::new("get_weather", json!({"location": "Berlin"})),
            actual: ToolCallSpec::new(
                "get_weather",
                json!({"location": "Bern", "unit": "celsius", "days": 1}),
            ),
            name_matched: true,
            argument_score: 0.0,
            passed: false,
            fields: vec![FieldMatch {
                key: "location".to_string(),
                passed: false,
                score: 0.6,
                rationale: "similarity 60 below 80".to_string(),
            }],
            unexpected_arguments: vec!["days".to_string(), "unit".to_string()],
        }];
        let report = report("llama3.1", &[failed]);

        let md = summary_markdown(&report, true).expect("markdown");

        assert!(md.contains("- get_weather.location: similarity 60 below 80"), "{md}");
        assert!(md.contains("- note: unexpected arguments in get_weather: days, unit"), "{md}");
    }

    #[test]
    fn summary_can_hide_failures() {
        let report = report("llama3.1", &[result("simple_weather_01", "simple", false)]);
        let md = summary_markdown(&report, false).expect("markdown");
        assert!(!md.contains("## Failures"));
    }

    #[test]
    fn comparison_has_one_row_per_run_and_category_columns() {
        let a = report("llama3.1", &[result("s1", "simple", true)]);
        let b = report("qwen2.5:7b", &[result("s1", "simple", false), result("p1", "parallel", true)]);

        let md = comparison_markdown(&[a, b]).expect("markdown");

        assert!(md.contains("| ollama/llama3.1 | 1 | 100.0% |"));
        assert!(md.contains("| ollama/qwen2.5:7b | 2 | 50.0% |"));
        assert!(md.contains("| parallel | - | 100.0% |"));
        assert!(md.contains("| simple | 100.0% | 0.0% |"));
    }

    #[test]
    fn rejected_cases_are_listed() {
        let rejected = vec![EvalError::Configuration {
            case_id: "bad_01".to_string(),
            message: "at least one message is required".to_string(),
        }];
        let md = rejected_markdown(&rejected);
        assert!(md.contains("Skipped invalid cases (1)"));
        assert!(md.contains("bad_01"));
        assert!(rejected_markdown(&[]).is_empty());
    }
}
