//! Folding evaluation results into per-category, per-tag and run-level
//! statistics. Everything here is a pure function of its input slice.

use std::collections::BTreeMap;

use serde::Serialize;

use super::types::EvalResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub mean_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
}

/// Counts and rates shared by every summary level.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub pass_rate: f64,
    pub tool_selection_rate: f64,
    /// Mean argument accuracy over results without a backend error.
    pub argument_accuracy: f64,
    pub latency: LatencyStats,
    pub avg_tokens_per_sec: f64,
}

/// All results of one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteSummary {
    pub category: String,
    #[serde(flatten)]
    pub metrics: Metrics,
    pub results: Vec<EvalResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagSummary {
    pub tag: String,
    #[serde(flatten)]
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub backend: String,
    pub model_id: String,
    pub overall: Metrics,
    pub categories: Vec<SuiteSummary>,
    pub tags: Vec<TagSummary>,
}

impl RunSummary {
    /// Every result, grouped by category in category order.
    pub fn results(&self) -> impl Iterator<Item = &EvalResult> {
        self.categories.iter().flat_map(|suite| suite.results.iter())
    }

    pub fn failures(&self) -> impl Iterator<Item = &EvalResult> {
        self.results().filter(|r| !r.passed())
    }
}

pub fn aggregate(results: &[EvalResult]) -> RunSummary {
    let (backend, model_id) = results
        .first()
        .map(|r| (r.backend.clone(), r.model_id.clone()))
        .unwrap_or_default();

    let mut by_category: BTreeMap<&str, Vec<&EvalResult>> = BTreeMap::new();
    let mut by_tag: BTreeMap<&str, Vec<&EvalResult>> = BTreeMap::new();
    for result in results {
        by_category.entry(result.category.as_str()).or_default().push(result);
        for tag in &result.tags {
            by_tag.entry(tag.as_str()).or_default().push(result);
        }
    }

    let categories = by_category
        .into_iter()
        .map(|(category, group)| SuiteSummary {
            category: category.to_string(),
            metrics: metrics(&group),
            results: group.into_iter().cloned().collect(),
        })
        .collect();
    let tags = by_tag
        .into_iter()
        .map(|(tag, group)| TagSummary {
            tag: tag.to_string(),
            metrics: metrics(&group),
        })
        .collect();

    RunSummary {
        backend,
        model_id,
        overall: metrics(&results.iter().collect::<Vec<_>>()),
        categories,
        tags,
    }
}

/// Results carrying `tag`, in their original order.
pub fn filter_by_tag(results: &[EvalResult], tag: &str) -> Vec<EvalResult> {
    results
        .iter()
        .filter(|r| r.tags.iter().any(|t| t == tag))
        .cloned()
        .collect()
}

fn metrics(results: &[&EvalResult]) -> Metrics {
    let total = results.len();
    let passed = results.iter().filter(|r| r.passed()).count();
    let errors = results.iter().filter(|r| r.is_error()).count();
    let tool_ok = results.iter().filter(|r| r.tool_name_correct()).count();

    let accuracies = results
        .iter()
        .filter(|r| !r.is_error())
        .map(|r| r.argument_accuracy())
        .collect::<Vec<_>>();
    let latencies = results
        .iter()
        .map(|r| r.latency_ms)
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .collect::<Vec<_>>();
    let throughput = results
        .iter()
        .map(|r| r.tokens_per_sec)
        .filter(|tps| tps.is_finite() && *tps > 0.0)
        .collect::<Vec<_>>();

    Metrics {
        total,
        passed,
        failed: total - passed,
        errors,
        pass_rate: ratio(passed, total),
        tool_selection_rate: ratio(tool_ok, total),
        argument_accuracy: mean(&accuracies).unwrap_or(0.0),
        latency: latency_stats(&latencies),
        avg_tokens_per_sec: mean(&throughput).unwrap_or(0.0),
    }
}

fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 / total as f64
}

fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

fn latency_stats(samples: &[f64]) -> LatencyStats {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    LatencyStats {
        mean_ms: mean(samples),
        p50_ms: percentile(&sorted, 50.0),
        p95_ms: percentile(&sorted, 95.0),
    }
}

/// Nearest-rank percentile over an already sorted slice.
fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::types::{MatchLevel, ToolCallSpec, Verdict};
    use serde_json::{Value, json};

    fn result(id: &str, category: &str, tags: &[&str], passed: bool, latency_ms: f64) -> EvalResult {
        EvalResult {
            test_case_id: id.to_string(),
            category: category.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
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
            latency_ms,
            tokens_per_sec: 20.0,
            prompt_tokens: 50,
            completion_tokens: 10,
            raw_model_output: Value::Null,
            error: None,
        }
    }

    fn sample() -> Vec<EvalResult> {
        vec![
            result("simple_01", "simple", &["weather"], true, 100.0),
            result("parallel_01", "parallel", &["weather", "parallel"], true, 300.0),
            result("simple_02", "simple", &[], false, 200.0),
            result("parallel_02", "parallel", &["parallel"], false, 400.0),
        ]
    }

    #[test]
    fn groups_by_category_sorted() {
        let summary = aggregate(&sample());

        let names = summary
            .categories
            .iter()
            .map(|c| c.category.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["parallel", "simple"]);
        assert_eq!(summary.categories[1].metrics.total, 2);
        assert_eq!(summary.categories[1].metrics.passed, 1);
        assert_eq!(summary.categories[1].results[0].test_case_id, "simple_01");
        assert_eq!(summary.overall.total, 4);
        assert_eq!(summary.overall.pass_rate, 0.5);
        assert_eq!(summary.backend, "ollama");
    }

    #[test]
    fn groups_by_tag_sorted() {
        let summary = aggregate(&sample());

        let tags = summary.tags.iter().map(|t| t.tag.as_str()).collect::<Vec<_>>();
        assert_eq!(tags, vec!["parallel", "weather"]);
        assert_eq!(summary.tags[0].metrics.total, 2);
        assert_eq!(summary.tags[0].metrics.pass_rate, 0.5);
        assert_eq!(summary.tags[1].metrics.pass_rate, 1.0);
    }

    #[test]
    fn latency_percentiles_use_nearest_rank() {
        let summary = aggregate(&sample());

        assert_eq!(summary.overall.latency.mean_ms, Some(250.0));
        assert_eq!(summary.overall.latency.p50_ms, Some(200.0));
        assert_eq!(summary.overall.latency.p95_ms, Some(400.0));
    }

    #[test]
    fn empty_input_yields_zero_rates() {
        let summary = aggregate(&[]);

        assert_eq!(summary.overall.total, 0);
        assert_eq!(summary.overall.pass_rate, 0.0);
        assert_eq!(summary.overall.latency, LatencyStats::default());
        assert!(summary.categories.is_empty());
        assert!(summary.tags.is_empty());
    }

    #[test]
    fn errored_results_are_counted_but_excluded_from_accuracy() {
        let mut errored = result("simple_03", "simple", &[], false, 0.0);
        errored.error = Some("ollama is not reachable".to_string());
        let results = vec![result("simple_01", "simple", &[], true, 100.0), errored];

        let summary = aggregate(&results);

        assert_eq!(summary.overall.errors, 1);
        assert_eq!(summary.overall.argument_accuracy, 1.0);
        assert_eq!(summary.overall.tool_selection_rate, 0.5);
        assert_eq!(summary.overall.latency.p95_ms, Some(100.0));
    }

    #[test]
    fn aggregate_is_idempotent_and_does_not_mutate_input() {
        let results = sample();
        let before = results.clone();

        let first = aggregate(&results);
        let second = aggregate(&results);

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(results, before);
    }

    #[test]
    fn filtered_subset_reaggregates() {
        let parallel = filter_by_tag(&sample(), "parallel");
        let summary = aggregate(&parallel);

        assert_eq!(summary.overall.total, 2);
        assert_eq!(summary.overall.passed, 1);
        assert_eq!(summary.categories.len(), 1);
        assert_eq!(summary.failures().count(), 1);
    }
}
