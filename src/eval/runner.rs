use std::time::Instant;

use tracing::info;

use super::evaluator::evaluate;
use super::types::{EvalResult, TestCase};
use crate::backends::ModelBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Repetitions per case.
    pub runs: usize,
    pub warmup: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            runs: 1,
            warmup: true,
        }
    }
}

/// Evaluates every case `runs` times, sequentially, in case order.
pub async fn run_evaluation(
    backend: &dyn ModelBackend,
    cases: &[TestCase],
    options: RunOptions,
) -> Vec<EvalResult> {
    let runs = options.runs.max(1);
    info!(
        backend = backend.name(),
        model = backend.model_id(),
        cases = cases.len(),
        runs,
        "starting evaluation"
    );

    if options.warmup {
        backend.warmup().await;
    }

    let started = Instant::now();
    let mut results = Vec::with_capacity(cases.len() * runs);
    for case in cases {
        for _ in 0..runs {
            results.push(evaluate(case, backend).await);
        }
    }

    let passed = results.iter().filter(|r| r.passed()).count();
    info!(
        backend = backend.name(),
        model = backend.model_id(),
        total = results.len(),
        passed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "evaluation finished"
    );
    results
}
