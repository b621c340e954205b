use minijinja::context;
use serde::Serialize;

use super::{FailureRow, RunReport, env, failure_rows};
use crate::error::EvalError;
use crate::eval::aggregate::{Metrics, SuiteSummary};

#[derive(Serialize)]
struct HtmlRun<'a> {
    label: String,
    generated_at: &'a str,
    suite_hash: &'a str,
    overall: &'a Metrics,
    categories: &'a [SuiteSummary],
    failures: Vec<FailureRow>,
}

/// Self-contained HTML page for one or more runs.
pub fn html_report(reports: &[RunReport]) -> Result<String, EvalError> {
    let runs = reports
        .iter()
        .map(|report| HtmlRun {
            label: report.label(),
            generated_at: &report.generated_at,
            suite_hash: &report.suite_hash,
            overall: &report.summary.overall,
            categories: &report.summary.categories,
            failures: failure_rows(&report.summary),
        })
        .collect::<Vec<_>>();

    let tmpl = env()?.get_template("report.html.j2")?;
    Ok(tmpl.render(context! { runs => runs })?)
}
