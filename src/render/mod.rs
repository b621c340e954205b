pub mod csv;
pub mod html;
pub mod json;
pub mod markdown;

use std::sync::OnceLock;

use minijinja::{AutoEscape, Environment};
use serde::Serialize;

use crate::error::EvalError;
use crate::eval::aggregate::RunSummary;

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Serializable envelope around one run's summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub schema_version: u32,
    pub generated_at: String,
    pub backend: String,
    pub model_id: String,
    pub suite_hash: String,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn new(summary: RunSummary, suite_hash: String, generated_at: String) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            generated_at,
            backend: summary.backend.clone(),
            model_id: summary.model_id.clone(),
            suite_hash,
            summary,
        }
    }

    /// `backend/model` label used in comparison tables.
    pub fn label(&self) -> String {
        format!("{}/{}", self.backend, self.model_id)
    }
}

/// One failing result, flattened for templates.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct FailureRow {
    pub id: String,
    pub category: String,
    pub match_level: String,
    pub is_error: bool,
    pub reasons: Vec<String>,
    pub notes: Vec<String>,
}

pub(crate) fn failure_rows(summary: &RunSummary) -> Vec<FailureRow> {
    summary
        .failures()
        .map(|result| FailureRow {
            id: result.test_case_id.clone(),
            category: result.category.clone(),
            match_level: result.match_level.to_string(),
            is_error: result.is_error(),
            reasons: result.failure_reasons(),
            notes: result.unexpected_argument_notes(),
        })
        .collect()
}

pub(crate) fn env() -> Result<&'static Environment<'static>, EvalError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_auto_escape_callback(|name| {
        if name.ends_with(".html.j2") {
            AutoEscape::Html
        } else {
            AutoEscape::None
        }
    });
    env.add_filter("pct", |v: f64| -> String { format!("{:.1}%", v * 100.0) });
    env.add_filter("ms", |v: Option<f64>| -> String {
        match v {
            Some(ms) => format!("{ms:.0} ms"),
            None => "-".to_string(),
        }
    });
    env.add_filter("num", |v: f64| -> String { format!("{v:.1}") });
    env.add_filter("cell", |s: String| -> String {
        s.replace('|', "\\|").replace(['\n', '\r'], " ")
    });
    env.add_filter("truncate", |s: String, max_bytes: usize| -> String {
        if s.len() <= max_bytes {
            return s;
        }
        let mut boundary = max_bytes;
        while boundary > 0 && !s.is_char_boundary(boundary) {
            boundary -= 1;
        }
        let mut out = s[..boundary].trim_end().to_string();
        out.push('…');
        out
    });
    env.add_template("summary.md.j2", include_str!("../../templates/summary.md.j2"))?;
    env.add_template(
        "comparison.md.j2",
        include_str!("../../templates/comparison.md.j2"),
    )?;
    env.add_template(
        "report.html.j2",
        include_str!("../../templates/report.html.j2"),
    )?;

    let _ = ENV.set(env);
    Ok(ENV
        .get()
        .expect("ENV should be initialized by the time this is reached"))
}
