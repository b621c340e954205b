use anyhow::Context;
use tracing::warn;

use super::{RunArgs, now_rfc3339, write_output};
use crate::backends::{BackendConfig, BackendRegistry};
use crate::eval::aggregate::aggregate;
use crate::eval::runner::{RunOptions, run_evaluation};
use crate::render::{self, RunReport};
use crate::suites::{SuiteCatalog, suite_hash};

pub(super) async fn run_command(
    registry: &BackendRegistry,
    args: RunArgs,
    json_output: bool,
) -> anyhow::Result<String> {
    let config = BackendConfig::new(&args.model)
        .with_base_url(args.base_url.clone())
        .with_api_key(args.api_key.clone())
        .with_timeout_secs(args.timeout_secs);
    let backend = registry.create(&args.backend, config)?;

    let catalog = SuiteCatalog::new(args.suites_dir.clone());
    let loaded = catalog
        .load_suites(&args.suites)
        .context("failed to load test suites")?;
    let mut cases = loaded.cases;
    if let Some(tag) = args.tag.as_deref() {
        cases.retain(|case| case.has_tag(tag));
    }
    if cases.is_empty() {
        anyhow::bail!(
            "No test cases to run (suites: {}, tag: {}).",
            if args.suites.is_empty() {
                "all".to_string()
            } else {
                args.suites.join(", ")
            },
            args.tag.as_deref().unwrap_or("any")
        );
    }

    if !backend.health_check().await {
        anyhow::bail!(
            "Backend '{}' is not reachable. Check that the server is running, or pass --base-url.",
            args.backend
        );
    }

    let results = run_evaluation(
        backend.as_ref(),
        &cases,
        RunOptions {
            runs: args.runs,
            warmup: !args.no_warmup,
        },
    )
    .await;
    let report = RunReport::new(aggregate(&results), suite_hash(&cases), now_rfc3339()?);

    let mut notes = String::new();
    if let Some(path) = &args.csv {
        write_output(path, &render::csv::results_csv(&results), "CSV results")?;
        notes.push_str(&format!("\nCSV written to {}\n", path.to_string_lossy()));
    }
    if let Some(path) = &args.html {
        let html = render::html::html_report(std::slice::from_ref(&report))?;
        write_output(path, &html, "HTML report")?;
        notes.push_str(&format!("\nHTML report written to {}\n", path.to_string_lossy()));
    }
    if !loaded.rejected.is_empty() {
        warn!(count = loaded.rejected.len(), "some test cases were skipped as invalid");
    }

    if json_output {
        return Ok(render::json::to_pretty(&report)?);
    }

    let mut out = render::markdown::summary_markdown(&report, !args.no_failures)?;
    out.push_str(&render::markdown::rejected_markdown(&loaded.rejected));
    out.push_str(&notes);
    Ok(out)
}
