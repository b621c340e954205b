use std::path::Path;

use anyhow::Context;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{info, warn};

use super::{CompareArgs, now_rfc3339, write_output};
use crate::backends::{BackendConfig, BackendRegistry, DEFAULT_TIMEOUT_SECS, ModelBackend};
use crate::error::EvalError;
use crate::eval::aggregate::aggregate;
use crate::eval::runner::{RunOptions, run_evaluation};
use crate::eval::types::{EvalResult, TestCase};
use crate::render::{self, RunReport};
use crate::suites::{SuiteCatalog, suite_hash};

/// Contents of a `compare --config` TOML file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompareConfig {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub runs: Vec<RunEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunEntry {
    pub backend: String,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CompareConfig {
    pub fn parse(text: &str) -> Result<Self, EvalError> {
        let config: Self = toml::from_str(text)?;
        if config.runs.is_empty() {
            return Err(EvalError::InvalidArgument(
                "compare config must list at least one [[runs]] entry".into(),
            ));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, EvalError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    fn backend_config(&self, entry: &RunEntry) -> BackendConfig {
        let timeout = entry
            .timeout_secs
            .or(self.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        BackendConfig::new(&entry.model)
            .with_base_url(entry.base_url.clone())
            .with_api_key(entry.api_key.clone())
            .with_timeout_secs(timeout)
    }
}

async fn run_entry(backend: Box<dyn ModelBackend>, cases: &[TestCase]) -> Option<Vec<EvalResult>> {
    if !backend.health_check().await {
        warn!(
            backend = backend.name(),
            model = backend.model_id(),
            "backend not reachable, skipping"
        );
        return None;
    }
    Some(run_evaluation(backend.as_ref(), cases, RunOptions::default()).await)
}

pub(super) async fn compare_command(
    registry: &BackendRegistry,
    args: CompareArgs,
    json_output: bool,
) -> anyhow::Result<String> {
    let config = CompareConfig::load(&args.config).with_context(|| {
        format!(
            "failed to read compare config {}",
            args.config.to_string_lossy()
        )
    })?;

    let catalog = SuiteCatalog::new(args.suites_dir.clone());
    let loaded = catalog
        .load_suites(&args.suites)
        .context("failed to load test suites")?;
    if loaded.cases.is_empty() {
        anyhow::bail!("No test cases to run.");
    }
    let cases = loaded.cases;

    let mut backends = Vec::with_capacity(config.runs.len());
    for entry in &config.runs {
        match registry.create(&entry.backend, config.backend_config(entry)) {
            Ok(backend) => backends.push(backend),
            Err(err) => warn!(backend = %entry.backend, model = %entry.model, error = %err, "skipping run entry"),
        }
    }

    info!(runs = backends.len(), cases = cases.len(), "starting comparison");
    let outcomes = join_all(backends.into_iter().map(|backend| run_entry(backend, &cases))).await;

    let hash = suite_hash(&cases);
    let generated_at = now_rfc3339()?;
    let mut all_results = Vec::new();
    let mut reports = Vec::new();
    for results in outcomes.into_iter().flatten() {
        reports.push(RunReport::new(
            aggregate(&results),
            hash.clone(),
            generated_at.clone(),
        ));
        all_results.extend(results);
    }
    if reports.is_empty() {
        anyhow::bail!("None of the configured backends could be evaluated.");
    }

    let mut notes = String::new();
    if let Some(path) = &args.csv {
        write_output(path, &render::csv::results_csv(&all_results), "CSV results")?;
        notes.push_str(&format!("\nCSV written to {}\n", path.to_string_lossy()));
    }
    if let Some(path) = &args.html {
        write_output(path, &render::html::html_report(&reports)?, "HTML report")?;
        notes.push_str(&format!("\nHTML report written to {}\n", path.to_string_lossy()));
    }

    if json_output {
        return Ok(render::json::to_pretty(&reports)?);
    }

    let mut out = String::new();
    for report in &reports {
        out.push_str(&render::markdown::summary_markdown(report, false)?);
        out.push('\n');
    }
    out.push_str(&render::markdown::comparison_markdown(&reports)?);
    out.push_str(&render::markdown::rejected_markdown(&loaded.rejected));
    out.push_str(&notes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_runs_with_defaults_and_overrides() {
        let config = CompareConfig::parse(
            r#"
timeout_secs = 60

[[runs]]
backend = "ollama"
model = "llama3.1"

[[runs]]
backend = "llama-cpp"
model = "qwen2.5-7b-instruct"
base_url = "http://gpu-box:8000/v1"
timeout_secs = 300
"#,
        )
        .expect("config");

        assert_eq!(config.runs.len(), 2);
        let first = config.backend_config(&config.runs[0]);
        assert_eq!(first.timeout_secs, 60);
        assert_eq!(first.base_url, None);
        let second = config.backend_config(&config.runs[1]);
        assert_eq!(second.timeout_secs, 300);
        assert_eq!(second.base_url.as_deref(), Some("http://gpu-box:8000/v1"));
    }

    #[test]
    fn rejects_empty_and_unknown_fields() {
        let err = CompareConfig::parse("timeout_secs = 10\n").unwrap_err();
        assert!(err.to_string().contains("[[runs]]"));

        let err = CompareConfig::parse("[[runs]]\nbackend = \"ollama\"\nmodel = \"x\"\ntemperature = 1\n")
            .unwrap_err();
        assert!(matches!(err, EvalError::Toml(_)));
    }

    #[tokio::test]
    async fn compare_skips_unreachable_and_unknown_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "llama3.1"}]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"max_tokens": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": [{"message": {"content": "hi"}}]})))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Which city?"}}]
            })))
            .mount(&server)
            .await;

        let dir = std::env::temp_dir().join(format!("toolcall-eval-compare-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(
            dir.join("negative.json"),
            json!([{
                "id": "neg_missing_info_01",
                "category": "negative",
                "messages": [{"role": "user", "content": "Send an email for me."}],
                "tools": [{"name": "send_email", "parameters": {"type": "object", "properties": {}}}],
                "is_negative": true
            }])
            .to_string(),
        )
        .expect("write suite");
        let config_path = dir.join("compare.toml");
        std::fs::write(
            &config_path,
            format!(
                "timeout_secs = 5\n\n[[runs]]\nbackend = \"ollama\"\nmodel = \"llama3.1\"\nbase_url = \"{}/v1\"\n\n[[runs]]\nbackend = \"ollama\"\nmodel = \"offline\"\nbase_url = \"http://127.0.0.1:9/v1\"\n\n[[runs]]\nbackend = \"vllm\"\nmodel = \"x\"\n",
                server.uri()
            ),
        )
        .expect("write config");

        let out = compare_command(
            &BackendRegistry::with_defaults(),
            CompareArgs {
                config: config_path,
                suites: Vec::new(),
                csv: None,
                html: None,
                suites_dir: Some(dir.clone()),
            },
            false,
        )
        .await
        .expect("compare");

        assert!(out.contains("# Tool-call evaluation: ollama / llama3.1"), "{out}");
        assert!(!out.contains("## Failures"));
        let summary_at = out.find("# Tool-call evaluation").expect("summary");
        let comparison_at = out.find("# Comparison").expect("comparison");
        assert!(summary_at < comparison_at);
        assert!(out.contains("| ollama/llama3.1 | 1 | 100.0% |"), "{out}");
        assert!(!out.contains("offline"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
