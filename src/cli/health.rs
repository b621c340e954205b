use std::time::Instant;

use serde::Serialize;

use crate::backends::{BackendConfig, BackendRegistry, ModelBackend};
use crate::render;

/// Placeholder model id; listing models does not depend on it.
const PROBE_MODEL: &str = "health-probe";

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub backend: String,
    pub status: String,
    pub latency: String,
    pub models: Vec<String>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.status == "ok"
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Backend health: {}\n\n", self.backend));
        out.push_str("| Status | Latency | Models |\n");
        out.push_str("|--------|---------|--------|\n");
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            self.status,
            self.latency,
            self.models.len()
        ));
        if !self.models.is_empty() {
            out.push_str("\n## Models\n\n");
            for model in &self.models {
                out.push_str(&format!("- {model}\n"));
            }
        }
        out
    }
}

async fn check(backend: &dyn ModelBackend) -> HealthReport {
    let start = Instant::now();
    let listing = backend.list_models().await;
    let elapsed = start.elapsed().as_millis();

    match listing {
        Ok(models) => HealthReport {
            backend: backend.name().to_string(),
            status: "ok".into(),
            latency: format!("{elapsed}ms"),
            models,
        },
        Err(err) => {
            let reason = if err.is_timeout() {
                "timeout".to_string()
            } else {
                err.to_string()
            };
            HealthReport {
                backend: backend.name().to_string(),
                status: "error".into(),
                latency: format!("{elapsed}ms ({reason})"),
                models: Vec::new(),
            }
        }
    }
}

pub(super) async fn health_command(
    registry: &BackendRegistry,
    backend_name: &str,
    base_url: Option<String>,
    api_key: Option<String>,
    json_output: bool,
) -> anyhow::Result<String> {
    let config = BackendConfig::new(PROBE_MODEL)
        .with_base_url(base_url)
        .with_api_key(api_key)
        .with_timeout_secs(10);
    let backend = registry.create(backend_name, config)?;

    let report = check(backend.as_ref()).await;
    let body = if json_output {
        render::json::to_pretty(&report)?
    } else {
        report.to_markdown()
    };
    if !report.healthy() {
        anyhow::bail!("{body}");
    }
    Ok(body)
}
