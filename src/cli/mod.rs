use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::backends::{BackendRegistry, DEFAULT_TIMEOUT_SECS, FLAVORS};
use crate::render;
use crate::suites::SuiteCatalog;

mod compare;
mod health;
mod run;

#[derive(Parser, Debug)]
#[command(
    name = "toolcall-eval",
    version,
    about = "Evaluate tool-calling accuracy of local LLM runtimes"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Print machine-readable JSON instead of markdown
    #[arg(long, global = true)]
    pub json: bool,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered backends and their default endpoints
    Backends,

    /// List available test suites with case counts
    Suites {
        /// Load suites from this directory instead of the bundled set
        #[arg(long)]
        suites_dir: Option<PathBuf>,
    },

    /// Evaluate one backend/model against one or more suites
    Run(RunArgs),

    /// Evaluate several backend/model pairs from a TOML file and compare them
    Compare(CompareArgs),

    /// Check that a backend is reachable and list its models
    Health {
        /// Backend name (see `toolcall-eval backends`)
        #[arg(long)]
        backend: String,

        /// Override the backend base URL
        #[arg(long)]
        base_url: Option<String>,

        /// API key sent as a bearer token
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Backend name (see `toolcall-eval backends`)
    #[arg(long)]
    pub backend: String,

    /// Model identifier as the backend knows it
    #[arg(long)]
    pub model: String,

    /// Suite to run; repeat for several (default: all)
    #[arg(long = "suite")]
    pub suites: Vec<String>,

    /// Override the backend base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// API key sent as a bearer token
    #[arg(long)]
    pub api_key: Option<String>,

    /// Repeat every case this many times
    #[arg(long, default_value = "1")]
    pub runs: usize,

    /// Skip the warmup request
    #[arg(long)]
    pub no_warmup: bool,

    /// Only run cases carrying this tag
    #[arg(long)]
    pub tag: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Write one CSV row per result to this path
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Write an HTML report to this path
    #[arg(long)]
    pub html: Option<PathBuf>,

    /// Omit the failure details from the console summary
    #[arg(long)]
    pub no_failures: bool,

    /// Load suites from this directory instead of the bundled set
    #[arg(long)]
    pub suites_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    /// TOML file listing the backend/model pairs to compare
    #[arg(long)]
    pub config: PathBuf,

    /// Suite to run; repeat for several (default: all)
    #[arg(long = "suite")]
    pub suites: Vec<String>,

    /// Write one CSV row per result to this path
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Write an HTML report to this path
    #[arg(long)]
    pub html: Option<PathBuf>,

    /// Load suites from this directory instead of the bundled set
    #[arg(long)]
    pub suites_dir: Option<PathBuf>,
}

pub async fn run(cli: Cli) -> anyhow::Result<String> {
    let json_output = cli.json;
    let registry = BackendRegistry::with_defaults();

    match cli.command {
        Commands::Backends => backends_output(json_output),
        Commands::Suites { suites_dir } => {
            let catalog = SuiteCatalog::new(suites_dir);
            let suites = catalog.describe().context("failed to list test suites")?;
            if json_output {
                return Ok(render::json::to_pretty(&suites)?);
            }
            Ok(render::markdown::suites_markdown(&suites))
        }
        Commands::Run(args) => run::run_command(&registry, args, json_output).await,
        Commands::Compare(args) => compare::compare_command(&registry, args, json_output).await,
        Commands::Health {
            backend,
            base_url,
            api_key,
        } => health::health_command(&registry, &backend, base_url, api_key, json_output).await,
    }
}

fn backends_output(json_output: bool) -> anyhow::Result<String> {
    if json_output {
        return Ok(render::json::to_pretty(&FLAVORS)?);
    }
    let mut out = String::new();
    out.push_str("# Backends\n\n");
    out.push_str("| Backend | Default base URL | Override env |\n");
    out.push_str("|---------|------------------|--------------|\n");
    for flavor in FLAVORS {
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            flavor.name, flavor.default_base_url, flavor.base_env
        ));
    }
    Ok(out)
}

pub(crate) fn now_rfc3339() -> anyhow::Result<String> {
    Ok(OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format report timestamp")?)
}

pub(crate) fn write_output(path: &Path, contents: &str, what: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create directory {} for {what}",
                parent.to_string_lossy()
            )
        })?;
    }
    fs::write(path, contents)
        .with_context(|| format!("failed to write {what} to {}", path.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_repeated_suites() {
        let cli = Cli::try_parse_from([
            "toolcall-eval",
            "run",
            "--backend",
            "ollama",
            "--model",
            "llama3.1",
            "--suite",
            "simple",
            "--suite",
            "parallel",
            "--runs",
            "3",
            "--json",
        ])
        .expect("parse");

        assert!(cli.json);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.suites, vec!["simple", "parallel"]);
        assert_eq!(args.runs, 3);
        assert_eq!(args.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(!args.no_warmup);
    }

    #[test]
    fn run_requires_backend_and_model() {
        assert!(Cli::try_parse_from(["toolcall-eval", "run", "--backend", "ollama"]).is_err());
    }

    #[test]
    fn verbose_flag_counts() {
        let cli = Cli::try_parse_from(["toolcall-eval", "-vv", "backends"]).expect("parse");
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn backends_lists_every_flavor() {
        let md = backends_output(false).expect("markdown");
        assert!(md.contains("| ollama | http://localhost:11434/v1 | TOOLCALL_EVAL_OLLAMA_BASE |"));
        assert!(md.contains("| llama-cpp | http://localhost:8000/v1 |"));
        assert!(md.contains("| foundry-local | http://localhost:5273/v1 |"));

        let json = backends_output(true).expect("json");
        assert!(json.contains("\"estimate_tokens\": true"));
    }

    #[test]
    fn write_output_creates_parent_directories() {
        let root = std::env::temp_dir().join(format!("toolcall-eval-write-{}", std::process::id()));
        let path = root.join("nested").join("results.csv");

        write_output(&path, "id\r\n", "CSV").expect("write");

        assert_eq!(fs::read_to_string(&path).expect("read"), "id\r\n");
        let _ = fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn suites_command_lists_bundled_suites() {
        let dir = std::env::temp_dir().join(format!("toolcall-eval-cli-suites-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("empty.json"), "[]").expect("write");

        let cli = Cli {
            command: Commands::Suites {
                suites_dir: Some(dir.clone()),
            },
            json: false,
            verbose: 0,
        };
        let out = run(cli).await.expect("suites");
        assert!(out.contains("| empty | 0 | 0 |"));
        let _ = fs::remove_dir_all(dir);
    }
}
