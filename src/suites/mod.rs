//! Test-suite discovery, decoding and validation.
//!
//! Bundled suites are compiled into the binary from `suites/*.json`. Files
//! under the user config directory (`<config>/toolcall-eval/suites`) shadow
//! bundled suites of the same name. An explicit directory (`--suites-dir` or
//! `TOOLCALL_EVAL_SUITES_DIR`) replaces both.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use rust_embed::RustEmbed;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::EvalError;
use crate::eval::types::TestCase;

pub const SUITES_DIR_ENV: &str = "TOOLCALL_EVAL_SUITES_DIR";

#[derive(RustEmbed)]
#[folder = "suites/"]
struct EmbeddedSuites;

/// Cases that validated, plus the ones that did not.
#[derive(Debug, Default)]
pub struct LoadedSuite {
    pub cases: Vec<TestCase>,
    pub rejected: Vec<EvalError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteInfo {
    pub name: String,
    pub cases: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone)]
pub struct SuiteCatalog {
    override_dir: Option<PathBuf>,
    user_dir: Option<PathBuf>,
}

impl SuiteCatalog {
    /// Explicit directory, then `TOOLCALL_EVAL_SUITES_DIR`, then bundled
    /// suites shadowed by the user config directory.
    pub fn new(explicit: Option<PathBuf>) -> Self {
        let override_dir = explicit.or_else(|| {
            std::env::var(SUITES_DIR_ENV)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
        });
        let user_dir = dirs::config_dir().map(|dir| dir.join("toolcall-eval").join("suites"));
        Self {
            override_dir,
            user_dir,
        }
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            override_dir: Some(dir.into()),
            user_dir: None,
        }
    }

    #[cfg(test)]
    fn embedded_only() -> Self {
        Self {
            override_dir: None,
            user_dir: None,
        }
    }

    pub fn list_suites(&self) -> Result<Vec<String>, EvalError> {
        let mut names = BTreeSet::new();
        if let Some(dir) = &self.override_dir {
            names.extend(json_stems(dir)?);
            return Ok(names.into_iter().collect());
        }
        names.extend(
            EmbeddedSuites::iter().filter_map(|path| path.strip_suffix(".json").map(str::to_string)),
        );
        if let Some(dir) = self.user_dir.as_deref().filter(|d| d.is_dir()) {
            names.extend(json_stems(dir)?);
        }
        Ok(names.into_iter().collect())
    }

    /// Every suite with its valid and rejected case counts.
    pub fn describe(&self) -> Result<Vec<SuiteInfo>, EvalError> {
        self.list_suites()?
            .into_iter()
            .map(|name| {
                let loaded = self.load_suite(&name)?;
                Ok(SuiteInfo {
                    name,
                    cases: loaded.cases.len(),
                    rejected: loaded.rejected.len(),
                })
            })
            .collect()
    }

    pub fn load_suite(&self, name: &str) -> Result<LoadedSuite, EvalError> {
        let mut loaded = LoadedSuite::default();
        let mut seen = HashSet::new();
        self.load_into(name, &mut loaded, &mut seen)?;
        Ok(loaded)
    }

    /// Loads and merges `names` in order; every suite when `names` is empty.
    /// A suite named twice is loaded once. Case ids must be unique across
    /// the merged set.
    pub fn load_suites(&self, names: &[String]) -> Result<LoadedSuite, EvalError> {
        let names = if names.is_empty() {
            self.list_suites()?
        } else {
            let mut requested = HashSet::new();
            names
                .iter()
                .map(|name| name.trim().to_string())
                .filter(|name| requested.insert(name.clone()))
                .collect()
        };

        let mut loaded = LoadedSuite::default();
        let mut seen = HashSet::new();
        for name in &names {
            self.load_into(name, &mut loaded, &mut seen)?;
        }
        Ok(loaded)
    }

    fn load_into(
        &self,
        name: &str,
        loaded: &mut LoadedSuite,
        seen: &mut HashSet<String>,
    ) -> Result<(), EvalError> {
        let text = self.read_suite(name)?;
        let elements: Vec<Value> =
            serde_json::from_str(&text).map_err(|err| EvalError::SuiteParse {
                name: name.to_string(),
                message: err.to_string(),
            })?;

        for (idx, element) in elements.into_iter().enumerate() {
            match decode_case(idx, element).and_then(|case| validate_case(case, seen)) {
                Ok(case) => loaded.cases.push(case),
                Err(err) => {
                    warn!(suite = name, error = %err, "rejected test case");
                    loaded.rejected.push(err);
                }
            }
        }
        debug!(
            suite = name,
            cases = loaded.cases.len(),
            rejected = loaded.rejected.len(),
            "suite loaded"
        );
        Ok(())
    }

    fn read_suite(&self, name: &str) -> Result<String, EvalError> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(EvalError::InvalidArgument(format!(
                "invalid suite name '{name}'"
            )));
        }
        let file = format!("{name}.json");

        if let Some(dir) = &self.override_dir {
            let path = dir.join(&file);
            if !path.is_file() {
                return Err(self.not_found(name));
            }
            return Ok(fs::read_to_string(path)?);
        }

        if let Some(path) = self.user_dir.as_ref().map(|d| d.join(&file))
            && path.is_file()
        {
            return Ok(fs::read_to_string(path)?);
        }

        let Some(asset) = EmbeddedSuites::get(&file) else {
            return Err(self.not_found(name));
        };
        String::from_utf8(asset.data.into_owned()).map_err(|_| EvalError::SuiteParse {
            name: name.to_string(),
            message: "embedded suite is not valid UTF-8".to_string(),
        })
    }

    fn not_found(&self, name: &str) -> EvalError {
        let available = self
            .list_suites()
            .map(|names| names.join(", "))
            .unwrap_or_default();
        EvalError::SuiteNotFound {
            name: name.to_string(),
            available,
        }
    }
}

fn json_stems(dir: &Path) -> Result<Vec<String>, EvalError> {
    let mut stems = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(stem.to_string());
        }
    }
    Ok(stems)
}

fn decode_case(idx: usize, element: Value) -> Result<TestCase, EvalError> {
    let case_id = element
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{}", idx + 1));
    serde_json::from_value(element).map_err(|err| EvalError::Configuration {
        case_id,
        message: err.to_string(),
    })
}

fn tool_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").expect("valid regex"))
}

fn validate_case(case: TestCase, seen: &mut HashSet<String>) -> Result<TestCase, EvalError> {
    let invalid = |message: String| EvalError::Configuration {
        case_id: case.id.clone(),
        message,
    };

    if case.id.trim().is_empty() {
        return Err(invalid("id must not be empty".to_string()));
    }
    if seen.contains(&case.id) {
        return Err(invalid("duplicate test case id".to_string()));
    }
    if case.messages.is_empty() {
        return Err(invalid("at least one message is required".to_string()));
    }

    let mut declared = HashSet::new();
    for tool in &case.tools {
        if !tool_name_re().is_match(&tool.name) {
            return Err(invalid(format!(
                "tool name '{}' must match [A-Za-z0-9_.-]{{1,64}}",
                tool.name
            )));
        }
        if !declared.insert(tool.name.as_str()) {
            return Err(invalid(format!("tool '{}' is declared twice", tool.name)));
        }
        if !tool.parameters.is_object() {
            return Err(invalid(format!(
                "parameters of tool '{}' must be a JSON object",
                tool.name
            )));
        }
    }

    if case.expected_tool_calls.is_empty() && !case.is_negative {
        return Err(invalid(
            "expected_tool_calls is empty but is_negative is false".to_string(),
        ));
    }
    if case.is_negative && !case.expected_tool_calls.is_empty() {
        return Err(invalid(
            "is_negative is true but expected_tool_calls is not empty".to_string(),
        ));
    }
    if let Some(call) = case
        .expected_tool_calls
        .iter()
        .find(|call| !declared.contains(call.name.as_str()))
    {
        return Err(invalid(format!(
            "expected call '{}' does not name a declared tool",
            call.name
        )));
    }

    seen.insert(case.id.clone());
    Ok(case)
}

/// Stable SHA-256 fingerprint of the case ids and expectations.
pub fn suite_hash(cases: &[TestCase]) -> String {
    let mut hasher = Sha256::new();
    for case in cases {
        hasher.update(case.id.as_bytes());
        hasher.update(b"\0");
        hasher.update(case.match_level.label().as_bytes());
        hasher.update(b"\0");
        for call in &case.expected_tool_calls {
            hasher.update(call.signature().as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}
