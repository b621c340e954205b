//! Model backends and the registry that constructs them by name.
//!
//! Every backend speaks the OpenAI chat-completions protocol; the registered
//! flavours differ only in defaults (base URL, API key, token accounting).

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{BackendError, EvalError};
use crate::eval::types::{ChatMessage, ToolCallSpec, ToolDeclaration};

pub(crate) mod openai;

pub use openai::OpenAiCompatBackend;

const ERROR_BODY_MAX_BYTES: usize = 2048;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Token counts reported by (or estimated for) one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated: bool,
}

/// Normalized outcome of one chat-with-tools request.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub calls: Vec<ToolCallSpec>,
    pub latency_ms: f64,
    pub content: Option<String>,
    pub usage: TokenUsage,
    pub tokens_per_sec: f64,
    pub raw: Value,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Registry name of the backend flavour (e.g. `ollama`).
    fn name(&self) -> &str;

    fn model_id(&self) -> &str;

    /// Sends one chat completion request carrying `tools`. Never retried.
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDeclaration],
    ) -> Result<Invocation, BackendError>;

    async fn list_models(&self) -> Result<Vec<String>, BackendError>;

    async fn health_check(&self) -> bool {
        self.list_models().await.is_ok()
    }

    /// Loads the model so the first measured case is not a cold start.
    async fn warmup(&self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub model_id: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f64,
}

impl BackendConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            base_url: None,
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            temperature: 0.0,
        }
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs.max(1);
        self
    }
}

/// Defaults for one OpenAI-compatible server flavour.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Flavor {
    pub name: &'static str,
    pub default_base_url: &'static str,
    pub base_env: &'static str,
    pub default_api_key: &'static str,
    /// Estimate completion tokens when the server omits `usage`.
    pub estimate_tokens: bool,
}

pub const OLLAMA: Flavor = Flavor {
    name: "ollama",
    default_base_url: "http://localhost:11434/v1",
    base_env: "TOOLCALL_EVAL_OLLAMA_BASE",
    default_api_key: "ollama",
    estimate_tokens: false,
};

pub const LLAMA_CPP: Flavor = Flavor {
    name: "llama-cpp",
    default_base_url: "http://localhost:8000/v1",
    base_env: "TOOLCALL_EVAL_LLAMA_CPP_BASE",
    default_api_key: "not-needed",
    estimate_tokens: true,
};

pub const FOUNDRY_LOCAL: Flavor = Flavor {
    name: "foundry-local",
    default_base_url: "http://localhost:5273/v1",
    base_env: "TOOLCALL_EVAL_FOUNDRY_BASE",
    default_api_key: "not-needed",
    estimate_tokens: false,
};

pub const FLAVORS: [Flavor; 3] = [FOUNDRY_LOCAL, LLAMA_CPP, OLLAMA];

pub type BackendFactory = fn(BackendConfig) -> Result<Box<dyn ModelBackend>, EvalError>;

/// Name → constructor table, built once at startup and passed down.
pub struct BackendRegistry {
    factories: BTreeMap<&'static str, BackendFactory>,
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(OLLAMA.name, |config| {
            Ok(Box::new(OpenAiCompatBackend::new(OLLAMA, config)?))
        });
        registry.register(LLAMA_CPP.name, |config| {
            Ok(Box::new(OpenAiCompatBackend::new(LLAMA_CPP, config)?))
        });
        registry.register(FOUNDRY_LOCAL.name, |config| {
            Ok(Box::new(OpenAiCompatBackend::new(FOUNDRY_LOCAL, config)?))
        });
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: BackendFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn create(
        &self,
        name: &str,
        config: BackendConfig,
    ) -> Result<Box<dyn ModelBackend>, EvalError> {
        let Some(factory) = self.factories.get(name) else {
            return Err(EvalError::UnknownBackend {
                name: name.to_string(),
                available: self.names().join(", "),
            });
        };
        factory(config)
    }
}

/// Explicit value, then `env_var`, then `default`.
pub(crate) fn env_base(
    explicit: Option<&str>,
    default: &'static str,
    env_var: &str,
) -> Cow<'static, str> {
    if let Some(value) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return Cow::Owned(value.to_string());
    }
    std::env::var(env_var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(Cow::Owned)
        .unwrap_or_else(|| Cow::Borrowed(default))
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, EvalError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("toolcall-eval/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(EvalError::HttpClientInit)
}

pub(crate) fn body_excerpt(bytes: &[u8]) -> String {
    let full = String::from_utf8_lossy(bytes);

    let truncated: &str = if full.len() > ERROR_BODY_MAX_BYTES {
        let mut end = ERROR_BODY_MAX_BYTES;
        while end > 0 && !full.is_char_boundary(end) {
            end -= 1;
        }
        &full[..end]
    } else {
        full.as_ref()
    };

    let mut s = truncated.trim().replace(['\n', '\r', '\t'], " ");
    if full.len() > ERROR_BODY_MAX_BYTES {
        s.push_str(" …");
    }
    s
}
