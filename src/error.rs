#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum EvalError {
    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(reqwest::Error),

    #[error("Invalid test case '{case_id}': {message}")]
    Configuration { case_id: String, message: String },

    #[error("Test suite '{name}' not found.\n\nAvailable suites: {available}")]
    SuiteNotFound { name: String, available: String },

    #[error("Test suite '{name}' could not be parsed: {message}")]
    SuiteParse { name: String, message: String },

    #[error("Unknown backend: '{name}'. Available: {available}")]
    UnknownBackend { name: String, available: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a model backend while serving one request.
///
/// The case evaluator turns every variant into a failing result; none of
/// them abort a run.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum BackendError {
    #[error("{backend} timed out after {after_ms} ms")]
    Timeout { backend: String, after_ms: u64 },

    #[error("{backend} is not reachable: {message}")]
    Connection { backend: String, message: String },

    #[error("HTTP {status} from {backend}: {excerpt}")]
    Http {
        backend: String,
        status: u16,
        excerpt: String,
    },

    #[error("Malformed response from {backend}: {message}")]
    MalformedResponse { backend: String, message: String },

    #[error("Request to {backend} failed: {source}")]
    Transport {
        backend: String,
        #[source]
        source: reqwest::Error,
    },
}

impl BackendError {
    pub fn malformed(backend: &str, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
