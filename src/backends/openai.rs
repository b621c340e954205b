use std::borrow::Cow;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{BackendConfig, Flavor, Invocation, ModelBackend, TokenUsage};
use crate::error::{BackendError, EvalError};
use crate::eval::types::{ChatMessage, ToolCallSpec, ToolDeclaration};

const CHARS_PER_TOKEN: usize = 4;

/// Client for any server exposing the OpenAI chat-completions API.
pub struct OpenAiCompatBackend {
    flavor: Flavor,
    client: reqwest::Client,
    base: Cow<'static, str>,
    api_key: String,
    model_id: String,
    temperature: f64,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl OpenAiCompatBackend {
    pub fn new(flavor: Flavor, config: BackendConfig) -> Result<Self, EvalError> {
        let base = super::env_base(
            config.base_url.as_deref(),
            flavor.default_base_url,
            flavor.base_env,
        );
        Self::with_base(flavor, config, base)
    }

    #[cfg(test)]
    fn new_for_test(flavor: Flavor, base: String) -> Result<Self, EvalError> {
        Self::with_base(
            flavor,
            BackendConfig::new("test-model").with_timeout_secs(5),
            Cow::Owned(base),
        )
    }

    fn with_base(
        flavor: Flavor,
        config: BackendConfig,
        base: Cow<'static, str>,
    ) -> Result<Self, EvalError> {
        let model_id = config.model_id.trim().to_string();
        if model_id.is_empty() {
            return Err(EvalError::InvalidArgument(format!(
                "a model id is required for backend '{}'",
                flavor.name
            )));
        }
        Ok(Self {
            flavor,
            client: super::http_client(config.timeout_secs)?,
            base,
            api_key: config
                .api_key
                .unwrap_or_else(|| flavor.default_api_key.to_string()),
            model_id,
            temperature: config.temperature,
            timeout_ms: config.timeout_secs.saturating_mul(1000),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolDeclaration]) -> Value {
        let mut body = json!({
            "model": self.model_id,
            "messages": messages,
            "temperature": self.temperature,
        });
        if !tools.is_empty()
            && let Some(obj) = body.as_object_mut()
        {
            let tools = tools.iter().map(ToolDeclaration::to_openai).collect();
            obj.insert("tools".to_string(), Value::Array(tools));
        }
        body
    }

    fn map_send_error(&self, err: reqwest::Error) -> BackendError {
        let backend = self.flavor.name.to_string();
        if err.is_timeout() {
            BackendError::Timeout {
                backend,
                after_ms: self.timeout_ms,
            }
        } else if err.is_connect() {
            BackendError::Connection {
                backend,
                message: err.to_string(),
            }
        } else {
            BackendError::Transport {
                backend,
                source: err,
            }
        }
    }

    async fn send_json(&self, req: reqwest::RequestBuilder) -> Result<Value, BackendError> {
        let resp = req
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| self.map_send_error(err))?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|err| self.map_send_error(err))?;
        if !status.is_success() {
            return Err(BackendError::Http {
                backend: self.flavor.name.to_string(),
                status: status.as_u16(),
                excerpt: super::body_excerpt(&bytes),
            });
        }
        serde_json::from_slice(&bytes).map_err(|err| {
            BackendError::malformed(
                self.flavor.name,
                format!("{err}: {}", super::body_excerpt(&bytes)),
            )
        })
    }

    fn parse_completion(&self, raw: &Value) -> Result<(ResponseMessage, Option<Usage>), BackendError> {
        let parsed: ChatCompletionResponse = serde_json::from_value(raw.clone())
            .map_err(|err| BackendError::malformed(self.flavor.name, err.to_string()))?;
        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(BackendError::malformed(
                self.flavor.name,
                "response contained no choices",
            ));
        };
        Ok((choice.message, parsed.usage))
    }

    fn decode_calls(&self, wire: Vec<WireToolCall>) -> Result<Vec<ToolCallSpec>, BackendError> {
        wire.into_iter()
            .map(|call| {
                let arguments = decode_arguments(call.function.arguments).map_err(|message| {
                    BackendError::malformed(
                        self.flavor.name,
                        format!("tool call '{}': {message}", call.function.name),
                    )
                })?;
                Ok(ToolCallSpec {
                    name: call.function.name,
                    arguments,
                })
            })
            .collect()
    }
}

/// Arguments arrive as a JSON-encoded string on most servers and as an
/// object on a few.
fn decode_arguments(raw: Value) -> Result<Map<String, Value>, String> {
    match raw {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        Value::String(text) if text.trim().is_empty() => Ok(Map::new()),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!(
                "arguments decoded to {} instead of an object",
                crate::eval::matcher::json_kind(&other)
            )),
            Err(err) => Err(format!("arguments are not valid JSON ({err})")),
        },
        other => Err(format!(
            "arguments are {} instead of an object",
            crate::eval::matcher::json_kind(&other)
        )),
    }
}

fn estimate_completion_tokens(content: Option<&str>, calls: &[ToolCallSpec]) -> u64 {
    let mut chars = content.map(|c| c.chars().count()).unwrap_or(0);
    for call in calls {
        chars += call.name.chars().count();
        chars += serde_json::to_string(&call.arguments)
            .map(|s| s.chars().count())
            .unwrap_or(0);
    }
    chars.div_ceil(CHARS_PER_TOKEN) as u64
}

fn tokens_per_sec(completion_tokens: u64, latency_ms: f64) -> f64 {
    if completion_tokens == 0 || latency_ms <= 0.0 {
        return 0.0;
    }
    completion_tokens as f64 / (latency_ms / 1000.0)
}

#[async_trait]
impl ModelBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        self.flavor.name
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDeclaration],
    ) -> Result<Invocation, BackendError> {
        let url = self.endpoint("chat/completions");
        let body = self.request_body(messages, tools);

        let started = Instant::now();
        let raw = self.send_json(self.client.post(&url).json(&body)).await?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (message, usage) = self.parse_completion(&raw)?;
        let calls = self.decode_calls(message.tool_calls.unwrap_or_default())?;

        let mut usage = TokenUsage {
            prompt_tokens: usage.as_ref().and_then(|u| u.prompt_tokens).unwrap_or(0),
            completion_tokens: usage.as_ref().and_then(|u| u.completion_tokens).unwrap_or(0),
            estimated: false,
        };
        if usage.completion_tokens == 0 && self.flavor.estimate_tokens {
            usage.completion_tokens = estimate_completion_tokens(message.content.as_deref(), &calls);
            usage.estimated = true;
        }

        debug!(
            backend = self.flavor.name,
            model = %self.model_id,
            calls = calls.len(),
            latency_ms,
            "chat completion finished"
        );

        Ok(Invocation {
            tokens_per_sec: tokens_per_sec(usage.completion_tokens, latency_ms),
            calls,
            latency_ms,
            content: message.content,
            usage,
            raw,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let raw = self.send_json(self.client.get(self.endpoint("models"))).await?;
        let list: ModelList = serde_json::from_value(raw)
            .map_err(|err| BackendError::malformed(self.flavor.name, err.to_string()))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    async fn warmup(&self) {
        let body = json!({
            "model": self.model_id,
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });
        let req = self.client.post(self.endpoint("chat/completions")).json(&body);
        if let Err(err) = self.send_json(req).await {
            debug!(backend = self.flavor.name, error = %err, "warmup request failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{LLAMA_CPP, OLLAMA};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn weather_tool() -> ToolDeclaration {
        ToolDeclaration::new(
            "get_weather",
            "Current weather for a city",
            json!({
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "required": ["location"]
            }),
        )
    }

    #[tokio::test]
    async fn invoke_sends_tools_and_parses_string_arguments() {
        let server = MockServer::start().await;
        let backend = OpenAiCompatBackend::new_for_test(OLLAMA, format!("{}/v1", server.uri())).unwrap();

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer ollama"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "temperature": 0.0,
                "tools": [{"type": "function", "function": {"name": "get_weather"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "get_weather",
                                "arguments": "{\"location\": \"San Francisco, CA\"}"
                            }
                        }]
                    }
                }],
                "usage": {"prompt_tokens": 80, "completion_tokens": 12}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let invocation = backend
            .invoke(&[ChatMessage::user("Weather in SF?")], &[weather_tool()])
            .await
            .unwrap();

        assert_eq!(invocation.calls.len(), 1);
        assert_eq!(invocation.calls[0].name, "get_weather");
        assert_eq!(invocation.calls[0].arguments["location"], "San Francisco, CA");
        assert_eq!(invocation.usage.prompt_tokens, 80);
        assert_eq!(invocation.usage.completion_tokens, 12);
        assert!(!invocation.usage.estimated);
        assert!(invocation.latency_ms > 0.0);
        assert!(invocation.tokens_per_sec > 0.0);
    }

    #[tokio::test]
    async fn invoke_omits_tools_key_when_none_declared() {
        let server = MockServer::start().await;
        let backend = OpenAiCompatBackend::new_for_test(OLLAMA, server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Hello!"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let invocation = backend
            .invoke(&[ChatMessage::user("hi")], &[])
            .await
            .unwrap();

        assert!(invocation.calls.is_empty());
        assert_eq!(invocation.content.as_deref(), Some("Hello!"));

        let requests = server.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(sent.get("tools").is_none());
    }

    #[tokio::test]
    async fn invoke_estimates_tokens_for_llama_cpp_without_usage() {
        let server = MockServer::start().await;
        let backend = OpenAiCompatBackend::new_for_test(LLAMA_CPP, server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {
                    "content": "",
                    "tool_calls": [{"function": {"name": "get_weather", "arguments": {"location": "Paris"}}}]
                }}]
            })))
            .mount(&server)
            .await;

        let invocation = backend
            .invoke(&[ChatMessage::user("Weather in Paris?")], &[weather_tool()])
            .await
            .unwrap();

        assert!(invocation.usage.estimated);
        // "get_weather" (11) + {"location":"Paris"} (20) = 31 chars -> 8 tokens
        assert_eq!(invocation.usage.completion_tokens, 8);
        assert_eq!(invocation.calls[0].arguments["location"], "Paris");
    }

    #[tokio::test]
    async fn invalid_argument_json_is_malformed() {
        let server = MockServer::start().await;
        let backend = OpenAiCompatBackend::new_for_test(OLLAMA, server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {
                    "tool_calls": [{"function": {"name": "calculate", "arguments": "{expression: 2+2"}}]
                }}]
            })))
            .mount(&server)
            .await;

        let err = backend
            .invoke(&[ChatMessage::user("2+2?")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse { .. }), "{err:?}");
        assert!(err.to_string().contains("calculate"));
    }

    #[tokio::test]
    async fn empty_choices_is_malformed() {
        let server = MockServer::start().await;
        let backend = OpenAiCompatBackend::new_for_test(OLLAMA, server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = backend.invoke(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[tokio::test]
    async fn non_success_status_maps_to_http_error() {
        let server = MockServer::start().await;
        let backend = OpenAiCompatBackend::new_for_test(OLLAMA, server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string("model \"test-model\" not found\n"),
            )
            .mount(&server)
            .await;

        let err = backend.invoke(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        match err {
            BackendError::Http { status, excerpt, .. } => {
                assert_eq!(status, 404);
                assert_eq!(excerpt, "model \"test-model\" not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_server_maps_to_connection_error() {
        let backend =
            OpenAiCompatBackend::new_for_test(OLLAMA, "http://127.0.0.1:9/v1".to_string()).unwrap();
        let err = backend.invoke(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, BackendError::Connection { .. }), "{err:?}");
        assert!(!backend.health_check().await);
    }

    #[tokio::test]
    async fn list_models_reads_model_ids() {
        let server = MockServer::start().await;
        let backend = OpenAiCompatBackend::new_for_test(OLLAMA, server.uri()).unwrap();

        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [{"id": "llama3.1", "object": "model"}, {"id": "qwen2.5:7b", "object": "model"}]
            })))
            .mount(&server)
            .await;

        assert_eq!(backend.list_models().await.unwrap(), vec!["llama3.1", "qwen2.5:7b"]);
        assert!(backend.health_check().await);
    }

    #[tokio::test]
    async fn warmup_ignores_failures() {
        let server = MockServer::start().await;
        let backend = OpenAiCompatBackend::new_for_test(OLLAMA, server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"max_tokens": 1})))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        backend.warmup().await;
    }

    #[test]
    fn decode_arguments_accepts_empty_string_and_rejects_arrays() {
        assert!(decode_arguments(json!("")).unwrap().is_empty());
        assert!(decode_arguments(Value::Null).unwrap().is_empty());
        assert!(decode_arguments(json!("[1, 2]")).is_err());
        assert!(decode_arguments(json!(42)).is_err());
    }

    #[test]
    fn blank_model_id_is_rejected() {
        let err = OpenAiCompatBackend::new(OLLAMA, BackendConfig::new("  ")).err().unwrap();
        assert!(matches!(err, EvalError::InvalidArgument(_)));
    }
}
