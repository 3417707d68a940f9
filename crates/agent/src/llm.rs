use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use supplyq_core::config::{LlmConfig, LlmProvider};

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation timed out")]
    Timeout,
    #[error("generation transport failure: {0}")]
    Transport(String),
    #[error("unexpected generation response: {0}")]
    Response(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::Response(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Free-text completion capability. Implementations are stateless per call.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn provider(&self) -> &'static str;
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Clone, Debug)]
pub struct GenerationSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl GenerationSettings {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

pub fn build_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, GenerationError> {
    let settings = GenerationSettings::from_config(config);
    let client = reqwest::Client::builder()
        .timeout(settings.timeout)
        .build()
        .map_err(|error| GenerationError::Transport(error.to_string()))?;
    let base_url = config.base_url.clone();

    let generator: Arc<dyn TextGenerator> = match config.provider {
        LlmProvider::Ollama => Arc::new(OllamaGenerator {
            client,
            base_url: require(base_url, "llm.base_url")?,
            settings,
        }),
        LlmProvider::OpenAi => Arc::new(OpenAiGenerator {
            client,
            base_url: base_url.unwrap_or_else(|| OPENAI_DEFAULT_BASE_URL.to_string()),
            api_key: require(config.api_key.clone(), "llm.api_key")?,
            settings,
        }),
        LlmProvider::Anthropic => Arc::new(AnthropicGenerator {
            client,
            base_url: base_url.unwrap_or_else(|| ANTHROPIC_DEFAULT_BASE_URL.to_string()),
            api_key: require(config.api_key.clone(), "llm.api_key")?,
            settings,
        }),
        LlmProvider::Lambda => Arc::new(LambdaGenerator {
            client,
            function_url: require(base_url, "llm.base_url")?,
            api_key: require(config.api_key.clone(), "llm.api_key")?,
            settings,
        }),
    };
    Ok(generator)
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, GenerationError> {
    value.ok_or_else(|| GenerationError::Transport(format!("{field} is not configured")))
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

async fn post_json(
    request: reqwest::RequestBuilder,
    body: &Value,
) -> Result<Value, GenerationError> {
    let response = request.json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(GenerationError::Transport(format!("status {status}: {detail}")));
    }
    Ok(response.json::<Value>().await?)
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    settings: GenerationSettings,
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn provider(&self) -> &'static str {
        "ollama"
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.settings.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.settings.temperature,
                "num_predict": self.settings.max_tokens,
            },
        });
        let request = self.client.post(endpoint(&self.base_url, "/api/generate"));
        parse_ollama(post_json(request, &body).await?)
    }
}

pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    settings: GenerationSettings,
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn provider(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.settings.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
        });
        let request = self
            .client
            .post(endpoint(&self.base_url, "/v1/chat/completions"))
            .bearer_auth(self.api_key.expose_secret());
        parse_openai(post_json(request, &body).await?)
    }
}

pub struct AnthropicGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    settings: GenerationSettings,
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn provider(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let request = self
            .client
            .post(endpoint(&self.base_url, "/v1/messages"))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION);
        parse_anthropic(post_json(request, &body).await?)
    }
}

/// Function-URL gateway that fronts a hosted model behind a shared API key.
pub struct LambdaGenerator {
    client: reqwest::Client,
    function_url: String,
    api_key: SecretString,
    settings: GenerationSettings,
}

#[async_trait]
impl TextGenerator for LambdaGenerator {
    fn provider(&self) -> &'static str {
        "lambda"
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "api_key": self.api_key.expose_secret(),
            "prompt": prompt,
            "model_id": self.settings.model,
            "model_params": {
                "max_tokens": self.settings.max_tokens,
                "temperature": self.settings.temperature,
            },
        });
        let request = self.client.post(&self.function_url);
        parse_lambda(post_json(request, &body).await?)
    }
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

fn parse_ollama(body: Value) -> Result<String, GenerationError> {
    serde_json::from_value::<OllamaResponse>(body)
        .map(|parsed| parsed.response)
        .map_err(|error| GenerationError::Response(error.to_string()))
}

fn parse_openai(body: Value) -> Result<String, GenerationError> {
    let parsed = serde_json::from_value::<OpenAiResponse>(body)
        .map_err(|error| GenerationError::Response(error.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| GenerationError::Response("no choices in completion".to_string()))
}

fn parse_anthropic(body: Value) -> Result<String, GenerationError> {
    let parsed = serde_json::from_value::<AnthropicResponse>(body)
        .map_err(|error| GenerationError::Response(error.to_string()))?;
    let text = parsed
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        return Err(GenerationError::Response("no text blocks in message".to_string()));
    }
    Ok(text)
}

fn parse_lambda(body: Value) -> Result<String, GenerationError> {
    match body.get("response") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(response) => response
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| {
                GenerationError::Response(format!("unexpected gateway payload: {body}"))
            }),
        None => Err(GenerationError::Response(format!("unexpected gateway payload: {body}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use supplyq_core::config::{LlmConfig, LlmProvider};

    use super::{
        build_generator, endpoint, parse_anthropic, parse_lambda, parse_ollama, parse_openai,
        GenerationError,
    };

    fn config(provider: LlmProvider) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: Some("sk-test".to_string().into()),
            base_url: Some("http://localhost:11434/".to_string()),
            model: "test-model".to_string(),
            timeout_secs: 5,
            max_tokens: 64,
            temperature: 0.0,
        }
    }

    #[test]
    fn provider_payloads_are_parsed() {
        assert_eq!(
            parse_ollama(json!({"model": "m", "response": "SELECT 1", "done": true}))
                .expect("ollama"),
            "SELECT 1"
        );
        assert_eq!(
            parse_openai(json!({"choices": [{"message": {"role": "assistant", "content": "SELECT 2"}}]}))
                .expect("openai"),
            "SELECT 2"
        );
        assert_eq!(
            parse_anthropic(json!({"content": [{"type": "text", "text": "SELECT 3"}]}))
                .expect("anthropic"),
            "SELECT 3"
        );
    }

    #[test]
    fn lambda_gateway_accepts_both_response_shapes() {
        assert_eq!(
            parse_lambda(json!({"response": {"content": [{"text": "SELECT 4"}]}})).expect("nested"),
            "SELECT 4"
        );
        assert_eq!(parse_lambda(json!({"response": "SELECT 5"})).expect("flat"), "SELECT 5");
        assert!(matches!(
            parse_lambda(json!({"statusCode": 500})),
            Err(GenerationError::Response(_))
        ));
    }

    #[test]
    fn empty_completions_are_response_errors() {
        assert!(matches!(parse_openai(json!({"choices": []})), Err(GenerationError::Response(_))));
        assert!(matches!(
            parse_anthropic(json!({"content": [{"type": "tool_use"}]})),
            Err(GenerationError::Response(_))
        ));
    }

    #[test]
    fn generator_is_selected_by_provider() {
        for (provider, label) in [
            (LlmProvider::Ollama, "ollama"),
            (LlmProvider::OpenAi, "openai"),
            (LlmProvider::Anthropic, "anthropic"),
            (LlmProvider::Lambda, "lambda"),
        ] {
            let generator = build_generator(&config(provider)).expect("generator builds");
            assert_eq!(generator.provider(), label);
        }
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(endpoint("http://localhost:11434/", "/api/generate"), "http://localhost:11434/api/generate");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let mut unreachable = config(LlmProvider::Ollama);
        unreachable.base_url = Some("http://127.0.0.1:1".to_string());
        let generator = build_generator(&unreachable).expect("generator builds");
        let error = generator.complete("hello").await.expect_err("nothing listens on port 1");
        assert!(matches!(error, GenerationError::Transport(_) | GenerationError::Timeout));
    }
}
