use std::env;

use reqwest::{header::HeaderValue, Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tokio::time::{sleep, Duration};
use tracing::warn;

use contract_miner_core::{Embedder, HashEmbedder, MinerError, Result};

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub model_version: String,
    pub logprobs: Option<Vec<f32>>,
}

/// The one external collaborator of the pipeline: embeds text and produces
/// completions. Supertrait `Embedder` lets the vector index take the same
/// object the engine generates with.
pub trait ModelAdapter: Embedder {
    fn generate(&self, prompt_text: &str, want_logprobs: bool) -> Result<GenerationResult>;
}

/// Bounded exponential backoff, owned by the client rather than read from
/// ambient config.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
        if let Some(value) = retry_after {
            if let Ok(text) = value.to_str() {
                if let Ok(secs) = text.parse::<u64>() {
                    return Duration::from_secs(secs.max(1));
                }
            }
        }
        let capped = attempt.min(6) as u32;
        self.base_delay * (1u32 << capped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    OpenAi,
    Anthropic,
    Local,
}

impl ModelProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "openai",
            ModelProvider::Anthropic => "anthropic",
            ModelProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "openai" => Some(ModelProvider::OpenAi),
            "anthropic" => Some(ModelProvider::Anthropic),
            "local" => Some(ModelProvider::Local),
            _ => None,
        }
    }
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Anthropic(AnthropicConfig),
    Local(HashEmbedder),
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
    embed_model: String,
}

#[derive(Clone)]
struct AnthropicConfig {
    api_key: String,
    max_tokens: u32,
}

#[derive(Clone)]
pub struct ModelClient {
    http: Client,
    provider: ModelProvider,
    model: String,
    retry: RetryPolicy,
    config: ProviderConfig,
}

impl ModelClient {
    pub fn new(provider: ModelProvider, model: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let model = model.into();
        let config = match provider {
            ModelProvider::OpenAi => ProviderConfig::OpenAi(OpenAiConfig {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                embed_model: env::var("MINER_EMBED_MODEL")
                    .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            }),
            ModelProvider::Anthropic => ProviderConfig::Anthropic(AnthropicConfig {
                api_key: read_api_key("ANTHROPIC_API_KEY")?,
                max_tokens: env::var("ANTHROPIC_MAX_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(512),
            }),
            ModelProvider::Local => ProviderConfig::Local(HashEmbedder::default()),
        };
        Ok(Self {
            http: Client::new(),
            provider,
            model,
            retry,
            config,
        })
    }

    pub fn from_env() -> Result<Self> {
        let provider_name = env::var("MINER_PROVIDER").unwrap_or_else(|_| "local".to_string());
        let provider = ModelProvider::from_str(&provider_name)
            .ok_or_else(|| MinerError::Other(format!("unknown provider {provider_name}")))?;
        let model =
            env::var("MINER_MODEL").unwrap_or_else(|_| default_model(provider).to_string());
        Self::new(provider, model, RetryPolicy::default())
    }

    /// Deterministic offline client; used when no provider is configured
    /// and throughout the test suites.
    pub fn local() -> Self {
        Self {
            http: Client::new(),
            provider: ModelProvider::Local,
            model: "local".to_string(),
            retry: RetryPolicy::default(),
            config: ProviderConfig::Local(HashEmbedder::default()),
        }
    }

    pub fn provider(&self) -> ModelProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn embed_async(&self, text: &str) -> Result<Vec<f32>> {
        match &self.config {
            ProviderConfig::OpenAi(cfg) => self.embed_openai(cfg, text).await,
            ProviderConfig::Anthropic(_) => {
                // the messages API has no embeddings endpoint; fall back to
                // the hash embedder so anthropic-only deployments still index
                Ok(HashEmbedder::default().embed_text(text))
            }
            ProviderConfig::Local(embedder) => Ok(embedder.embed_text(text)),
        }
    }

    pub async fn generate_async(
        &self,
        prompt_text: &str,
        want_logprobs: bool,
    ) -> Result<GenerationResult> {
        match &self.config {
            ProviderConfig::OpenAi(cfg) => self.generate_openai(cfg, prompt_text, want_logprobs).await,
            ProviderConfig::Anthropic(cfg) => self.generate_anthropic(cfg, prompt_text).await,
            ProviderConfig::Local(_) => Ok(self.generate_local(prompt_text)),
        }
    }

    async fn embed_openai(&self, cfg: &OpenAiConfig, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", cfg.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": cfg.embed_model,
            "input": [text],
        });
        let value = self
            .post_with_retry(&url, &cfg.api_key, &payload, "embedding")
            .await
            .map_err(MinerError::Embedding)?;
        let parsed: OpenAiEmbeddingResponse = serde_json::from_value(value)
            .map_err(|e| MinerError::Embedding(format!("malformed embedding response: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| MinerError::Embedding("empty embedding response".to_string()))
    }

    async fn generate_openai(
        &self,
        cfg: &OpenAiConfig,
        prompt_text: &str,
        want_logprobs: bool,
    ) -> Result<GenerationResult> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "messages": [ { "role": "user", "content": prompt_text } ],
            "temperature": 0.0,
            "logprobs": want_logprobs,
        });
        let value = self
            .post_with_retry(&url, &cfg.api_key, &payload, "generation")
            .await
            .map_err(MinerError::Generation)?;
        let text = extract_chat_text(&value)
            .ok_or_else(|| MinerError::Generation("missing text in response".to_string()))?;
        let model_version = value
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.model)
            .to_string();
        let logprobs = extract_chat_logprobs(&value);
        Ok(GenerationResult {
            text,
            model_version,
            logprobs,
        })
    }

    async fn generate_anthropic(
        &self,
        cfg: &AnthropicConfig,
        prompt_text: &str,
    ) -> Result<GenerationResult> {
        let payload = json!({
            "model": self.model,
            "max_tokens": cfg.max_tokens,
            "messages": [ { "role": "user", "content": prompt_text } ],
        });
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match self
                .http
                .post("https://api.anthropic.com/v1/messages")
                .header("x-api-key", &cfg.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(MinerError::Generation(format!(
                            "anthropic request failed after {attempt} attempts: {err}"
                        )));
                    }
                    warn!(attempt, "anthropic request failed, retrying");
                    sleep(self.retry.delay(attempt, None)).await;
                    continue;
                }
            };
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= self.retry.max_attempts {
                    return Err(MinerError::Generation(format!(
                        "anthropic rate limited after {attempt} attempts"
                    )));
                }
                let wait = self.retry.delay(attempt, response.headers().get("retry-after"));
                sleep(wait).await;
                continue;
            }
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(MinerError::Generation(format!(
                    "anthropic returned status {status}: {body}"
                )));
            }
            let body: AnthropicResponse = response.json().await.map_err(|e| {
                MinerError::Generation(format!("failed to decode anthropic response: {e}"))
            })?;
            let text = body
                .content
                .into_iter()
                .find_map(|part| part.text)
                .ok_or_else(|| {
                    MinerError::Generation("missing text in anthropic response".to_string())
                })?;
            // anthropic does not expose token logprobs; the confidence
            // scorer falls back to its neutral model sub-score
            return Ok(GenerationResult {
                text,
                model_version: self.model.clone(),
                logprobs: None,
            });
        }
    }

    fn generate_local(&self, prompt_text: &str) -> GenerationResult {
        GenerationResult {
            text: synthesize_local_response(prompt_text),
            model_version: "local".to_string(),
            logprobs: None,
        }
    }

    async fn post_with_retry(
        &self,
        url: &str,
        api_key: &str,
        payload: &Value,
        operation: &str,
    ) -> std::result::Result<Value, String> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match self
                .http
                .post(url)
                .bearer_auth(api_key)
                .json(payload)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(format!(
                            "{operation} request failed after {attempt} attempts: {err}"
                        ));
                    }
                    warn!(attempt, operation, "request failed, retrying");
                    sleep(self.retry.delay(attempt, None)).await;
                    continue;
                }
            };
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= self.retry.max_attempts {
                    return Err(format!("{operation} rate limited after {attempt} attempts"));
                }
                let wait = self.retry.delay(attempt, response.headers().get("retry-after"));
                sleep(wait).await;
                continue;
            }
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(format!("{operation} returned status {status}: {body}"));
            }
            return serde_json::from_str(&body)
                .map_err(|e| format!("failed to decode {operation} response: {e}"));
        }
    }

    fn block_on<F: std::future::Future>(&self, future: F) -> Result<F::Output> {
        let rt = Runtime::new()
            .map_err(|e| MinerError::Other(format!("failed to create tokio runtime: {e}")))?;
        Ok(rt.block_on(future))
    }
}

impl Embedder for ModelClient {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let ProviderConfig::Local(embedder) = &self.config {
            return Ok(embedder.embed_text(text));
        }
        self.block_on(self.embed_async(text))?
    }
}

impl ModelAdapter for ModelClient {
    fn generate(&self, prompt_text: &str, want_logprobs: bool) -> Result<GenerationResult> {
        if matches!(self.config, ProviderConfig::Local(_)) {
            return Ok(self.generate_local(prompt_text));
        }
        self.block_on(self.generate_async(prompt_text, want_logprobs))?
    }
}

pub fn default_model(provider: ModelProvider) -> &'static str {
    match provider {
        ModelProvider::OpenAi => "gpt-4.1-mini",
        ModelProvider::Anthropic => "claude-3-5-sonnet",
        ModelProvider::Local => "local",
    }
}

fn read_api_key(var: &str) -> Result<String> {
    let value =
        env::var(var).map_err(|_| MinerError::Other(format!("{var} is not set")))?;
    if var.contains("OPENAI") && !value.starts_with("sk-") {
        return Err(MinerError::Other(format!("{var} must start with 'sk-'")));
    }
    if var.contains("ANTHROPIC") && !value.starts_with("sk-ant-") {
        return Err(MinerError::Other(format!("{var} must start with 'sk-ant-'")));
    }
    Ok(value)
}

/// Extractive stand-in used by the local provider: answers from the prompt's
/// own context block so the pipeline stays exercisable offline.
fn synthesize_local_response(prompt_text: &str) -> String {
    if prompt_text.contains("EVALUATE:") {
        return "The paraphrase states the same obligation.".to_string();
    }
    let context = extract_block(prompt_text, "CONTEXT:", "USER QUESTION:");
    let summary = first_words(&context, 40);
    if summary.is_empty() {
        "Insufficient context".to_string()
    } else {
        summary
    }
}

fn extract_block(text: &str, start_marker: &str, stop_marker: &str) -> String {
    if let Some(start_idx) = text.find(start_marker) {
        let after = &text[start_idx + start_marker.len()..];
        if let Some(end_idx) = after.find(stop_marker) {
            return after[..end_idx].trim().to_string();
        }
        return after.trim().to_string();
    }
    text.trim().to_string()
}

fn first_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

fn extract_chat_text(value: &Value) -> Option<String> {
    let choices = value.get("choices")?.as_array()?;
    let message = choices.first()?.get("message")?;
    message
        .get("content")
        .and_then(|content| content.as_str())
        .map(|text| text.trim().to_string())
}

fn extract_chat_logprobs(value: &Value) -> Option<Vec<f32>> {
    let choices = value.get("choices")?.as_array()?;
    let entries = choices
        .first()?
        .get("logprobs")?
        .get("content")?
        .as_array()?;
    let tokens: Vec<f32> = entries
        .iter()
        .filter_map(|entry| entry.get("logprob").and_then(|v| v.as_f64()))
        .map(|v| v as f32)
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens)
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_client_is_deterministic() {
        let client = ModelClient::local();
        let prompt = "SYSTEM: x\n\nCONTEXT:\nthe fee is ten dollars\n\nUSER QUESTION: fee?\n\nINSTRUCTIONS: answer";
        let a = client.generate(prompt, true).unwrap();
        let b = client.generate(prompt, true).unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.model_version, "local");
        assert!(a.logprobs.is_none());
        assert!(a.text.contains("fee"));
    }

    #[test]
    fn local_client_embeds_without_network() {
        let client = ModelClient::local();
        let v = client.embed("indemnification clause").unwrap();
        assert_eq!(v.len(), 64);
    }

    #[test]
    fn evaluation_probes_get_a_fixed_verdict() {
        let client = ModelClient::local();
        let out = client
            .generate("base prompt\n\nEVALUATE: Is the following paraphrase equivalent? \"x\"", true)
            .unwrap();
        assert!(out.text.contains("paraphrase"));
    }

    #[test]
    fn backoff_grows_exponentially_and_honors_retry_after() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(1, None), Duration::from_secs(2));
        assert_eq!(policy.delay(2, None), Duration::from_secs(4));
        let header = HeaderValue::from_static("7");
        assert_eq!(policy.delay(1, Some(&header)), Duration::from_secs(7));
    }

    #[test]
    fn chat_logprobs_parse_from_provider_json() {
        let value = json!({
            "choices": [{
                "message": { "content": "net thirty" },
                "logprobs": { "content": [
                    { "token": "net", "logprob": -0.1 },
                    { "token": " thirty", "logprob": -0.4 }
                ]}
            }]
        });
        assert_eq!(extract_chat_text(&value).unwrap(), "net thirty");
        let probs = extract_chat_logprobs(&value).unwrap();
        assert_eq!(probs.len(), 2);
        assert!((probs[0] + 0.1).abs() < 1e-6);
    }

    #[test]
    fn provider_names_round_trip() {
        for provider in [ModelProvider::OpenAi, ModelProvider::Anthropic, ModelProvider::Local] {
            assert_eq!(ModelProvider::from_str(provider.as_str()), Some(provider));
        }
        assert_eq!(ModelProvider::from_str("mystery"), None);
    }
}
