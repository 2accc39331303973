use crate::llm_provider::*;
use crate::sse::{SseDecoder, SseEvent};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use venturelab_core::LlmConfig;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Gateway rate limit exceeded")]
    RateLimited,

    #[error("Gateway credits exhausted")]
    PaymentRequired,

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited,
            StatusCode::PAYMENT_REQUIRED => GatewayError::PaymentRequired,
            _ => GatewayError::Status {
                status: status.as_u16(),
                body: truncate(&body, 512),
            },
        }
    }
}

/// Configuration for an OpenAI-compatible chat completions gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL for the API (e.g., "https://api.openai.com/v1")
    pub base_url: String,
    /// Model to use
    pub model: String,
    /// Optional API key sent as a bearer token
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Provider name for logs
    pub provider_name: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 60,
            provider_name: "gateway".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn from_settings(settings: &LlmConfig) -> Self {
        Self {
            base_url: settings.gateway_url.clone(),
            model: settings.model.clone(),
            api_key: settings.api_key().map(str::to_string),
            timeout_secs: settings.timeout_secs,
            ..Default::default()
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Chat completions client. One attempt per call: failures go straight back
/// to the handler, which reports them to the user.
///
/// `timeout_secs` bounds a whole blocking completion. Streams are bounded
/// per read instead, so a long reply that keeps producing tokens is not cut off.
pub struct GatewayProvider {
    config: GatewayConfig,
    client: Client,
}

impl GatewayProvider {
    pub fn new(config: GatewayConfig) -> LLMResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .read_timeout(timeout)
            .build()?;

        Ok(Self { config, client })
    }

    pub fn from_settings(settings: &LlmConfig) -> LLMResult<Self> {
        Self::new(GatewayConfig::from_settings(settings))
    }

    fn request_body(&self, messages: &[Message], config: &GenerationConfig, stream: bool) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": config.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = config.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if config.json_response {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    async fn send(&self, body: &Value, stream: bool) -> LLMResult<reqwest::Response> {
        let mut request = self.client.post(self.config.completions_url()).json(body);
        if !stream {
            request = request.timeout(Duration::from_secs(self.config.timeout_secs));
        }
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                provider = %self.config.provider_name,
                status = status.as_u16(),
                "Gateway request failed"
            );
            return Err(GatewayError::from_status(status, body));
        }
        Ok(response)
    }
}

#[async_trait]
impl LLMProvider for GatewayProvider {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        let body = self.request_body(messages, config, false);
        debug!(
            model = %self.config.model,
            messages = messages.len(),
            "Sending chat completion"
        );

        let response = self.send(&body, false).await?;
        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        completion.into_llm_response(&self.config.model)
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LLMResult<TokenStream> {
        let body = self.request_body(messages, config, true);
        let response = self.send(&body, true).await?;
        Ok(token_stream(response.bytes_stream()))
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.config.base_url.trim_end_matches('/'));
        let mut request = self.client.get(url);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }
        matches!(request.send().await, Ok(resp) if resp.status().is_success())
    }

    fn provider_name(&self) -> &str {
        &self.config.provider_name
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

struct StreamState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<LLMResult<String>>,
    done: bool,
}

/// Adapts a raw SSE byte stream into a stream of content deltas.
pub fn token_stream<S>(body: S) -> TokenStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let state = StreamState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            let events = match state.body.next().await {
                Some(Ok(chunk)) => state.decoder.push(&chunk),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(GatewayError::Http(e)), state));
                }
                None => {
                    state.done = true;
                    state.decoder.finish().into_iter().collect()
                }
            };

            for event in events {
                match event {
                    SseEvent::Data(payload) => match extract_delta(&payload) {
                        Ok(Some(token)) => state.pending.push_back(Ok(token)),
                        Ok(None) => {}
                        Err(e) => {
                            state.pending.push_back(Err(e));
                            state.done = true;
                            break;
                        }
                    },
                    SseEvent::Done => {
                        state.done = true;
                        break;
                    }
                }
            }
        }
    });

    Box::pin(stream) as Pin<Box<dyn Stream<Item = LLMResult<String>> + Send>>
}

/// Pulls `choices[0].delta.content` out of one streamed chunk.
pub fn extract_delta(payload: &str) -> LLMResult<Option<String>> {
    let chunk: ChatCompletionChunk = serde_json::from_str(payload)
        .map_err(|e| GatewayError::InvalidResponse(format!("bad stream chunk: {}", e)))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

impl ChatCompletionResponse {
    fn into_llm_response(self, requested_model: &str) -> LLMResult<LLMResponse> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::InvalidResponse("no choices returned".to_string()))?;

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            total_tokens: self.usage.map(|u| u.total_tokens),
            finish_reason: choice.finish_reason,
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}
