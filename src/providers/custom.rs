use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use url::Url;

use crate::errors::TranslationError;
use crate::providers::{SseBuffer, TranslationClient};
use crate::settings::Settings;
use crate::translation::{ClientResponse, FinishReason, TokenUsage, TranslationRequest};

const DEFAULT_ENDPOINT: &str = "/v1/chat/completions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_BACKOFF_SECS: f64 = 4.0;
const DEFAULT_MAX_RETRIES: u32 = 2;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Client for a user-supplied HTTP translation server.
///
/// Speaks a chat-completions-shaped JSON protocol against
/// `server_address` + `endpoint`, with an optional bearer key. Client
/// errors (4xx) fail immediately; server errors (5xx) and transport
/// failures are retried with exponential backoff up to `max_retries`,
/// after which the run is declared impossible.
pub struct CustomClient {
    client: Client,
    url: Url,
    api_key: Option<String>,
    model: Option<String>,
    max_retries: u32,
    backoff_time: Duration,
    supports_streaming: bool,
    aborted: AtomicBool,
}

#[derive(Debug, Serialize)]
struct CustomMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CustomRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<CustomMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CustomChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomChoiceDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomChoice {
    message: Option<CustomChoiceMessage>,
    delta: Option<CustomChoiceDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CustomResponse {
    choices: Option<Vec<CustomChoice>>,
    text: Option<String>,
    usage: Option<CustomUsage>,
}

impl CustomClient {
    /// Build a client from settings; `server_address` is required
    pub fn from_settings(settings: &Settings) -> Result<Self, TranslationError> {
        let server_address = settings
            .get_str("server_address")
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                TranslationError::ProviderConfiguration(
                    "Custom server requires a server address".to_string(),
                )
            })?;
        let endpoint = settings
            .get_str("endpoint")
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let base = Url::parse(&server_address).map_err(|error| {
            TranslationError::ProviderConfiguration(format!(
                "Invalid server address '{server_address}': {error}"
            ))
        })?;
        let url = base.join(&endpoint).map_err(|error| {
            TranslationError::ProviderConfiguration(format!(
                "Invalid endpoint '{endpoint}': {error}"
            ))
        })?;

        let timeout = settings
            .get_duration("timeout")
            .unwrap_or(None)
            .unwrap_or(DEFAULT_TIMEOUT);

        Ok(Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url,
            api_key: settings.get_str("api_key").filter(|key| !key.is_empty()),
            model: settings.get_str("model").filter(|model| !model.is_empty()),
            max_retries: settings
                .get_int("max_retries")
                .unwrap_or(None)
                .map(|value| value.max(0) as u32)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            backoff_time: settings
                .get_duration("backoff_time")
                .unwrap_or(None)
                .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_BACKOFF_SECS)),
            supports_streaming: settings
                .get_bool("supports_streaming")
                .unwrap_or(None)
                .unwrap_or(false),
            aborted: AtomicBool::new(false),
        })
    }

    fn build_body<'a>(&'a self, request: &'a TranslationRequest, stream: bool) -> CustomRequest<'a> {
        CustomRequest {
            model: self.model.as_deref(),
            messages: request
                .prompt
                .messages
                .iter()
                .map(|message| CustomMessage {
                    role: message.role.as_str(),
                    content: &message.content,
                })
                .collect(),
            temperature: request.temperature,
            stream,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_time
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }

    /// Classify a non-success response, reading the body before any
    /// other response accessor so error details survive.
    async fn classify_error(response: reqwest::Response) -> TranslationError {
        let status = response.status().as_u16();
        let bytes = response.bytes().await.unwrap_or_default();
        let body = String::from_utf8_lossy(&bytes).to_string();

        if (400..500).contains(&status) {
            TranslationError::ClientResponse {
                status,
                message: body,
            }
        } else {
            TranslationError::ServerResponse(format!("HTTP {status}: {body}"))
        }
    }

    fn parse_response(parsed: CustomResponse, started: Instant) -> ClientResponse {
        let (text, finish_reason) = match parsed.choices.as_ref().and_then(|c| c.first()) {
            Some(choice) => (
                choice
                    .message
                    .as_ref()
                    .and_then(|message| message.content.clone())
                    .or_else(|| parsed.text.clone())
                    .unwrap_or_default(),
                FinishReason::from_provider(choice.finish_reason.as_deref()),
            ),
            None => (parsed.text.clone().unwrap_or_default(), FinishReason::Stop),
        };

        let usage = parsed
            .usage
            .map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
                cached_tokens: None,
                reasoning_tokens: None,
            })
            .unwrap_or_default();

        ClientResponse {
            text,
            finish_reason,
            usage,
            reasoning: None,
            response_time: Some(started.elapsed()),
        }
    }

    async fn post_once(
        &self,
        request: &TranslationRequest,
    ) -> Result<ClientResponse, TranslationError> {
        let started = Instant::now();
        let mut http_request = self.client.post(self.url.clone());
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request
            .json(&self.build_body(request, false))
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    TranslationError::ServerResponse(format!("Request timed out: {error}"))
                } else {
                    TranslationError::ServerResponse(format!("Connection failed: {error}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }

        let parsed: CustomResponse = response
            .json()
            .await
            .map_err(|error| TranslationError::ResponseError(error.to_string()))?;
        Ok(Self::parse_response(parsed, started))
    }

    async fn post_streaming(
        &self,
        request: &mut TranslationRequest,
    ) -> Result<ClientResponse, TranslationError> {
        let started = Instant::now();
        let mut http_request = self.client.post(self.url.clone());
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request
            .json(&self.build_body(request, true))
            .send()
            .await
            .map_err(|error| TranslationError::ServerResponse(format!("Connection failed: {error}")))?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }

        let mut sse = SseBuffer::new();
        let mut stream = response.bytes_stream();
        let mut finish_reason = FinishReason::Stop;
        let mut usage = TokenUsage::default();

        while let Some(chunk) = stream.next().await {
            if self.aborted.load(Ordering::SeqCst) {
                return Err(TranslationError::Aborted);
            }

            let chunk =
                chunk.map_err(|error| TranslationError::ServerResponse(error.to_string()))?;
            for payload in sse.feed(&String::from_utf8_lossy(&chunk)) {
                if payload == "[DONE]" {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<CustomResponse>(&payload) else {
                    continue;
                };

                if let Some(custom_usage) = parsed.usage {
                    usage = TokenUsage {
                        prompt_tokens: custom_usage.prompt_tokens,
                        output_tokens: custom_usage.completion_tokens,
                        total_tokens: custom_usage.total_tokens,
                        cached_tokens: None,
                        reasoning_tokens: None,
                    };
                }
                if let Some(choice) = parsed.choices.as_ref().and_then(|c| c.first()) {
                    if let Some(delta) = choice.delta.as_ref().and_then(|d| d.content.as_deref()) {
                        request.process_streaming_delta(delta);
                    }
                    if let Some(reason) = choice.finish_reason.as_deref() {
                        finish_reason = FinishReason::from_provider(Some(reason));
                    }
                }
            }
        }

        Ok(ClientResponse {
            text: request.buffered_text().to_string(),
            finish_reason,
            usage,
            reasoning: None,
            response_time: Some(started.elapsed()),
        })
    }
}

#[async_trait]
impl TranslationClient for CustomClient {
    fn name(&self) -> &str {
        "Custom Server"
    }

    fn supports_streaming(&self) -> bool {
        self.supports_streaming
    }

    async fn send(
        &self,
        request: &mut TranslationRequest,
    ) -> Result<ClientResponse, TranslationError> {
        let mut attempt: u32 = 0;
        loop {
            if self.aborted.load(Ordering::SeqCst) {
                return Err(TranslationError::Aborted);
            }

            debug!(
                "CustomClient: POST {} (attempt {})",
                self.url,
                attempt + 1
            );

            let result = if request.is_streaming {
                self.post_streaming(request).await
            } else {
                self.post_once(request).await
            };

            match result {
                Ok(response) => return Ok(response),
                Err(error @ TranslationError::ServerResponse(_)) => {
                    if attempt >= self.max_retries {
                        return Err(TranslationError::Impossible(format!(
                            "Custom server failed after {} attempts: {error}",
                            attempt + 1
                        )));
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "CustomClient attempt {} failed ({error}), retrying in {:.1}s",
                        attempt + 1,
                        delay.as_secs_f64()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}
