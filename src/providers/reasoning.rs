use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, error, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::errors::TranslationError;
use crate::providers::{resolve_api_key, resolve_model, ProviderKind, SseBuffer, TranslationClient};
use crate::settings::Settings;
use crate::translation::{ClientResponse, FinishReason, TokenUsage, TranslationRequest};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/responses";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const VALID_EFFORTS: [&str; 4] = ["minimal", "low", "medium", "high"];

/// Client for the OpenAI Responses API used by the reasoning model
/// family.
///
/// Supports streaming: text deltas are pushed into the request as they
/// arrive and the event loop finishes gracefully on completion, failure
/// or abort.
pub struct OpenAIReasoningClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    reasoning_effort: String,
    aborted: AtomicBool,
}

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(rename = "type")]
    item_type: &'a str,
}

#[derive(Debug, Serialize)]
struct ReasoningOptions<'a> {
    effort: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    reasoning: ReasoningOptions<'a>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    item_type: Option<String>,
    content: Option<Vec<OutputContent>>,
    summary: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct TokenDetails {
    reasoning_tokens: Option<u64>,
    cached_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    total_tokens: Option<u64>,
    output_tokens_details: Option<TokenDetails>,
    input_tokens_details: Option<TokenDetails>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    output: Option<Vec<OutputItem>>,
    usage: Option<ResponsesUsage>,
    status: Option<String>,
    incomplete_details: Option<IncompleteDetails>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    delta: Option<String>,
    response: Option<ResponsesResponse>,
    error: Option<Value>,
}

impl OpenAIReasoningClient {
    /// Build a reasoning client from settings
    pub fn from_settings(settings: &Settings) -> Result<Self, TranslationError> {
        let api_key = resolve_api_key(ProviderKind::OpenAI, settings).ok_or_else(|| {
            TranslationError::ProviderConfiguration("No API key configured for OpenAI".to_string())
        })?;
        let model = resolve_model(ProviderKind::OpenAI, settings).ok_or_else(|| {
            TranslationError::ProviderConfiguration("No model configured for OpenAI".to_string())
        })?;

        let reasoning_effort = settings
            .get_str("reasoning_effort")
            .unwrap_or_else(|| "low".to_string());
        if !VALID_EFFORTS.contains(&reasoning_effort.as_str()) {
            return Err(TranslationError::ProviderConfiguration(format!(
                "Invalid reasoning effort '{reasoning_effort}', expected one of {VALID_EFFORTS:?}"
            )));
        }

        let endpoint_setting = settings
            .get_str("endpoint")
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let endpoint = Url::parse(&endpoint_setting).map_err(|e| {
            TranslationError::ProviderConfiguration(format!(
                "Invalid endpoint '{endpoint_setting}': {e}"
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
            endpoint,
            api_key,
            model,
            reasoning_effort,
            aborted: AtomicBool::new(false),
        })
    }

    fn build_request<'a>(
        &'a self,
        request: &'a TranslationRequest,
        stream: bool,
    ) -> Result<ResponsesRequest<'a>, TranslationError> {
        if request.prompt.messages.is_empty() {
            return Err(TranslationError::Impossible(
                "No content provided for translation".to_string(),
            ));
        }

        // Typed roles guarantee membership of the accepted set; the
        // check documents the wire contract
        let input: Vec<InputMessage> = request
            .prompt
            .messages
            .iter()
            .map(|message| {
                let role = message.role.as_str();
                debug_assert!(matches!(role, "user" | "system" | "developer" | "assistant"));
                InputMessage {
                    role,
                    content: &message.content,
                    item_type: "message",
                }
            })
            .collect();

        Ok(ResponsesRequest {
            model: &self.model,
            input,
            instructions: request.prompt.system_prompt.as_deref(),
            reasoning: ReasoningOptions {
                effort: &self.reasoning_effort,
            },
            stream,
        })
    }

    /// Dump everything the server tells us about a rejected request
    /// before surfacing the failure.
    fn log_bad_request(status: StatusCode, request_id: Option<&str>, body: &str) {
        error!(
            "OpenAI bad request: status={} request_id={} body={}",
            status,
            request_id.unwrap_or("<none>"),
            body
        );
    }

    fn extract_text(response: &ResponsesResponse) -> (String, Option<String>) {
        let mut text_parts: Vec<String> = Vec::new();
        let mut reasoning_parts: Vec<String> = Vec::new();

        for item in response.output.as_deref().unwrap_or_default() {
            if item.item_type.as_deref() == Some("reasoning") {
                for part in item.summary.as_deref().unwrap_or_default() {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        reasoning_parts.push(text.to_string());
                    }
                }
                continue;
            }
            for content in item.content.as_deref().unwrap_or_default() {
                if let Some(text) = &content.text {
                    text_parts.push(text.clone());
                }
            }
        }

        let reasoning = if reasoning_parts.is_empty() {
            None
        } else {
            Some(reasoning_parts.join("\n"))
        };
        (text_parts.join("\n"), reasoning)
    }

    fn finish_reason(response: &ResponsesResponse) -> FinishReason {
        match response.status.as_deref() {
            Some("completed") | None => FinishReason::Stop,
            Some("incomplete") => {
                match response
                    .incomplete_details
                    .as_ref()
                    .and_then(|details| details.reason.as_deref())
                {
                    Some("max_output_tokens") => FinishReason::Length,
                    Some("content_filter") => FinishReason::ContentFilter,
                    _ => FinishReason::Length,
                }
            }
            Some(_) => FinishReason::Error,
        }
    }

    fn build_response(
        response: &ResponsesResponse,
        streamed_text: Option<String>,
        started: Instant,
    ) -> ClientResponse {
        let (extracted, reasoning) = Self::extract_text(response);
        let text = match streamed_text {
            Some(streamed) if !streamed.is_empty() => streamed,
            _ => extracted,
        };

        let usage = response
            .usage
            .as_ref()
            .map(|usage| TokenUsage {
                prompt_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                total_tokens: usage.total_tokens,
                cached_tokens: usage
                    .input_tokens_details
                    .as_ref()
                    .and_then(|details| details.cached_tokens),
                reasoning_tokens: usage
                    .output_tokens_details
                    .as_ref()
                    .and_then(|details| details.reasoning_tokens),
            })
            .unwrap_or_default();

        ClientResponse {
            text,
            finish_reason: Self::finish_reason(response),
            usage,
            reasoning,
            response_time: Some(started.elapsed()),
        }
    }

    async fn handle_error_response(response: reqwest::Response) -> TranslationError {
        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());

        match status.as_u16() {
            400 => {
                Self::log_bad_request(status, request_id.as_deref(), &body);
                TranslationError::ClientResponse {
                    status: 400,
                    message: body,
                }
            }
            401 | 403 => TranslationError::ProviderConfiguration(format!(
                "Authentication failed ({status}): {body}"
            )),
            429 => TranslationError::ServerResponse(format!("Rate limited: {body}")),
            code if (400..500).contains(&code) => TranslationError::ClientResponse {
                status: code,
                message: body,
            },
            _ => TranslationError::ServerResponse(format!("HTTP {status}: {body}")),
        }
    }

    async fn send_streaming(
        &self,
        request: &mut TranslationRequest,
    ) -> Result<ClientResponse, TranslationError> {
        let body = self.build_request(request, true)?;
        let started = Instant::now();

        debug!(
            "OpenAIReasoningClient: streaming responses request model={} messages={}",
            self.model,
            body.input.len()
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| TranslationError::ServerResponse(error.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let mut sse = SseBuffer::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            if self.aborted.load(Ordering::SeqCst) {
                return Err(TranslationError::Aborted);
            }

            let chunk: bytes::Bytes =
                chunk.map_err(|error| TranslationError::ServerResponse(error.to_string()))?;
            let chunk_text = String::from_utf8_lossy(&chunk);

            for payload in sse.feed(&chunk_text) {
                if payload == "[DONE]" {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<StreamEvent>(&payload) else {
                    continue;
                };

                match event.event_type.as_str() {
                    "response.output_text.delta" => {
                        if let Some(delta) = &event.delta {
                            request.process_streaming_delta(delta);
                        }
                    }
                    "response.completed" => {
                        let response = event.response.ok_or_else(|| {
                            TranslationError::ResponseError(
                                "Completed event without a response".to_string(),
                            )
                        })?;
                        return Ok(Self::build_response(
                            &response,
                            Some(request.buffered_text().to_string()),
                            started,
                        ));
                    }
                    "response.failed" | "response.incomplete" => {
                        if let Some(error) = &event.error {
                            error!("Streaming error event: {error}");
                        } else {
                            error!(
                                "Streaming {} event without explicit error object",
                                event.event_type
                            );
                        }
                        let response = event.response.unwrap_or(ResponsesResponse {
                            output: None,
                            usage: None,
                            status: Some("failed".to_string()),
                            incomplete_details: None,
                        });
                        return Ok(Self::build_response(
                            &response,
                            Some(request.buffered_text().to_string()),
                            started,
                        ));
                    }
                    _ => {}
                }
            }
        }

        Err(TranslationError::ResponseError(
            "Streaming did not complete successfully".to_string(),
        ))
    }

    async fn send_blocking(
        &self,
        request: &TranslationRequest,
    ) -> Result<ClientResponse, TranslationError> {
        let body = self.build_request(request, false)?;
        let started = Instant::now();

        debug!(
            "OpenAIReasoningClient: responses request model={} effort={} messages={}",
            self.model,
            self.reasoning_effort,
            body.input.len()
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    TranslationError::ServerResponse(format!("Request timed out: {error}"))
                } else {
                    TranslationError::ServerResponse(error.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let parsed: ResponsesResponse = response
            .json()
            .await
            .map_err(|error| TranslationError::ResponseError(error.to_string()))?;

        if self.aborted.load(Ordering::SeqCst) {
            return Err(TranslationError::Aborted);
        }

        let client_response = Self::build_response(&parsed, None, started);
        if client_response.text.is_empty() {
            warn!("OpenAIReasoningClient: no text content in response");
        }
        Ok(client_response)
    }
}

#[async_trait]
impl TranslationClient for OpenAIReasoningClient {
    fn name(&self) -> &str {
        "OpenAI Reasoning"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn uses_developer_role(&self) -> bool {
        true
    }

    async fn send(
        &self,
        request: &mut TranslationRequest,
    ) -> Result<ClientResponse, TranslationError> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(TranslationError::Aborted);
        }

        if request.is_streaming {
            self.send_streaming(request).await
        } else {
            self.send_blocking(request).await
        }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}
