use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::TranslationError;
use crate::providers::{resolve_api_key, resolve_model, ProviderKind, TranslationClient};
use crate::settings::Settings;
use crate::translation::{ClientResponse, FinishReason, TokenUsage, TranslationRequest};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat-completions client for OpenAI-compatible providers.
///
/// One wire format covers OpenAI, DeepSeek, Mistral, Claude, Gemini and
/// compatible gateways; the provider preset supplies the endpoint and
/// authentication style.
pub struct ChatCompletionsClient {
    client: Client,
    kind: ProviderKind,
    endpoint: Url,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    prompt_cache_key: Option<String>,
    aborted: AtomicBool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_cache_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    cached_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

impl ChatCompletionsClient {
    /// Build a client for a provider from settings.
    pub fn from_settings(kind: ProviderKind, settings: &Settings) -> Result<Self, TranslationError> {
        let endpoint_setting = settings
            .get_str("endpoint")
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| kind.default_endpoint().to_string());
        if endpoint_setting.is_empty() {
            return Err(TranslationError::ProviderConfiguration(format!(
                "{} requires an endpoint",
                kind.display_name()
            )));
        }
        let endpoint = Url::parse(&endpoint_setting).map_err(|error| {
            TranslationError::ProviderConfiguration(format!(
                "Invalid endpoint '{endpoint_setting}': {error}"
            ))
        })?;

        let api_key = resolve_api_key(kind, settings).ok_or_else(|| {
            TranslationError::ProviderConfiguration(format!(
                "No API key configured for {}",
                kind.display_name()
            ))
        })?;

        let model = resolve_model(kind, settings).ok_or_else(|| {
            TranslationError::ProviderConfiguration(format!(
                "No model configured for {}",
                kind.display_name()
            ))
        })?;

        let timeout = settings
            .get_duration("timeout")
            .unwrap_or(None)
            .unwrap_or(DEFAULT_TIMEOUT);

        let max_tokens = settings
            .get_int("max_tokens")
            .unwrap_or(None)
            .map(|value| value.max(1) as u32);

        Ok(Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            kind,
            endpoint,
            api_key,
            model,
            max_tokens,
            prompt_cache_key: settings.get_str("prompt_cache_key"),
            aborted: AtomicBool::new(false),
        })
    }

    fn build_request<'a>(&'a self, request: &'a TranslationRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: request
                .prompt
                .messages
                .iter()
                .map(|message| ChatMessage {
                    role: message.role.as_str(),
                    content: &message.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: self.max_tokens,
            prompt_cache_key: self.prompt_cache_key.as_deref(),
        }
    }

    fn classify_status(status: StatusCode, body: String) -> TranslationError {
        match status.as_u16() {
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

    fn classify_transport(error: reqwest::Error) -> TranslationError {
        if error.is_timeout() {
            TranslationError::ServerResponse(format!("Request timed out: {error}"))
        } else if error.is_connect() {
            TranslationError::ServerResponse(format!("Connection failed: {error}"))
        } else {
            TranslationError::ServerResponse(error.to_string())
        }
    }
}

#[async_trait]
impl TranslationClient for ChatCompletionsClient {
    fn name(&self) -> &str {
        self.kind.display_name()
    }

    async fn send(
        &self,
        request: &mut TranslationRequest,
    ) -> Result<ClientResponse, TranslationError> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(TranslationError::Aborted);
        }

        let body = self.build_request(request);
        debug!(
            "{}: chat completion model={} messages={}",
            self.name(),
            self.model,
            body.messages.len()
        );

        let started = Instant::now();
        let mut http_request = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json");

        // Claude authenticates with an API-key header; everyone else is
        // a bearer token
        http_request = if self.kind == ProviderKind::Claude {
            http_request
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
        } else {
            http_request.bearer_auth(&self.api_key)
        };

        let response = http_request
            .json(&body)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(Self::classify_status(status, body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|error| TranslationError::ResponseError(error.to_string()))?;

        if self.aborted.load(Ordering::SeqCst) {
            return Err(TranslationError::Aborted);
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TranslationError::ResponseError("No choices in response".to_string()))?;
        let text = choice.message.content.unwrap_or_default();
        if text.is_empty() {
            warn!("{}: empty completion content", self.name());
        }

        let usage = parsed.usage.map(|usage| TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            cached_tokens: usage
                .prompt_tokens_details
                .and_then(|details| details.cached_tokens),
            reasoning_tokens: None,
        });

        Ok(ClientResponse {
            text,
            finish_reason: FinishReason::from_provider(choice.finish_reason.as_deref()),
            usage: usage.unwrap_or_default(),
            reasoning: None,
            response_time: Some(started.elapsed()),
        })
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_key() -> Settings {
        Settings::from_pairs([("api_key", "test-key"), ("model", "test-model")])
    }

    #[test]
    fn test_from_settings_withoutApiKey_shouldFailConfiguration() {
        let settings = Settings::from_pairs([("model", "test-model")]);
        // Guard against ambient credentials leaking into the test
        if std::env::var("MISTRAL_API_KEY").is_ok() {
            return;
        }
        let result = ChatCompletionsClient::from_settings(ProviderKind::Mistral, &settings);
        assert!(matches!(
            result,
            Err(TranslationError::ProviderConfiguration(_))
        ));
    }

    #[test]
    fn test_from_settings_withKeyAndModel_shouldBuild() {
        let client =
            ChatCompletionsClient::from_settings(ProviderKind::OpenAI, &settings_with_key())
                .unwrap();
        assert_eq!(client.name(), "OpenAI");
        assert_eq!(
            client.endpoint.as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_classify_status_shouldMapTaxonomy() {
        let error = ChatCompletionsClient::classify_status(
            StatusCode::BAD_REQUEST,
            "bad".to_string(),
        );
        assert!(matches!(
            error,
            TranslationError::ClientResponse { status: 400, .. }
        ));
        assert!(!error.is_retryable());

        let error = ChatCompletionsClient::classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            "slow down".to_string(),
        );
        assert!(error.is_retryable());

        let error = ChatCompletionsClient::classify_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            "oops".to_string(),
        );
        assert!(error.is_retryable());

        let error =
            ChatCompletionsClient::classify_status(StatusCode::UNAUTHORIZED, "who?".to_string());
        assert!(error.is_fatal());
    }
}
