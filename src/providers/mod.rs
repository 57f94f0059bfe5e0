/*!
 * Client implementations for translation providers.
 *
 * All clients implement the `TranslationClient` capability: send a
 * `TranslationRequest` and support cooperative abort. The chat client
 * speaks the OpenAI-compatible chat-completions wire format used by
 * most hosted providers, the reasoning client speaks the OpenAI
 * Responses API, and the custom client targets a user-supplied HTTP
 * server.
 */

mod chat;
mod custom;
mod mock;
mod reasoning;

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::TranslationError;
use crate::settings::Settings;
use crate::translation::{ClientResponse, TranslationRequest};

pub use chat::ChatCompletionsClient;
pub use custom::CustomClient;
pub use mock::{MockBehaviour, MockTranslationClient};
pub use reasoning::OpenAIReasoningClient;

/// Abstract capability the translator depends on: dispatch one request,
/// support cooperative abort.
#[async_trait]
pub trait TranslationClient: Send + Sync {
    /// Display name of the client for logging
    fn name(&self) -> &str;

    /// Whether the client can stream deltas into the request
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Whether prompts should use the "developer" role for instructions
    fn uses_developer_role(&self) -> bool {
        false
    }

    /// Send the request and return the provider's reply
    async fn send(&self, request: &mut TranslationRequest)
        -> Result<ClientResponse, TranslationError>;

    /// Request cooperative cancellation of any in-flight request
    fn abort(&self);
}

/// The providers a project can translate with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Claude,
    Gemini,
    Mistral,
    DeepSeek,
    Bedrock,
    Custom,
}

impl ProviderKind {
    /// Properly capitalised provider name
    pub fn display_name(self) -> &'static str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Claude => "Claude",
            Self::Gemini => "Gemini",
            Self::Mistral => "Mistral",
            Self::DeepSeek => "DeepSeek",
            Self::Bedrock => "Bedrock",
            Self::Custom => "Custom Server",
        }
    }

    /// Parse a provider name, case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" | "gpt" => Some(Self::OpenAI),
            "claude" | "anthropic" => Some(Self::Claude),
            "gemini" | "google" => Some(Self::Gemini),
            "mistral" => Some(Self::Mistral),
            "deepseek" => Some(Self::DeepSeek),
            "bedrock" | "aws" => Some(Self::Bedrock),
            "custom" | "server" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Default OpenAI-compatible chat endpoint for the provider
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com/v1/chat/completions",
            Self::Claude => "https://api.anthropic.com/v1/chat/completions",
            Self::Gemini => {
                "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
            }
            Self::Mistral => "https://api.mistral.ai/v1/chat/completions",
            Self::DeepSeek => "https://api.deepseek.com/v1/chat/completions",
            Self::Bedrock | Self::Custom => "",
        }
    }

    /// Environment variable holding the default model name
    pub fn model_env_var(self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("OPENAI_MODEL"),
            Self::Claude => Some("CLAUDE_MODEL"),
            Self::Gemini => Some("GEMINI_MODEL"),
            Self::Mistral => Some("MISTRAL_MODEL"),
            Self::DeepSeek => Some("DEEPSEEK_MODEL"),
            Self::Bedrock | Self::Custom => None,
        }
    }

    /// Environment variable holding the API key
    pub fn api_key_env_var(self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Claude => Some("ANTHROPIC_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Mistral => Some("MISTRAL_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::Bedrock | Self::Custom => None,
        }
    }
}

/// OpenAI model families served by the Responses API rather than chat
/// completions.
pub fn is_reasoning_model(model: &str) -> bool {
    let model = model.to_lowercase();
    ["o1", "o3", "o4", "gpt-5"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

/// Build the client for a provider from settings.
///
/// Missing configuration (API key, server address) fails with
/// `ProviderConfigurationError` so the caller can ask the user to fix
/// their settings rather than retrying.
pub fn create_client(
    kind: ProviderKind,
    settings: &Settings,
) -> Result<Arc<dyn TranslationClient>, TranslationError> {
    match kind {
        ProviderKind::Custom => Ok(Arc::new(CustomClient::from_settings(settings)?)),
        ProviderKind::OpenAI => {
            let model = resolve_model(kind, settings);
            if model.as_deref().is_some_and(is_reasoning_model) {
                Ok(Arc::new(OpenAIReasoningClient::from_settings(settings)?))
            } else {
                Ok(Arc::new(ChatCompletionsClient::from_settings(kind, settings)?))
            }
        }
        _ => Ok(Arc::new(ChatCompletionsClient::from_settings(kind, settings)?)),
    }
}

/// The model to use: explicit setting first, provider env var second
pub fn resolve_model(kind: ProviderKind, settings: &Settings) -> Option<String> {
    settings.get_str("model").or_else(|| {
        kind.model_env_var()
            .and_then(|var| std::env::var(var).ok())
            .filter(|value| !value.is_empty())
    })
}

/// The API key to use: explicit setting first, provider env var second
pub fn resolve_api_key(kind: ProviderKind, settings: &Settings) -> Option<String> {
    settings.get_str("api_key").or_else(|| {
        kind.api_key_env_var()
            .and_then(|var| std::env::var(var).ok())
            .filter(|value| !value.is_empty())
    })
}

/// Incremental parser for server-sent event streams.
///
/// Chunks append to an internal buffer; complete `data:` payloads are
/// drained out as they arrive, surviving payloads split across chunks.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and drain the complete event payloads it closed
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut events: Vec<String> = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..boundary + 2).collect();
            let data: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim_start)
                .collect();
            if !data.is_empty() {
                events.push(data.join("\n"));
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing_shouldAcceptAliases() {
        assert_eq!(ProviderKind::from_name("OpenAI"), Some(ProviderKind::OpenAI));
        assert_eq!(ProviderKind::from_name("anthropic"), Some(ProviderKind::Claude));
        assert_eq!(ProviderKind::from_name("unknown"), None);
    }

    #[test]
    fn test_is_reasoning_model_shouldMatchFamilies() {
        assert!(is_reasoning_model("o3-mini"));
        assert!(is_reasoning_model("gpt-5"));
        assert!(!is_reasoning_model("gpt-4o"));
    }

    #[test]
    fn test_sse_buffer_shouldSurviveSplitEvents() {
        let mut buffer = SseBuffer::new();

        let events = buffer.feed("data: {\"a\":1}\n\ndata: {\"b\"");
        assert_eq!(events, vec!["{\"a\":1}".to_string()]);

        let events = buffer.feed(":2}\n\n");
        assert_eq!(events, vec!["{\"b\":2}".to_string()]);

        assert!(buffer.feed("data: tail without boundary").is_empty());
    }
}
