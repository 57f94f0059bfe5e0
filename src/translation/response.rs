use std::collections::BTreeMap;
use std::time::Duration;

/// Why the provider stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ContentFilter,
    Error,
    Aborted,
}

impl FinishReason {
    /// Map a provider finish/stop reason string onto the canonical set
    pub fn from_provider(reason: Option<&str>) -> Self {
        match reason {
            None => Self::Stop,
            Some(value) => match value {
                "stop" | "end_turn" | "completed" | "stop_sequence" => Self::Stop,
                "length" | "max_tokens" | "max_output_tokens" | "incomplete" => Self::Length,
                "content_filter" | "refusal" => Self::ContentFilter,
                "aborted" => Self::Aborted,
                _ => Self::Error,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub cached_tokens: Option<u64>,
    pub reasoning_tokens: Option<u64>,
}

/// Raw reply from a translation client, before parsing
#[derive(Debug, Clone, Default)]
pub struct ClientResponse {
    /// The model's text output
    pub text: String,

    /// Why generation stopped
    pub finish_reason: FinishReason,

    /// Token usage, when the provider reports it
    pub usage: TokenUsage,

    /// Chain-of-thought text, when the provider returns it
    pub reasoning: Option<String>,

    /// Wall-clock time of the request
    pub response_time: Option<Duration>,
}

/// A parsed translation of one batch.
///
/// `lines` maps line numbers to translated text; summaries are optional
/// extras some prompts request from the model.
#[derive(Debug, Clone, Default)]
pub struct Translation {
    /// The raw model text the translation was parsed from
    pub text: String,

    /// Parsed line translations keyed by line number
    pub lines: BTreeMap<u32, String>,

    /// Batch summary, if the model supplied one
    pub summary: Option<String>,

    /// Scene summary, if the model supplied one
    pub scene_summary: Option<String>,

    /// Chain-of-thought text, when the provider returns it
    pub reasoning: Option<String>,

    /// Token usage for the request
    pub usage: TokenUsage,

    /// Why generation stopped
    pub finish_reason: FinishReason,
}

impl Translation {
    /// Wrap a client response; parsing fills in the lines afterwards
    pub fn from_response(response: &ClientResponse) -> Self {
        Self {
            text: response.text.clone(),
            reasoning: response.reasoning.clone(),
            usage: response.usage,
            finish_reason: response.finish_reason,
            ..Default::default()
        }
    }

    /// A partial translation assembled from streaming deltas
    pub fn partial(lines: BTreeMap<u32, String>, text: String) -> Self {
        Self {
            text,
            lines,
            ..Default::default()
        }
    }

    /// Whether any lines were parsed out of the response
    pub fn has_lines(&self) -> bool {
        !self.lines.is_empty()
    }
}
