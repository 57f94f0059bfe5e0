use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::errors::TranslationError;
use crate::providers::TranslationClient;
use crate::translation::{ClientResponse, FinishReason, TranslationParser, TranslationRequest};

/// Behaviour modes for the mock client
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Translate every line to itself, tagged for inspection
    Echo,
    /// Return an empty response body
    Empty,
    /// Fail every request with a retryable server error
    FailServer,
    /// Fail the first N requests with a server error, then echo
    FailThenEcho { failures: usize },
    /// Report a content-filter refusal
    ContentFilter,
    /// Return the scripted responses in order, repeating the last
    Scripted(Vec<String>),
}

/// Scripted `TranslationClient` for exercising the pipeline in tests.
///
/// Counts send attempts and can simulate streaming by feeding the
/// response to the request as deltas before returning.
pub struct MockTranslationClient {
    behaviour: MockBehaviour,
    streaming: bool,
    calls: AtomicUsize,
    aborted: AtomicBool,
}

impl MockTranslationClient {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            streaming: false,
            calls: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
        }
    }

    /// A client that translates every line to itself
    pub fn echo() -> Self {
        Self::new(MockBehaviour::Echo)
    }

    /// A client that always fails with a retryable server error
    pub fn failing() -> Self {
        Self::new(MockBehaviour::FailServer)
    }

    /// A client that fails N times before echoing
    pub fn fail_then_echo(failures: usize) -> Self {
        Self::new(MockBehaviour::FailThenEcho { failures })
    }

    /// A client with scripted response texts
    pub fn scripted(responses: Vec<String>) -> Self {
        Self::new(MockBehaviour::Scripted(responses))
    }

    /// Enable streaming simulation: the response text is delivered to
    /// the request in small deltas before the final response returns.
    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Number of send attempts observed
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn echo_response(request: &TranslationRequest) -> String {
        let (lines, _, _) = TranslationParser::parse_text(&request.prompt.batch_prompt);
        let mut response: String = lines
            .iter()
            .map(|(number, text)| format!("<line n=\"{number}\">{text}</line>\n"))
            .collect();
        response.push_str("<summary>Mock translation</summary>");
        response
    }

    fn deliver(&self, request: &mut TranslationRequest, text: &str) {
        if !self.streaming || !request.is_streaming {
            return;
        }
        // Deltas of a few characters exercise the incremental parser
        let chars: Vec<char> = text.chars().collect();
        for chunk in chars.chunks(7) {
            let delta: String = chunk.iter().collect();
            request.process_streaming_delta(&delta);
        }
    }
}

#[async_trait]
impl TranslationClient for MockTranslationClient {
    fn name(&self) -> &str {
        "Mock"
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn send(
        &self,
        request: &mut TranslationRequest,
    ) -> Result<ClientResponse, TranslationError> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(TranslationError::Aborted);
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        let text = match &self.behaviour {
            MockBehaviour::Echo => Self::echo_response(request),
            MockBehaviour::Empty => String::new(),
            MockBehaviour::FailServer => {
                return Err(TranslationError::ServerResponse(
                    "mock server failure".to_string(),
                ));
            }
            MockBehaviour::FailThenEcho { failures } => {
                if call < *failures {
                    return Err(TranslationError::ServerResponse(format!(
                        "mock failure {}",
                        call + 1
                    )));
                }
                Self::echo_response(request)
            }
            MockBehaviour::ContentFilter => {
                return Ok(ClientResponse {
                    text: String::new(),
                    finish_reason: FinishReason::ContentFilter,
                    ..Default::default()
                });
            }
            MockBehaviour::Scripted(responses) => responses
                .get(call.min(responses.len().saturating_sub(1)))
                .cloned()
                .unwrap_or_default(),
        };

        self.deliver(request, &text);

        Ok(ClientResponse {
            text,
            finish_reason: FinishReason::Stop,
            ..Default::default()
        })
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}
