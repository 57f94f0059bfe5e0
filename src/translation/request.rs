use std::collections::BTreeMap;
use std::sync::Arc;

use crate::translation::{Translation, TranslationParser, TranslationPrompt};

/// Callback invoked with a partial translation whenever a streaming
/// delta completes one or more lines.
pub type StreamingCallback = Arc<dyn Fn(&Translation) + Send + Sync>;

/// A single request to a translation client.
///
/// When streaming, deltas accumulate in a buffer; each time a complete
/// `<line>` tag closes the newly parsed lines are merged into the
/// partial translation and the callback fires. The scan position is
/// tracked so the buffer is never re-parsed from the start.
pub struct TranslationRequest {
    /// The prompt to send
    pub prompt: TranslationPrompt,

    /// Sampling temperature, when the provider supports it
    pub temperature: Option<f32>,

    /// Whether this request streams; requires both provider support and
    /// a callback to deliver partials to
    pub is_streaming: bool,

    callback: Option<StreamingCallback>,
    buffer: String,
    scan_offset: usize,
    partial_lines: BTreeMap<u32, String>,
}

impl TranslationRequest {
    /// Create a non-streaming request
    pub fn new(prompt: TranslationPrompt) -> Self {
        Self {
            prompt,
            temperature: None,
            is_streaming: false,
            callback: None,
            buffer: String::new(),
            scan_offset: 0,
            partial_lines: BTreeMap::new(),
        }
    }

    /// Create a request that streams when the provider supports it
    pub fn with_streaming(
        prompt: TranslationPrompt,
        callback: Option<StreamingCallback>,
        provider_supports_streaming: bool,
    ) -> Self {
        let is_streaming = callback.is_some() && provider_supports_streaming;
        Self {
            prompt,
            temperature: None,
            is_streaming,
            callback,
            buffer: String::new(),
            scan_offset: 0,
            partial_lines: BTreeMap::new(),
        }
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Append a streaming delta to the buffer, firing the callback when
    /// new complete lines have closed.
    pub fn process_streaming_delta(&mut self, delta: &str) {
        self.buffer.push_str(delta);

        let (new_lines, consumed) =
            TranslationParser::parse_closed_lines(&self.buffer, self.scan_offset);
        if new_lines.is_empty() {
            return;
        }

        self.scan_offset = consumed;
        for (number, text) in new_lines {
            self.partial_lines.insert(number, text);
        }

        if let Some(callback) = &self.callback {
            let partial = Translation::partial(self.partial_lines.clone(), self.buffer.clone());
            callback(&partial);
        }
    }

    /// Discard accumulated streaming state before a retry, so a second
    /// attempt starts from an empty buffer.
    pub fn reset_stream(&mut self) {
        self.buffer.clear();
        self.scan_offset = 0;
        self.partial_lines.clear();
    }

    /// The full text accumulated from streaming deltas
    pub fn buffered_text(&self) -> &str {
        &self.buffer
    }

    /// Lines parsed from the stream so far
    pub fn partial_lines(&self) -> &BTreeMap<u32, String> {
        &self.partial_lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn streaming_request(collector: Arc<Mutex<Vec<Translation>>>) -> TranslationRequest {
        let callback: StreamingCallback = Arc::new(move |translation: &Translation| {
            collector.lock().push(translation.clone());
        });
        TranslationRequest::with_streaming(TranslationPrompt::default(), Some(callback), true)
    }

    #[test]
    fn test_streaming_deltas_shouldFireOncePerClosedLine() {
        let partials: Arc<Mutex<Vec<Translation>>> = Arc::new(Mutex::new(Vec::new()));
        let mut request = streaming_request(partials.clone());

        // Deltas that do not close a line fire no callback
        request.process_streaming_delta("Hel");
        request.process_streaming_delta("lo");
        assert!(partials.lock().is_empty());

        // Closing a line fires exactly one callback with the parsed text
        request.process_streaming_delta("\n<line n=1>Hola</line>");
        {
            let seen = partials.lock();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].lines.get(&1).map(String::as_str), Some("Hola"));
        }

        // The buffer is the concatenation of all deltas
        assert_eq!(request.buffered_text(), "Hello\n<line n=1>Hola</line>");
    }

    #[test]
    fn test_streaming_deltas_withSplitTag_shouldNotReparseConsumedInput() {
        let partials: Arc<Mutex<Vec<Translation>>> = Arc::new(Mutex::new(Vec::new()));
        let mut request = streaming_request(partials.clone());

        request.process_streaming_delta("<line n=\"1\">Un</line><line n=\"2\">De");
        request.process_streaming_delta("ux</line>");

        let seen = partials.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].lines.len(), 1);
        assert_eq!(seen[1].lines.len(), 2);
        assert_eq!(seen[1].lines.get(&2).map(String::as_str), Some("Deux"));
    }

    #[test]
    fn test_streaming_withoutCallback_shouldNotStream() {
        let request =
            TranslationRequest::with_streaming(TranslationPrompt::default(), None, true);
        assert!(!request.is_streaming);

        let partials: Arc<Mutex<Vec<Translation>>> = Arc::new(Mutex::new(Vec::new()));
        let callback: StreamingCallback = {
            let partials = partials.clone();
            Arc::new(move |translation: &Translation| {
                partials.lock().push(translation.clone());
            })
        };
        let request = TranslationRequest::with_streaming(
            TranslationPrompt::default(),
            Some(callback),
            false,
        );
        assert!(!request.is_streaming);
    }
}
