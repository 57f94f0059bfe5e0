use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::timecode::format_srt_timestamp;

/// A single subtitle line: timing, text and format-specific metadata.
///
/// Line numbers are globally unique within a subtitle file and are the
/// key that aligns translated lines with their originals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtitleLine {
    /// Line number, unique within the file; 0 marks an invalid line
    pub number: u32,

    /// Start time; `None` marks an invalid line removable by sanitise
    pub start: Option<Duration>,

    /// End time; never earlier than start for a valid line
    pub end: Option<Duration>,

    /// Display text; may contain newlines and inline markup
    pub text: String,

    /// Translated text, if this line has been translated
    pub translation: Option<String>,

    /// Original text carried as a back-reference on translated lines
    pub original: Option<String>,

    /// Format-specific metadata (ASS style, VTT cue id, speaker, ...)
    pub metadata: BTreeMap<String, Value>,
}

impl SubtitleLine {
    /// Create a line with timing and text
    pub fn new(number: u32, start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            number,
            start: Some(start),
            end: Some(end),
            text: text.into(),
            ..Default::default()
        }
    }

    /// Create a line carrying metadata
    pub fn with_metadata(
        number: u32,
        start: Duration,
        end: Duration,
        text: impl Into<String>,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            metadata,
            ..Self::new(number, start, end, text)
        }
    }

    /// Whether the line has a usable number and start time
    pub fn is_valid(&self) -> bool {
        self.number >= 1 && self.start.is_some()
    }

    /// Duration of the line, zero when timing is missing or inverted
    pub fn duration(&self) -> Duration {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            _ => Duration::ZERO,
        }
    }

    /// Whether the line has non-whitespace text
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Character count of the display text
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Build the translated counterpart of this line: same number and
    /// timing, translated text, with the source text as a back-reference.
    pub fn translated_copy(&self, translation: impl Into<String>) -> Self {
        Self {
            number: self.number,
            start: self.start,
            end: self.end,
            text: translation.into(),
            translation: None,
            original: Some(self.text.clone()),
            metadata: self.metadata.clone(),
        }
    }

    /// A metadata value as a string, if present and textual
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

impl fmt::Display for SubtitleLine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.number)?;
        writeln!(
            f,
            "{} --> {}",
            format_srt_timestamp(self.start.unwrap_or_default()),
            format_srt_timestamp(self.end.unwrap_or_default())
        )?;
        writeln!(f, "{}", self.text)
    }
}
