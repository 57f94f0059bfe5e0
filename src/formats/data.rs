use std::collections::BTreeMap;

use serde_json::Value;

use crate::model::SubtitleLine;

/// Container for parsed subtitle lines and file-level metadata.
///
/// Handlers fill `detected_format` with the canonical extension of the
/// format they parsed so callers can track the working format even when
/// the file arrived with a misleading extension.
#[derive(Debug, Clone, Default)]
pub struct SubtitleData {
    /// Parsed lines in file order
    pub lines: Vec<SubtitleLine>,

    /// File-level metadata (header text, styles, script info, ...)
    pub metadata: BTreeMap<String, Value>,

    /// First line number, when the source numbering does not start at 1
    pub start_line_number: Option<u32>,

    /// Canonical extension of the parsed format (".srt", ".vtt", ".ass")
    pub detected_format: Option<String>,
}

impl SubtitleData {
    /// Create subtitle data from lines alone
    pub fn with_lines(lines: Vec<SubtitleLine>) -> Self {
        Self {
            lines,
            ..Default::default()
        }
    }

    /// A metadata value as a string, if present and textual
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// A metadata value as a list of strings
    pub fn metadata_str_list(&self, key: &str) -> Vec<String> {
        self.metadata
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
