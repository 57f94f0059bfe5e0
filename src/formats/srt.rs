use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::SubtitleError;
use crate::formats::{SubtitleData, SubtitleFileHandler};
use crate::model::SubtitleLine;
use crate::timecode::{format_srt_timestamp, parse_srt_timestamp};

static TIMING_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2,}:\d{2}:\d{2}[,.]\d{3})\s*-->\s*(\d{2,}:\d{2}:\d{2}[,.]\d{3})\s*$")
        .unwrap()
});

static SNIFF_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\d+\s*\r?\n\d{2}:\d{2}:\d{2},\d{3}\s*-->\s*\d{2}:\d{2}:\d{2},\d{3}")
        .unwrap()
});

/// Handler for the SubRip (.srt) format.
///
/// Inline markup such as `<i>` and `<b>` passes through untouched. The
/// composer renumbers cues sequentially unless reindexing is disabled.
pub struct SrtFileHandler {
    reindex: bool,
}

impl SrtFileHandler {
    /// Create a handler with default behaviour (reindex on compose)
    pub fn new() -> Self {
        Self { reindex: true }
    }

    /// Create a handler that preserves source numbering on compose
    pub fn without_reindex() -> Self {
        Self { reindex: false }
    }
}

impl Default for SrtFileHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SubtitleFileHandler for SrtFileHandler {
    fn format_name(&self) -> &'static str {
        "SRT"
    }

    fn extension_priorities(&self) -> &'static [(&'static str, i32)] {
        &[(".srt", 10)]
    }

    fn accepts_content(&self, content: &str) -> bool {
        SNIFF_PATTERN.is_match(content.trim_start_matches('\u{feff}'))
    }

    fn parse_string(&self, content: &str) -> Result<SubtitleData, SubtitleError> {
        let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
        let mut lines: Vec<SubtitleLine> = Vec::new();

        for block in content.split_terminator("\n\n") {
            let block_lines: Vec<&str> = block
                .lines()
                .skip_while(|line| line.trim().is_empty())
                .collect();
            if block_lines.is_empty() {
                continue;
            }

            // First line is the cue number, second the timing
            let number: u32 = block_lines[0].trim().parse().map_err(|_| {
                SubtitleError::parse(format!("Invalid cue number: '{}'", block_lines[0].trim()))
            })?;

            let timing = block_lines.get(1).ok_or_else(|| {
                SubtitleError::parse(format!("Cue {number} is missing its timing line"))
            })?;
            let captures = TIMING_LINE.captures(timing.trim()).ok_or_else(|| {
                SubtitleError::parse(format!("Invalid timing line: '{}'", timing.trim()))
            })?;

            let start = parse_srt_timestamp(&captures[1])?;
            let end = parse_srt_timestamp(&captures[2])?;
            let text = block_lines[2..].join("\n");

            lines.push(SubtitleLine::new(number, start, end, text));
        }

        let start_line_number = lines.first().map(|line| line.number);
        Ok(SubtitleData {
            lines,
            start_line_number,
            detected_format: Some(".srt".to_string()),
            ..Default::default()
        })
    }

    fn compose(&self, data: &SubtitleData) -> Result<String, SubtitleError> {
        let mut output = String::new();
        for (index, line) in data.lines.iter().enumerate() {
            let (Some(start), Some(end)) = (line.start, line.end) else {
                continue;
            };

            let number = if self.reindex {
                index as u32 + 1
            } else {
                line.number
            };

            output.push_str(&format!(
                "{}\n{} --> {}\n{}\n\n",
                number,
                format_srt_timestamp(start),
                format_srt_timestamp(end),
                line.text
            ));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_withSingleCue_shouldExtractFields() {
        let handler = SrtFileHandler::new();
        let data = handler
            .parse_string("1\n00:00:01,000 --> 00:00:02,000\nHello\n")
            .unwrap();

        assert_eq!(data.lines.len(), 1);
        let line = &data.lines[0];
        assert_eq!(line.number, 1);
        assert_eq!(line.start, Some(Duration::from_secs(1)));
        assert_eq!(line.end, Some(Duration::from_secs(2)));
        assert_eq!(line.text, "Hello");
        assert_eq!(data.detected_format.as_deref(), Some(".srt"));
    }

    #[test]
    fn test_round_trip_shouldPreserveCue() {
        let handler = SrtFileHandler::new();
        let source = "1\n00:00:01,000 --> 00:00:02,000\nHello\n";
        let composed = handler.compose(&handler.parse_string(source).unwrap()).unwrap();
        let reparsed = handler.parse_string(&composed).unwrap();

        assert_eq!(reparsed.lines.len(), 1);
        assert_eq!(reparsed.lines[0].text, "Hello");
        assert_eq!(reparsed.lines[0].start, Some(Duration::from_secs(1)));
        assert_eq!(
            composed.matches("-->").count(),
            1,
            "composed output should contain exactly one cue"
        );
    }

    #[test]
    fn test_parse_withMultilineAndMarkup_shouldPreserveText() {
        let handler = SrtFileHandler::new();
        let source =
            "1\n00:00:01,000 --> 00:00:02,000\n<i>Hello</i>\nworld\n\n2\n00:00:03,000 --> 00:00:04,000\nSecond\n";
        let data = handler.parse_string(source).unwrap();

        assert_eq!(data.lines.len(), 2);
        assert_eq!(data.lines[0].text, "<i>Hello</i>\nworld");
        assert_eq!(data.lines[1].number, 2);
    }

    #[test]
    fn test_compose_withReindexDisabled_shouldKeepNumbers() {
        let handler = SrtFileHandler::without_reindex();
        let source = "5\n00:00:01,000 --> 00:00:02,000\nHello\n";
        let composed = handler.compose(&handler.parse_string(source).unwrap()).unwrap();
        assert!(composed.starts_with("5\n"));

        let reindexed = SrtFileHandler::new()
            .compose(&handler.parse_string(source).unwrap())
            .unwrap();
        assert!(reindexed.starts_with("1\n"));
    }

    #[test]
    fn test_parse_withGarbage_shouldFail() {
        let handler = SrtFileHandler::new();
        assert!(handler.parse_string("not a subtitle file").is_err());
    }

    #[test]
    fn test_accepts_content_shouldSniffSrt() {
        let handler = SrtFileHandler::new();
        assert!(handler.accepts_content("1\n00:00:01,000 --> 00:00:02,000\nHello\n"));
        assert!(!handler.accepts_content("WEBVTT\n\n00:01.000 --> 00:02.000\nHello\n"));
    }
}
