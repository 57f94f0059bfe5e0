use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::errors::SubtitleError;
use crate::formats::{SubtitleData, SubtitleFileHandler};
use crate::model::SubtitleLine;
use crate::timecode::{format_vtt_timestamp, parse_vtt_timestamp};

static TIMESTAMP_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^((?:\d{2,}:)?\d{2}:\d{2}\.\d{3})\s*-->\s*((?:\d{2,}:)?\d{2}:\d{2}\.\d{3})(.*)$",
    )
    .unwrap()
});

/// A full-line voice span: optional class list, optional speaker name,
/// optional closing tag at the end of the cue text.
static FULL_VOICE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^<v((?:\.[\w-]+)*)(?:[ \t]+([^>]+))?>(.*?)(?:</v>)?\s*$").unwrap()
});

static STYLE_BLOCK_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*STYLE\s*$").unwrap());
static NOTE_BLOCK_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*NOTE(\s|$)").unwrap());

/// Handler for the WebVTT (.vtt) format.
///
/// Cue identifiers, cue settings, STYLE and NOTE blocks and voice tags
/// are captured as metadata so composition can reproduce them. Inline
/// HTML markup passes through as-is.
pub struct VttFileHandler;

impl VttFileHandler {
    pub fn new() -> Self {
        Self
    }

    /// Collect the lines of a STYLE or NOTE block, stopping at the next
    /// blank line. Returns the block content and the next index.
    fn collect_block(lines: &[&str], start: usize) -> (String, usize) {
        let mut collected: Vec<&str> = Vec::new();
        let mut index = start;
        while index < lines.len() && !lines[index].trim().is_empty() {
            collected.push(lines[index]);
            index += 1;
        }
        (collected.join("\n"), index)
    }

    /// Extract a full-line voice tag from the cue text.
    ///
    /// Returns the inner text, speaker and class list when the whole cue
    /// is wrapped in one voice span; inline or partial voice tags are
    /// left in the text verbatim.
    fn extract_voice_tag(text: &str) -> Option<(String, Option<String>, Vec<String>)> {
        let captures = FULL_VOICE_TAG.captures(text)?;
        let inner = captures.get(3).map_or("", |m| m.as_str());

        // A second voice tag means this is not a single full-line span
        if inner.contains("<v") || inner.contains("</v>") {
            return None;
        }

        let classes: Vec<String> = captures
            .get(1)
            .map_or("", |m| m.as_str())
            .split('.')
            .filter(|class| !class.is_empty())
            .map(str::to_string)
            .collect();
        let speaker = captures
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !name.is_empty());

        Some((inner.trim().to_string(), speaker, classes))
    }

    /// Rebuild the voice tag around the text from line metadata
    fn restore_voice_tag(text: &str, metadata: &BTreeMap<String, Value>) -> String {
        let speaker = metadata.get("speaker").and_then(Value::as_str);
        let classes: Vec<&str> = metadata
            .get("voice_classes")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        if speaker.is_none() && classes.is_empty() {
            return text.to_string();
        }

        let class_part: String = classes
            .iter()
            .map(|class| format!(".{class}"))
            .collect();
        match speaker {
            Some(name) => format!("<v{class_part} {name}>{text}</v>"),
            None => format!("<v{class_part}>{text}</v>"),
        }
    }
}

impl Default for VttFileHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SubtitleFileHandler for VttFileHandler {
    fn format_name(&self) -> &'static str {
        "WebVTT"
    }

    fn extension_priorities(&self) -> &'static [(&'static str, i32)] {
        &[(".vtt", 10)]
    }

    fn accepts_content(&self, content: &str) -> bool {
        content
            .trim_start_matches('\u{feff}')
            .trim_start()
            .starts_with("WEBVTT")
    }

    fn parse_string(&self, content: &str) -> Result<SubtitleData, SubtitleError> {
        let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
        let lines: Vec<&str> = content.lines().collect();

        if lines.is_empty() || !lines[0].trim().starts_with("WEBVTT") {
            return Err(SubtitleError::parse(
                "Invalid WebVTT file: missing WEBVTT header",
            ));
        }

        let mut subtitle_lines: Vec<SubtitleLine> = Vec::new();
        let mut styles: Vec<Value> = Vec::new();
        let mut notes: Vec<Value> = Vec::new();
        let header_text = lines[0].trim().to_string();

        let mut index = 1;
        let mut line_number: u32 = 1;

        while index < lines.len() {
            let line = lines[index].trim();

            if line.is_empty() {
                index += 1;
                continue;
            }

            if STYLE_BLOCK_START.is_match(line) {
                let (block, next) = Self::collect_block(&lines, index + 1);
                if !block.is_empty() {
                    styles.push(Value::String(block));
                }
                index = next;
                continue;
            }

            if NOTE_BLOCK_START.is_match(line) {
                // A bare NOTE heads a multi-line note; NOTE with trailing
                // text is a single-line or continued note
                let first = line.strip_prefix("NOTE").unwrap_or("").trim();
                let (block, next) = Self::collect_block(&lines, index + 1);
                let note = match (first.is_empty(), block.is_empty()) {
                    (true, _) => block,
                    (false, true) => first.to_string(),
                    (false, false) => format!("{first}\n{block}"),
                };
                if !note.is_empty() {
                    notes.push(Value::String(note));
                }
                index = next;
                continue;
            }

            // A cue identifier is the line immediately before a timestamp
            let mut cue_id: Option<String> = None;
            let mut timestamp_index = index;
            if !TIMESTAMP_LINE.is_match(line) {
                match lines.get(index + 1) {
                    Some(next_line) if TIMESTAMP_LINE.is_match(next_line.trim()) => {
                        cue_id = Some(line.to_string());
                        timestamp_index = index + 1;
                    }
                    _ => {
                        index += 1;
                        continue;
                    }
                }
            }

            let captures = TIMESTAMP_LINE
                .captures(lines[timestamp_index].trim())
                .ok_or_else(|| {
                    SubtitleError::parse(format!(
                        "Invalid timestamp line: '{}'",
                        lines[timestamp_index]
                    ))
                })?;

            let start = parse_vtt_timestamp(&captures[1])?;
            let end = parse_vtt_timestamp(&captures[2])?;
            let cue_settings = captures[3].trim().to_string();

            let mut text_lines: Vec<&str> = Vec::new();
            index = timestamp_index + 1;
            while index < lines.len() && !lines[index].trim().is_empty() {
                text_lines.push(lines[index]);
                index += 1;
            }
            let cue_text = text_lines.join("\n");

            let mut metadata: BTreeMap<String, Value> = BTreeMap::new();
            if let Some(id) = cue_id {
                metadata.insert("cue_id".to_string(), Value::String(id));
            }
            if !cue_settings.is_empty() {
                metadata.insert("vtt_settings".to_string(), Value::String(cue_settings));
            }

            let text = match Self::extract_voice_tag(&cue_text) {
                Some((inner, speaker, classes)) => {
                    if let Some(name) = speaker {
                        metadata.insert("speaker".to_string(), Value::String(name));
                    }
                    if !classes.is_empty() {
                        metadata.insert("voice_classes".to_string(), json!(classes));
                    }
                    inner
                }
                None => cue_text.trim().to_string(),
            };

            subtitle_lines.push(SubtitleLine::with_metadata(
                line_number,
                start,
                end,
                text,
                metadata,
            ));
            line_number += 1;
        }

        let mut file_metadata: BTreeMap<String, Value> = BTreeMap::new();
        file_metadata.insert("header_text".to_string(), Value::String(header_text));
        if !styles.is_empty() {
            file_metadata.insert("vtt_styles".to_string(), Value::Array(styles));
        }
        if !notes.is_empty() {
            file_metadata.insert("vtt_notes".to_string(), Value::Array(notes));
        }

        Ok(SubtitleData {
            lines: subtitle_lines,
            metadata: file_metadata,
            start_line_number: None,
            detected_format: Some(".vtt".to_string()),
        })
    }

    fn compose(&self, data: &SubtitleData) -> Result<String, SubtitleError> {
        let mut output: Vec<String> = Vec::new();

        output.push(
            data.metadata_str("header_text")
                .unwrap_or("WEBVTT")
                .to_string(),
        );
        output.push(String::new());

        for style in data.metadata_str_list("vtt_styles") {
            output.push("STYLE".to_string());
            output.push(style);
            output.push(String::new());
        }

        for note in data.metadata_str_list("vtt_notes") {
            output.push("NOTE".to_string());
            output.push(note);
            output.push(String::new());
        }

        for line in &data.lines {
            let (Some(start), Some(end)) = (line.start, line.end) else {
                continue;
            };
            if line.text.is_empty() {
                continue;
            }

            if let Some(cue_id) = line.metadata_str("cue_id") {
                output.push(cue_id.to_string());
            }

            let mut timestamp_line = format!(
                "{} --> {}",
                format_vtt_timestamp(start),
                format_vtt_timestamp(end)
            );
            if let Some(settings) = line.metadata_str("vtt_settings") {
                timestamp_line.push(' ');
                timestamp_line.push_str(settings);
            }
            output.push(timestamp_line);

            output.push(Self::restore_voice_tag(&line.text, &line.metadata));
            output.push(String::new());
        }

        Ok(output.join("\n"))
    }
}
