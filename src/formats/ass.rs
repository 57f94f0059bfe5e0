use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::SubtitleError;
use crate::formats::{SubtitleData, SubtitleFileHandler};
use crate::model::SubtitleLine;
use crate::timecode::{format_ass_timestamp, parse_ass_timestamp};

static SECTION_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[([^\]]+)\]$").unwrap());
static OVERRIDE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\\[^}]*\}").unwrap());
static ASS_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^&H([0-9A-Fa-f]{6}|[0-9A-Fa-f]{8})&?$").unwrap());

const DEFAULT_STYLES_FORMAT: &str = "Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding";
const DEFAULT_EVENTS_FORMAT: &str =
    "Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text";

/// Lossless RGBA colour used for ASS style fields.
///
/// ASS stores colours as `&HAABBGGRR` with alpha 0 meaning opaque; the
/// alpha here is inverted so 255 is opaque, which serialises naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse an `&HBBGGRR` or `&HAABBGGRR` colour value
    pub fn from_ass(value: &str) -> Option<Self> {
        let captures = ASS_COLOR.captures(value.trim())?;
        let hex = &captures[1];
        let (alpha, rgb) = if hex.len() == 8 {
            (u8::from_str_radix(&hex[0..2], 16).ok()?, &hex[2..])
        } else {
            (0, hex)
        };
        Some(Self {
            r: u8::from_str_radix(&rgb[4..6], 16).ok()?,
            g: u8::from_str_radix(&rgb[2..4], 16).ok()?,
            b: u8::from_str_radix(&rgb[0..2], 16).ok()?,
            a: 255 - alpha,
        })
    }

    /// Format as an `&HAABBGGRR` colour value
    pub fn to_ass(self) -> String {
        format!("&H{:02X}{:02X}{:02X}{:02X}", 255 - self.a, self.b, self.g, self.r)
    }

    /// Convert to a JSON object for metadata storage
    pub fn to_value(self) -> Value {
        json!({ "r": self.r, "g": self.g, "b": self.b, "a": self.a })
    }

    /// Read back from a metadata JSON object
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            r: value.get("r")?.as_u64()? as u8,
            g: value.get("g")?.as_u64()? as u8,
            b: value.get("b")?.as_u64()? as u8,
            a: value.get("a").and_then(Value::as_u64).unwrap_or(255) as u8,
        })
    }
}

/// Handler for Advanced SubStation Alpha (.ass) and SubStation Alpha
/// (.ssa) files.
///
/// Script info, styles (with lossless colours), Aegisub project data and
/// the section formats all round-trip through file metadata. Dialogue
/// text is translated to HTML for display: `{\i1}`/`{\i0}` become
/// `<i>`/`</i>` (same for b, u, s), `\N` becomes a newline and `\n`
/// becomes `<wbr>`. Unknown override tags pass through inline; a leading
/// block mixing formatting with other overrides keeps its non-formatting
/// portion in `override_tags_start` line metadata, restored verbatim on
/// compose.
pub struct AssFileHandler;

impl AssFileHandler {
    pub fn new() -> Self {
        Self
    }

    fn parse_sections(content: &str) -> Vec<(String, Vec<String>)> {
        let mut sections: Vec<(String, Vec<String>)> = Vec::new();
        for raw_line in content.lines() {
            let line = raw_line.trim_end();
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with(';') {
                continue;
            }

            if let Some(captures) = SECTION_HEADER.captures(trimmed) {
                sections.push((captures[1].to_string(), Vec::new()));
            } else if let Some((_, lines)) = sections.last_mut() {
                lines.push(trimmed.to_string());
            }
        }
        sections
    }

    fn parse_key_values(lines: &[String]) -> Vec<Value> {
        lines
            .iter()
            .filter_map(|line| {
                line.split_once(':')
                    .map(|(key, value)| json!([key.trim(), value.trim()]))
            })
            .collect()
    }

    fn is_color_field(field: &str) -> bool {
        field.ends_with("Colour") || field.ends_with("Color")
    }

    fn parse_styles(lines: &[String]) -> (Vec<String>, Vec<Value>) {
        let mut format_fields: Vec<String> = Vec::new();
        let mut styles: Vec<Value> = Vec::new();

        for line in lines {
            if let Some(rest) = line.strip_prefix("Format:") {
                format_fields = rest.split(',').map(|field| field.trim().to_string()).collect();
            } else if let Some(rest) = line.strip_prefix("Style:") {
                let values: Vec<&str> = rest.split(',').map(str::trim).collect();
                let mut style = serde_json::Map::new();
                for (index, field) in format_fields.iter().enumerate() {
                    let Some(value) = values.get(index) else {
                        continue;
                    };
                    let entry = if Self::is_color_field(field) {
                        match Color::from_ass(value) {
                            Some(color) => color.to_value(),
                            None => Value::String((*value).to_string()),
                        }
                    } else {
                        Value::String((*value).to_string())
                    };
                    style.insert(field.clone(), entry);
                }
                styles.push(Value::Object(style));
            }
        }
        (format_fields, styles)
    }

    /// Convert ASS dialogue text to the HTML display form, splitting off
    /// the non-formatting portion of a leading composite override block.
    fn text_to_html(text: &str) -> (String, Option<String>) {
        let mut working = text.to_string();
        let mut override_start: Option<String> = None;

        // A leading block mixing formatting and other overrides is split:
        // the formatting directives stay in the text, the rest is kept
        // aside for verbatim restoration
        let leading_block = OVERRIDE_BLOCK
            .find(&working)
            .filter(|block| block.start() == 0)
            .map(|block| block.end());
        if let Some(block_end) = leading_block {
            let inner = working[1..block_end - 1].to_string();
            let tags: Vec<&str> = inner.split('\\').filter(|tag| !tag.is_empty()).collect();
            let (formatting, other): (Vec<&str>, Vec<&str>) =
                tags.iter().partition(|tag| Self::is_formatting_tag(tag));

            if !formatting.is_empty() && !other.is_empty() {
                let formatting_block: String = formatting
                    .iter()
                    .map(|tag| format!("{{\\{tag}}}"))
                    .collect();
                let other_block = format!(
                    "{{{}}}",
                    other.iter().map(|tag| format!("\\{tag}")).collect::<String>()
                );
                override_start = Some(other_block);
                working = format!("{formatting_block}{}", &working[block_end..]);
            }
        }

        let mut html = working
            .replace("{\\i1}", "<i>")
            .replace("{\\i0}", "</i>")
            .replace("{\\b1}", "<b>")
            .replace("{\\b0}", "</b>")
            .replace("{\\u1}", "<u>")
            .replace("{\\u0}", "</u>")
            .replace("{\\s1}", "<s>")
            .replace("{\\s0}", "</s>");
        html = html.replace("\\N", "\n").replace("\\n", "<wbr>");

        (html, override_start)
    }

    fn is_formatting_tag(tag: &str) -> bool {
        matches!(tag, "i0" | "i1" | "b0" | "b1" | "u0" | "u1" | "s0" | "s1")
    }

    /// Convert the HTML display form back to ASS dialogue text
    fn html_to_text(html: &str, override_start: Option<&str>) -> String {
        let body = html
            .replace("<i>", "{\\i1}")
            .replace("</i>", "{\\i0}")
            .replace("<b>", "{\\b1}")
            .replace("</b>", "{\\b0}")
            .replace("<u>", "{\\u1}")
            .replace("</u>", "{\\u0}")
            .replace("<s>", "{\\s1}")
            .replace("</s>", "{\\s0}")
            .replace("<wbr>", "\\n")
            .replace('\n', "\\N");

        match override_start {
            Some(prefix) => format!("{prefix}{body}"),
            None => body,
        }
    }

    fn default_script_info() -> Vec<Value> {
        vec![
            json!(["Title", "Translated Subtitles"]),
            json!(["ScriptType", "v4.00+"]),
            json!(["PlayDepth", "0"]),
            json!(["ScaledBorderAndShadow", "Yes"]),
            json!(["WrapStyle", "0"]),
        ]
    }

    fn default_style() -> Value {
        json!({
            "Name": "Default",
            "Fontname": "Arial",
            "Fontsize": "48",
            "PrimaryColour": Color::new(255, 255, 255, 255).to_value(),
            "SecondaryColour": Color::new(255, 0, 0, 255).to_value(),
            "OutlineColour": Color::new(0, 0, 0, 255).to_value(),
            "BackColour": Color::new(0, 0, 0, 255).to_value(),
            "Bold": "0",
            "Italic": "0",
            "Underline": "0",
            "StrikeOut": "0",
            "ScaleX": "100",
            "ScaleY": "100",
            "Spacing": "0",
            "Angle": "0",
            "BorderStyle": "1",
            "Outline": "2",
            "Shadow": "0",
            "Alignment": "2",
            "MarginL": "30",
            "MarginR": "30",
            "MarginV": "30",
            "Encoding": "1"
        })
    }

    fn compose_key_values(output: &mut Vec<String>, pairs: &[Value]) {
        for pair in pairs {
            if let Some(items) = pair.as_array() {
                if let (Some(key), Some(value)) =
                    (items.first().and_then(Value::as_str), items.get(1).and_then(Value::as_str))
                {
                    output.push(format!("{key}: {value}"));
                }
            }
        }
    }
}

impl Default for AssFileHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SubtitleFileHandler for AssFileHandler {
    fn format_name(&self) -> &'static str {
        "ASS"
    }

    fn extension_priorities(&self) -> &'static [(&'static str, i32)] {
        &[(".ass", 10), (".ssa", 9)]
    }

    fn accepts_content(&self, content: &str) -> bool {
        content
            .trim_start_matches('\u{feff}')
            .trim_start()
            .starts_with("[Script Info]")
    }

    fn parse_string(&self, content: &str) -> Result<SubtitleData, SubtitleError> {
        let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
        let sections = Self::parse_sections(&content);

        let mut metadata: BTreeMap<String, Value> = BTreeMap::new();
        let mut lines: Vec<SubtitleLine> = Vec::new();
        let mut found_events = false;

        for (header, section_lines) in &sections {
            match header.as_str() {
                "Script Info" => {
                    metadata.insert(
                        "script_info".to_string(),
                        Value::Array(Self::parse_key_values(section_lines)),
                    );
                }
                "Aegisub Project Garbage" => {
                    metadata.insert(
                        "aegisub_project".to_string(),
                        Value::Array(Self::parse_key_values(section_lines)),
                    );
                }
                "V4+ Styles" | "V4 Styles" => {
                    let (format_fields, styles) = Self::parse_styles(section_lines);
                    metadata.insert(
                        "ass_styles_section".to_string(),
                        Value::String(header.clone()),
                    );
                    if !format_fields.is_empty() {
                        metadata.insert("ass_styles_format".to_string(), json!(format_fields));
                    }
                    metadata.insert("ass_styles".to_string(), Value::Array(styles));
                }
                "Events" => {
                    found_events = true;
                    let mut format_fields: Vec<String> = DEFAULT_EVENTS_FORMAT
                        .split(',')
                        .map(|field| field.trim().to_string())
                        .collect();
                    let mut line_number: u32 = 1;

                    for line in section_lines {
                        if let Some(rest) = line.strip_prefix("Format:") {
                            format_fields =
                                rest.split(',').map(|field| field.trim().to_string()).collect();
                            metadata
                                .insert("ass_events_format".to_string(), json!(format_fields));
                        } else if let Some(rest) = line.strip_prefix("Dialogue:") {
                            let values: Vec<&str> = rest
                                .trim()
                                .splitn(format_fields.len(), ',')
                                .collect();
                            let field = |name: &str| -> Option<&str> {
                                format_fields
                                    .iter()
                                    .position(|f| f == name)
                                    .and_then(|index| values.get(index))
                                    .copied()
                            };

                            let start = parse_ass_timestamp(field("Start").unwrap_or("0:00:00.00"))?;
                            let end = parse_ass_timestamp(field("End").unwrap_or("0:00:00.00"))?;
                            let raw_text = field("Text").unwrap_or("");
                            let (text, override_start) = Self::text_to_html(raw_text);

                            let mut line_metadata: BTreeMap<String, Value> = BTreeMap::new();
                            line_metadata.insert(
                                "layer".to_string(),
                                json!(field("Layer")
                                    .and_then(|v| v.trim().parse::<i64>().ok())
                                    .unwrap_or(0)),
                            );
                            line_metadata.insert(
                                "style".to_string(),
                                json!(field("Style").unwrap_or("Default").trim()),
                            );
                            line_metadata.insert(
                                "name".to_string(),
                                json!(field("Name").unwrap_or("").trim()),
                            );
                            for (key, field_name) in [
                                ("margin_l", "MarginL"),
                                ("margin_r", "MarginR"),
                                ("margin_v", "MarginV"),
                            ] {
                                line_metadata.insert(
                                    key.to_string(),
                                    json!(field(field_name)
                                        .and_then(|v| v.trim().parse::<i64>().ok())
                                        .unwrap_or(0)),
                                );
                            }
                            line_metadata.insert(
                                "effect".to_string(),
                                json!(field("Effect").unwrap_or("").trim()),
                            );
                            if let Some(prefix) = override_start {
                                line_metadata
                                    .insert("override_tags_start".to_string(), json!(prefix));
                            }

                            lines.push(SubtitleLine::with_metadata(
                                line_number,
                                start,
                                end,
                                text,
                                line_metadata,
                            ));
                            line_number += 1;
                        }
                    }
                }
                _ => {}
            }
        }

        if !found_events {
            return Err(SubtitleError::parse("No events section found in ASS file"));
        }

        Ok(SubtitleData {
            lines,
            metadata,
            start_line_number: None,
            detected_format: Some(".ass".to_string()),
        })
    }

    fn compose(&self, data: &SubtitleData) -> Result<String, SubtitleError> {
        let mut output: Vec<String> = Vec::new();

        output.push("[Script Info]".to_string());
        match data.metadata.get("script_info").and_then(Value::as_array) {
            Some(pairs) if !pairs.is_empty() => Self::compose_key_values(&mut output, pairs),
            _ => Self::compose_key_values(&mut output, &Self::default_script_info()),
        }
        output.push(String::new());

        if let Some(pairs) = data.metadata.get("aegisub_project").and_then(Value::as_array) {
            output.push("[Aegisub Project Garbage]".to_string());
            Self::compose_key_values(&mut output, pairs);
            output.push(String::new());
        }

        let styles_section = data
            .metadata_str("ass_styles_section")
            .unwrap_or("V4+ Styles");
        output.push(format!("[{styles_section}]"));

        let format_fields: Vec<String> = data
            .metadata
            .get("ass_styles_format")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| {
                DEFAULT_STYLES_FORMAT
                    .split(',')
                    .map(|field| field.trim().to_string())
                    .collect()
            });
        output.push(format!("Format: {}", format_fields.join(", ")));

        let styles = match data.metadata.get("ass_styles").and_then(Value::as_array) {
            Some(styles) if !styles.is_empty() => styles.clone(),
            _ => vec![Self::default_style()],
        };
        for style in &styles {
            let values: Vec<String> = format_fields
                .iter()
                .map(|field| match style.get(field) {
                    Some(Value::String(text)) => text.clone(),
                    Some(value) if value.is_object() => Color::from_value(value)
                        .map(Color::to_ass)
                        .unwrap_or_else(|| "0".to_string()),
                    Some(value) => value.to_string(),
                    None => "0".to_string(),
                })
                .collect();
            output.push(format!("Style: {}", values.join(",")));
        }
        output.push(String::new());

        output.push("[Events]".to_string());
        let events_format: Vec<String> = data
            .metadata
            .get("ass_events_format")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| {
                DEFAULT_EVENTS_FORMAT
                    .split(',')
                    .map(|field| field.trim().to_string())
                    .collect()
            });
        output.push(format!("Format: {}", events_format.join(", ")));

        for line in &data.lines {
            let (Some(start), Some(end)) = (line.start, line.end) else {
                continue;
            };
            if line.text.is_empty() {
                continue;
            }

            let text = Self::html_to_text(&line.text, line.metadata_str("override_tags_start"));
            let int_meta = |key: &str| -> i64 {
                line.metadata.get(key).and_then(Value::as_i64).unwrap_or(0)
            };

            let values: Vec<String> = events_format
                .iter()
                .map(|field| match field.as_str() {
                    "Layer" | "Marked" => int_meta("layer").to_string(),
                    "Start" => format_ass_timestamp(start),
                    "End" => format_ass_timestamp(end),
                    "Style" => line.metadata_str("style").unwrap_or("Default").to_string(),
                    "Name" => line.metadata_str("name").unwrap_or("").to_string(),
                    "MarginL" => int_meta("margin_l").to_string(),
                    "MarginR" => int_meta("margin_r").to_string(),
                    "MarginV" => int_meta("margin_v").to_string(),
                    "Effect" => line.metadata_str("effect").unwrap_or("").to_string(),
                    "Text" => text.clone(),
                    _ => String::new(),
                })
                .collect();
            output.push(format!("Dialogue: {}", values.join(",")));
        }

        Ok(output.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE: &str = "[Script Info]\nTitle: Sample\nScriptType: v4.00+\n\n[Aegisub Project Garbage]\nAudio File: sample.mkv\n\n[V4+ Styles]\nFormat: Name, Fontname, Fontsize, PrimaryColour, Bold\nStyle: Default,Arial,48,&H00FFFFFF,0\n\n[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\nDialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,Hello world\n";

    #[test]
    fn test_color_conversion_shouldRoundTrip() {
        let color = Color::from_ass("&H00FFFFFF").unwrap();
        assert_eq!(color, Color::new(255, 255, 255, 255));
        assert_eq!(color.to_ass(), "&H00FFFFFF");

        let translucent = Color::from_ass("&H80123456").unwrap();
        assert_eq!(translucent.r, 0x56);
        assert_eq!(translucent.g, 0x34);
        assert_eq!(translucent.b, 0x12);
        assert_eq!(translucent.a, 255 - 0x80);
        assert_eq!(translucent.to_ass(), "&H80123456");
    }

    #[test]
    fn test_parse_shouldCaptureSectionsAndDialogue() {
        let handler = AssFileHandler::new();
        let data = handler.parse_string(SAMPLE).unwrap();

        assert_eq!(data.lines.len(), 1);
        assert_eq!(data.lines[0].text, "Hello world");
        assert_eq!(data.lines[0].start, Some(Duration::from_secs(1)));
        assert_eq!(data.lines[0].metadata_str("style"), Some("Default"));
        assert_eq!(data.detected_format.as_deref(), Some(".ass"));

        let script_info = data.metadata.get("script_info").unwrap().as_array().unwrap();
        assert_eq!(script_info[0], json!(["Title", "Sample"]));
        assert!(data.metadata.contains_key("aegisub_project"));

        let styles = data.metadata.get("ass_styles").unwrap().as_array().unwrap();
        assert_eq!(
            styles[0].get("PrimaryColour"),
            Some(&Color::new(255, 255, 255, 255).to_value())
        );
    }

    #[test]
    fn test_formatting_tags_shouldMapToHtml() {
        let (html, prefix) = AssFileHandler::text_to_html("{\\i1}Italic{\\i0} and {\\b1}bold{\\b0}");
        assert_eq!(html, "<i>Italic</i> and <b>bold</b>");
        assert!(prefix.is_none());

        let restored = AssFileHandler::html_to_text(&html, None);
        assert_eq!(restored, "{\\i1}Italic{\\i0} and {\\b1}bold{\\b0}");
    }

    #[test]
    fn test_line_breaks_shouldMapBothWays() {
        let (html, _) = AssFileHandler::text_to_html("First\\NSecond\\nsoft");
        assert_eq!(html, "First\nSecond<wbr>soft");
        assert_eq!(
            AssFileHandler::html_to_text(&html, None),
            "First\\NSecond\\nsoft"
        );
    }

    #[test]
    fn test_composite_override_shouldSplitFormatting() {
        let (html, prefix) =
            AssFileHandler::text_to_html("{\\pos(100,200)\\i1}Italic positioned text{\\i0}");
        assert_eq!(html, "<i>Italic positioned text</i>");
        assert_eq!(prefix.as_deref(), Some("{\\pos(100,200)}"));

        let restored = AssFileHandler::html_to_text(&html, prefix.as_deref());
        assert_eq!(restored, "{\\pos(100,200)}{\\i1}Italic positioned text{\\i0}");
    }

    #[test]
    fn test_unknown_override_shouldPassThroughInline() {
        let (html, prefix) = AssFileHandler::text_to_html("Before {\\fad(200,200)}after");
        assert_eq!(html, "Before {\\fad(200,200)}after");
        assert!(prefix.is_none());
    }

    #[test]
    fn test_compose_round_trip_shouldPreserveContent() {
        let handler = AssFileHandler::new();
        let data = handler.parse_string(SAMPLE).unwrap();
        let composed = handler.compose(&data).unwrap();
        let reparsed = handler.parse_string(&composed).unwrap();

        assert_eq!(reparsed.lines.len(), 1);
        assert_eq!(reparsed.lines[0].text, "Hello world");
        assert!(composed.contains("Title: Sample"));
        assert!(composed.contains("Audio File: sample.mkv"));
        assert!(composed.contains("Style: Default,Arial,48,&H00FFFFFF,0"));
        assert!(composed.contains("Dialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,Hello world"));
    }

    #[test]
    fn test_override_round_trip_throughHandler() {
        let handler = AssFileHandler::new();
        let source = "[Script Info]\nTitle: T\n\n[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\nDialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,{\\pos(100,200)\\i1}Italic positioned text{\\i0}\n";
        let data = handler.parse_string(source).unwrap();

        assert_eq!(data.lines[0].text, "<i>Italic positioned text</i>");
        assert_eq!(
            data.lines[0].metadata_str("override_tags_start"),
            Some("{\\pos(100,200)}")
        );

        let composed = handler.compose(&data).unwrap();
        assert!(composed.contains("{\\pos(100,200)}{\\i1}Italic positioned text{\\i0}"));
    }

    #[test]
    fn test_parse_withoutEvents_shouldFail() {
        let handler = AssFileHandler::new();
        assert!(handler.parse_string("[Script Info]\nTitle: T\n").is_err());
    }
}
