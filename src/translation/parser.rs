use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::translation::Translation;

static LINE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<line\s+n(?:umber)?\s*=\s*["']?(\d+)["']?\s*>(.*?)</line>"#).unwrap()
});

static SUMMARY_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<summary>(.*?)</summary>").unwrap());

static SCENE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<scene>(.*?)</scene>").unwrap());

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^```[a-zA-Z]*\s*$").unwrap());

/// Parses model responses into per-line translations.
///
/// The parser works in two modes: a full parse of a complete response,
/// and an incremental scan over a streaming buffer that only consumes
/// newly closed `<line>` tags, so each delta is processed once.
pub struct TranslationParser;

impl TranslationParser {
    /// Parse a complete response into a translation's lines and summaries
    pub fn parse_into(translation: &mut Translation) {
        let (lines, summary, scene_summary) = Self::parse_text(&translation.text);
        translation.lines = lines;
        if summary.is_some() {
            translation.summary = summary;
        }
        if scene_summary.is_some() {
            translation.scene_summary = scene_summary;
        }
    }

    /// Parse response text into (lines, summary, scene summary)
    pub fn parse_text(
        text: &str,
    ) -> (BTreeMap<u32, String>, Option<String>, Option<String>) {
        let mut lines: BTreeMap<u32, String> = BTreeMap::new();
        for captures in LINE_TAG.captures_iter(text) {
            if let Ok(number) = captures[1].parse::<u32>() {
                lines.insert(number, captures[2].trim().to_string());
            }
        }

        let summary = SUMMARY_TAG
            .captures(text)
            .map(|captures| captures[1].trim().to_string())
            .filter(|summary| !summary.is_empty());
        let scene_summary = SCENE_TAG
            .captures(text)
            .map(|captures| captures[1].trim().to_string())
            .filter(|summary| !summary.is_empty());

        (lines, summary, scene_summary)
    }

    /// Scan a streaming buffer for line tags that closed since the last
    /// scan. Returns the newly parsed lines and the offset to resume the
    /// next scan from, so the parser never re-reads consumed input.
    pub fn parse_closed_lines(buffer: &str, from: usize) -> (Vec<(u32, String)>, usize) {
        let mut parsed: Vec<(u32, String)> = Vec::new();
        let mut consumed = from;

        if from >= buffer.len() {
            return (parsed, consumed);
        }

        for captures in LINE_TAG.captures_iter(&buffer[from..]) {
            let whole = captures.get(0).expect("match has a whole capture");
            if let Ok(number) = captures[1].parse::<u32>() {
                parsed.push((number, captures[2].trim().to_string()));
            }
            consumed = from + whole.end();
        }

        (parsed, consumed)
    }

    /// Attempt to repair a malformed response before a reparse: strips
    /// markdown code fences and normalises curly quotes in attributes.
    pub fn repair(text: &str) -> String {
        let without_fences = CODE_FENCE.replace_all(text, "");
        without_fences
            .replace(['\u{201c}', '\u{201d}'], "\"")
            .replace(['\u{2018}', '\u{2019}'], "'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_shouldExtractLinesAndSummaries() {
        let text = "<line n=\"1\">Bonjour</line>\n<line n=\"2\">Monde</line>\n<summary>A greeting</summary>\n<scene>Opening titles</scene>";
        let (lines, summary, scene) = TranslationParser::parse_text(text);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines.get(&1).map(String::as_str), Some("Bonjour"));
        assert_eq!(lines.get(&2).map(String::as_str), Some("Monde"));
        assert_eq!(summary.as_deref(), Some("A greeting"));
        assert_eq!(scene.as_deref(), Some("Opening titles"));
    }

    #[test]
    fn test_parse_text_withUnquotedAttribute_shouldStillParse() {
        let (lines, _, _) = TranslationParser::parse_text("<line n=3>Hola</line>");
        assert_eq!(lines.get(&3).map(String::as_str), Some("Hola"));
    }

    #[test]
    fn test_parse_text_withMultilineContent_shouldPreserveInnerNewlines() {
        let (lines, _, _) =
            TranslationParser::parse_text("<line n=\"1\">First line\nSecond line</line>");
        assert_eq!(
            lines.get(&1).map(String::as_str),
            Some("First line\nSecond line")
        );
    }

    #[test]
    fn test_parse_closed_lines_shouldOnlyConsumeCompleteTags() {
        let buffer = "<line n=\"1\">Hola</line>\n<line n=\"2\">Mun";
        let (parsed, consumed) = TranslationParser::parse_closed_lines(buffer, 0);

        assert_eq!(parsed, vec![(1, "Hola".to_string())]);
        assert_eq!(consumed, "<line n=\"1\">Hola</line>".len());

        // The unterminated tag completes in a later delta; scanning
        // resumes from the consumed offset and picks it up exactly once
        let buffer = format!("{buffer}do</line>");
        let (parsed, _) = TranslationParser::parse_closed_lines(&buffer, consumed);
        assert_eq!(parsed, vec![(2, "Mundo".to_string())]);
    }

    #[test]
    fn test_repair_shouldStripCodeFencesAndCurlyQuotes() {
        let text = "```xml\n<line n=\u{201c}1\u{201d}>Hola</line>\n```";
        let repaired = TranslationParser::repair(text);
        let (lines, _, _) = TranslationParser::parse_text(&repaired);
        assert_eq!(lines.get(&1).map(String::as_str), Some("Hola"));
    }
}
