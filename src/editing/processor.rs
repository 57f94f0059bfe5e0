use std::time::Duration;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::SubtitleLine;
use crate::settings::Settings;

static MULTIPLE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static DOUBLE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"  +").unwrap());

/// Sentence boundary candidates used when splitting text
static SENTENCE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[.!?…]['"]?\s+"#).unwrap());

const DEFAULT_MIN_LINE_DURATION_MS: u64 = 800;

/// Deterministic, idempotent preprocessing for original subtitle lines.
///
/// Applies the configured cleanup passes in a fixed order: whitespace
/// trimming, filler word removal, whitespace-run to newline conversion,
/// long display line breaking, and splitting of lines whose duration
/// exceeds the configured maximum. Running the processor twice with the
/// same configuration yields the same result as running it once.
#[derive(Debug, Clone)]
pub struct SubtitleProcessor {
    max_line_duration: Option<Duration>,
    min_line_duration: Duration,
    filler_regex: Option<Regex>,
    whitespaces_to_newline: bool,
    break_long_lines: bool,
    max_single_line_length: usize,
}

impl SubtitleProcessor {
    /// Build a processor from settings
    pub fn from_settings(settings: &Settings) -> Self {
        let filler_words = settings.get_str_list("filler_words");
        let filler_regex = if filler_words.is_empty() {
            None
        } else {
            let words = filler_words
                .iter()
                .map(|word| regex::escape(word))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"(?i)\b(?:{words})\b[,.]?\s*")).ok()
        };

        Self {
            max_line_duration: settings.get_duration("max_line_duration").unwrap_or(None),
            min_line_duration: settings
                .get_duration("min_line_duration")
                .unwrap_or(None)
                .unwrap_or(Duration::from_millis(DEFAULT_MIN_LINE_DURATION_MS)),
            filler_regex,
            whitespaces_to_newline: settings
                .get_bool("whitespaces_to_newline")
                .unwrap_or(None)
                .unwrap_or(false),
            break_long_lines: settings
                .get_bool("break_long_lines")
                .unwrap_or(None)
                .unwrap_or(false),
            max_single_line_length: settings
                .get_int("max_single_line_length")
                .unwrap_or(None)
                .map(|v| v.max(1) as usize)
                .unwrap_or(44),
        }
    }

    /// Apply all configured passes to the lines, renumbering if any line
    /// was split.
    pub fn preprocess(&self, lines: Vec<SubtitleLine>) -> Vec<SubtitleLine> {
        let mut split_occurred = false;
        let mut result: Vec<SubtitleLine> = Vec::with_capacity(lines.len());

        for mut line in lines {
            line.text = self.clean_text(&line.text);

            match self.split_line_by_duration(line) {
                SplitOutcome::Unchanged(line) => result.push(line),
                SplitOutcome::Split(parts) => {
                    split_occurred = true;
                    result.extend(parts);
                }
            }
        }

        if split_occurred {
            debug!("Renumbering {} lines after duration splits", result.len());
            for (index, line) in result.iter_mut().enumerate() {
                line.number = index as u32 + 1;
            }
        }

        result
    }

    fn clean_text(&self, text: &str) -> String {
        let mut cleaned: String = text
            .lines()
            .map(str::trim)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if let Some(filler) = &self.filler_regex {
            cleaned = filler.replace_all(&cleaned, "").to_string();
            cleaned = DOUBLE_SPACES.replace_all(&cleaned, " ").trim().to_string();
        }

        if self.whitespaces_to_newline {
            cleaned = MULTIPLE_WHITESPACE.replace_all(&cleaned, "\n").to_string();
        }

        if self.break_long_lines && !cleaned.contains('\n') {
            if let Some(broken) = self.break_display_line(&cleaned) {
                cleaned = broken;
            }
        }

        cleaned
    }

    /// Insert a newline near the middle of an over-long display line,
    /// preferring a sentence boundary, falling back to the nearest space.
    fn break_display_line(&self, text: &str) -> Option<String> {
        if text.chars().count() <= self.max_single_line_length {
            return None;
        }

        let midpoint = text.len() / 2;
        let break_at = SENTENCE_BREAK
            .find_iter(text)
            .map(|m| m.end())
            .min_by_key(|end| end.abs_diff(midpoint))
            .or_else(|| {
                text.match_indices(' ')
                    .map(|(index, _)| index + 1)
                    .min_by_key(|index| index.abs_diff(midpoint))
            })?;

        if break_at == 0 || break_at >= text.len() {
            return None;
        }

        let (head, tail) = text.split_at(break_at);
        Some(format!("{}\n{}", head.trim_end(), tail.trim_start()))
    }

    /// Split a line whose duration exceeds the maximum into parts with
    /// proportional timing, recursing until every part fits.
    fn split_line_by_duration(&self, line: SubtitleLine) -> SplitOutcome {
        let Some(max_duration) = self.max_line_duration else {
            return SplitOutcome::Unchanged(line);
        };

        let duration = line.duration();
        if duration <= max_duration || duration < self.min_line_duration * 2 {
            return SplitOutcome::Unchanged(line);
        }

        let Some((head_text, tail_text)) = self.split_text(&line.text) else {
            return SplitOutcome::Unchanged(line);
        };

        let (Some(start), Some(end)) = (line.start, line.end) else {
            return SplitOutcome::Unchanged(line);
        };

        let total_chars = line.text.chars().count().max(1);
        let head_ratio = head_text.chars().count() as f64 / total_chars as f64;
        let head_duration = Duration::from_secs_f64(duration.as_secs_f64() * head_ratio)
            .clamp(self.min_line_duration, duration - self.min_line_duration);
        let split_point = start + head_duration;

        let head = SubtitleLine {
            end: Some(split_point),
            text: head_text,
            ..line.clone()
        };
        let tail = SubtitleLine {
            start: Some(split_point),
            end: Some(end),
            text: tail_text,
            ..line
        };

        let mut parts = Vec::new();
        match self.split_line_by_duration(head) {
            SplitOutcome::Unchanged(line) => parts.push(line),
            SplitOutcome::Split(sub) => parts.extend(sub),
        }
        match self.split_line_by_duration(tail) {
            SplitOutcome::Unchanged(line) => parts.push(line),
            SplitOutcome::Split(sub) => parts.extend(sub),
        }
        SplitOutcome::Split(parts)
    }

    /// Split text at the sentence boundary nearest its midpoint, or the
    /// nearest whitespace when no sentence boundary exists.
    fn split_text(&self, text: &str) -> Option<(String, String)> {
        let midpoint = text.len() / 2;
        let break_at = SENTENCE_BREAK
            .find_iter(text)
            .map(|m| m.end())
            .filter(|end| *end > 0 && *end < text.len())
            .min_by_key(|end| end.abs_diff(midpoint))
            .or_else(|| {
                text.match_indices(char::is_whitespace)
                    .map(|(index, _)| index)
                    .filter(|index| *index > 0 && *index < text.len() - 1)
                    .min_by_key(|index| index.abs_diff(midpoint))
            })?;

        let (head, tail) = text.split_at(break_at);
        let head = head.trim().to_string();
        let tail = tail.trim().to_string();
        if head.is_empty() || tail.is_empty() {
            None
        } else {
            Some((head, tail))
        }
    }
}

enum SplitOutcome {
    Unchanged(SubtitleLine),
    Split(Vec<SubtitleLine>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingValue;

    fn line(number: u32, start_secs: u64, end_secs: u64, text: &str) -> SubtitleLine {
        SubtitleLine::new(
            number,
            Duration::from_secs(start_secs),
            Duration::from_secs(end_secs),
            text,
        )
    }

    #[test]
    fn test_preprocess_shouldTrimWhitespace() {
        let processor = SubtitleProcessor::from_settings(&Settings::new());
        let result = processor.preprocess(vec![line(1, 0, 2, "  Hello  \n  world  ")]);
        assert_eq!(result[0].text, "Hello\nworld");
    }

    #[test]
    fn test_preprocess_withFillerWords_shouldRemoveThem() {
        let settings = Settings::from_pairs([(
            "filler_words",
            SettingValue::from(vec!["um".to_string(), "uh".to_string()]),
        )]);
        let processor = SubtitleProcessor::from_settings(&settings);
        let result = processor.preprocess(vec![line(1, 0, 2, "Um, I think, uh, we should go")]);
        assert_eq!(result[0].text, "I think, we should go");
    }

    #[test]
    fn test_preprocess_withWhitespaceRuns_shouldConvertToNewlines() {
        let settings = Settings::from_pairs([("whitespaces_to_newline", SettingValue::from(true))]);
        let processor = SubtitleProcessor::from_settings(&settings);
        let result = processor.preprocess(vec![line(1, 0, 2, "- Hello.   - Goodbye.")]);
        assert_eq!(result[0].text, "- Hello.\n- Goodbye.");
    }

    #[test]
    fn test_preprocess_withOverlongDuration_shouldSplitAndRenumber() {
        let settings = Settings::from_pairs([(
            "max_line_duration",
            SettingValue::from(Duration::from_secs(7)),
        )]);
        let processor = SubtitleProcessor::from_settings(&settings);
        let result = processor.preprocess(vec![
            line(1, 0, 12, "This is the first part. This is the second part."),
            line(2, 13, 14, "Short line"),
        ]);

        assert_eq!(result.len(), 3);
        assert_eq!(result[0].text, "This is the first part.");
        assert_eq!(result[1].text, "This is the second part.");
        let numbers: Vec<u32> = result.iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        // The split point falls between start and end, in text proportion
        assert!(result[0].duration() <= Duration::from_secs(12));
        assert_eq!(result[1].end, Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_preprocess_shouldBeIdempotent() {
        let settings = Settings::from_pairs([
            (
                "max_line_duration",
                SettingValue::from(Duration::from_secs(5)),
            ),
            ("whitespaces_to_newline", SettingValue::from(true)),
            (
                "filler_words",
                SettingValue::from(vec!["um".to_string()]),
            ),
        ]);
        let processor = SubtitleProcessor::from_settings(&settings);

        let input = vec![
            line(1, 0, 12, "Um, this is the first part. This is the second part."),
            line(2, 13, 14, "  Short   line  "),
        ];
        let once = processor.preprocess(input);
        let twice = processor.preprocess(once.clone());
        assert_eq!(once, twice);
    }
}
