use crate::errors::ValidationError;
use crate::model::SubtitleLine;
use crate::settings::Settings;
use crate::translation::Translation;

const DEFAULT_MAX_CHARACTERS: usize = 120;
const DEFAULT_MAX_NEWLINES: usize = 2;

/// Validates a parsed translation against the batch it belongs to.
///
/// Violations do not abort the run by themselves; they attach to the
/// batch and may trigger a retry with corrective instructions.
#[derive(Debug, Clone)]
pub struct TranslationValidator {
    max_characters: usize,
    max_newlines: usize,
}

impl TranslationValidator {
    /// Build a validator from settings, falling back to defaults
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_characters: settings
                .get_int("max_characters")
                .unwrap_or(None)
                .map(|v| v.max(1) as usize)
                .unwrap_or(DEFAULT_MAX_CHARACTERS),
            max_newlines: settings
                .get_int("max_newlines")
                .unwrap_or(None)
                .map(|v| v.max(0) as usize)
                .unwrap_or(DEFAULT_MAX_NEWLINES),
        }
    }

    /// Validate a translation against the originals it should cover.
    ///
    /// Returns every violation found, in a stable order.
    pub fn validate(
        &self,
        originals: &[SubtitleLine],
        translation: &Translation,
    ) -> Vec<ValidationError> {
        let mut errors: Vec<ValidationError> = Vec::new();

        let unmatched: Vec<u32> = translation
            .lines
            .keys()
            .copied()
            .filter(|number| !originals.iter().any(|line| line.number == *number))
            .collect();
        if !unmatched.is_empty() {
            errors.push(ValidationError::UnmatchedLines(unmatched));
        }

        // A translated line may be blank only when its original is blank
        let empty: Vec<u32> = translation
            .lines
            .iter()
            .filter(|(number, text)| {
                text.trim().is_empty()
                    && originals
                        .iter()
                        .any(|line| line.number == **number && line.has_text())
            })
            .map(|(number, _)| *number)
            .collect();
        if !empty.is_empty() {
            errors.push(ValidationError::EmptyLines(empty));
        }

        let too_long: Vec<u32> = translation
            .lines
            .iter()
            .filter(|(_, text)| {
                text.lines()
                    .any(|display_line| display_line.chars().count() > self.max_characters)
            })
            .map(|(number, _)| *number)
            .collect();
        if !too_long.is_empty() {
            errors.push(ValidationError::LineTooLong {
                lines: too_long,
                limit: self.max_characters,
            });
        }

        let too_many_breaks: Vec<u32> = translation
            .lines
            .iter()
            .filter(|(_, text)| text.matches('\n').count() > self.max_newlines)
            .map(|(number, _)| *number)
            .collect();
        if !too_many_breaks.is_empty() {
            errors.push(ValidationError::TooManyNewlines {
                lines: too_many_breaks,
                limit: self.max_newlines,
            });
        }

        let untranslated: Vec<u32> = originals
            .iter()
            .map(|line| line.number)
            .filter(|number| !translation.lines.contains_key(number))
            .collect();
        if !untranslated.is_empty() {
            errors.push(ValidationError::UntranslatedLines(untranslated));
        }

        errors
    }
}
