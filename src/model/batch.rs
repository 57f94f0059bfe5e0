use std::time::Duration;

use log::warn;

use crate::errors::SubtitleError;
use crate::model::SubtitleLine;

/// A contiguous group of lines translated together.
///
/// The translated list is aligned to the originals by line number and is
/// allowed to be a subset while a streaming translation is in flight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtitleBatch {
    /// Owning scene number (numeric back-reference, not a pointer)
    pub scene: u32,

    /// Batch index within the scene, 1-based and contiguous
    pub number: u32,

    /// Original lines, sorted by start time
    pub originals: Vec<SubtitleLine>,

    /// Translated lines, sorted by line number
    pub translated: Vec<SubtitleLine>,

    /// Summary produced by the translator
    pub summary: Option<String>,

    /// Context notes carried for the translator
    pub context: Option<String>,

    /// The last prompt sent for this batch, kept for reparse and debugging
    pub prompt: Option<String>,

    /// The last raw response received for this batch
    pub translation: Option<String>,

    /// Errors attached to this batch during translation
    pub errors: Vec<String>,
}

impl SubtitleBatch {
    /// Create an empty batch for a scene
    pub fn new(scene: u32, number: u32) -> Self {
        Self {
            scene,
            number,
            ..Default::default()
        }
    }

    /// Create a batch owning the given lines
    pub fn with_lines(scene: u32, number: u32, originals: Vec<SubtitleLine>) -> Self {
        Self {
            scene,
            number,
            originals,
            ..Default::default()
        }
    }

    /// Whether any line in this batch has been translated
    pub fn any_translated(&self) -> bool {
        !self.translated.is_empty()
    }

    /// Whether every original line has a matching translation
    pub fn all_translated(&self) -> bool {
        !self.originals.is_empty()
            && self.originals.iter().all(|original| {
                self.translated
                    .iter()
                    .any(|translated| translated.number == original.number)
            })
    }

    /// Number of original lines in this batch
    pub fn size(&self) -> usize {
        self.originals.len()
    }

    /// Lowest line number in the batch
    pub fn first_line_number(&self) -> Option<u32> {
        self.originals.iter().map(|line| line.number).min()
    }

    /// Highest line number in the batch
    pub fn last_line_number(&self) -> Option<u32> {
        self.originals.iter().map(|line| line.number).max()
    }

    /// Earliest start time in the batch
    pub fn start(&self) -> Option<Duration> {
        self.originals.first().and_then(|line| line.start)
    }

    /// Latest end time in the batch
    pub fn end(&self) -> Option<Duration> {
        self.originals.last().and_then(|line| line.end)
    }

    /// Whether the batch contains an original line with this number
    pub fn contains_line(&self, number: u32) -> bool {
        self.originals.iter().any(|line| line.number == number)
    }

    /// Find an original line by number
    pub fn get_original(&self, number: u32) -> Option<&SubtitleLine> {
        self.originals.iter().find(|line| line.number == number)
    }

    /// Find a translated line by number
    pub fn get_translated(&self, number: u32) -> Option<&SubtitleLine> {
        self.translated.iter().find(|line| line.number == number)
    }

    /// Insert or replace a translated line, keeping the list sorted by
    /// line number. A line with the same number replaces the previous one.
    pub fn add_translated_line(&mut self, line: SubtitleLine) {
        match self
            .translated
            .binary_search_by_key(&line.number, |l| l.number)
        {
            Ok(index) => self.translated[index] = line,
            Err(index) => self.translated.insert(index, line),
        }
    }

    /// Record the translation of an original line by number.
    ///
    /// Sets the original's `translation` field and inserts the aligned
    /// translated line. Unknown numbers are ignored with a warning.
    pub fn set_line_translation(&mut self, number: u32, text: &str) {
        let Some(original) = self
            .originals
            .iter_mut()
            .find(|line| line.number == number)
        else {
            warn!(
                "Translated line {} does not match an original in batch ({},{})",
                number, self.scene, self.number
            );
            return;
        };

        original.translation = Some(text.to_string());
        let translated = original.translated_copy(text);
        self.add_translated_line(translated);
    }

    /// Delete lines by number from both originals and translations.
    ///
    /// Returns the deleted originals and translated lines.
    pub fn delete_lines(&mut self, numbers: &[u32]) -> (Vec<SubtitleLine>, Vec<SubtitleLine>) {
        let (deleted_originals, kept_originals): (Vec<_>, Vec<_>) = self
            .originals
            .drain(..)
            .partition(|line| numbers.contains(&line.number));
        self.originals = kept_originals;

        let (deleted_translated, kept_translated): (Vec<_>, Vec<_>) = self
            .translated
            .drain(..)
            .partition(|line| numbers.contains(&line.number));
        self.translated = kept_translated;

        (deleted_originals, deleted_translated)
    }

    /// Merge several sequential lines in this batch into one.
    ///
    /// The merged line spans the timing of the group and joins the text
    /// with newlines. Translated counterparts are merged the same way.
    pub fn merge_lines(&mut self, numbers: &[u32]) -> Result<SubtitleLine, SubtitleError> {
        if numbers.len() < 2 {
            return Err(SubtitleError::invalid(
                "At least two lines are required to merge",
            ));
        }

        let mut sorted = numbers.to_vec();
        sorted.sort_unstable();

        let indices: Vec<usize> = self
            .originals
            .iter()
            .enumerate()
            .filter(|(_, line)| sorted.contains(&line.number))
            .map(|(index, _)| index)
            .collect();

        if indices.len() != sorted.len() {
            return Err(SubtitleError::invalid(format!(
                "Lines {sorted:?} not all found in batch ({},{})",
                self.scene, self.number
            )));
        }

        if indices.windows(2).any(|pair| pair[1] != pair[0] + 1) {
            return Err(SubtitleError::invalid(
                "Lines to be merged are not sequential",
            ));
        }

        let first_index = indices[0];
        let merged_group: Vec<SubtitleLine> = self
            .originals
            .drain(first_index..first_index + indices.len())
            .collect();

        let mut merged = merged_group[0].clone();
        merged.end = merged_group.iter().filter_map(|line| line.end).max();
        merged.text = merged_group
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.originals.insert(first_index, merged.clone());

        // Collapse any translated counterparts onto the first number
        let translated_group: Vec<SubtitleLine> = self
            .translated
            .iter()
            .filter(|line| sorted.contains(&line.number))
            .cloned()
            .collect();
        if !translated_group.is_empty() {
            self.translated
                .retain(|line| !sorted.contains(&line.number));
            let mut merged_translated = translated_group[0].clone();
            merged_translated.number = merged.number;
            merged_translated.start = merged.start;
            merged_translated.end = merged.end;
            merged_translated.text = translated_group
                .iter()
                .map(|line| line.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            self.add_translated_line(merged_translated);
        }

        Ok(merged)
    }
}
