use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde_json::Value;

use crate::errors::SubtitleError;
use crate::formats::{SubtitleData, SubtitleFormatRegistry};
use crate::model::{SubtitleBatch, SubtitleLine, SubtitleScene};
use crate::settings::Settings;

/// The root of the subtitle tree.
///
/// Before batching, parsed lines live in the flat `lines` list; after
/// batching they are owned by the scene/batch hierarchy and the flat
/// views are computed projections over it.
#[derive(Debug, Clone, Default)]
pub struct Subtitles {
    /// Unbatched source lines (drained into scenes by the batcher)
    pub lines: Vec<SubtitleLine>,

    /// Scenes in ascending number order
    pub scenes: Vec<SubtitleScene>,

    /// Path the subtitles were loaded from
    pub sourcepath: Option<PathBuf>,

    /// Path translations are written to
    pub outputpath: Option<PathBuf>,

    /// Canonical extension of the working format (".srt", ".vtt", ...)
    pub file_format: Option<String>,

    /// File-level metadata (styles, header text, format tag)
    pub metadata: BTreeMap<String, Value>,

    /// Project-level settings
    pub settings: Settings,
}

impl Subtitles {
    /// Create an empty subtitle tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a subtitle tree with settings
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// Whether any original lines have been loaded
    pub fn has_subtitles(&self) -> bool {
        !self.lines.is_empty() || self.scenes.iter().any(|scene| scene.linecount() > 0)
    }

    /// Total number of original lines
    pub fn linecount(&self) -> usize {
        if self.scenes.is_empty() {
            self.lines.len()
        } else {
            self.scenes.iter().map(SubtitleScene::linecount).sum()
        }
    }

    /// Whether any batch has translations
    pub fn any_translated(&self) -> bool {
        self.scenes.iter().any(SubtitleScene::any_translated)
    }

    /// Whether every batch is fully translated
    pub fn all_translated(&self) -> bool {
        !self.scenes.is_empty() && self.scenes.iter().all(SubtitleScene::all_translated)
    }

    /// The flattened, ordered view of all original lines
    pub fn originals(&self) -> Vec<&SubtitleLine> {
        if self.scenes.is_empty() {
            self.lines.iter().collect()
        } else {
            self.scenes
                .iter()
                .flat_map(|scene| scene.batches.iter())
                .flat_map(|batch| batch.originals.iter())
                .collect()
        }
    }

    /// The flattened, ordered view of all translated lines
    pub fn translated(&self) -> Vec<&SubtitleLine> {
        self.scenes
            .iter()
            .flat_map(|scene| scene.batches.iter())
            .flat_map(|batch| batch.translated.iter())
            .collect()
    }

    /// Clone the current originals into an owned list, e.g. for rebatching
    pub fn originals_owned(&self) -> Vec<SubtitleLine> {
        self.originals().into_iter().cloned().collect()
    }

    /// Find a scene by number
    pub fn get_scene(&self, number: u32) -> Result<&SubtitleScene, SubtitleError> {
        self.scenes
            .iter()
            .find(|scene| scene.number == number)
            .ok_or_else(|| SubtitleError::invalid(format!("Scene {number} does not exist")))
    }

    /// Find a scene by number, mutably
    pub fn get_scene_mut(&mut self, number: u32) -> Result<&mut SubtitleScene, SubtitleError> {
        self.scenes
            .iter_mut()
            .find(|scene| scene.number == number)
            .ok_or_else(|| SubtitleError::invalid(format!("Scene {number} does not exist")))
    }

    /// Find a batch by (scene, batch) key
    pub fn get_batch(&self, scene: u32, batch: u32) -> Result<&SubtitleBatch, SubtitleError> {
        self.get_scene(scene)?.get_batch(batch).ok_or_else(|| {
            SubtitleError::invalid(format!("Batch ({scene},{batch}) does not exist"))
        })
    }

    /// Find a batch by (scene, batch) key, mutably
    pub fn get_batch_mut(
        &mut self,
        scene: u32,
        batch: u32,
    ) -> Result<&mut SubtitleBatch, SubtitleError> {
        self.get_scene_mut(scene)?
            .get_batch_mut(batch)
            .ok_or_else(|| {
                SubtitleError::invalid(format!("Batch ({scene},{batch}) does not exist"))
            })
    }

    /// Find the (scene, batch) key of the batch containing a line number.
    ///
    /// Bisects over the ordered per-batch line-number ranges.
    pub fn get_batch_containing_line(&self, line_number: u32) -> Option<(u32, u32)> {
        let ranges: Vec<(u32, u32, u32, u32)> = self
            .scenes
            .iter()
            .flat_map(|scene| scene.batches.iter())
            .filter_map(|batch| {
                Some((
                    batch.first_line_number()?,
                    batch.last_line_number()?,
                    batch.scene,
                    batch.number,
                ))
            })
            .collect();

        let index = ranges.partition_point(|(_, last, _, _)| *last < line_number);
        ranges.get(index).and_then(|(first, last, scene, batch)| {
            (*first <= line_number && line_number <= *last).then_some((*scene, *batch))
        })
    }

    /// Keys of all batches containing any of the given line numbers
    pub fn get_batches_containing_lines(&self, line_numbers: &[u32]) -> Vec<(u32, u32)> {
        let mut keys: Vec<(u32, u32)> = Vec::new();
        for scene in &self.scenes {
            for batch in &scene.batches {
                if line_numbers.iter().any(|n| batch.contains_line(*n)) {
                    keys.push((batch.scene, batch.number));
                }
            }
        }
        keys
    }

    /// Load subtitles from a file, detecting the format by extension with
    /// a content sniff as fallback for ambiguous extensions.
    pub fn load_subtitles(&mut self, path: &Path) -> Result<(), SubtitleError> {
        let handler = match SubtitleFormatRegistry::handler_for_file(path) {
            Ok(handler) => handler,
            Err(_) => {
                let content = std::fs::read_to_string(path)?;
                SubtitleFormatRegistry::detect_format_from_content(&content)?
            }
        };

        let data = handler.load_file(path)?;
        self.populate(data)?;
        self.sourcepath = Some(path.to_path_buf());
        if self.file_format.is_none() {
            self.file_format = SubtitleFormatRegistry::get_format_from_filename(path);
        }

        info!(
            "Loaded {} subtitles from {}",
            self.linecount(),
            path.display()
        );
        Ok(())
    }

    /// Populate the tree from parsed subtitle data.
    ///
    /// Duplicate line numbers are fatal here; the file cannot be worked
    /// with if line identity is ambiguous.
    pub fn populate(&mut self, data: SubtitleData) -> Result<(), SubtitleError> {
        let mut seen: HashSet<u32> = HashSet::new();
        for line in &data.lines {
            if !seen.insert(line.number) {
                return Err(SubtitleError::parse(format!(
                    "Duplicate line number {} in subtitle file",
                    line.number
                )));
            }
        }

        self.lines = data.lines;
        self.scenes.clear();
        self.metadata = data.metadata;
        if data.detected_format.is_some() {
            self.file_format = data.detected_format;
        }

        self.sanitise_lines();
        Ok(())
    }

    /// Drop unbatched lines with an invalid number or no start time
    fn sanitise_lines(&mut self) {
        let before = self.lines.len();
        self.lines.retain(SubtitleLine::is_valid);
        if self.lines.len() < before {
            warn!(
                "Removed {} invalid lines from subtitles",
                before - self.lines.len()
            );
        }
    }

    /// Resolve the handler for saving: the working file format first, the
    /// output path extension as fallback.
    fn save_handler(
        &self,
        path: &Path,
    ) -> Result<std::sync::Arc<dyn crate::formats::SubtitleFileHandler>, SubtitleError> {
        if let Some(format) = &self.file_format {
            if let Ok(handler) = SubtitleFormatRegistry::get_handler_by_extension(format) {
                return Ok(handler);
            }
        }
        SubtitleFormatRegistry::handler_for_file(path)
    }

    /// Write the original lines to a file
    pub fn save_original(&self, path: &Path) -> Result<(), SubtitleError> {
        let handler = self.save_handler(path)?;
        let data = SubtitleData {
            lines: self.originals_owned(),
            metadata: self.metadata.clone(),
            start_line_number: None,
            detected_format: self.file_format.clone(),
        };
        std::fs::write(path, handler.compose(&data)?)?;
        info!("Saved original subtitles to {}", path.display());
        Ok(())
    }

    /// Write the translated lines to a file.
    ///
    /// Lines without a translation are omitted; right-to-left markers are
    /// inserted when the corresponding setting is enabled.
    pub fn save_translation(&self, path: &Path) -> Result<(), SubtitleError> {
        let translated: Vec<SubtitleLine> = self.translated().into_iter().cloned().collect();
        if translated.is_empty() {
            return Err(SubtitleError::invalid("No translated lines to save"));
        }

        let add_rtl = self
            .settings
            .get_bool("add_right_to_left_markers")
            .unwrap_or(None)
            .unwrap_or(false);
        let include_original = self
            .settings
            .get_bool("include_original")
            .unwrap_or(None)
            .unwrap_or(false);

        let lines = translated
            .into_iter()
            .map(|mut line| {
                if add_rtl && !line.text.starts_with('\u{202b}') {
                    line.text = format!("\u{202b}{}\u{202c}", line.text);
                }
                if include_original {
                    if let Some(original) = &line.original {
                        line.text = format!("{original}\n{}", line.text);
                    }
                }
                line
            })
            .collect();

        let handler = self.save_handler(path)?;
        let data = SubtitleData {
            lines,
            metadata: self.metadata.clone(),
            start_line_number: None,
            detected_format: self.file_format.clone(),
        };
        std::fs::write(path, handler.compose(&data)?)?;
        info!("Saved translation to {}", path.display());
        Ok(())
    }

    /// Clamp overlapping line timings: the end of each line is pulled back
    /// to one millisecond before the next line's start, never below its
    /// own start.
    pub fn fix_overlaps(lines: &mut [SubtitleLine]) {
        for index in 1..lines.len() {
            let next_start = match lines[index].start {
                Some(start) => start,
                None => continue,
            };
            let line = &mut lines[index - 1];
            if let (Some(start), Some(end)) = (line.start, line.end) {
                if end > next_start {
                    let adjusted = next_start
                        .checked_sub(Duration::from_millis(1))
                        .unwrap_or(next_start);
                    line.end = Some(adjusted.max(start));
                }
            }
        }
    }

    /// Convenience accessor for the target language setting
    pub fn target_language(&self) -> Option<String> {
        self.settings.get_str("target_language")
    }

    /// Convenience accessor for the movie name setting
    pub fn movie_name(&self) -> Option<String> {
        self.settings.get_str("movie_name")
    }

    /// Update settings, merging over the existing values
    pub fn update_settings(&mut self, settings: &Settings) {
        self.settings.update(settings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(number: u32, start_secs: u64) -> SubtitleLine {
        SubtitleLine::new(
            number,
            Duration::from_secs(start_secs),
            Duration::from_secs(start_secs + 2),
            format!("Line {number}"),
        )
    }

    fn subtitles_with_scenes() -> Subtitles {
        let mut subtitles = Subtitles::new();
        let mut scene1 = SubtitleScene::new(1);
        scene1
            .batches
            .push(SubtitleBatch::with_lines(1, 1, vec![line(1, 0), line(2, 3)]));
        scene1
            .batches
            .push(SubtitleBatch::with_lines(1, 2, vec![line(3, 6)]));
        let mut scene2 = SubtitleScene::new(2);
        scene2
            .batches
            .push(SubtitleBatch::with_lines(2, 1, vec![line(4, 60), line(5, 63)]));
        subtitles.scenes = vec![scene1, scene2];
        subtitles
    }

    #[test]
    fn test_get_batch_containing_line_shouldBisectRanges() {
        let subtitles = subtitles_with_scenes();
        assert_eq!(subtitles.get_batch_containing_line(1), Some((1, 1)));
        assert_eq!(subtitles.get_batch_containing_line(3), Some((1, 2)));
        assert_eq!(subtitles.get_batch_containing_line(5), Some((2, 1)));
        assert_eq!(subtitles.get_batch_containing_line(99), None);
    }

    #[test]
    fn test_projections_shouldFlattenScenesInOrder() {
        let subtitles = subtitles_with_scenes();
        let numbers: Vec<u32> = subtitles.originals().iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_populate_withDuplicateNumbers_shouldFail() {
        let mut subtitles = Subtitles::new();
        let data = SubtitleData {
            lines: vec![line(1, 0), line(1, 5)],
            ..Default::default()
        };
        assert!(matches!(
            subtitles.populate(data),
            Err(SubtitleError::ParseError(_))
        ));
    }

    #[test]
    fn test_fix_overlaps_shouldClampToNextStart() {
        let mut lines = vec![
            SubtitleLine::new(1, Duration::from_secs(0), Duration::from_secs(5), "One"),
            SubtitleLine::new(2, Duration::from_secs(4), Duration::from_secs(6), "Two"),
        ];
        Subtitles::fix_overlaps(&mut lines);
        assert_eq!(lines[0].end, Some(Duration::from_millis(3_999)));
    }

    #[test]
    fn test_get_batches_containing_lines_shouldFindAllBatches() {
        let subtitles = subtitles_with_scenes();
        let keys = subtitles.get_batches_containing_lines(&[2, 4]);
        assert_eq!(keys, vec![(1, 1), (2, 1)]);
    }
}
