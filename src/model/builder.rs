use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::editing::SubtitleBatcher;
use crate::model::{SubtitleLine, SubtitleScene, Subtitles};
use crate::settings::Settings;

/// Fluent helper for building subtitle trees programmatically.
///
/// Lines added after `add_scene` accumulate until the next scene starts
/// or `build` is called, at which point they are organised into batches
/// with the batcher's gap-based splitting.
pub struct SubtitleBuilder {
    scenes: Vec<SubtitleScene>,
    accumulated: Vec<SubtitleLine>,
    pending_summary: Option<String>,
    next_line_number: u32,
    batcher: SubtitleBatcher,
}

impl SubtitleBuilder {
    /// Create a builder with batch size bounds
    pub fn new(min_batch_size: usize, max_batch_size: usize) -> Self {
        let settings = Settings::from_pairs([
            ("min_batch_size", min_batch_size),
            ("max_batch_size", max_batch_size),
        ]);
        Self {
            scenes: Vec::new(),
            accumulated: Vec::new(),
            pending_summary: None,
            next_line_number: 0,
            batcher: SubtitleBatcher::from_settings(&settings),
        }
    }

    /// Start a new scene; subsequent lines belong to it
    pub fn add_scene(mut self, summary: Option<&str>) -> Self {
        self.finalise_current_scene();
        self.pending_summary = summary.map(str::to_string);
        self.scenes.push(SubtitleScene::new(0));
        self
    }

    /// Add a prepared line to the current scene
    pub fn add_line(mut self, line: SubtitleLine) -> Self {
        if self.scenes.is_empty() {
            self.scenes.push(SubtitleScene::new(0));
        }
        self.next_line_number = self.next_line_number.max(line.number);
        self.accumulated.push(line);
        self
    }

    /// Construct a line from timing and text with an auto-assigned number
    pub fn line(self, start: Duration, end: Duration, text: &str) -> Self {
        let number = self.next_line_number + 1;
        self.add_line(SubtitleLine::new(number, start, end, text))
    }

    /// Construct a line carrying metadata
    pub fn line_with_metadata(
        self,
        start: Duration,
        end: Duration,
        text: &str,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        let number = self.next_line_number + 1;
        self.add_line(SubtitleLine::with_metadata(number, start, end, text, metadata))
    }

    /// Finalise and return the built subtitles
    pub fn build(mut self) -> Subtitles {
        self.finalise_current_scene();

        let mut subtitles = Subtitles::new();
        subtitles.scenes = self.scenes;
        for (scene_index, scene) in subtitles.scenes.iter_mut().enumerate() {
            scene.number = scene_index as u32 + 1;
            for (batch_index, batch) in scene.batches.iter_mut().enumerate() {
                batch.scene = scene.number;
                batch.number = batch_index as u32 + 1;
            }
        }
        subtitles
    }

    fn finalise_current_scene(&mut self) {
        if self.accumulated.is_empty() {
            return;
        }

        let lines = std::mem::take(&mut self.accumulated);
        let groups = self.batcher.split_lines(lines);

        if let Some(scene) = self.scenes.last_mut() {
            scene.summary = self.pending_summary.take();
            for group in groups {
                scene.add_batch(crate::model::SubtitleBatch::with_lines(0, 0, group));
            }
        }
    }
}
