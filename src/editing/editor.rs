use std::ops::{Deref, DerefMut};

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::editing::{SubtitleBatcher, SubtitleProcessor};
use crate::errors::SubtitleError;
use crate::model::{SubtitleLine, SubtitleScene, Subtitles};

/// Fields of a scene that can be updated through the editor
#[derive(Debug, Clone, Default)]
pub struct SceneUpdate {
    pub summary: Option<String>,
    pub context: Option<String>,
}

/// Fields of a batch that can be updated through the editor
#[derive(Debug, Clone, Default)]
pub struct BatchUpdate {
    pub summary: Option<String>,
    pub context: Option<String>,
}

/// Scoped, exclusive access to the subtitle tree for mutations.
///
/// The editor acquires the subtitle lock on construction and releases it
/// when dropped, on every exit path including panics. All multi-step
/// mutations go through an editor so numbering invariants are restored
/// before the lock is released.
pub struct SubtitleEditor<'a> {
    guard: MutexGuard<'a, Subtitles>,
}

impl<'a> SubtitleEditor<'a> {
    /// Acquire the subtitle lock and return an editor scope
    pub fn new(subtitles: &'a Mutex<Subtitles>) -> Self {
        Self {
            guard: subtitles.lock(),
        }
    }

    /// Rewrite the original lines in place with the preprocessor.
    ///
    /// When the tree is already batched, lines are renumbered globally
    /// afterwards so duration splits cannot duplicate numbers across
    /// batches.
    pub fn preprocess(&mut self, processor: &SubtitleProcessor) {
        if self.guard.scenes.is_empty() {
            let lines = std::mem::take(&mut self.guard.lines);
            self.guard.lines = processor.preprocess(lines);
        } else {
            for scene in &mut self.guard.scenes {
                for batch in &mut scene.batches {
                    let lines = std::mem::take(&mut batch.originals);
                    batch.originals = processor.preprocess(lines);
                }
            }

            let mut next: u32 = 1;
            for scene in &mut self.guard.scenes {
                for batch in &mut scene.batches {
                    for line in &mut batch.originals {
                        line.number = next;
                        next += 1;
                    }
                }
            }
        }
    }

    /// Replace the scene structure with the batcher's partition
    pub fn auto_batch(&mut self, batcher: &SubtitleBatcher) {
        let lines = if self.guard.scenes.is_empty() {
            std::mem::take(&mut self.guard.lines)
        } else {
            self.guard.originals_owned()
        };

        if !lines.is_empty() {
            self.guard.scenes = batcher.batch_subtitles(lines);
            self.guard.lines.clear();
        }
    }

    /// Append a scene to the subtitles
    pub fn add_scene(&mut self, scene: SubtitleScene) {
        self.guard.scenes.push(scene);
        debug!("Added a new scene");
    }

    /// Update a scene's summary and context
    pub fn update_scene(
        &mut self,
        scene_number: u32,
        update: SceneUpdate,
    ) -> Result<(), SubtitleError> {
        let scene = self.guard.get_scene_mut(scene_number)?;
        if update.summary.is_some() {
            scene.summary = update.summary;
        }
        if update.context.is_some() {
            scene.context = update.context;
        }
        Ok(())
    }

    /// Update a batch's summary and context
    pub fn update_batch(
        &mut self,
        scene_number: u32,
        batch_number: u32,
        update: BatchUpdate,
    ) -> Result<(), SubtitleError> {
        let batch = self.guard.get_batch_mut(scene_number, batch_number)?;
        if update.summary.is_some() {
            batch.summary = update.summary;
        }
        if update.context.is_some() {
            batch.context = update.context;
        }
        Ok(())
    }

    /// Update the text and/or translation of a line by number.
    ///
    /// A translated line is created if one does not exist yet, aligned to
    /// the original's timing.
    pub fn update_line_text(
        &mut self,
        line_number: u32,
        original_text: Option<&str>,
        translated_text: Option<&str>,
    ) -> Result<(), SubtitleError> {
        let (scene_number, batch_number) = self
            .guard
            .get_batch_containing_line(line_number)
            .ok_or_else(|| SubtitleError::invalid(format!("Line {line_number} not found")))?;

        let batch = self.guard.get_batch_mut(scene_number, batch_number)?;
        if let Some(text) = original_text {
            let original = batch
                .originals
                .iter_mut()
                .find(|line| line.number == line_number)
                .ok_or_else(|| SubtitleError::invalid(format!("Line {line_number} not found")))?;
            original.text = text.to_string();
        }

        if let Some(text) = translated_text {
            batch.set_line_translation(line_number, text);
        }

        Ok(())
    }

    /// Delete lines from every batch that contains them.
    ///
    /// Returns per-batch deletion records of (scene, batch, originals,
    /// translated). Fails if no line matched.
    #[allow(clippy::type_complexity)]
    pub fn delete_lines(
        &mut self,
        line_numbers: &[u32],
    ) -> Result<Vec<(u32, u32, Vec<SubtitleLine>, Vec<SubtitleLine>)>, SubtitleError> {
        let keys = self.guard.get_batches_containing_lines(line_numbers);

        let mut deletions = Vec::new();
        for (scene_number, batch_number) in keys {
            let batch = self.guard.get_batch_mut(scene_number, batch_number)?;
            let (deleted_originals, deleted_translated) = batch.delete_lines(line_numbers);
            if !deleted_originals.is_empty() || !deleted_translated.is_empty() {
                deletions.push((
                    scene_number,
                    batch_number,
                    deleted_originals,
                    deleted_translated,
                ));
            }
        }

        if deletions.is_empty() {
            return Err(SubtitleError::invalid(
                "No lines were deleted from any batches",
            ));
        }

        Ok(deletions)
    }

    /// Merge several scenes into one. The scene numbers must be strictly
    /// sequential.
    pub fn merge_scenes(&mut self, scene_numbers: &[u32]) -> Result<(), SubtitleError> {
        if scene_numbers.is_empty() {
            return Err(SubtitleError::invalid(
                "No scene numbers supplied to merge_scenes",
            ));
        }

        let mut sorted = scene_numbers.to_vec();
        sorted.sort_unstable();
        if sorted.windows(2).any(|pair| pair[1] != pair[0] + 1) {
            return Err(SubtitleError::invalid(
                "Scene numbers to be merged are not sequential",
            ));
        }

        let indices: Vec<usize> = self
            .guard
            .scenes
            .iter()
            .enumerate()
            .filter(|(_, scene)| sorted.contains(&scene.number))
            .map(|(index, _)| index)
            .collect();

        if indices.len() != sorted.len() {
            return Err(SubtitleError::invalid(format!(
                "Could not find scenes {sorted:?}"
            )));
        }

        let first_index = indices[0];
        let mut merged_group: Vec<SubtitleScene> = self
            .guard
            .scenes
            .drain(first_index..first_index + indices.len())
            .collect();
        let mut merged = merged_group.remove(0);
        merged.merge_scenes(merged_group);
        self.guard.scenes.insert(first_index, merged);

        self.renumber_scenes();
        Ok(())
    }

    /// Merge several sequential batches of a scene into one
    pub fn merge_batches(
        &mut self,
        scene_number: u32,
        batch_numbers: &[u32],
    ) -> Result<(), SubtitleError> {
        let scene = self.guard.get_scene_mut(scene_number)?;
        scene.merge_batches(batch_numbers)
    }

    /// Merge sequential lines within a batch into one line
    pub fn merge_lines_in_batch(
        &mut self,
        scene_number: u32,
        batch_number: u32,
        line_numbers: &[u32],
    ) -> Result<SubtitleLine, SubtitleError> {
        let batch = self.guard.get_batch_mut(scene_number, batch_number)?;
        batch.merge_lines(line_numbers)
    }

    /// Split a scene in two at the given batch number. The new scene is
    /// inserted immediately after and receives the batches from the split
    /// point onwards.
    pub fn split_scene(
        &mut self,
        scene_number: u32,
        batch_number: u32,
    ) -> Result<(), SubtitleError> {
        let scene_index = self
            .guard
            .scenes
            .iter()
            .position(|scene| scene.number == scene_number)
            .ok_or_else(|| {
                SubtitleError::invalid(format!("Scene {scene_number} does not exist"))
            })?;

        let batch_index = {
            let scene = &self.guard.scenes[scene_index];
            scene
                .batches
                .iter()
                .position(|batch| batch.number == batch_number)
                .ok_or_else(|| {
                    SubtitleError::invalid(format!(
                        "Scene {scene_number} batch {batch_number} does not exist"
                    ))
                })?
        };

        let mut new_scene = SubtitleScene::new(scene_number + 1);
        new_scene.batches = self.guard.scenes[scene_index].batches.split_off(batch_index);
        for (index, batch) in new_scene.batches.iter_mut().enumerate() {
            batch.scene = new_scene.number;
            batch.number = index as u32 + 1;
        }

        self.guard.scenes.insert(scene_index + 1, new_scene);
        self.renumber_scenes();
        Ok(())
    }

    /// Remove invalid lines, empty batches and empty scenes, drop
    /// translated lines with no matching original, and renumber.
    pub fn sanitise(&mut self) {
        for scene in &mut self.guard.scenes {
            for batch in &mut scene.batches {
                batch.originals.retain(SubtitleLine::is_valid);
                batch.translated.retain(SubtitleLine::is_valid);

                let original_numbers: Vec<u32> =
                    batch.originals.iter().map(|line| line.number).collect();
                let unmatched = batch
                    .translated
                    .iter()
                    .filter(|line| !original_numbers.contains(&line.number))
                    .count();
                if unmatched > 0 {
                    warn!(
                        "Removing {} translated lines in batch ({},{}) that don't match an original line",
                        unmatched, batch.scene, batch.number
                    );
                    batch
                        .translated
                        .retain(|line| original_numbers.contains(&line.number));
                }
            }

            scene.batches.retain(|batch| !batch.originals.is_empty());
        }

        self.guard.scenes.retain(|scene| !scene.batches.is_empty());
        self.guard.lines.retain(SubtitleLine::is_valid);
        self.renumber_scenes();
    }

    /// Renumber scenes and batches sequentially from 1
    pub fn renumber_scenes(&mut self) {
        for (scene_index, scene) in self.guard.scenes.iter_mut().enumerate() {
            scene.number = scene_index as u32 + 1;
            for (batch_index, batch) in scene.batches.iter_mut().enumerate() {
                batch.scene = scene.number;
                batch.number = batch_index as u32 + 1;
            }
        }
    }

    /// Copy every original line into the translated list, for testing
    /// pipelines without a provider. Fails if translations already exist.
    pub fn duplicate_originals_as_translations(&mut self) -> Result<(), SubtitleError> {
        if self
            .guard
            .scenes
            .iter()
            .any(SubtitleScene::any_translated)
        {
            return Err(SubtitleError::invalid("Translations already exist"));
        }

        for scene in &mut self.guard.scenes {
            for batch in &mut scene.batches {
                batch.translated = batch
                    .originals
                    .iter()
                    .map(|line| line.translated_copy(line.text.clone()))
                    .collect();
            }
        }
        Ok(())
    }
}

impl Deref for SubtitleEditor<'_> {
    type Target = Subtitles;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for SubtitleEditor<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
