use std::time::Duration;

use crate::errors::SubtitleError;
use crate::model::{SubtitleBatch, SubtitleLine};

/// A contiguous group of batches separated from its neighbours by a
/// large timing gap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtitleScene {
    /// Scene index, 1-based and contiguous
    pub number: u32,

    /// Batches in this scene, with ascending numbers
    pub batches: Vec<SubtitleBatch>,

    /// Narrative summary produced by the translator
    pub summary: Option<String>,

    /// Rolling context carried between scenes
    pub context: Option<String>,
}

impl SubtitleScene {
    /// Create an empty scene
    pub fn new(number: u32) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    /// Total number of original lines across the scene's batches
    pub fn linecount(&self) -> usize {
        self.batches.iter().map(SubtitleBatch::size).sum()
    }

    /// Earliest start time in the scene
    pub fn start(&self) -> Option<Duration> {
        self.batches.first().and_then(SubtitleBatch::start)
    }

    /// Latest end time in the scene
    pub fn end(&self) -> Option<Duration> {
        self.batches.last().and_then(SubtitleBatch::end)
    }

    /// Whether any batch has translations
    pub fn any_translated(&self) -> bool {
        self.batches.iter().any(SubtitleBatch::any_translated)
    }

    /// Whether every batch is fully translated
    pub fn all_translated(&self) -> bool {
        !self.batches.is_empty() && self.batches.iter().all(SubtitleBatch::all_translated)
    }

    /// Find a batch by number
    pub fn get_batch(&self, number: u32) -> Option<&SubtitleBatch> {
        self.batches.iter().find(|batch| batch.number == number)
    }

    /// Find a batch by number, mutably
    pub fn get_batch_mut(&mut self, number: u32) -> Option<&mut SubtitleBatch> {
        self.batches.iter_mut().find(|batch| batch.number == number)
    }

    /// Append a batch, stamping it with this scene's number
    pub fn add_batch(&mut self, mut batch: SubtitleBatch) {
        batch.scene = self.number;
        batch.number = self.batches.len() as u32 + 1;
        self.batches.push(batch);
    }

    /// Iterate all original lines in the scene
    pub fn all_lines(&self) -> impl Iterator<Item = &SubtitleLine> {
        self.batches.iter().flat_map(|batch| batch.originals.iter())
    }

    /// Absorb the batches of the given scenes into this one, renumbering
    /// batches contiguously. Summaries are concatenated.
    pub fn merge_scenes(&mut self, others: Vec<SubtitleScene>) {
        for other in others {
            if let Some(other_summary) = other.summary {
                self.summary = match self.summary.take() {
                    Some(summary) => Some(format!("{summary}\n{other_summary}")),
                    None => Some(other_summary),
                };
            }
            self.batches.extend(other.batches);
        }

        for (index, batch) in self.batches.iter_mut().enumerate() {
            batch.scene = self.number;
            batch.number = index as u32 + 1;
        }
    }

    /// Merge several sequential batches of this scene into the first one
    pub fn merge_batches(&mut self, batch_numbers: &[u32]) -> Result<(), SubtitleError> {
        if batch_numbers.is_empty() {
            return Err(SubtitleError::invalid(
                "No batch numbers supplied to merge_batches",
            ));
        }

        let mut sorted = batch_numbers.to_vec();
        sorted.sort_unstable();
        if sorted
            .windows(2)
            .any(|pair| pair[1] != pair[0] + 1)
        {
            return Err(SubtitleError::invalid(
                "Batch numbers to be merged are not sequential",
            ));
        }

        let indices: Vec<usize> = self
            .batches
            .iter()
            .enumerate()
            .filter(|(_, batch)| sorted.contains(&batch.number))
            .map(|(index, _)| index)
            .collect();

        if indices.len() != sorted.len() {
            return Err(SubtitleError::invalid(format!(
                "Could not find batches {sorted:?} in scene {}",
                self.number
            )));
        }

        let first_index = indices[0];
        let merged_group: Vec<SubtitleBatch> = self
            .batches
            .drain(first_index..first_index + indices.len())
            .collect();

        let mut merged = merged_group[0].clone();
        for batch in merged_group.into_iter().skip(1) {
            merged.originals.extend(batch.originals);
            for translated in batch.translated {
                merged.add_translated_line(translated);
            }
            merged.errors.extend(batch.errors);
        }
        self.batches.insert(first_index, merged);

        for (index, batch) in self.batches.iter_mut().enumerate() {
            batch.number = index as u32 + 1;
        }

        Ok(())
    }
}
