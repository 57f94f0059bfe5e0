use std::time::Duration;

use crate::model::{SubtitleBatch, SubtitleLine, SubtitleScene, Subtitles};
use crate::settings::Settings;

const DEFAULT_SCENE_THRESHOLD_SECS: u64 = 30;
const DEFAULT_MIN_BATCH_SIZE: usize = 10;
const DEFAULT_MAX_BATCH_SIZE: usize = 30;

/// Partitions an ordered list of lines into scenes and batches.
///
/// A new scene starts wherever the gap between consecutive lines reaches
/// the scene threshold. Scenes larger than the batch maximum are split
/// recursively at their largest internal gap, never producing a batch
/// smaller than the minimum. Given equal gaps the earliest split wins,
/// so the partition is deterministic.
#[derive(Debug, Clone)]
pub struct SubtitleBatcher {
    scene_threshold: Duration,
    min_batch_size: usize,
    max_batch_size: usize,
    prevent_overlap: bool,
}

impl SubtitleBatcher {
    /// Build a batcher from settings, falling back to defaults
    pub fn from_settings(settings: &Settings) -> Self {
        let scene_threshold = settings
            .get_duration("scene_threshold")
            .unwrap_or(None)
            .unwrap_or(Duration::from_secs(DEFAULT_SCENE_THRESHOLD_SECS));
        let min_batch_size = settings
            .get_int("min_batch_size")
            .unwrap_or(None)
            .map(|v| v.max(1) as usize)
            .unwrap_or(DEFAULT_MIN_BATCH_SIZE);
        let max_batch_size = settings
            .get_int("max_batch_size")
            .unwrap_or(None)
            .map(|v| v.max(1) as usize)
            .unwrap_or(DEFAULT_MAX_BATCH_SIZE);
        let prevent_overlap = settings
            .get_bool("prevent_overlap")
            .unwrap_or(None)
            .unwrap_or(false);

        Self {
            scene_threshold,
            min_batch_size: min_batch_size.min(max_batch_size),
            max_batch_size,
            prevent_overlap,
        }
    }

    /// Partition lines into numbered scenes of numbered batches
    pub fn batch_subtitles(&self, mut lines: Vec<SubtitleLine>) -> Vec<SubtitleScene> {
        if self.prevent_overlap {
            Subtitles::fix_overlaps(&mut lines);
        }

        let mut scenes: Vec<SubtitleScene> = Vec::new();
        for group in self.split_scenes(lines) {
            let scene_number = scenes.len() as u32 + 1;
            let mut scene = SubtitleScene::new(scene_number);
            for (batch_index, batch_lines) in self.split_lines(group).into_iter().enumerate() {
                scene.batches.push(SubtitleBatch::with_lines(
                    scene_number,
                    batch_index as u32 + 1,
                    batch_lines,
                ));
            }
            scenes.push(scene);
        }
        scenes
    }

    /// Split lines into scene groups wherever the gap reaches the threshold
    fn split_scenes(&self, lines: Vec<SubtitleLine>) -> Vec<Vec<SubtitleLine>> {
        let mut groups: Vec<Vec<SubtitleLine>> = Vec::new();
        let mut current: Vec<SubtitleLine> = Vec::new();

        for line in lines {
            if let Some(previous) = current.last() {
                if Self::gap(previous, &line) >= self.scene_threshold {
                    groups.push(std::mem::take(&mut current));
                }
            }
            current.push(line);
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    /// Split a scene's lines into batch-sized groups at the largest gaps.
    ///
    /// Public so the builder can reuse the splitting logic when
    /// finalising a scene.
    pub fn split_lines(&self, lines: Vec<SubtitleLine>) -> Vec<Vec<SubtitleLine>> {
        if lines.len() <= self.max_batch_size {
            return vec![lines];
        }

        // A valid split leaves at least min_batch_size lines on each side
        if lines.len() < self.min_batch_size * 2 {
            return vec![lines];
        }

        let mut best_index = self.min_batch_size;
        let mut best_gap = Duration::ZERO;
        for index in self.min_batch_size..=(lines.len() - self.min_batch_size) {
            let gap = Self::gap(&lines[index - 1], &lines[index]);
            if gap > best_gap {
                best_gap = gap;
                best_index = index;
            }
        }

        let mut right = lines;
        let left = right.drain(..best_index).collect::<Vec<_>>();

        let mut groups = self.split_lines(left);
        groups.extend(self.split_lines(right));
        groups
    }

    fn gap(previous: &SubtitleLine, next: &SubtitleLine) -> Duration {
        match (previous.end, next.start) {
            (Some(end), Some(start)) => start.saturating_sub(end),
            _ => Duration::ZERO,
        }
    }
}
