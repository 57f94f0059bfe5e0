/*!
 * Mutation machinery for the subtitle tree.
 *
 * `SubtitleEditor` is the single entry point for mutations: it holds the
 * subtitle lock for its whole scope and restores numbering invariants.
 * `SubtitleBatcher` partitions lines into scenes and batches by timing
 * gaps, and `SubtitleProcessor` applies deterministic preprocessing to
 * the original lines before translation.
 */

mod batcher;
mod editor;
mod processor;

pub use batcher::SubtitleBatcher;
pub use editor::{BatchUpdate, SceneUpdate, SubtitleEditor};
pub use processor::SubtitleProcessor;
