/*!
 * The subtitle data model.
 *
 * `Subtitles` owns an ordered list of `SubtitleScene`s, each scene owns
 * `SubtitleBatch`es and each batch owns `SubtitleLine`s. Batches carry
 * their owning scene number rather than a pointer, so the tree has no
 * ownership cycles; lookups resolve numbers back to owners.
 */

mod batch;
mod builder;
mod line;
mod scene;
mod subtitles;

pub use batch::SubtitleBatch;
pub use builder::SubtitleBuilder;
pub use line::SubtitleLine;
pub use scene::SubtitleScene;
pub use subtitles::Subtitles;
