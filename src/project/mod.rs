/*!
 * Project persistence and orchestration.
 *
 * A `SubtitleProject` owns the subtitle tree and its translation
 * events, reads and writes the `.subtrans` project file with a custom
 * JSON codec, and coordinates translation runs including partial-result
 * saving on failure.
 */

mod autosave;
mod project;
mod serialisation;

pub use autosave::Autosave;
pub use project::{ProjectMode, SubtitleProject};
pub use serialisation::{
    apply_legacy_settings, decode_project, encode_project, project_to_string,
};
