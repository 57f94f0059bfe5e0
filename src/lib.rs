/*!
 * # subtrans - LLM subtitle translation engine
 *
 * A Rust library for translating subtitle files with large-language-model
 * providers.
 *
 * ## Features
 *
 * - Parse and compose SRT, WebVTT and ASS/SSA subtitle files with
 *   metadata pass-through for lossless round-trips
 * - Partition subtitles into scenes and batches based on timing gaps
 * - Translate batches through pluggable provider clients:
 *   - OpenAI chat completions (and OpenAI-compatible endpoints)
 *   - OpenAI Responses API (reasoning models, with streaming)
 *   - A generic custom HTTP server
 * - Validate translations against configurable constraints
 * - Persist the working set as a `.subtrans` project file
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `settings`: typed key/value settings with safe coercions
 * - `model`: the subtitle tree (lines, batches, scenes, subtitles)
 * - `editing`: editor, batcher and preprocessor for mutating the tree
 * - `formats`: file handlers and the format registry
 * - `translation`: prompts, requests, parsing, validation, the pipeline
 * - `providers`: client implementations for LLM providers
 * - `project`: project persistence and orchestration
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Public modules
pub mod cli;
pub mod editing;
pub mod errors;
pub mod formats;
pub mod model;
pub mod project;
pub mod providers;
pub mod settings;
pub mod timecode;
pub mod translation;

// Re-export main types for easier usage
pub use errors::{SubtitleError, TranslationError, ValidationError};
pub use model::{SubtitleBatch, SubtitleLine, SubtitleScene, Subtitles};
pub use project::SubtitleProject;
pub use settings::{SettingValue, Settings};
pub use translation::SubtitleTranslator;
