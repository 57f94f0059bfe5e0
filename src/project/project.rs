use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::Mutex;

use crate::editing::SubtitleEditor;
use crate::errors::{SubtitleError, TranslationError};
use crate::formats::SubtitleFormatRegistry;
use crate::model::Subtitles;
use crate::project::serialisation::{apply_legacy_settings, decode_project, project_to_string};
use crate::settings::{SettingValue, Settings};
use crate::translation::{SubtitleTranslator, TranslationEvents};

/// Project file extension
pub const PROJECT_EXTENSION: &str = "subtrans";

/// Settings that belong to the project file
const PROJECT_SETTINGS_KEYS: &[&str] = &[
    "provider",
    "model",
    "target_language",
    "prompt",
    "task_type",
    "instructions",
    "retry_instructions",
    "movie_name",
    "description",
    "names",
    "substitutions",
    "substitution_mode",
    "include_original",
    "add_right_to_left_markers",
    "instruction_file",
    "format",
];

/// How the project file participates in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectMode {
    /// Read an existing project file and keep it updated
    Persistent,
    /// Read an existing project file but never write it
    Read,
    /// Write a project file but start from the subtitle source
    Write,
}

/// Owns the subtitle tree and its persistence.
///
/// The tree lives behind a mutex; every mutation goes through a
/// `SubtitleEditor` scope obtained from `edit()`. Translation progress
/// marks the project dirty, and `save_project` writes the project file
/// and/or the translation as configured.
pub struct SubtitleProject {
    /// The shared subtitle tree
    pub subtitles: Arc<Mutex<Subtitles>>,

    /// Events re-emitted to the project's subscribers during translation
    pub events: Arc<TranslationEvents>,

    /// Path of the project file, once known
    pub projectfile: Option<PathBuf>,

    /// Whether an existing project file was loaded
    pub existing_project: bool,

    /// Whether to load the project file when one exists
    pub read_project: bool,

    /// Whether to write the project file
    pub write_project: bool,

    /// Whether to write the translated subtitles to file
    pub write_translation: bool,

    needs_writing: Arc<AtomicBool>,
    explicit_outputpath: bool,
}

impl SubtitleProject {
    /// Create a project that does not persist to a project file
    pub fn new() -> Self {
        Self {
            subtitles: Arc::new(Mutex::new(Subtitles::with_settings(
                Self::default_project_settings(),
            ))),
            events: Arc::new(TranslationEvents::new()),
            projectfile: None,
            existing_project: false,
            read_project: false,
            write_project: false,
            write_translation: true,
            needs_writing: Arc::new(AtomicBool::new(false)),
            explicit_outputpath: false,
        }
    }

    /// Create a persistent project (read and write the project file)
    pub fn persistent() -> Self {
        Self::with_mode(ProjectMode::Persistent)
    }

    /// Create a project with an explicit project-file mode
    pub fn with_mode(mode: ProjectMode) -> Self {
        let mut project = Self::new();
        match mode {
            ProjectMode::Persistent => {
                project.read_project = true;
                project.write_project = true;
            }
            ProjectMode::Read => project.read_project = true,
            ProjectMode::Write => project.write_project = true,
        }
        project
    }

    /// The settings a project file carries, all initially unset
    pub fn default_project_settings() -> Settings {
        Settings::new()
    }

    /// Whether the project file needs writing
    pub fn needs_writing(&self) -> bool {
        self.needs_writing.load(Ordering::SeqCst)
    }

    /// Mark the project as needing a save
    pub fn mark_dirty(&self) {
        self.needs_writing.store(true, Ordering::SeqCst);
    }

    /// Whether any line has been translated
    pub fn any_translated(&self) -> bool {
        self.subtitles.lock().any_translated()
    }

    /// Whether every batch is fully translated
    pub fn all_translated(&self) -> bool {
        self.subtitles.lock().all_translated()
    }

    /// The project's target language setting
    pub fn target_language(&self) -> Option<String> {
        self.subtitles.lock().target_language()
    }

    /// Open an editor scope over the subtitle tree
    pub fn edit(&self) -> SubtitleEditor<'_> {
        SubtitleEditor::new(&self.subtitles)
    }

    /// Initialise from a project file or a subtitle source file.
    ///
    /// When the path has the project extension, project-file usage is
    /// implied. An existing project file is loaded when reading is
    /// enabled; otherwise the subtitles load from the source file.
    pub fn initialise_project(
        &mut self,
        filepath: &Path,
        outputpath: Option<&Path>,
        reload_subtitles: bool,
    ) -> Result<(), SubtitleError> {
        let projectfile = Self::project_filepath(filepath);
        self.projectfile = Some(projectfile.clone());

        // Being handed the project file itself implies using it
        if filepath == projectfile {
            self.read_project = true;
            self.write_project = true;
        }

        let project_file_exists = projectfile.exists();
        let read_project = self.read_project && project_file_exists;
        let mut load_subtitles = reload_subtitles || !read_project;
        let mut sourcepath = filepath.to_path_buf();
        let mut project_settings: Option<Settings> = None;

        if project_file_exists && !read_project {
            warn!(
                "Project file {} exists but will not be used",
                projectfile.display()
            );
        }

        if read_project {
            info!("Loading existing project file {}", projectfile.display());
            self.read_project_file(&projectfile)?;
            project_settings = Some(self.project_settings());

            let guard = self.subtitles.lock();
            if let Some(stored_source) = &guard.sourcepath {
                sourcepath = stored_source.clone();
            }
            if guard.scenes.is_empty() {
                error!("Unable to read project file, starting afresh");
                load_subtitles = true;
            } else {
                self.existing_project = true;
                self.needs_writing.store(false, Ordering::SeqCst);
                load_subtitles = reload_subtitles;
                if load_subtitles {
                    info!("Reloading subtitles from the source file");
                }
            }
        }

        if load_subtitles {
            self.load_subtitle_file(&sourcepath)?;
        }

        if !self.subtitles.lock().has_subtitles() {
            return Err(SubtitleError::invalid(format!(
                "No subtitles to translate in {}",
                filepath.display()
            )));
        }

        if let Some(output) = outputpath {
            self.explicit_outputpath = true;
            let mut guard = self.subtitles.lock();
            guard.outputpath = Some(output.to_path_buf());
            if let Some(format) = SubtitleFormatRegistry::get_format_from_filename(output) {
                guard.file_format = Some(format);
            }
            drop(guard);
            if self.write_project {
                self.mark_dirty();
            }
        } else {
            self.update_output_path(None, None)?;
        }

        // Re-apply stored settings so compatibility mappings run
        if let Some(settings) = project_settings {
            self.update_project_settings(&settings);
        }

        Ok(())
    }

    /// Update the project settings, filtered to the known project keys
    /// and with legacy names mapped.
    pub fn update_project_settings(&self, settings: &Settings) {
        let mut filtered: Settings = settings
            .iter()
            .filter(|(key, _)| PROJECT_SETTINGS_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if filtered.contains("names") {
            let names = parse_names(&filtered);
            filtered.set("names", names);
        }

        apply_legacy_settings(&mut filtered);

        let language_changed = {
            let mut guard = self.subtitles.lock();
            let changed = filtered
                .iter()
                .any(|(key, value)| guard.settings.get(key) != Some(value));
            if changed {
                guard.update_settings(&filtered);
                if !guard.scenes.is_empty() && self.write_project {
                    self.mark_dirty();
                }
            }
            changed && filtered.contains("target_language")
        };

        // A new target language moves the generated output path
        if language_changed && !self.explicit_outputpath {
            if let Err(error) = self.update_output_path(None, None) {
                warn!("Could not update output path: {error}");
            }
        }
    }

    /// Set or generate the output path for the translated subtitles.
    ///
    /// The project extension is rejected as an output format.
    pub fn update_output_path(
        &self,
        path: Option<&Path>,
        extension: Option<&str>,
    ) -> Result<(), SubtitleError> {
        let mut guard = self.subtitles.lock();

        let base = path
            .map(Path::to_path_buf)
            .or_else(|| guard.sourcepath.clone())
            .unwrap_or_else(|| PathBuf::from("subtitles"));

        let extension = extension
            .map(str::to_string)
            .or_else(|| guard.file_format.clone())
            .or_else(|| SubtitleFormatRegistry::get_format_from_filename(&base))
            .unwrap_or_else(|| ".srt".to_string());

        if extension.trim_start_matches('.') == PROJECT_EXTENSION {
            return Err(SubtitleError::invalid(
                "Cannot use .subtrans as output format",
            ));
        }

        let language = guard.target_language();
        guard.outputpath = Some(output_path(&base, language.as_deref(), &extension));
        guard.file_format = Some(extension);
        Ok(())
    }

    /// Write the original subtitles to a file
    pub fn save_original(&self, outputpath: Option<&Path>) {
        let result = {
            let guard = self.subtitles.lock();
            let path = outputpath
                .map(Path::to_path_buf)
                .or_else(|| guard.sourcepath.clone());
            match path {
                Some(path) => guard.save_original(&path),
                None => Err(SubtitleError::invalid("No output path for original subtitles")),
            }
        };

        if let Err(error) = result {
            error!("Unable to save original subtitles: {error}");
        }
    }

    /// Write the translated subtitles to the output path
    pub fn save_translation(&self, outputpath: Option<&Path>) {
        let result = {
            let guard = self.subtitles.lock();
            let path = outputpath
                .map(Path::to_path_buf)
                .or_else(|| guard.outputpath.clone());
            match path {
                Some(path) => guard.save_translation(&path),
                None => Err(SubtitleError::invalid("No output path for translation")),
            }
        };

        if let Err(error) = result {
            error!("Unable to save translation: {error}");
        }
    }

    /// The path of the project file for a source path
    pub fn project_filepath(filepath: &Path) -> PathBuf {
        if filepath
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(PROJECT_EXTENSION))
        {
            filepath.to_path_buf()
        } else {
            filepath.with_extension(PROJECT_EXTENSION)
        }
    }

    /// The backup path for the project file
    pub fn backup_filepath(&self) -> Option<PathBuf> {
        self.projectfile
            .as_ref()
            .map(|path| PathBuf::from(format!("{}-backup", path.display())))
    }

    /// Load subtitles from a source file, replacing the current tree
    pub fn load_subtitle_file(&self, filepath: &Path) -> Result<(), SubtitleError> {
        let mut guard = self.subtitles.lock();
        let settings = guard.settings.clone();
        *guard = Subtitles::with_settings(settings);
        guard.load_subtitles(filepath)
    }

    /// Save whatever needs saving: the project file when persistence is
    /// enabled, the translation when any exists.
    pub fn save_project(&self) {
        if !self.needs_writing() {
            return;
        }
        if self.write_project {
            if let Err(error) = self.save_project_file(None) {
                error!("Unable to save project file: {error}");
            }
        }
        if self.any_translated() && self.write_translation {
            self.save_translation(None);
        }
        self.needs_writing.store(false, Ordering::SeqCst);
    }

    /// Write the project file
    pub fn save_project_file(&self, projectfile: Option<&Path>) -> Result<(), SubtitleError> {
        let path = projectfile
            .map(Path::to_path_buf)
            .or_else(|| self.projectfile.clone())
            .ok_or_else(|| SubtitleError::invalid("No project file path provided"))?;

        let content = {
            let guard = self.subtitles.lock();
            if guard.scenes.is_empty() {
                return Err(SubtitleError::invalid(
                    "Can't write project file, no scenes",
                ));
            }
            project_to_string(&guard)?
        };

        info!("Writing project data to {}", path.display());
        std::fs::write(&path, content)?;
        self.needs_writing.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Save a backup copy of the project file
    pub fn save_backup_file(&self) {
        if let Some(backup) = self.backup_filepath() {
            if self.subtitles.lock().scenes.is_empty() {
                return;
            }
            if let Err(error) = self.save_project_file(Some(&backup)) {
                error!("Unable to save backup file: {error}");
            }
        }
    }

    /// Read the subtitle tree from a project file and sanitise it
    pub fn read_project_file(&mut self, filepath: &Path) -> Result<(), SubtitleError> {
        info!("Reading project data from {}", filepath.display());
        let content = std::fs::read_to_string(filepath)?;
        let subtitles = decode_project(&content)?;

        {
            let mut guard = self.subtitles.lock();
            *guard = subtitles;
        }
        self.edit().sanitise();
        Ok(())
    }

    /// The non-empty project settings, for persisting and re-applying
    pub fn project_settings(&self) -> Settings {
        let guard = self.subtitles.lock();
        guard
            .settings
            .iter()
            .filter(|(key, value)| {
                PROJECT_SETTINGS_KEYS.contains(&key.as_str())
                    && !matches!(value, SettingValue::String(text) if text.is_empty())
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Translate the whole project, saving results and handling partial
    /// failure.
    ///
    /// Translator events are forwarded to the project's subscribers and
    /// mark the project dirty so autosave picks the progress up.
    pub async fn translate_subtitles(
        &self,
        translator: &SubtitleTranslator,
    ) -> Result<(), TranslationError> {
        if !self.subtitles.lock().has_subtitles() {
            return Err(TranslationError::Impossible(
                "No subtitles to translate".to_string(),
            ));
        }

        // Prime new project files before starting
        if self.write_project && self.needs_writing() {
            if let Err(error) = self.save_project_file(None) {
                warn!("Could not prime project file: {error}");
            }
        }

        let save_translation = self.write_translation && !translator.preview;
        let tokens = self.forward_events(translator);

        let outcome = translator.translate_subtitles(&self.subtitles).await;

        self.unforward_events(translator, tokens);

        match outcome {
            Ok(()) => {
                if self.write_project {
                    self.save_project();
                } else if save_translation && !translator.is_aborted() {
                    self.save_translation(None);
                }
                Ok(())
            }
            Err(TranslationError::Aborted) => {
                info!("Translation aborted");
                Ok(())
            }
            Err(error) => {
                if save_translation && self.any_translated() {
                    warn!("Translation failed, saving partial results");
                    self.save_translation(None);
                }
                error!("Failed to translate subtitles: {error}");
                Err(error)
            }
        }
    }

    /// Translate a single scene, optionally restricted to batches/lines
    pub async fn translate_scene(
        &self,
        translator: &SubtitleTranslator,
        scene_number: u32,
        batch_numbers: Option<&[u32]>,
        line_numbers: Option<&[u32]>,
    ) -> Result<(), TranslationError> {
        let tokens = self.forward_events(translator);

        let outcome = translator
            .translate_scene(&self.subtitles, scene_number, batch_numbers, line_numbers)
            .await;

        self.unforward_events(translator, tokens);

        match outcome {
            Err(TranslationError::Aborted) => Ok(()),
            other => other,
        }
    }

    /// Subscribe the project to a translator's events. Returns the
    /// subscription tokens for disconnecting afterwards.
    fn forward_events(&self, translator: &SubtitleTranslator) -> [usize; 3] {
        let events = self.events.clone();
        let preprocessed = translator.events.preprocessed.connect(move |scenes| {
            events.preprocessed.emit(scenes);
        });

        let events = self.events.clone();
        let needs_writing = self.needs_writing.clone();
        let mark = self.write_project;
        let batch_translated = translator.events.batch_translated.connect(move |batch| {
            if mark {
                needs_writing.store(true, Ordering::SeqCst);
            }
            events.batch_translated.emit(batch);
        });

        let events = self.events.clone();
        let needs_writing = self.needs_writing.clone();
        let scene_translated = translator.events.scene_translated.connect(move |scene| {
            if mark {
                needs_writing.store(true, Ordering::SeqCst);
            }
            events.scene_translated.emit(scene);
        });

        [preprocessed, batch_translated, scene_translated]
    }

    fn unforward_events(&self, translator: &SubtitleTranslator, tokens: [usize; 3]) {
        translator.events.preprocessed.disconnect(tokens[0]);
        translator.events.batch_translated.disconnect(tokens[1]);
        translator.events.scene_translated.disconnect(tokens[2]);
    }
}

impl Default for SubtitleProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Build an output path: source stem, optional language infix, format
/// extension.
fn output_path(base: &Path, language: Option<&str>, extension: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "subtitles".to_string());
    let extension = extension.trim_start_matches('.');

    // The infix keeps the output from colliding with the source file
    let infix = match language {
        Some(language) if !language.is_empty() => language,
        _ => "translated",
    };
    base.with_file_name(format!("{stem}.{infix}.{extension}"))
}

/// Parse a names setting: lists pass through, strings split on commas
/// and newlines.
fn parse_names(settings: &Settings) -> Vec<String> {
    match settings.get("names") {
        Some(SettingValue::String(text)) => text
            .split([',', '\n'])
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
        _ => settings.get_str_list("names"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_filepath_shouldAppendOrKeepExtension() {
        assert_eq!(
            SubtitleProject::project_filepath(Path::new("/tmp/movie.srt")),
            PathBuf::from("/tmp/movie.subtrans")
        );
        assert_eq!(
            SubtitleProject::project_filepath(Path::new("/tmp/movie.subtrans")),
            PathBuf::from("/tmp/movie.subtrans")
        );
    }

    #[test]
    fn test_output_path_shouldIncludeLanguageInfix() {
        assert_eq!(
            output_path(Path::new("/tmp/movie.srt"), Some("French"), ".srt"),
            PathBuf::from("/tmp/movie.French.srt")
        );
        assert_eq!(
            output_path(Path::new("/tmp/movie.srt"), None, ".vtt"),
            PathBuf::from("/tmp/movie.translated.vtt")
        );
    }

    #[test]
    fn test_update_output_path_shouldRejectProjectExtension() {
        let project = SubtitleProject::new();
        let result = project.update_output_path(None, Some(".subtrans"));
        assert!(result.is_err());
    }

    #[test]
    fn test_update_project_settings_shouldFilterAndParseNames() {
        let project = SubtitleProject::new();
        let mut settings = Settings::new();
        settings.set("target_language", "French");
        settings.set("names", "Maria, Rotwang\nFreder");
        settings.set("unrelated_key", "ignored");
        project.update_project_settings(&settings);

        let guard = project.subtitles.lock();
        assert_eq!(guard.settings.get_str("target_language").as_deref(), Some("French"));
        assert_eq!(
            guard.settings.get_str_list("names"),
            vec!["Maria".to_string(), "Rotwang".to_string(), "Freder".to_string()]
        );
        assert!(!guard.settings.contains("unrelated_key"));
    }

    #[test]
    fn test_mode_flags_shouldMatchProjectMode() {
        let persistent = SubtitleProject::with_mode(ProjectMode::Persistent);
        assert!(persistent.read_project && persistent.write_project);

        let read = SubtitleProject::with_mode(ProjectMode::Read);
        assert!(read.read_project && !read.write_project);

        let write = SubtitleProject::with_mode(ProjectMode::Write);
        assert!(!write.read_project && write.write_project);
    }
}
