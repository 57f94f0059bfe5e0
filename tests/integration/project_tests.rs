/*!
 * Project persistence and orchestration tests
 */

use std::sync::Arc;

use subtrans::project::{ProjectMode, SubtitleProject};
use subtrans::providers::MockTranslationClient;
use subtrans::translation::SubtitleTranslator;

use crate::common::{fast_translator_settings, SAMPLE_SRT};

fn write_sample(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("movie.srt");
    std::fs::write(&path, SAMPLE_SRT).unwrap();
    path
}

#[tokio::test]
async fn test_translate_shouldWriteTranslationAndProjectFile() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_sample(&dir);

    let mut project = SubtitleProject::with_mode(ProjectMode::Write);
    project.initialise_project(&source, None, false).unwrap();
    project.update_project_settings(&fast_translator_settings());

    let translator = SubtitleTranslator::new(
        fast_translator_settings(),
        Arc::new(MockTranslationClient::echo()),
    );
    project.translate_subtitles(&translator).await.unwrap();

    assert!(project.all_translated());

    // The translation lands next to the source with the language infix
    let output = dir.path().join("movie.French.srt");
    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.contains("First line"));

    // The project file was written alongside
    let projectfile = dir.path().join("movie.subtrans");
    assert!(projectfile.exists());
    let content = std::fs::read_to_string(&projectfile).unwrap();
    assert!(content.contains("\"_class\": \"Subtitles\""));
}

#[tokio::test]
async fn test_project_round_trip_shouldRestoreTranslations() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_sample(&dir);

    {
        let mut project = SubtitleProject::persistent();
        project.initialise_project(&source, None, false).unwrap();
        project.update_project_settings(&fast_translator_settings());

        let translator = SubtitleTranslator::new(
            fast_translator_settings(),
            Arc::new(MockTranslationClient::echo()),
        );
        project.translate_subtitles(&translator).await.unwrap();
    }

    // A fresh persistent project loads the saved state instead of the
    // source file
    let mut restored = SubtitleProject::persistent();
    restored.initialise_project(&source, None, false).unwrap();

    assert!(restored.existing_project);
    assert!(restored.all_translated());
    let guard = restored.subtitles.lock();
    assert_eq!(
        guard
            .get_batch(1, 1)
            .unwrap()
            .get_translated(1)
            .unwrap()
            .text,
        "First line"
    );
    assert_eq!(guard.settings.get_str("target_language").as_deref(), Some("French"));
}

#[tokio::test]
async fn test_initialise_withProjectPath_shouldImplyProjectUsage() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_sample(&dir);

    {
        let mut project = SubtitleProject::persistent();
        project.initialise_project(&source, None, false).unwrap();
        project.update_project_settings(&fast_translator_settings());

        // The project file needs a batched tree before it can be written
        let batcher = subtrans::editing::SubtitleBatcher::from_settings(
            &subtrans::settings::Settings::new(),
        );
        project.edit().auto_batch(&batcher);
        project.save_project_file(None).unwrap();
    }

    // Opening the .subtrans path directly implies project-file usage
    let projectfile = dir.path().join("movie.subtrans");
    let mut project = SubtitleProject::new();
    project
        .initialise_project(&projectfile, None, false)
        .unwrap();

    assert!(project.read_project);
    assert!(project.write_project);
    assert!(project.existing_project);
}

#[tokio::test]
async fn test_partial_failure_shouldSaveTranslatedBatches() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_sample(&dir);

    let mut project = SubtitleProject::new();
    project.initialise_project(&source, None, false).unwrap();
    project.update_project_settings(&fast_translator_settings());

    // First batch translates, the second returns an empty response; with
    // stop_on_error the run fails after the first batch succeeded
    let mut settings = fast_translator_settings();
    settings.set("stop_on_error", true);
    settings.set("max_retries", 0_usize);
    let translator = SubtitleTranslator::new(
        settings,
        Arc::new(MockTranslationClient::scripted(vec![
            "<line n=\"1\">Premier</line>\n<line n=\"2\">Second</line>".to_string(),
            String::new(),
        ])),
    );

    let result = project.translate_subtitles(&translator).await;
    assert!(result.is_err());

    // The partial translation was still written
    let output = dir.path().join("movie.French.srt");
    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.contains("Premier"));
    assert!(!written.contains("Third line"));
}

#[tokio::test]
async fn test_backup_file_shouldBeWritten() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_sample(&dir);

    let mut project = SubtitleProject::persistent();
    project.initialise_project(&source, None, false).unwrap();

    let translator = SubtitleTranslator::new(
        fast_translator_settings(),
        Arc::new(MockTranslationClient::echo()),
    );
    project.translate_subtitles(&translator).await.unwrap();

    project.save_backup_file();
    assert!(dir.path().join("movie.subtrans-backup").exists());
}

#[test]
fn test_editor_scope_shouldExposeMutations() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_sample(&dir);

    let mut project = SubtitleProject::new();
    project.initialise_project(&source, None, false).unwrap();

    {
        let mut editor = project.edit();
        let batcher = subtrans::editing::SubtitleBatcher::from_settings(
            &subtrans::settings::Settings::from_pairs([
                ("scene_threshold", subtrans::settings::SettingValue::from(30_usize)),
                ("min_batch_size", subtrans::settings::SettingValue::from(1_usize)),
                ("max_batch_size", subtrans::settings::SettingValue::from(10_usize)),
            ]),
        );
        editor.auto_batch(&batcher);
        editor.sanitise();
    }

    let guard = project.subtitles.lock();
    assert_eq!(guard.scenes.len(), 2, "the two-minute gap splits the scenes");
}
