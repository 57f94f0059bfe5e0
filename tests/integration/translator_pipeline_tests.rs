/*!
 * End-to-end pipeline tests against the mock client
 */

use std::sync::Arc;

use parking_lot::Mutex;

use subtrans::errors::TranslationError;
use subtrans::providers::MockTranslationClient;
use subtrans::translation::SubtitleTranslator;

use crate::common::{batched_subtitles, fast_translator_settings};

/// Collects event names in emission order
fn record_events(translator: &SubtitleTranslator) -> Arc<Mutex<Vec<String>>> {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = log.clone();
    translator.events.preprocessed.connect(move |scenes| {
        sink.lock().push(format!("preprocessed:{}", scenes.len()));
    });
    let sink = log.clone();
    translator.events.batch_translated.connect(move |batch| {
        sink.lock()
            .push(format!("batch:{}:{}", batch.scene, batch.number));
    });
    let sink = log.clone();
    translator.events.scene_translated.connect(move |scene| {
        sink.lock().push(format!("scene:{}", scene.number));
    });
    let sink = log.clone();
    translator.events.error.connect(move |error| {
        sink.lock().push(format!("error:{error}"));
    });

    log
}

#[tokio::test]
async fn test_full_run_shouldTranslateEveryBatchInOrder() {
    let subtitles = batched_subtitles();
    let mock = Arc::new(MockTranslationClient::echo());
    let translator = SubtitleTranslator::new(fast_translator_settings(), mock.clone());
    let events = record_events(&translator);

    translator.translate_subtitles(&subtitles).await.unwrap();

    // Every original line has an aligned translation
    let guard = subtitles.lock();
    assert!(guard.all_translated());
    let batch = guard.get_batch(1, 1).unwrap();
    assert_eq!(batch.get_translated(1).unwrap().text, "First line");
    assert_eq!(batch.summary.as_deref(), Some("Mock translation"));
    assert!(batch.prompt.as_deref().unwrap_or("").contains("<line n=\"1\">"));
    assert!(batch.translation.is_some());
    drop(guard);

    // One request per batch
    assert_eq!(mock.call_count(), 2);

    // Events arrive in scene order, batches before their scene
    let log = events.lock().clone();
    assert_eq!(
        log,
        vec![
            "preprocessed:2".to_string(),
            "batch:1:1".to_string(),
            "scene:1".to_string(),
            "batch:2:1".to_string(),
            "scene:2".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_retryable_failure_shouldRetryAndSucceed() {
    let subtitles = batched_subtitles();
    let mock = Arc::new(MockTranslationClient::fail_then_echo(1));
    let translator = SubtitleTranslator::new(fast_translator_settings(), mock.clone());

    translator.translate_subtitles(&subtitles).await.unwrap();

    assert!(subtitles.lock().all_translated());
    // One failed attempt, one successful retry, then the second batch
    assert_eq!(mock.call_count(), 3);
}

#[tokio::test]
async fn test_persistent_failure_withContinuePolicy_shouldAttachErrors() {
    let subtitles = batched_subtitles();
    let mock = Arc::new(MockTranslationClient::failing());
    let translator = SubtitleTranslator::new(fast_translator_settings(), mock.clone());
    let events = record_events(&translator);

    // stop_on_error defaults to false: the run completes with errors
    translator.translate_subtitles(&subtitles).await.unwrap();

    let guard = subtitles.lock();
    assert!(!guard.any_translated());
    assert!(!guard.get_batch(1, 1).unwrap().errors.is_empty());
    assert!(!guard.get_batch(2, 1).unwrap().errors.is_empty());
    drop(guard);

    // max_retries 2 means 3 attempts per batch
    assert_eq!(mock.call_count(), 6);
    assert!(events.lock().iter().any(|entry| entry.starts_with("error:")));
}

#[tokio::test]
async fn test_persistent_failure_withStopOnError_shouldAbortRun() {
    let subtitles = batched_subtitles();
    let mut settings = fast_translator_settings();
    settings.set("stop_on_error", true);
    let mock = Arc::new(MockTranslationClient::failing());
    let translator = SubtitleTranslator::new(settings, mock.clone());

    let error = translator.translate_subtitles(&subtitles).await.unwrap_err();
    assert!(matches!(error, TranslationError::ServerResponse(_)));

    // The second batch was never attempted
    assert_eq!(mock.call_count(), 3);
}

#[tokio::test]
async fn test_abort_shouldStopBeforeAnyRequest() {
    let subtitles = batched_subtitles();
    let mock = Arc::new(MockTranslationClient::echo());
    let translator = SubtitleTranslator::new(fast_translator_settings(), mock.clone());

    translator.stop_translating();
    let error = translator.translate_subtitles(&subtitles).await.unwrap_err();

    assert!(matches!(error, TranslationError::Aborted));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn test_content_filter_shouldNotRetry() {
    let subtitles = batched_subtitles();
    let mock = Arc::new(
        MockTranslationClient::new(subtrans::providers::MockBehaviour::ContentFilter),
    );
    let translator = SubtitleTranslator::new(fast_translator_settings(), mock.clone());

    translator.translate_subtitles(&subtitles).await.unwrap();

    // One attempt per batch, no retries for a content filter refusal
    assert_eq!(mock.call_count(), 2);
    let guard = subtitles.lock();
    assert!(guard.get_batch(1, 1).unwrap().errors[0].contains("content filter"));
}

#[tokio::test]
async fn test_streaming_shouldEmitPartialUpdatesBeforeCompletion() {
    let subtitles = batched_subtitles();
    let mut settings = fast_translator_settings();
    settings.set("stream_responses", true);
    let mock = Arc::new(MockTranslationClient::echo().with_streaming());
    let translator = SubtitleTranslator::new(settings, mock.clone());

    let updates: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    translator.events.batch_updated.connect(move |batch| {
        sink.lock()
            .push(format!("update:{}:{}", batch.scene, batch.number));
    });
    let sink = updates.clone();
    translator.events.batch_translated.connect(move |batch| {
        sink.lock()
            .push(format!("done:{}:{}", batch.scene, batch.number));
    });

    translator.translate_subtitles(&subtitles).await.unwrap();

    assert!(subtitles.lock().all_translated());

    let log = updates.lock().clone();
    let first_update = log.iter().position(|entry| entry == "update:1:1").unwrap();
    let first_done = log.iter().position(|entry| entry == "done:1:1").unwrap();
    assert!(
        first_update < first_done,
        "partial updates precede completion: {log:?}"
    );
}

#[tokio::test]
async fn test_preview_shouldBuildPromptsWithoutRequests() {
    let subtitles = batched_subtitles();
    let mut settings = fast_translator_settings();
    settings.set("preview", true);
    let mock = Arc::new(MockTranslationClient::echo());
    let translator = SubtitleTranslator::new(settings, mock.clone());

    translator.translate_subtitles(&subtitles).await.unwrap();

    assert_eq!(mock.call_count(), 0);
    let guard = subtitles.lock();
    assert!(!guard.any_translated());
    assert!(guard.get_batch(1, 1).unwrap().prompt.is_some());
}

#[tokio::test]
async fn test_reparse_shouldApplyStoredResponse() {
    let subtitles = batched_subtitles();
    {
        let mut guard = subtitles.lock();
        let batch = guard.get_batch_mut(1, 1).unwrap();
        batch.translation = Some(
            "<line n=\"1\">Premier</line>\n<line n=\"2\">Deuxi\u{e8}me</line>".to_string(),
        );
    }

    let translator = SubtitleTranslator::new(
        fast_translator_settings(),
        Arc::new(MockTranslationClient::echo()),
    );
    translator.reparse_batch_translation(&subtitles, 1, 1).unwrap();

    let guard = subtitles.lock();
    let batch = guard.get_batch(1, 1).unwrap();
    assert_eq!(batch.get_translated(1).unwrap().text, "Premier");
    assert_eq!(batch.get_translated(2).unwrap().text, "Deuxi\u{e8}me");
}

#[tokio::test]
async fn test_scene_translation_shouldTargetRequestedBatches() {
    let subtitles = batched_subtitles();
    let mock = Arc::new(MockTranslationClient::echo());
    let translator = SubtitleTranslator::new(fast_translator_settings(), mock.clone());

    translator
        .translate_scene(&subtitles, 2, None, None)
        .await
        .unwrap();

    let guard = subtitles.lock();
    assert!(!guard.get_batch(1, 1).unwrap().any_translated());
    assert!(guard.get_batch(2, 1).unwrap().all_translated());
    drop(guard);
    assert_eq!(mock.call_count(), 1);
}
