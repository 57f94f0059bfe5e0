use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::time::sleep;

use crate::editing::{SubtitleBatcher, SubtitleEditor, SubtitleProcessor};
use crate::errors::TranslationError;
use crate::model::{SubtitleLine, Subtitles};
use crate::providers::TranslationClient;
use crate::settings::Settings;
use crate::translation::{
    PromptContext, StreamingCallback, Translation, TranslationEvents, TranslationParser,
    TranslationPrompt, TranslationRequest, TranslationValidator,
};

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_SECS: f64 = 4.0;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_CONTEXT_WINDOW: usize = 10;

/// Shared handle to the subtitle tree, locked for mutation through a
/// `SubtitleEditor` scope.
pub type SharedSubtitles = Arc<Mutex<Subtitles>>;

/// Drives the translation of a subtitle tree through a provider client.
///
/// Scenes are translated in ascending order, batch by batch. Network
/// calls happen outside the subtitle lock; results are applied under an
/// editor scope and announced through `events` as snapshots.
pub struct SubtitleTranslator {
    settings: Settings,
    client: Arc<dyn TranslationClient>,

    /// Signals observers subscribe to for progress and results
    pub events: Arc<TranslationEvents>,

    /// When set, prompts are built and batches walked without contacting
    /// the provider
    pub preview: bool,

    aborted: Arc<AtomicBool>,
    validator: TranslationValidator,
    max_retries: u32,
    backoff_time: Duration,
    stop_on_error: bool,
    temperature: Option<f32>,
    retry_instructions: Option<String>,
    context_window: usize,
    history: Mutex<Vec<String>>,
}

impl SubtitleTranslator {
    /// Create a translator for the given settings and client
    pub fn new(settings: Settings, client: Arc<dyn TranslationClient>) -> Self {
        let validator = TranslationValidator::from_settings(&settings);
        let max_retries = settings
            .get_int("max_retries")
            .unwrap_or(None)
            .map(|v| v.max(0) as u32)
            .unwrap_or(DEFAULT_MAX_RETRIES);
        let backoff_time = settings
            .get_duration("backoff_time")
            .unwrap_or(None)
            .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_BACKOFF_SECS));
        let stop_on_error = settings
            .get_bool("stop_on_error")
            .unwrap_or(None)
            .unwrap_or(false);
        let preview = settings.get_bool("preview").unwrap_or(None).unwrap_or(false);
        let temperature = settings
            .get_float("temperature")
            .unwrap_or(None)
            .map(|t| t as f32);
        let retry_instructions = settings.get_str("retry_instructions");
        let context_window = settings
            .get_int("max_context_summaries")
            .unwrap_or(None)
            .map(|v| v.max(0) as usize)
            .unwrap_or(DEFAULT_CONTEXT_WINDOW);

        Self {
            settings,
            client,
            events: Arc::new(TranslationEvents::new()),
            preview,
            aborted: Arc::new(AtomicBool::new(false)),
            validator,
            max_retries,
            backoff_time,
            stop_on_error,
            temperature,
            retry_instructions,
            context_window,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Request cooperative cancellation of the run. The flag is level
    /// triggered: once set it stays set, and every suspension point in
    /// the pipeline observes it.
    pub fn stop_translating(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.client.abort();
        info!("Translation abort requested");
    }

    /// Whether an abort has been requested
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn check_aborted(&self) -> Result<(), TranslationError> {
        if self.is_aborted() {
            Err(TranslationError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Translate every scene of the subtitles, in order.
    ///
    /// Preprocesses and batches the lines first when the tree has no
    /// scenes yet.
    pub async fn translate_subtitles(
        &self,
        subtitles: &SharedSubtitles,
    ) -> Result<(), TranslationError> {
        self.prepare_subtitles(subtitles)?;

        let scene_numbers: Vec<u32> = {
            let guard = subtitles.lock();
            guard.scenes.iter().map(|scene| scene.number).collect()
        };

        for scene_number in scene_numbers {
            self.check_aborted()?;
            self.translate_scene(subtitles, scene_number, None, None)
                .await?;
        }

        Ok(())
    }

    /// Batch the subtitles and emit the preprocessed event
    fn prepare_subtitles(&self, subtitles: &SharedSubtitles) -> Result<(), TranslationError> {
        let scenes_snapshot = {
            let mut editor = SubtitleEditor::new(subtitles);
            if editor.scenes.is_empty() {
                let preprocess = self
                    .settings
                    .get_bool("preprocess_subtitles")
                    .unwrap_or(None)
                    .unwrap_or(false);
                if preprocess {
                    let processor = SubtitleProcessor::from_settings(&self.settings);
                    editor.preprocess(&processor);
                }

                let batcher = SubtitleBatcher::from_settings(&self.settings);
                editor.auto_batch(&batcher);
            }

            if !editor.has_subtitles() {
                return Err(TranslationError::Impossible(
                    "No subtitles to translate".to_string(),
                ));
            }

            editor.scenes.clone()
        };

        info!(
            "Translating {} scenes with {}",
            scenes_snapshot.len(),
            self.client.name()
        );
        self.events.preprocessed.emit(&scenes_snapshot);
        Ok(())
    }

    /// Translate one scene, optionally restricted to specific batches
    /// and lines. Emits scene_translated after its batches.
    pub async fn translate_scene(
        &self,
        subtitles: &SharedSubtitles,
        scene_number: u32,
        batch_numbers: Option<&[u32]>,
        line_numbers: Option<&[u32]>,
    ) -> Result<(), TranslationError> {
        let batches: Vec<u32> = {
            let guard = subtitles.lock();
            let scene = guard.get_scene(scene_number)?;
            scene
                .batches
                .iter()
                .map(|batch| batch.number)
                .filter(|number| batch_numbers.map_or(true, |wanted| wanted.contains(number)))
                .collect()
        };

        for batch_number in batches {
            self.check_aborted()?;

            let result = self
                .translate_batch(subtitles, scene_number, batch_number, line_numbers)
                .await;

            if let Err(error) = result {
                self.record_batch_error(subtitles, scene_number, batch_number, &error);
                self.events.error.emit(&error);

                if error.is_fatal() || self.stop_on_error {
                    return Err(error);
                }
                warn!(
                    "Batch ({scene_number},{batch_number}) failed, continuing: {error}"
                );
                self.events.warning.emit(&format!(
                    "Batch ({scene_number},{batch_number}) failed: {error}"
                ));
            }
        }

        let scene_snapshot = {
            let guard = subtitles.lock();
            guard.get_scene(scene_number)?.clone()
        };
        self.events.scene_translated.emit(&scene_snapshot);

        Ok(())
    }

    /// Translate a single batch with the per-batch retry policy
    async fn translate_batch(
        &self,
        subtitles: &SharedSubtitles,
        scene_number: u32,
        batch_number: u32,
        line_numbers: Option<&[u32]>,
    ) -> Result<(), TranslationError> {
        self.check_aborted()?;

        // Snapshot what the prompt needs, then release the lock before
        // any network traffic
        let (originals, context) = {
            let guard = subtitles.lock();
            let scene = guard.get_scene(scene_number)?;
            let batch = guard.get_batch(scene_number, batch_number)?;

            let originals: Vec<SubtitleLine> = batch
                .originals
                .iter()
                .filter(|line| {
                    line_numbers.map_or(true, |wanted| wanted.contains(&line.number))
                })
                .cloned()
                .collect();

            let context = PromptContext {
                history: self.history.lock().clone(),
                scene_summary: scene.summary.clone(),
                batch_summary: batch.summary.clone(),
            };
            (originals, context)
        };

        if originals.is_empty() {
            debug!("Batch ({scene_number},{batch_number}) has no lines to translate");
            return Ok(());
        }

        let mut prompt = self.build_prompt();
        prompt.generate_messages(&originals, &context);

        {
            let mut editor = SubtitleEditor::new(subtitles);
            let batch = editor.get_batch_mut(scene_number, batch_number)?;
            batch.prompt = Some(prompt.content_text());
            batch.errors.clear();
        }

        if self.preview {
            let snapshot = subtitles.lock().get_batch(scene_number, batch_number)?.clone();
            self.events.batch_updated.emit(&snapshot);
            return Ok(());
        }

        self.events.info.emit(&format!(
            "Translating scene {scene_number} batch {batch_number} ({} lines)",
            originals.len()
        ));

        let translation = self
            .request_translation(subtitles, scene_number, batch_number, &originals, prompt)
            .await?;

        self.apply_translation(subtitles, scene_number, batch_number, &translation)?;

        let snapshot = subtitles.lock().get_batch(scene_number, batch_number)?.clone();
        self.events.batch_translated.emit(&snapshot);

        self.push_history(&translation);
        Ok(())
    }

    /// Send the request, retrying retryable failures with exponential
    /// backoff and appending retry instructions for reparseable errors.
    async fn request_translation(
        &self,
        subtitles: &SharedSubtitles,
        scene_number: u32,
        batch_number: u32,
        originals: &[SubtitleLine],
        prompt: TranslationPrompt,
    ) -> Result<Translation, TranslationError> {
        let callback = self.streaming_callback(subtitles, scene_number, batch_number);
        let mut request = TranslationRequest::with_streaming(
            prompt,
            callback,
            self.client.supports_streaming(),
        )
        .with_temperature(self.temperature);

        let mut attempt: u32 = 0;
        loop {
            self.check_aborted()?;
            if attempt > 0 {
                request.reset_stream();
            }

            let outcome = match self.client.send(&mut request).await {
                Ok(response)
                    if response.finish_reason
                        == crate::translation::FinishReason::ContentFilter =>
                {
                    Err(TranslationError::ContentFilter)
                }
                Ok(response) => {
                    let mut translation = Translation::from_response(&response);
                    let text = if attempt > 0 {
                        TranslationParser::repair(&translation.text)
                    } else {
                        translation.text.clone()
                    };
                    translation.text = text;
                    TranslationParser::parse_into(&mut translation);

                    if !translation.has_lines() {
                        Err(TranslationError::ResponseError(
                            "No translated lines in response".to_string(),
                        ))
                    } else {
                        let mut violations = self.validator.validate(originals, &translation);
                        if violations.is_empty() {
                            Ok(translation)
                        } else {
                            Err(TranslationError::Validation(violations.swap_remove(0)))
                        }
                    }
                }
                Err(error) => Err(error),
            };

            match outcome {
                Ok(translation) => return Ok(translation),
                Err(error) => {
                    if !error.is_retryable() || attempt >= self.max_retries || self.is_aborted() {
                        return Err(error);
                    }

                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "Batch ({scene_number},{batch_number}) attempt {} failed ({error}), retrying in {:.1}s",
                        attempt + 1,
                        delay.as_secs_f64()
                    );

                    if let Some(instructions) = &self.retry_instructions {
                        if matches!(
                            error,
                            TranslationError::Validation(_) | TranslationError::ResponseError(_)
                        ) {
                            request.prompt.append_retry_instructions(instructions);
                        }
                    }

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Apply a parsed translation to its batch under the editor scope
    fn apply_translation(
        &self,
        subtitles: &SharedSubtitles,
        scene_number: u32,
        batch_number: u32,
        translation: &Translation,
    ) -> Result<(), TranslationError> {
        let mut editor = SubtitleEditor::new(subtitles);

        if let Some(summary) = &translation.scene_summary {
            let scene = editor.get_scene_mut(scene_number)?;
            if scene.summary.is_none() {
                scene.summary = Some(summary.clone());
            }
        }

        let batch = editor.get_batch_mut(scene_number, batch_number)?;
        for (number, text) in &translation.lines {
            batch.set_line_translation(*number, text);
        }
        batch.translation = Some(translation.text.clone());
        if translation.summary.is_some() {
            batch.summary = translation.summary.clone();
        }

        Ok(())
    }

    /// Re-interpret a batch's stored raw response without contacting the
    /// provider.
    pub fn reparse_batch_translation(
        &self,
        subtitles: &SharedSubtitles,
        scene_number: u32,
        batch_number: u32,
    ) -> Result<(), TranslationError> {
        let (text, originals) = {
            let guard = subtitles.lock();
            let batch = guard.get_batch(scene_number, batch_number)?;
            let text = batch.translation.clone().ok_or_else(|| {
                TranslationError::ResponseError(format!(
                    "Batch ({scene_number},{batch_number}) has no stored translation to reparse"
                ))
            })?;
            (text, batch.originals.clone())
        };

        let mut translation = Translation {
            text: TranslationParser::repair(&text),
            ..Default::default()
        };
        TranslationParser::parse_into(&mut translation);

        if !translation.has_lines() {
            return Err(TranslationError::ResponseError(
                "No translated lines in stored response".to_string(),
            ));
        }

        let violations = self.validator.validate(&originals, &translation);
        self.attach_violations(subtitles, scene_number, batch_number, &violations);

        self.apply_translation(subtitles, scene_number, batch_number, &translation)?;

        let snapshot = subtitles.lock().get_batch(scene_number, batch_number)?.clone();
        self.events.batch_updated.emit(&snapshot);
        Ok(())
    }

    fn build_prompt(&self) -> TranslationPrompt {
        let prompt = TranslationPrompt::from_settings(&self.settings, &BTreeMap::new());
        if self.client.uses_developer_role() {
            prompt.with_developer_role()
        } else {
            prompt
        }
    }

    /// Build the callback that applies streaming partials to the batch
    /// and emits batch_updated snapshots.
    fn streaming_callback(
        &self,
        subtitles: &SharedSubtitles,
        scene_number: u32,
        batch_number: u32,
    ) -> Option<StreamingCallback> {
        if !self.client.supports_streaming() {
            return None;
        }
        let stream_responses = self
            .settings
            .get_bool("stream_responses")
            .unwrap_or(None)
            .unwrap_or(false);
        if !stream_responses {
            return None;
        }

        let subtitles = subtitles.clone();
        let events = self.events.clone();
        Some(Arc::new(move |partial: &Translation| {
            let snapshot = {
                let mut editor = SubtitleEditor::new(&subtitles);
                let Ok(batch) = editor.get_batch_mut(scene_number, batch_number) else {
                    return;
                };
                for (number, text) in &partial.lines {
                    batch.set_line_translation(*number, text);
                }
                batch.clone()
            };
            events.batch_updated.emit(&snapshot);
        }))
    }

    fn record_batch_error(
        &self,
        subtitles: &SharedSubtitles,
        scene_number: u32,
        batch_number: u32,
        error: &TranslationError,
    ) {
        let mut editor = SubtitleEditor::new(subtitles);
        if let Ok(batch) = editor.get_batch_mut(scene_number, batch_number) {
            batch.errors.push(error.to_string());
        }
    }

    fn attach_violations(
        &self,
        subtitles: &SharedSubtitles,
        scene_number: u32,
        batch_number: u32,
        violations: &[crate::errors::ValidationError],
    ) {
        if violations.is_empty() {
            return;
        }
        let mut editor = SubtitleEditor::new(subtitles);
        if let Ok(batch) = editor.get_batch_mut(scene_number, batch_number) {
            for violation in violations {
                batch.errors.push(violation.to_string());
            }
        }
    }

    /// Record a batch summary in the rolling context, bounded by the
    /// configured window.
    fn push_history(&self, translation: &Translation) {
        let Some(summary) = &translation.summary else {
            return;
        };
        let mut history = self.history.lock();
        history.push(summary.clone());
        let excess = history.len().saturating_sub(self.context_window);
        if excess > 0 {
            history.drain(..excess);
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.backoff_time
            .saturating_mul(multiplier)
            .min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_shouldDoubleAndCap() {
        let settings = Settings::from_pairs([(
            "backoff_time",
            crate::settings::SettingValue::from(Duration::from_secs(4)),
        )]);
        let translator = SubtitleTranslator::new(
            settings,
            Arc::new(crate::providers::MockTranslationClient::echo()),
        );

        assert_eq!(translator.backoff_delay(0), Duration::from_secs(4));
        assert_eq!(translator.backoff_delay(1), Duration::from_secs(8));
        assert_eq!(translator.backoff_delay(2), Duration::from_secs(16));
        assert_eq!(translator.backoff_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn test_push_history_shouldBoundWindow() {
        let settings = Settings::from_pairs([("max_context_summaries", 2_usize)]);
        let translator = SubtitleTranslator::new(
            settings,
            Arc::new(crate::providers::MockTranslationClient::echo()),
        );

        for index in 0..4 {
            translator.push_history(&Translation {
                summary: Some(format!("summary {index}")),
                ..Default::default()
            });
        }

        let history = translator.history.lock();
        assert_eq!(*history, vec!["summary 2".to_string(), "summary 3".to_string()]);
    }
}
