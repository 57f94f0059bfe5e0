/*!
 * Shared helpers for the integration test suite
 */

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use subtrans::model::{SubtitleBuilder, Subtitles};
use subtrans::settings::{SettingValue, Settings};

/// A small SRT document with two scenes worth of lines
pub const SAMPLE_SRT: &str = "1\n00:00:01,000 --> 00:00:02,000\nFirst line\n\n2\n00:00:03,000 --> 00:00:04,000\nSecond line\n\n3\n00:02:00,000 --> 00:02:01,000\nThird line\n\n4\n00:02:02,000 --> 00:02:03,000\nFourth line\n";

/// Build a batched subtitle tree: scene 1 with lines 1-2, scene 2 with
/// lines 3-4, one batch each.
pub fn batched_subtitles() -> Arc<Mutex<Subtitles>> {
    let subtitles = SubtitleBuilder::new(1, 10)
        .add_scene(None)
        .line(Duration::from_secs(1), Duration::from_secs(2), "First line")
        .line(Duration::from_secs(3), Duration::from_secs(4), "Second line")
        .add_scene(None)
        .line(Duration::from_secs(120), Duration::from_secs(121), "Third line")
        .line(Duration::from_secs(122), Duration::from_secs(123), "Fourth line")
        .build();
    Arc::new(Mutex::new(subtitles))
}

/// Translator settings tuned for fast tests: no backoff to speak of
pub fn fast_translator_settings() -> Settings {
    Settings::from_pairs([
        ("target_language", SettingValue::from("French")),
        ("instructions", SettingValue::from("Translate the subtitles.")),
        (
            "backoff_time",
            SettingValue::from(Duration::from_millis(10)),
        ),
        ("max_retries", SettingValue::from(2_usize)),
    ])
}
