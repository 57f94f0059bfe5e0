/*!
 * Registry lifecycle tests.
 *
 * The format registry is process-wide state, so the clear/register/
 * disable-autodiscovery hooks are exercised in a dedicated test binary
 * where nothing else touches the registry concurrently.
 */

use std::sync::Arc;

use subtrans::errors::SubtitleError;
use subtrans::formats::{
    SubtitleData, SubtitleFileHandler, SubtitleFormatRegistry, VttFileHandler,
};

/// A trivial handler used to test runtime registration and priorities
struct PlainTextHandler;

impl SubtitleFileHandler for PlainTextHandler {
    fn format_name(&self) -> &'static str {
        "PlainText"
    }

    fn extension_priorities(&self) -> &'static [(&'static str, i32)] {
        // Outranks the built-in VTT handler on its extension
        &[(".txt", 1), (".vtt", 99)]
    }

    fn parse_string(&self, _content: &str) -> Result<SubtitleData, SubtitleError> {
        Ok(SubtitleData::default())
    }

    fn compose(&self, _data: &SubtitleData) -> Result<String, SubtitleError> {
        Ok(String::new())
    }

    fn accepts_content(&self, _content: &str) -> bool {
        false
    }
}

#[test]
fn test_registry_lifecycle_withClearRegisterAndPriorities() {
    // disable_autodiscovery leaves an empty registry
    SubtitleFormatRegistry::disable_autodiscovery();
    assert!(matches!(
        SubtitleFormatRegistry::get_handler_by_extension(".srt"),
        Err(SubtitleError::UnknownFormat { .. })
    ));
    assert_eq!(SubtitleFormatRegistry::list_available_formats(), "None");

    // Runtime registration takes effect immediately
    SubtitleFormatRegistry::register_handler(Arc::new(PlainTextHandler));
    assert_eq!(
        SubtitleFormatRegistry::get_handler_by_extension(".txt")
            .unwrap()
            .format_name(),
        "PlainText"
    );

    // clear() re-enables autodiscovery of the built-ins
    SubtitleFormatRegistry::clear();
    assert_eq!(
        SubtitleFormatRegistry::get_handler_by_extension(".srt")
            .unwrap()
            .format_name(),
        "SRT"
    );

    // A higher-priority handler takes an extension over a built-in
    SubtitleFormatRegistry::register_handler(Arc::new(PlainTextHandler));
    assert_eq!(
        SubtitleFormatRegistry::get_handler_by_extension(".vtt")
            .unwrap()
            .format_name(),
        "PlainText"
    );

    // A lower-priority registration does not displace the winner
    SubtitleFormatRegistry::register_handler(Arc::new(VttFileHandler::new()));
    assert_eq!(
        SubtitleFormatRegistry::get_handler_by_extension(".vtt")
            .unwrap()
            .format_name(),
        "PlainText"
    );

    // The .txt registration is untouched throughout
    assert_eq!(
        SubtitleFormatRegistry::get_handler_by_extension("TXT")
            .unwrap()
            .format_name(),
        "PlainText"
    );
}
