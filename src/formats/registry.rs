use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::errors::SubtitleError;
use crate::formats::{AssFileHandler, SrtFileHandler, SubtitleFileHandler, VttFileHandler};

struct RegistryState {
    handlers: HashMap<String, Arc<dyn SubtitleFileHandler>>,
    priorities: HashMap<String, i32>,
    discovered: bool,
}

static REGISTRY: Lazy<RwLock<RegistryState>> = Lazy::new(|| {
    RwLock::new(RegistryState {
        handlers: HashMap::new(),
        priorities: HashMap::new(),
        discovered: false,
    })
});

/// Process-wide lookup of subtitle file handlers.
///
/// The built-in handlers register on first use. Tests can `clear()` the
/// registry and register their own handlers, or call
/// `disable_autodiscovery()` to start from an empty state.
pub struct SubtitleFormatRegistry;

impl SubtitleFormatRegistry {
    /// Register a handler for all of its extensions. On a collision the
    /// higher priority wins; equal priority prefers the later handler.
    pub fn register_handler(handler: Arc<dyn SubtitleFileHandler>) {
        let mut registry = REGISTRY.write();
        for (extension, priority) in handler.extension_priorities() {
            let extension = extension.to_lowercase();
            let current = registry.priorities.get(&extension).copied();
            if current.is_none() || *priority >= current.unwrap_or(i32::MIN) {
                registry.handlers.insert(extension.clone(), handler.clone());
                registry.priorities.insert(extension, *priority);
            }
        }
    }

    /// Register the built-in handlers
    pub fn discover() {
        Self::register_handler(Arc::new(SrtFileHandler::new()));
        Self::register_handler(Arc::new(VttFileHandler::new()));
        Self::register_handler(Arc::new(AssFileHandler::new()));
        REGISTRY.write().discovered = true;
    }

    /// Remove all registered handlers and re-enable autodiscovery
    pub fn clear() {
        let mut registry = REGISTRY.write();
        registry.handlers.clear();
        registry.priorities.clear();
        registry.discovered = false;
    }

    /// Remove all handlers and mark discovery as done, so lookups see an
    /// empty registry until handlers are registered explicitly
    pub fn disable_autodiscovery() {
        Self::clear();
        REGISTRY.write().discovered = true;
    }

    fn ensure_discovered() {
        let discovered = REGISTRY.read().discovered;
        if !discovered {
            Self::discover();
        }
    }

    /// Find the handler registered for an extension, case-insensitively.
    /// The extension may be given with or without the leading dot.
    pub fn get_handler_by_extension(
        extension: &str,
    ) -> Result<Arc<dyn SubtitleFileHandler>, SubtitleError> {
        Self::ensure_discovered();

        let mut key = extension.to_lowercase();
        if !key.starts_with('.') {
            key = format!(".{key}");
        }

        REGISTRY
            .read()
            .handlers
            .get(&key)
            .cloned()
            .ok_or_else(|| SubtitleError::UnknownFormat {
                extension: extension.to_string(),
                available: Self::list_available_formats(),
            })
    }

    /// Find the handler for a file path by its extension
    pub fn handler_for_file(path: &Path) -> Result<Arc<dyn SubtitleFileHandler>, SubtitleError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| SubtitleError::UnknownFormat {
                extension: path.display().to_string(),
                available: Self::list_available_formats(),
            })?;
        Self::get_handler_by_extension(extension)
    }

    /// Canonical extension for a file path, if its format is registered
    pub fn get_format_from_filename(path: &Path) -> Option<String> {
        let extension = path.extension().and_then(|ext| ext.to_str())?;
        let key = format!(".{}", extension.to_lowercase());
        Self::ensure_discovered();
        REGISTRY.read().handlers.contains_key(&key).then_some(key)
    }

    /// All registered extensions, sorted
    pub fn enumerate_formats() -> Vec<String> {
        Self::ensure_discovered();
        let mut formats: Vec<String> = REGISTRY.read().handlers.keys().cloned().collect();
        formats.sort();
        formats
    }

    /// Human-readable list of registered extensions
    pub fn list_available_formats() -> String {
        let formats = {
            let registry = REGISTRY.read();
            let mut formats: Vec<String> = registry.handlers.keys().cloned().collect();
            formats.sort();
            formats
        };
        if formats.is_empty() {
            "None".to_string()
        } else {
            formats.join(", ")
        }
    }

    /// Sniff the content and return the accepting handler with the
    /// highest extension priority.
    pub fn detect_format_from_content(
        content: &str,
    ) -> Result<Arc<dyn SubtitleFileHandler>, SubtitleError> {
        Self::ensure_discovered();

        let registry = REGISTRY.read();
        let mut candidates: Vec<(&String, &Arc<dyn SubtitleFileHandler>)> =
            registry.handlers.iter().collect();
        candidates.sort_by_key(|(extension, _)| {
            std::cmp::Reverse(registry.priorities.get(*extension).copied().unwrap_or(0))
        });

        for (_, handler) in candidates {
            if handler.accepts_content(content) {
                return Ok(handler.clone());
            }
        }

        Err(SubtitleError::parse(
            "Could not detect subtitle format from content",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The registry is process-wide state shared by parallel tests, so the
    // assertions that rely on steady state avoid clear(), and the hook
    // exercises live in the dedicated integration suite.

    #[test]
    fn test_lookup_withMixedCaseExtension_shouldResolve() {
        let handler = SubtitleFormatRegistry::get_handler_by_extension(".SRT").unwrap();
        assert_eq!(handler.format_name(), "SRT");

        let handler = SubtitleFormatRegistry::get_handler_by_extension("vtt").unwrap();
        assert_eq!(handler.format_name(), "WebVTT");
    }

    #[test]
    fn test_lookup_withUnknownExtension_shouldFail() {
        let result = SubtitleFormatRegistry::get_handler_by_extension(".sub");
        assert!(matches!(result, Err(SubtitleError::UnknownFormat { .. })));
    }

    #[test]
    fn test_enumerate_formats_shouldIncludeBuiltins() {
        let formats = SubtitleFormatRegistry::enumerate_formats();
        for expected in [".ass", ".srt", ".ssa", ".vtt"] {
            assert!(formats.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_detection_shouldIdentifyEachFormat() {
        let srt = "1\n00:00:01,000 --> 00:00:02,000\nHello\n";
        assert_eq!(
            SubtitleFormatRegistry::detect_format_from_content(srt)
                .unwrap()
                .format_name(),
            "SRT"
        );

        let vtt = "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nHello\n";
        assert_eq!(
            SubtitleFormatRegistry::detect_format_from_content(vtt)
                .unwrap()
                .format_name(),
            "WebVTT"
        );

        let ass = "[Script Info]\nTitle: Test\n\n[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n";
        assert_eq!(
            SubtitleFormatRegistry::detect_format_from_content(ass)
                .unwrap()
                .format_name(),
            "ASS"
        );

        assert!(SubtitleFormatRegistry::detect_format_from_content("plain text").is_err());
    }
}
