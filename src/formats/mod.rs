/*!
 * Subtitle file formats.
 *
 * Each format implements `SubtitleFileHandler`, parsing file content
 * into `SubtitleData` (lines plus file-level metadata) and composing it
 * back. Handlers are looked up through the process-wide
 * `SubtitleFormatRegistry`, by extension or by content sniffing.
 *
 * Format-specific features that the translation pipeline does not touch
 * (VTT cue settings, ASS styles, ...) travel through the metadata maps
 * so a parse/compose round-trip is lossless.
 */

mod ass;
mod data;
mod registry;
mod srt;
mod vtt;

use std::path::Path;

use once_cell::sync::Lazy;

use crate::errors::SubtitleError;

pub use ass::{AssFileHandler, Color};
pub use data::SubtitleData;
pub use registry::SubtitleFormatRegistry;
pub use srt::SrtFileHandler;
pub use vtt::VttFileHandler;

/// Default encoding for reading subtitle files, from `DEFAULT_ENCODING`
pub static DEFAULT_ENCODING: Lazy<String> =
    Lazy::new(|| std::env::var("DEFAULT_ENCODING").unwrap_or_else(|_| "utf-8".to_string()));

/// Fallback encoding when the default fails, from `FALLBACK_ENCODING`
pub static FALLBACK_ENCODING: Lazy<String> =
    Lazy::new(|| std::env::var("FALLBACK_ENCODING").unwrap_or_else(|_| "iso-8859-1".to_string()));

/// Interface for reading and writing a subtitle format
pub trait SubtitleFileHandler: Send + Sync {
    /// Short display name of the format ("SRT", "WebVTT", ...)
    fn format_name(&self) -> &'static str;

    /// Supported extensions with registration priority; higher priority
    /// wins when two handlers claim the same extension
    fn extension_priorities(&self) -> &'static [(&'static str, i32)];

    /// Parse string content into lines and file-level metadata
    fn parse_string(&self, content: &str) -> Result<SubtitleData, SubtitleError>;

    /// Compose subtitle data back into file content
    fn compose(&self, data: &SubtitleData) -> Result<String, SubtitleError>;

    /// Whether the content looks like this format, for sniffing
    fn accepts_content(&self, content: &str) -> bool;

    /// Extensions supported by this handler
    fn file_extensions(&self) -> Vec<&'static str> {
        self.extension_priorities()
            .iter()
            .map(|(ext, _)| *ext)
            .collect()
    }

    /// Open and parse a subtitle file, trying the default encoding first
    /// and falling back to the configured fallback encoding on decode
    /// failure.
    fn load_file(&self, path: &Path) -> Result<SubtitleData, SubtitleError> {
        let bytes = std::fs::read(path)?;
        let content = decode_with_fallback(&bytes)?;
        self.parse_string(&content)
    }
}

/// Decode bytes with the default encoding, retrying with the fallback
/// encoding when the default produces decode errors.
pub fn decode_with_fallback(bytes: &[u8]) -> Result<String, SubtitleError> {
    let default = encoding_rs::Encoding::for_label(DEFAULT_ENCODING.as_bytes())
        .unwrap_or(encoding_rs::UTF_8);
    let (decoded, _, had_errors) = default.decode(bytes);
    if !had_errors {
        return Ok(decoded.into_owned());
    }

    let fallback = encoding_rs::Encoding::for_label(FALLBACK_ENCODING.as_bytes())
        .unwrap_or(encoding_rs::WINDOWS_1252);
    let (decoded, _, had_errors) = fallback.decode(bytes);
    if had_errors {
        return Err(SubtitleError::parse(format!(
            "Could not decode subtitle file with {} or {}",
            DEFAULT_ENCODING.as_str(),
            FALLBACK_ENCODING.as_str()
        )));
    }
    Ok(decoded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_with_fallback_withLatin1Bytes_shouldDecode() {
        // "café" in ISO-8859-1, invalid as UTF-8
        let bytes = [0x63, 0x61, 0x66, 0xE9];
        let decoded = decode_with_fallback(&bytes).unwrap();
        assert_eq!(decoded, "café");
    }

    #[test]
    fn test_decode_with_fallback_withUtf8Bytes_shouldDecodeDirectly() {
        let decoded = decode_with_fallback("café".as_bytes()).unwrap();
        assert_eq!(decoded, "café");
    }
}
