/*!
 * Error types for the subtrans library.
 *
 * This module contains custom error types for the subtitle model, the
 * format handlers and the translation pipeline, using the thiserror
 * crate for ergonomic error definitions.
 */

use thiserror::Error;

/// Errors raised by the subtitle model, editor and file handlers
#[derive(Error, Debug)]
pub enum SubtitleError {
    /// The file or string could not be parsed as a subtitle format
    #[error("Failed to parse subtitles: {0}")]
    ParseError(String),

    /// A setting value could not be converted to the requested type
    #[error("Invalid setting '{key}': {message}")]
    SettingsError {
        /// The settings key that failed conversion
        key: String,
        /// What went wrong
        message: String,
    },

    /// A lookup or mutation contract was violated
    #[error("{0}")]
    InvalidOperation(String),

    /// An unknown subtitle format was requested
    #[error("Unknown subtitle format: {extension}. Available formats: {available}")]
    UnknownFormat {
        /// The extension that failed to resolve
        extension: String,
        /// Formats currently registered
        available: String,
    },

    /// Error from a file operation
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

impl SubtitleError {
    /// Shorthand for an `InvalidOperation` error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Shorthand for a `ParseError`
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError(message.into())
    }
}

/// Validation failures for a translated batch.
///
/// These are attached to the batch that produced them and may trigger a
/// retry with additional instructions when retries remain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Translated line numbers with no matching original
    #[error("Translated lines {0:?} do not match any original line")]
    UnmatchedLines(Vec<u32>),

    /// Translated lines with empty text where the original was not blank
    #[error("Translated lines {0:?} have no text")]
    EmptyLines(Vec<u32>),

    /// Translated lines exceeding the character limit
    #[error("Translated lines {lines:?} exceed {limit} characters")]
    LineTooLong {
        /// Offending line numbers
        lines: Vec<u32>,
        /// The configured maximum
        limit: usize,
    },

    /// Translated lines with too many line breaks
    #[error("Translated lines {lines:?} have more than {limit} line breaks")]
    TooManyNewlines {
        /// Offending line numbers
        lines: Vec<u32>,
        /// The configured maximum
        limit: usize,
    },

    /// Original lines that received no translation
    #[error("Lines {0:?} were not translated")]
    UntranslatedLines(Vec<u32>),
}

impl ValidationError {
    fn lines(&self) -> &[u32] {
        match self {
            Self::UnmatchedLines(lines) => lines,
            Self::EmptyLines(lines) => lines,
            Self::LineTooLong { lines, .. } => lines,
            Self::TooManyNewlines { lines, .. } => lines,
            Self::UntranslatedLines(lines) => lines,
        }
    }

    /// Number of lines affected by this validation failure
    pub fn line_count(&self) -> usize {
        self.lines().len()
    }
}

/// Errors that can occur during translation
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Terminal failure, the translation run cannot continue
    #[error("Translation is impossible: {0}")]
    Impossible(String),

    /// The provider settings are invalid and need user attention
    #[error("Provider configuration error: {0}")]
    ProviderConfiguration(String),

    /// The run was cancelled cooperatively
    #[error("Translation aborted")]
    Aborted,

    /// The provider returned a bad or empty response
    #[error("Bad response from provider: {0}")]
    ResponseError(String),

    /// The provider rejected the request (HTTP 4xx)
    #[error("Client error {status}: {message}")]
    ClientResponse {
        /// HTTP status code
        status: u16,
        /// Error body from the provider
        message: String,
    },

    /// The provider or transport failed (HTTP 5xx, timeout, connection)
    #[error("Server error: {0}")]
    ServerResponse(String),

    /// The response was refused by the provider's content filter
    #[error("Translation blocked by content filter")]
    ContentFilter,

    /// The translated batch failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Error from the subtitle model or file handlers
    #[error("Subtitle error: {0}")]
    Subtitle(#[from] SubtitleError),
}

impl TranslationError {
    /// Whether the translator's per-batch retry loop may retry after this error.
    ///
    /// Validation errors are retryable because a reparse with retry
    /// instructions can repair them; 4xx responses, configuration errors,
    /// content filters and aborts are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ResponseError(_) | Self::ServerResponse(_) | Self::Validation(_) => true,
            Self::Impossible(_)
            | Self::ProviderConfiguration(_)
            | Self::Aborted
            | Self::ClientResponse { .. }
            | Self::ContentFilter
            | Self::Subtitle(_) => false,
        }
    }

    /// Whether this error must abort the whole run regardless of the
    /// stop_on_error setting.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Impossible(_) | Self::ProviderConfiguration(_) | Self::Aborted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification_withServerAndClientErrors_shouldMatchPolicy() {
        assert!(TranslationError::ServerResponse("timeout".to_string()).is_retryable());
        assert!(TranslationError::ResponseError("empty".to_string()).is_retryable());
        assert!(
            TranslationError::Validation(ValidationError::UntranslatedLines(vec![1]))
                .is_retryable()
        );

        let client_err = TranslationError::ClientResponse {
            status: 400,
            message: "bad request".to_string(),
        };
        assert!(!client_err.is_retryable());
        assert!(!TranslationError::Aborted.is_retryable());
        assert!(!TranslationError::ContentFilter.is_retryable());
    }

    #[test]
    fn test_fatal_classification_withTerminalErrors_shouldAbortRun() {
        assert!(TranslationError::Impossible("gave up".to_string()).is_fatal());
        assert!(TranslationError::ProviderConfiguration("no key".to_string()).is_fatal());
        assert!(TranslationError::Aborted.is_fatal());
        assert!(!TranslationError::ServerResponse("500".to_string()).is_fatal());
    }
}
