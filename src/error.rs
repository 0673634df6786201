//! Error types for feedgrab.
//!
//! Everything below `main` returns [`Result`].  Callers decide the recovery
//! scope: an item failure is recorded against that item, a feed failure
//! against its subscription, and nothing crosses a subscription boundary.

use thiserror::Error;

/// Result type alias for feedgrab operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for feedgrab.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}{}", at_key(.key))]
    Config {
        /// Human-readable description of the problem
        message: String,
        /// The configuration key that caused the error (e.g. "subscriptions[0].regex")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP failure (connect, timeout, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered, but not with a success status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Numeric status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Feed body could not be parsed as RSS
    #[error("feed parse error: {0}")]
    Feed(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A subscription filter is not a valid regular expression
    #[error("invalid filter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The cron expression could not be parsed
    #[error("invalid schedule: {0}")]
    Schedule(#[from] cron::error::Error),

    /// A feed item lacks a field required to download it
    #[error("item '{title}' has no {field}")]
    MissingField {
        /// Title of the offending item
        title: String,
        /// Name of the missing field
        field: &'static str,
    },

    /// An item title cannot be turned into a file name
    #[error("title '{0}' does not yield a usable file name")]
    InvalidTitle(String),
}

fn at_key(key: &Option<String>) -> String {
    key.as_deref().map(|k| format!(" (at {k})")).unwrap_or_default()
}

impl Error {
    /// Shorthand for a [`Error::Config`] tied to a specific key.
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_carries_key() {
        let err = Error::config("must not be empty", "cron");
        match &err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("cron")),
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(err.to_string(), "configuration error: must not be empty (at cron)");
    }

    #[test]
    fn missing_field_message_names_item() {
        let err = Error::MissingField {
            title: "Show.S01E01".into(),
            field: "link",
        };
        assert_eq!(err.to_string(), "item 'Show.S01E01' has no link");
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = std::io::Error::other("disk fail").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
