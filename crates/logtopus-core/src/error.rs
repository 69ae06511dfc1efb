//! Error types and result aliases for Logtopus.
//!
//! Errors are structured so the API layer can map each failure class to a
//! stable HTTP status without string matching.

/// The result type used throughout Logtopus.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Logtopus core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An event could not be encoded into a point.
    #[error("encoding error: {message}")]
    Encoding {
        /// Description of the encoding failure.
        message: String,
    },

    /// A storage operation failed before the store answered.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The store answered with a non-success status.
    #[error("store rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status returned by the store.
        status: u16,
        /// Message reported by the store.
        message: String,
    },

    /// The store reported an error while evaluating a query.
    #[error("query error: {message}")]
    Query {
        /// Description of the query failure.
        message: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source error.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new query error.
    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::storage_with_source("write failed", io);
        assert!(err.to_string().contains("write failed"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn rejected_display_includes_status() {
        let err = Error::Rejected {
            status: 422,
            message: "unable to parse points".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "store rejected request (422): unable to parse points"
        );
    }
}
