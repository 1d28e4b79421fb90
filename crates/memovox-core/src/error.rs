use thiserror::Error;

/// Top-level error type for the memovox store.
///
/// `NotFound`, `InvalidArgument` and `StorageUnavailable` are the failures a
/// CRUD caller sees. `SchemaUnrecognized` is fatal at startup.
/// `ImportPartialFailure` describes a single skipped record during legacy
/// import or the consistency sweep and is logged rather than propagated.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MemovoxError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Unrecognized schema: {0}")]
    SchemaUnrecognized(String),

    #[error("Skipped record {id}: {reason}")]
    ImportPartialFailure { id: String, reason: String },

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemovoxError {
    pub fn memo_not_found(id: impl Into<String>) -> Self {
        MemovoxError::NotFound {
            kind: "Memo",
            id: id.into(),
        }
    }

    pub fn report_not_found(id: impl Into<String>) -> Self {
        MemovoxError::NotFound {
            kind: "Report",
            id: id.into(),
        }
    }

    /// Whether the error leaves the store unusable for the rest of the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MemovoxError::StorageUnavailable(_) | MemovoxError::SchemaUnrecognized(_)
        )
    }
}

impl From<toml::de::Error> for MemovoxError {
    fn from(err: toml::de::Error) -> Self {
        MemovoxError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for MemovoxError {
    fn from(err: toml::ser::Error) -> Self {
        MemovoxError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for MemovoxError {
    fn from(err: serde_json::Error) -> Self {
        MemovoxError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for memovox operations.
pub type Result<T> = std::result::Result<T, MemovoxError>;
