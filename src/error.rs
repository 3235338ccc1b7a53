//! Error taxonomy shared by the crawl pipeline.
//!
//! Only [`CrawlError`] ever aborts a run. Everything else is contained at the
//! item, page or single-write scope and logged by the caller.
use std::fmt;
use thiserror::Error;

/// Fatal to the run; raised before any fetch is attempted.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Dns,
    Timeout,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Failure surfaced by the fetch collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transport error ({kind}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Page-level failure; stops pagination for the run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no embedded payload block found")]
    NoPayloadBlock,
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Item-level failure; the item is skipped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldExtractionError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Record-level store failure.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
