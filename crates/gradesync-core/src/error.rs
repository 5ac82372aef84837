use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Response bodies kept in errors are cut to this many characters.
pub const MAX_ERROR_BODY_CHARS: usize = 2000;

/// Unknown select values shown per field in a schema violation report.
pub const MAX_UNKNOWN_PREVIEW: usize = 20;

/// How a failed remote call should be treated by callers.
///
/// Decided once, where the HTTP response is received, so that the crawler,
/// the retry policy and the wipe engine never inspect raw status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 429 and 5xx gateway/availability errors; worth retrying.
    Transient,
    /// 401/403; optional capabilities degrade instead of failing.
    Permission,
    /// 404.
    NotFound,
    /// Everything else.
    Fatal,
}

impl ErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            429 | 500 | 502 | 503 | 504 => ErrorKind::Transient,
            401 | 403 => ErrorKind::Permission,
            404 => ErrorKind::NotFound,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Permission => write!(f, "permission"),
            ErrorKind::NotFound => write!(f, "not-found"),
            ErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// Unknown single-select values found for one table, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownSelectValues(pub BTreeMap<String, Vec<String>>);

impl fmt::Display for UnknownSelectValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (field, values) in &self.0 {
            let preview: Vec<&str> = values
                .iter()
                .take(MAX_UNKNOWN_PREVIEW)
                .map(String::as_str)
                .collect();
            let more = if values.len() > MAX_UNKNOWN_PREVIEW {
                " ..."
            } else {
                ""
            };
            write!(f, "\n  - field '{}': add options {:?}{}", field, preview, more)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP {status} ({kind}) from {url}: {body}")]
    Http {
        status: u16,
        kind: ErrorKind,
        url: String,
        body: String,
    },

    #[error("Transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "{table}: missing single-select options detected:{unknown}\n  \
         Add these options in the target store (or change the field to plain text), \
         or enable schema.allow_select_fallback to coerce unknown values."
    )]
    SchemaViolation {
        table: String,
        unknown: UnknownSelectValues,
    },

    #[error("{table}: batch {batch} failed (first record: {first_row}): {source}")]
    BatchWrite {
        table: String,
        batch: usize,
        first_row: String,
        #[source]
        source: Box<SyncError>,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl SyncError {
    /// Build an HTTP error from a non-2xx response, truncating the body.
    pub fn http(status: u16, url: impl Into<String>, body: &str) -> Self {
        SyncError::Http {
            status,
            kind: ErrorKind::from_status(status),
            url: url.into(),
            body: truncate_chars(body, MAX_ERROR_BODY_CHARS),
        }
    }

    pub fn transport(url: impl Into<String>, source: impl fmt::Display) -> Self {
        SyncError::Transport {
            url: url.into(),
            message: source.to_string(),
        }
    }

    /// Classification used by retry and degradation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Http { kind, .. } => *kind,
            SyncError::BatchWrite { source, .. } => source.kind(),
            _ => ErrorKind::Fatal,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Http { status, .. } => Some(*status),
            SyncError::BatchWrite { source, .. } => source.status(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Truncate on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
