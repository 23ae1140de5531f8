//! Typed errors for fetching and reading segments.

use thiserror::Error;

/// Failure reported by a [`SegmentSource`](crate::SegmentSource).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Network trouble or throttling. Sources are expected to have already
    /// exhausted their own retry policy before returning this.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    /// Bad query, missing table, rejected credentials.
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Errors surfaced by the cursor and the reader to their caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadError {
    /// The fetch failed transiently; cursor state is unchanged and the call
    /// may be repeated.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),
    /// The fetch failed permanently; the cursor is now unusable.
    #[error("permanent fetch failure: {0}")]
    PermanentFetch(String),
    /// The caller's cancellation token fired while waiting on a fetch.
    #[error("read cancelled")]
    Cancelled,
    /// A previous permanent failure already terminated this cursor.
    #[error("cursor failed earlier and cannot be reused")]
    CursorFailed,
}

impl ReadError {
    /// True when repeating the call with a fresh cancellation token may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReadError::TransientFetch(_) | ReadError::Cancelled)
    }
}

impl From<FetchError> for ReadError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Transient(msg) => ReadError::TransientFetch(msg),
            FetchError::Permanent(msg) => ReadError::PermanentFetch(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_map_onto_read_errors() {
        let transient: ReadError = FetchError::Transient("503".into()).into();
        assert_eq!(transient, ReadError::TransientFetch("503".into()));
        assert!(transient.is_retryable());

        let permanent: ReadError = FetchError::Permanent("403".into()).into();
        assert_eq!(permanent, ReadError::PermanentFetch("403".into()));
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            FetchError::Permanent("table not found".into()).to_string(),
            "permanent fetch failure: table not found"
        );
        assert_eq!(ReadError::Cancelled.to_string(), "read cancelled");
        assert!(ReadError::Cancelled.is_retryable());
        assert!(!ReadError::CursorFailed.is_retryable());
    }
}
