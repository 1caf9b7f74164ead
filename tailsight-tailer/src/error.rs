//! Error types for the tailer.

use thiserror::Error;

/// Result type alias using [`TailError`].
pub type Result<T> = std::result::Result<T, TailError>;

/// Errors that can occur while following a log file.
///
/// None of these are fatal: the tailer turns every one of them into a
/// backoff and a later reopen attempt.
#[derive(Error, Debug)]
pub enum TailError {
    /// The log file path does not resolve.
    #[error("Log file unavailable: {path}")]
    FileUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Any other I/O failure while opening, reading or seeking.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TailError {
    /// Whether this error means the file is simply not there (yet).
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TailError::FileUnavailable { .. })
    }
}
